use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{LinkError, Result};

/// One attached USB serial device, configured raw and non-blocking.
///
/// Reads return `WouldBlock` when no bytes are pending; writes return
/// `WouldBlock` when the OS buffer is full. The framer and send primitive
/// above this layer are built around those semantics.
pub struct SerialLink {
    file: File,
    path: PathBuf,
    baud: u32,
}

impl SerialLink {
    /// Open and configure the serial device at `path`.
    ///
    /// `O_NOCTTY` keeps the device from becoming the controlling terminal;
    /// `O_NONBLOCK` makes every read/write readiness-driven.
    pub fn open(path: impl AsRef<Path>, baud: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let speed = baud_constant(baud).ok_or(LinkError::UnsupportedBaud { baud })?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_NOCTTY)
            .open(&path)
            .map_err(|e| LinkError::Open {
                path: path.clone(),
                source: e,
            })?;

        configure_raw(file.as_raw_fd(), speed).map_err(|e| LinkError::Configure {
            path: path.clone(),
            source: e,
        })?;

        info!(?path, baud, "serial link attached");

        Ok(Self { file, path, baud })
    }

    /// Tear down and rebuild the link on the same device.
    ///
    /// Used after USB re-enumeration: the old descriptor is closed before
    /// the new one is configured, so no half-configured state is observable.
    pub fn reopen(&mut self) -> Result<()> {
        let fresh = Self::open(&self.path, self.baud)?;
        *self = fresh;
        Ok(())
    }

    /// The device path this link is attached to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configured baud rate.
    pub fn baud(&self) -> u32 {
        self.baud
    }
}

impl Read for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for SerialLink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl AsRawFd for SerialLink {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("path", &self.path)
            .field("baud", &self.baud)
            .finish()
    }
}

/// Put the descriptor into raw 8N1 mode at `speed`, VMIN=0/VTIME=0.
fn configure_raw(fd: RawFd, speed: libc::speed_t) -> std::io::Result<()> {
    // SAFETY: `termios` is a plain C struct zeroed before use; `fd` is an
    // open descriptor owned by this process for the duration of the calls.
    unsafe {
        let mut tio: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut tio) != 0 {
            return Err(std::io::Error::last_os_error());
        }
        libc::cfmakeraw(&mut tio);
        tio.c_cflag |= libc::CLOCAL | libc::CREAD;
        tio.c_cc[libc::VMIN] = 0;
        tio.c_cc[libc::VTIME] = 0;
        if libc::cfsetispeed(&mut tio, speed) != 0 {
            return Err(std::io::Error::last_os_error());
        }
        if libc::cfsetospeed(&mut tio, speed) != 0 {
            return Err(std::io::Error::last_os_error());
        }
        if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
            return Err(std::io::Error::last_os_error());
        }
        // Drop anything queued before we were configured.
        if libc::tcflush(fd, libc::TCIOFLUSH) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

fn baud_constant(baud: u32) -> Option<libc::speed_t> {
    match baud {
        9600 => Some(libc::B9600),
        19200 => Some(libc::B19200),
        38400 => Some(libc::B38400),
        57600 => Some(libc::B57600),
        115200 => Some(libc::B115200),
        230400 => Some(libc::B230400),
        _ => None,
    }
}
