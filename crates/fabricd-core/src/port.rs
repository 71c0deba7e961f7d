use std::cell::RefCell;
use std::io::{ErrorKind, Read, Write};
use std::rc::Rc;

use bytes::{Buf, Bytes, BytesMut};
use fabricd_frame::{encode_frame, encoded_len, FrameDecoder};
use fabricd_proto::Packet;

use crate::error::SendError;
use crate::send::PacketTx;

const READ_CHUNK_SIZE: usize = 1024;

/// The framer/send-primitive pair bound to one serial stream.
///
/// Owns the stream exclusively: inbound bytes flow through the frame
/// decoder, outbound packets are wire-encoded, framed, and written
/// non-blocking. Generic over the stream so tests can substitute in-memory
/// fakes.
pub struct LinkPort<T> {
    io: T,
    decoder: FrameDecoder,
    /// Tail of a partially written frame, flushed when the fd is writable.
    pending: BytesMut,
}

impl<T: Read + Write> LinkPort<T> {
    pub fn new(io: T) -> Self {
        Self {
            io,
            decoder: FrameDecoder::new(),
            pending: BytesMut::new(),
        }
    }

    /// Drain every readable byte and return the frames completed by them,
    /// in wire order. Returns an error when the device is gone (EOF or a
    /// fatal read error); `WouldBlock` ends the drain normally.
    pub fn poll_read(&mut self) -> std::io::Result<Vec<Bytes>> {
        let mut frames = Vec::new();
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.io.read(&mut chunk) {
                Ok(0) => {
                    return Err(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "serial device detached",
                    ))
                }
                Ok(n) => frames.extend(self.decoder.decode(&chunk[..n])),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(frames)
    }

    /// Frame and transmit one packet with a single non-blocking write.
    ///
    /// `Busy` means nothing was sent and the caller may retry later. If the
    /// kernel accepts only part of the frame, the remainder is parked in
    /// `pending` (the frame is committed at that point; dropping the tail
    /// would desynchronize the stream) and flushed on the next writable
    /// event.
    pub fn write_packet(&mut self, packet: &Packet) -> Result<(), SendError> {
        if !self.pending.is_empty() {
            self.flush_pending()?;
            if !self.pending.is_empty() {
                return Err(SendError::Busy);
            }
        }

        let mut wire = BytesMut::new();
        packet.to_wire(&mut wire);
        let mut out = BytesMut::with_capacity(encoded_len(&wire));
        encode_frame(&wire, &mut out);

        let mut offset = 0usize;
        while offset < out.len() {
            match self.io.write(&out[offset..]) {
                Ok(0) => return Err(SendError::Fatal(ErrorKind::WriteZero.into())),
                Ok(n) => offset += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if offset == 0 {
                        return Err(SendError::Busy);
                    }
                    self.pending.extend_from_slice(&out[offset..]);
                    return Ok(());
                }
                Err(e) => return Err(SendError::Fatal(e)),
            }
        }
        Ok(())
    }

    /// Write as much of the parked frame tail as the kernel will take.
    pub fn flush_pending(&mut self) -> Result<(), SendError> {
        while !self.pending.is_empty() {
            match self.io.write(&self.pending) {
                Ok(0) => return Err(SendError::Fatal(ErrorKind::WriteZero.into())),
                Ok(n) => self.pending.advance(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(SendError::Fatal(e)),
            }
        }
        Ok(())
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Framing violations observed on the inbound stream.
    pub fn violations(&self) -> u64 {
        self.decoder.violations()
    }

}

impl<T> LinkPort<T> {
    pub fn get_ref(&self) -> &T {
        &self.io
    }

    pub fn into_inner(self) -> T {
        self.io
    }
}

/// Cloneable handle to an attachable link slot.
///
/// The slot is empty while the device is missing (startup before open, USB
/// re-enumeration); sends during that window fail with `LinkDown`.
/// `attach` atomically replaces the whole port, which is the reconfiguration
/// path: tear down and rebuild link state in one step instead of mutating
/// descriptors in place.
pub struct PortHandle<T> {
    inner: Rc<RefCell<Option<LinkPort<T>>>>,
}

impl<T> Clone for PortHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> PortHandle<T> {
    /// A handle with no link attached.
    pub fn detached() -> Self {
        Self {
            inner: Rc::new(RefCell::new(None)),
        }
    }

    /// A handle starting out attached to `port`.
    pub fn attached(port: LinkPort<T>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Some(port))),
        }
    }

    /// Swap in a fresh port, dropping (and thereby closing) any old one.
    pub fn attach(&self, port: LinkPort<T>) {
        *self.inner.borrow_mut() = Some(port);
    }

    /// Remove and return the current port, leaving the slot empty.
    pub fn detach(&self) -> Option<LinkPort<T>> {
        self.inner.borrow_mut().take()
    }

    pub fn is_attached(&self) -> bool {
        self.inner.borrow().is_some()
    }
}

impl<T: Read + Write> PortHandle<T> {
    /// Drain readable frames; an empty slot yields no frames.
    pub fn poll_read(&self) -> std::io::Result<Vec<Bytes>> {
        match self.inner.borrow_mut().as_mut() {
            Some(port) => port.poll_read(),
            None => Ok(Vec::new()),
        }
    }

    pub fn flush_pending(&self) -> Result<(), SendError> {
        match self.inner.borrow_mut().as_mut() {
            Some(port) => port.flush_pending(),
            None => Ok(()),
        }
    }

    pub fn has_pending(&self) -> bool {
        self.inner
            .borrow()
            .as_ref()
            .is_some_and(LinkPort::has_pending)
    }
}

#[cfg(unix)]
impl<T: std::os::fd::AsRawFd> PortHandle<T> {
    /// Descriptor for the readiness loop, while attached.
    pub fn raw_fd(&self) -> Option<std::os::fd::RawFd> {
        self.inner.borrow().as_ref().map(|p| p.get_ref().as_raw_fd())
    }
}

impl<T: Read + Write> PacketTx for PortHandle<T> {
    fn send(&self, packet: &Packet) -> Result<(), SendError> {
        match self.inner.borrow_mut().as_mut() {
            Some(port) => port.write_packet(packet),
            None => Err(SendError::LinkDown),
        }
    }
}
