mod logging;

use std::cell::RefCell;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use fabricd_core::{Daemon, DaemonConfig, LoggingLoader};

use crate::logging::{init, LogFormat, LogLevel};

#[derive(Parser, Debug)]
#[command(name = "fabricd", version, about = "Peripheral daemon for FPGA fabric boards")]
struct Cli {
    /// Serial device connected to the board.
    #[arg(value_name = "DEVICE", env = "FABRICD_DEVICE", default_value = "/dev/ttyUSB0")]
    device: PathBuf,

    /// Serial line rate.
    #[arg(long, value_name = "BAUD", env = "FABRICD_BAUD", default_value_t = 115200)]
    baud: u32,

    /// Seconds to wait for each enumeration ROM response before restarting.
    #[arg(long, value_name = "SECS", default_value_t = 2)]
    guard_timeout: u64,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init(cli.log_format, cli.log_level);

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    if let Err(err) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        eprintln!("error: cannot install signal handler: {err}");
        return ExitCode::FAILURE;
    }

    let mut config = DaemonConfig::new(cli.device);
    config.baud = cli.baud;
    config.guard_timeout = Duration::from_secs(cli.guard_timeout);

    let loader = Rc::new(RefCell::new(LoggingLoader::new()));
    let mut daemon = match Daemon::new(config, loader, shutdown) {
        Ok(daemon) => daemon,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    daemon.run();
    ExitCode::SUCCESS
}
