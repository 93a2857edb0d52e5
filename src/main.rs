//! pulse-volume: PulseAudio sink volume printer for status bars
//!
//! Watches one sink and prints a line every time its volume or mute
//! state changes, for i3blocks-style status bar blocks:
//! - Connection supervisor for the PulseAudio client context
//! - Explicit state machine driving sink queries and the event subscription
//! - Plain text or i3bar JSON output, flushed per line
//!
//! Every fatal condition exits with its own status code.

mod config;
mod connection;
mod device;
mod error;
mod format;
mod watch;

use std::process::ExitCode;

use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::config::{parse_invocation, usage, Config, Invocation};
use crate::connection::PulseConnection;
use crate::error::{MonitorError, USAGE_EXIT_CODE};
use crate::watch::DeviceWatcher;

fn main() -> ExitCode {
    // stdout carries the status lines, diagnostics go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let prog = std::env::args_os()
        .next()
        .map(|arg0| arg0.to_string_lossy().into_owned())
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());

    let config = match parse_invocation(std::env::args_os()) {
        Ok(Invocation::Run(config)) => config,
        Ok(Invocation::Help) => {
            eprint!("{}", usage(&prog));
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("{prog}: {e:#}");
            eprint!("{}", usage(&prog));
            return ExitCode::from(USAGE_EXIT_CODE);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        ?config,
        "pulse-volume starting"
    );

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

/// Connect and watch until a fatal condition; the connection is released
/// before this returns.
fn run(config: Config) -> Result<(), MonitorError> {
    let connection = PulseConnection::connect(config.observed_index)?;
    let mut watcher = DeviceWatcher::new(connection, config, std::io::stdout());

    let result = watcher.run();
    if let Err(e) = &result {
        debug!(state = %watcher.state(), error = %e, "watch loop stopped");
    }
    result
}
