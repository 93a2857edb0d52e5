//! Fatal error taxonomy
//!
//! Every condition that stops the monitor maps to its own exit status so
//! scripts wrapping the status bar block can tell them apart.

use libpulse_binding::error::PAErr;

/// Conditions that terminate the monitor
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("failed to allocate pulseaudio mainloop")]
    MainloopAllocation,

    // The standard mainloop binding hands out its API table infallibly, the
    // status stays reserved so the exit code table keeps its shape.
    #[allow(dead_code)]
    #[error("failed to allocate pulseaudio mainloop API")]
    ApiAllocation,

    #[error("failed to allocate pulseaudio context")]
    ContextAllocation,

    #[error("failed to connect to pulseaudio context: {0}")]
    Connect(#[source] PAErr),

    #[error("failed to connect to pulseaudio context")]
    ConnectionFailed,

    #[error("pulseaudio mainloop stopped iterating")]
    MainloopIterate,

    #[error("sink {index} does not exist")]
    DeviceNotFound { index: u32 },

    #[error("sink {index} does not support decibel; try without `-d`")]
    DecibelUnsupported { index: u32 },

    #[error("failed to write volume line: {0}")]
    Output(#[from] std::io::Error),

    #[error("failed to encode volume line: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("request issued while another one is still outstanding")]
    RequestOutstanding,
}

impl MonitorError {
    /// Process exit status for this condition
    pub fn exit_code(&self) -> u8 {
        match self {
            MonitorError::MainloopAllocation => 2,
            MonitorError::ApiAllocation => 3,
            MonitorError::ContextAllocation => 4,
            MonitorError::Connect(_) => 5,
            MonitorError::ConnectionFailed | MonitorError::MainloopIterate => 6,
            MonitorError::DeviceNotFound { .. } => 7,
            MonitorError::DecibelUnsupported { .. } => 8,
            MonitorError::Output(_) | MonitorError::Encode(_) => 9,
            MonitorError::RequestOutstanding => 10,
        }
    }
}

/// Exit status for a rejected command line
pub const USAGE_EXIT_CODE: u8 = 1;
