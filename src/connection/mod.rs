//! Audio server connection
//!
//! Provides the seam the watch state machine drives:
//! - Readiness: connection state reduced to waiting / ready / failed
//! - AudioServer: the asynchronous request surface of the server
//! - PulseConnection: the PulseAudio-backed connection supervisor

mod supervisor;

use libpulse_binding::context::State as ContextState;

use crate::device::DeviceSnapshot;
use crate::error::MonitorError;

pub use supervisor::PulseConnection;

/// Connection readiness as seen by the main loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Readiness {
    /// Still connecting, keep pumping
    #[default]
    Waiting,
    Ready,
    /// Failed or terminated; fatal
    Failed,
}

impl From<ContextState> for Readiness {
    fn from(state: ContextState) -> Self {
        match state {
            ContextState::Ready => Readiness::Ready,
            ContextState::Failed | ContextState::Terminated => Readiness::Failed,
            // unconnected, connecting, authorizing, setting name
            _ => Readiness::Waiting,
        }
    }
}

impl std::fmt::Display for Readiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Readiness::Waiting => write!(f, "waiting"),
            Readiness::Ready => write!(f, "ready"),
            Readiness::Failed => write!(f, "failed"),
        }
    }
}

/// Asynchronous operations the watch loop needs from the audio server
///
/// Requests complete inside `pump`; their callbacks write into the server's
/// watch context, which the loop reads through `snapshot` and `take_changed`.
pub trait AudioServer {
    /// Handle to an in-flight request
    type Request;

    /// Current connection readiness
    fn readiness(&self) -> Readiness;

    /// Ask for the volume and mute state of the sink at `index`
    fn query_device(&mut self, index: u32) -> Self::Request;

    /// Ask to receive sink change events
    fn subscribe_devices(&mut self) -> Self::Request;

    /// Whether the request has finished and its callback has run
    fn is_complete(&self, request: &Self::Request) -> bool;

    /// Run one event loop iteration, dispatching any callbacks
    fn pump(&mut self) -> Result<(), MonitorError>;

    /// Latest snapshot of the observed sink
    fn snapshot(&self) -> Option<DeviceSnapshot>;

    /// Consume the "observed sink changed" flag
    fn take_changed(&mut self) -> bool;
}
