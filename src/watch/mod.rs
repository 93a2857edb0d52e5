//! Device watch module
//!
//! Drives the observed sink through an explicit state machine:
//! - QueryInitial: first sink info request
//! - CheckCapabilities: the sink exists and supports the requested scale
//! - EmitAndSubscribe: first line out, sink events subscribed
//! - Idle: waiting for a change event
//! - QueryOnChange: sink info re-requested after a change
//! - EmitOnly: refreshed line out

mod machine;

pub use machine::DeviceWatcher;
