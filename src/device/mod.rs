//! Watched device state
//!
//! Holds the latest snapshot of the observed sink and the one-shot change
//! flag raised by subscription events. Callbacks write here, the watch state
//! machine reads between pumps.

use libpulse_binding::context::introspect::SinkInfo;
use libpulse_binding::context::subscribe::{Facility, Operation as SubscriptionOperation};
use libpulse_binding::def::SinkFlagSet;

/// Volume and mute state of one sink, captured by a query
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceSnapshot {
    pub muted: bool,
    /// Sink exposes a decibel volume scale
    pub supports_decibel: bool,
    /// Raw per-channel volumes, in channel map order
    pub channel_volumes: Vec<u32>,
}

impl From<&SinkInfo<'_>> for DeviceSnapshot {
    fn from(info: &SinkInfo<'_>) -> Self {
        Self {
            muted: info.mute,
            supports_decibel: info.flags.contains(SinkFlagSet::DECIBEL_VOLUME),
            channel_volumes: info.volume.get().iter().map(|v| v.0).collect(),
        }
    }
}

/// State shared between server callbacks and the watch loop
#[derive(Debug, Clone, Default)]
pub struct WatchContext {
    observed_index: u32,
    snapshot: Option<DeviceSnapshot>,
    changed: bool,
}

impl WatchContext {
    pub fn new(observed_index: u32) -> Self {
        Self {
            observed_index,
            snapshot: None,
            changed: false,
        }
    }

    /// Latest snapshot; `None` until a query found the observed sink
    pub fn snapshot(&self) -> Option<&DeviceSnapshot> {
        self.snapshot.as_ref()
    }

    /// Store a query result, ignoring sinks other than the observed one
    pub fn record(&mut self, index: u32, snapshot: DeviceSnapshot) {
        if index == self.observed_index {
            self.snapshot = Some(snapshot);
        }
    }

    /// Apply a subscription event; returns whether it was accepted
    pub fn note_event(
        &mut self,
        facility: Option<Facility>,
        operation: Option<SubscriptionOperation>,
        index: u32,
    ) -> bool {
        let accepted = is_watched_change(facility, operation, index, self.observed_index);
        if accepted {
            self.changed = true;
        }
        accepted
    }

    /// Consume the change flag
    pub fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }
}

/// Only "changed" events for the observed sink concern us
pub fn is_watched_change(
    facility: Option<Facility>,
    operation: Option<SubscriptionOperation>,
    index: u32,
    observed_index: u32,
) -> bool {
    matches!(
        (facility, operation),
        (Some(Facility::Sink), Some(SubscriptionOperation::Changed))
    ) && index == observed_index
}
