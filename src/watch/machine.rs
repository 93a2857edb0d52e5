//! Watch state machine implementation
//!
//! Every pass first checks connection readiness, then advances at most one
//! state, then pumps the server's event loop once. A request is only issued
//! into an empty pending slot and a state only advances once its request
//! reports completion.

use std::io::Write;

use tracing::{debug, info};

use crate::config::Config;
use crate::connection::{AudioServer, Readiness};
use crate::error::MonitorError;
use crate::format::format_line;

/// States of the device watch loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// Query the sink for the first time
    QueryInitial,
    /// Verify the sink exists and supports the requested scale
    CheckCapabilities,
    /// Print the first line and subscribe to sink events
    EmitAndSubscribe,
    /// Wait for a change to the observed sink
    Idle,
    /// Re-query the sink after a change
    QueryOnChange,
    /// Print the refreshed line
    EmitOnly,
}

impl std::fmt::Display for WatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchState::QueryInitial => write!(f, "QueryInitial"),
            WatchState::CheckCapabilities => write!(f, "CheckCapabilities"),
            WatchState::EmitAndSubscribe => write!(f, "EmitAndSubscribe"),
            WatchState::Idle => write!(f, "Idle"),
            WatchState::QueryOnChange => write!(f, "QueryOnChange"),
            WatchState::EmitOnly => write!(f, "EmitOnly"),
        }
    }
}

/// Slot holding the single outstanding request
struct Pending<R> {
    request: Option<R>,
}

impl<R> Pending<R> {
    fn new() -> Self {
        Self { request: None }
    }

    fn is_empty(&self) -> bool {
        self.request.is_none()
    }

    fn issue(&mut self, request: R) -> Result<(), MonitorError> {
        if self.request.is_some() {
            return Err(MonitorError::RequestOutstanding);
        }
        self.request = Some(request);
        Ok(())
    }

    /// Release the request if it has completed
    fn complete<S>(&mut self, server: &S) -> bool
    where
        S: AudioServer<Request = R>,
    {
        match &self.request {
            Some(request) if server.is_complete(request) => {
                self.request = None;
                true
            }
            _ => false,
        }
    }
}

/// Watches one sink and writes a line for every volume/mute change
pub struct DeviceWatcher<S: AudioServer, W> {
    server: S,
    config: Config,
    out: W,
    state: WatchState,
    pending: Pending<S::Request>,
    emitted: u64,
}

impl<S: AudioServer, W: Write> DeviceWatcher<S, W> {
    /// Create a watcher in the `QueryInitial` state
    pub fn new(server: S, config: Config, out: W) -> Self {
        Self {
            server,
            config,
            out,
            state: WatchState::QueryInitial,
            pending: Pending::new(),
            emitted: 0,
        }
    }

    /// Get the current state
    pub fn state(&self) -> WatchState {
        self.state
    }

    /// Run until a fatal condition
    pub fn run(&mut self) -> Result<(), MonitorError> {
        info!(index = self.config.observed_index, "watching sink");

        loop {
            self.step()?;
        }
    }

    /// One pass: readiness check, at most one advance, one pump
    pub fn step(&mut self) -> Result<(), MonitorError> {
        match self.server.readiness() {
            Readiness::Waiting => return self.server.pump(),
            Readiness::Failed => return Err(MonitorError::ConnectionFailed),
            Readiness::Ready => {}
        }

        self.advance()?;
        self.server.pump()
    }

    fn advance(&mut self) -> Result<(), MonitorError> {
        let index = self.config.observed_index;

        match self.state {
            WatchState::QueryInitial => {
                if self.pending.is_empty() {
                    let request = self.server.query_device(index);
                    self.pending.issue(request)?;
                } else if self.pending.complete(&self.server) {
                    self.transition(WatchState::CheckCapabilities)?;
                }
            }
            WatchState::CheckCapabilities => {
                let snapshot = self
                    .server
                    .snapshot()
                    .ok_or(MonitorError::DeviceNotFound { index })?;

                if self.config.use_decibel && !snapshot.supports_decibel {
                    return Err(MonitorError::DecibelUnsupported { index });
                }

                self.transition(WatchState::EmitAndSubscribe)?;
            }
            WatchState::EmitAndSubscribe => {
                if self.pending.complete(&self.server) {
                    self.transition(WatchState::Idle)?;
                }
            }
            WatchState::Idle => {
                if self.server.take_changed() {
                    self.transition(WatchState::QueryOnChange)?;
                }
            }
            WatchState::QueryOnChange => {
                if self.pending.complete(&self.server) {
                    self.transition(WatchState::EmitOnly)?;
                }
            }
            WatchState::EmitOnly => {
                self.transition(WatchState::Idle)?;
            }
        }

        Ok(())
    }

    /// Enter `next` and run its entry action
    fn transition(&mut self, next: WatchState) -> Result<(), MonitorError> {
        debug!(from = %self.state, to = %next, "watch state transition");
        self.state = next;

        match next {
            WatchState::EmitAndSubscribe => {
                self.emit()?;
                let request = self.server.subscribe_devices();
                self.pending.issue(request)?;
            }
            WatchState::QueryOnChange => {
                let request = self.server.query_device(self.config.observed_index);
                self.pending.issue(request)?;
            }
            WatchState::EmitOnly => self.emit()?,
            WatchState::QueryInitial | WatchState::CheckCapabilities | WatchState::Idle => {}
        }

        Ok(())
    }

    fn emit(&mut self) -> Result<(), MonitorError> {
        let index = self.config.observed_index;
        let snapshot = self
            .server
            .snapshot()
            .ok_or(MonitorError::DeviceNotFound { index })?;

        let line = format_line(&snapshot, &self.config)?;
        writeln!(self.out, "{line}")?;
        self.out.flush()?;

        self.emitted += 1;
        debug!(emitted = self.emitted, %line, "volume line written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::{HashSet, VecDeque};

    use libpulse_binding::context::subscribe::{Facility, Operation as SubscriptionOperation};

    use crate::device::{DeviceSnapshot, WatchContext};

    const HALF: u32 = 32768;
    const SEVENTY: u32 = 45875;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Issued {
        Query(u32),
        Subscribe,
    }

    /// In-memory server: requests complete on the next pump
    struct FakeServer {
        readiness: Readiness,
        sinks: Vec<(u32, DeviceSnapshot)>,
        watch: WatchContext,
        issued: Vec<Issued>,
        in_flight: Vec<(u32, Issued)>,
        completed: HashSet<u32>,
        next_id: u32,
        events: VecDeque<(Option<Facility>, Option<SubscriptionOperation>, u32)>,
        subscribed: bool,
        pumps: usize,
    }

    impl FakeServer {
        fn new(observed_index: u32) -> Self {
            Self {
                readiness: Readiness::Ready,
                sinks: Vec::new(),
                watch: WatchContext::new(observed_index),
                issued: Vec::new(),
                in_flight: Vec::new(),
                completed: HashSet::new(),
                next_id: 0,
                events: VecDeque::new(),
                subscribed: false,
                pumps: 0,
            }
        }

        fn with_sink(mut self, index: u32, snapshot: DeviceSnapshot) -> Self {
            self.sinks.push((index, snapshot));
            self
        }

        fn start(&mut self, issued: Issued) -> u32 {
            let id = self.next_id;
            self.next_id += 1;
            self.issued.push(issued);
            self.in_flight.push((id, issued));
            id
        }
    }

    impl AudioServer for FakeServer {
        type Request = u32;

        fn readiness(&self) -> Readiness {
            self.readiness
        }

        fn query_device(&mut self, index: u32) -> u32 {
            self.start(Issued::Query(index))
        }

        fn subscribe_devices(&mut self) -> u32 {
            self.start(Issued::Subscribe)
        }

        fn is_complete(&self, request: &u32) -> bool {
            self.completed.contains(request)
        }

        fn pump(&mut self) -> Result<(), MonitorError> {
            self.pumps += 1;

            for (id, issued) in std::mem::take(&mut self.in_flight) {
                match issued {
                    Issued::Query(index) => {
                        if let Some((_, snapshot)) = self.sinks.iter().find(|(i, _)| *i == index) {
                            self.watch.record(index, snapshot.clone());
                        }
                    }
                    Issued::Subscribe => self.subscribed = true,
                }
                self.completed.insert(id);
            }

            if self.subscribed {
                while let Some((facility, operation, index)) = self.events.pop_front() {
                    self.watch.note_event(facility, operation, index);
                }
            }

            Ok(())
        }

        fn snapshot(&self) -> Option<DeviceSnapshot> {
            self.watch.snapshot().cloned()
        }

        fn take_changed(&mut self) -> bool {
            self.watch.take_changed()
        }
    }

    fn snapshot(muted: bool, supports_decibel: bool) -> DeviceSnapshot {
        DeviceSnapshot {
            muted,
            supports_decibel,
            channel_volumes: vec![HALF, SEVENTY],
        }
    }

    fn units_config() -> Config {
        Config {
            show_units: true,
            ..Config::default()
        }
    }

    fn steps<S: AudioServer>(watcher: &mut DeviceWatcher<S, Vec<u8>>, n: usize) {
        for _ in 0..n {
            watcher.step().unwrap();
        }
    }

    fn output<S: AudioServer>(watcher: &DeviceWatcher<S, Vec<u8>>) -> String {
        String::from_utf8(watcher.out.clone()).unwrap()
    }

    fn sink_changed(index: u32) -> (Option<Facility>, Option<SubscriptionOperation>, u32) {
        (Some(Facility::Sink), Some(SubscriptionOperation::Changed), index)
    }

    #[test]
    fn test_initial_state() {
        let watcher = DeviceWatcher::new(FakeServer::new(0), Config::default(), Vec::new());
        assert_eq!(watcher.state(), WatchState::QueryInitial);
    }

    #[test]
    fn test_startup_emits_once_and_subscribes() {
        let server = FakeServer::new(0).with_sink(0, snapshot(false, false));
        let mut watcher = DeviceWatcher::new(server, units_config(), Vec::new());

        // issue query, complete -> check, check -> emit + subscribe, subscribed -> idle
        steps(&mut watcher, 4);

        assert_eq!(watcher.state(), WatchState::Idle);
        assert_eq!(output(&watcher), "60%\n");
        assert_eq!(watcher.server.issued, vec![Issued::Query(0), Issued::Subscribe]);
    }

    #[test]
    fn test_muted_startup_line() {
        let server = FakeServer::new(0).with_sink(0, snapshot(true, false));
        let mut watcher = DeviceWatcher::new(server, units_config(), Vec::new());

        steps(&mut watcher, 4);
        assert_eq!(output(&watcher), "0%\n");
    }

    #[test]
    fn test_muted_indicator_json_line() {
        let config = Config {
            show_units: true,
            show_mute_indicator: true,
            json_output: true,
            mute_color: "#FF0000".to_string(),
            ..Config::default()
        };
        let server = FakeServer::new(0).with_sink(0, snapshot(true, false));
        let mut watcher = DeviceWatcher::new(server, config, Vec::new());

        steps(&mut watcher, 4);
        assert_eq!(output(&watcher), "{\"full_text\":\"M 60%\",\"color\":\"#FF0000\"}\n");
    }

    #[test]
    fn test_missing_device_is_fatal() {
        let server = FakeServer::new(5).with_sink(0, snapshot(false, true));
        let config = Config {
            observed_index: 5,
            ..Config::default()
        };
        let mut watcher = DeviceWatcher::new(server, config, Vec::new());

        steps(&mut watcher, 2);
        assert_eq!(watcher.state(), WatchState::CheckCapabilities);

        let err = watcher.step().unwrap_err();
        assert!(matches!(err, MonitorError::DeviceNotFound { index: 5 }));
        assert!(output(&watcher).is_empty());
    }

    #[test]
    fn test_decibel_unsupported_is_fatal_before_output() {
        let server = FakeServer::new(0).with_sink(0, snapshot(false, false));
        let config = Config {
            use_decibel: true,
            ..Config::default()
        };
        let mut watcher = DeviceWatcher::new(server, config, Vec::new());

        steps(&mut watcher, 2);
        let err = watcher.step().unwrap_err();
        assert!(matches!(err, MonitorError::DecibelUnsupported { index: 0 }));
        assert!(output(&watcher).is_empty());
    }

    #[test]
    fn test_decibel_supported_emits() {
        let server = FakeServer::new(0).with_sink(0, snapshot(false, true));
        let config = Config {
            use_decibel: true,
            show_units: true,
            ..Config::default()
        };
        let mut watcher = DeviceWatcher::new(server, config, Vec::new());

        steps(&mut watcher, 4);
        assert!(output(&watcher).ends_with(" dB\n"));
    }

    #[test]
    fn test_change_event_requeries_and_emits() {
        let server = FakeServer::new(0).with_sink(0, snapshot(false, false));
        let mut watcher = DeviceWatcher::new(server, units_config(), Vec::new());
        steps(&mut watcher, 4);

        watcher.server.sinks[0].1.muted = true;
        watcher.server.events.push_back(sink_changed(0));
        // deliver event, idle -> query, complete -> emit, emit -> idle
        steps(&mut watcher, 4);

        assert_eq!(watcher.state(), WatchState::Idle);
        assert_eq!(output(&watcher), "60%\n0%\n");
        assert_eq!(
            watcher.server.issued,
            vec![Issued::Query(0), Issued::Subscribe, Issued::Query(0)]
        );
    }

    #[test]
    fn test_other_device_events_ignored() {
        let server = FakeServer::new(0)
            .with_sink(0, snapshot(false, false))
            .with_sink(1, snapshot(true, false));
        let mut watcher = DeviceWatcher::new(server, units_config(), Vec::new());
        steps(&mut watcher, 4);

        watcher.server.events.push_back(sink_changed(1));
        watcher
            .server
            .events
            .push_back((Some(Facility::SinkInput), Some(SubscriptionOperation::Changed), 0));
        watcher
            .server
            .events
            .push_back((Some(Facility::Sink), Some(SubscriptionOperation::Removed), 0));
        steps(&mut watcher, 6);

        assert_eq!(watcher.state(), WatchState::Idle);
        assert_eq!(output(&watcher), "60%\n");
        assert_eq!(watcher.server.issued, vec![Issued::Query(0), Issued::Subscribe]);
    }

    #[test]
    fn test_burst_of_events_coalesces() {
        let server = FakeServer::new(0).with_sink(0, snapshot(false, false));
        let mut watcher = DeviceWatcher::new(server, units_config(), Vec::new());
        steps(&mut watcher, 4);

        for _ in 0..3 {
            watcher.server.events.push_back(sink_changed(0));
        }
        steps(&mut watcher, 8);

        assert_eq!(output(&watcher).lines().count(), 2);
    }

    #[test]
    fn test_waiting_issues_nothing() {
        let mut server = FakeServer::new(0).with_sink(0, snapshot(false, false));
        server.readiness = Readiness::Waiting;
        let mut watcher = DeviceWatcher::new(server, units_config(), Vec::new());

        steps(&mut watcher, 3);
        assert_eq!(watcher.state(), WatchState::QueryInitial);
        assert!(watcher.server.issued.is_empty());
        assert_eq!(watcher.server.pumps, 3);

        watcher.server.readiness = Readiness::Ready;
        steps(&mut watcher, 4);
        assert_eq!(output(&watcher), "60%\n");
    }

    #[test]
    fn test_failed_connection_is_fatal_in_any_state() {
        for warmup in [0, 2, 4] {
            let server = FakeServer::new(0).with_sink(0, snapshot(false, false));
            let mut watcher = DeviceWatcher::new(server, units_config(), Vec::new());
            steps(&mut watcher, warmup);

            watcher.server.readiness = Readiness::Failed;
            let err = watcher.step().unwrap_err();
            assert!(matches!(err, MonitorError::ConnectionFailed));
        }
    }

    #[test]
    fn test_waits_for_completion() {
        struct SlowServer {
            inner: FakeServer,
            hold: bool,
        }

        impl AudioServer for SlowServer {
            type Request = u32;

            fn readiness(&self) -> Readiness {
                self.inner.readiness()
            }
            fn query_device(&mut self, index: u32) -> u32 {
                self.inner.query_device(index)
            }
            fn subscribe_devices(&mut self) -> u32 {
                self.inner.subscribe_devices()
            }
            fn is_complete(&self, request: &u32) -> bool {
                self.inner.is_complete(request)
            }
            fn pump(&mut self) -> Result<(), MonitorError> {
                if self.hold {
                    return Ok(());
                }
                self.inner.pump()
            }
            fn snapshot(&self) -> Option<DeviceSnapshot> {
                self.inner.snapshot()
            }
            fn take_changed(&mut self) -> bool {
                self.inner.take_changed()
            }
        }

        let server = SlowServer {
            inner: FakeServer::new(0).with_sink(0, snapshot(false, false)),
            hold: true,
        };
        let mut watcher = DeviceWatcher::new(server, units_config(), Vec::new());

        steps(&mut watcher, 5);
        assert_eq!(watcher.state(), WatchState::QueryInitial);
        assert_eq!(watcher.server.inner.issued, vec![Issued::Query(0)]);

        watcher.server.hold = false;
        steps(&mut watcher, 4);
        assert_eq!(watcher.state(), WatchState::Idle);
        assert_eq!(output(&watcher), "60%\n");
    }

    #[test]
    fn test_pending_slot_rejects_second_request() {
        let mut pending = Pending::new();
        pending.issue(1u32).unwrap();
        assert!(matches!(pending.issue(2), Err(MonitorError::RequestOutstanding)));
    }

    #[test]
    fn test_write_failure_is_fatal() {
        struct ClosedPipe;

        impl Write for ClosedPipe {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Err(std::io::ErrorKind::BrokenPipe.into())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let server = FakeServer::new(0).with_sink(0, snapshot(false, false));
        let mut watcher = DeviceWatcher::new(server, units_config(), ClosedPipe);

        watcher.step().unwrap();
        watcher.step().unwrap();
        let err = watcher.step().unwrap_err();
        assert!(matches!(err, MonitorError::Output(_)));
    }
}
