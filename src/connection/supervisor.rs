//! PulseAudio connection supervisor
//!
//! Owns the standard (non-threaded) mainloop and the client context. All
//! callbacks run inside `pump` on the calling thread, so the shared watch
//! context only needs `Rc<RefCell<_>>`.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use libpulse_binding::callbacks::ListResult;
use libpulse_binding::context::introspect::SinkInfo;
use libpulse_binding::context::subscribe::InterestMaskSet;
use libpulse_binding::context::{Context, FlagSet};
use libpulse_binding::mainloop::standard::{IterateResult, Mainloop};
use libpulse_binding::operation::{Operation, State as OperationState};
use libpulse_binding::proplist::{properties, Proplist};
use tracing::{debug, info, warn};

use super::{AudioServer, Readiness};
use crate::device::{DeviceSnapshot, WatchContext};
use crate::error::MonitorError;

const CONTEXT_NAME: &str = "i3blocks-pulse-volume";
const APPLICATION_NAME: &str = "pulse-volume";

/// In-flight PulseAudio operation
pub enum PulseRequest {
    DeviceInfo(Operation<dyn FnMut(ListResult<&SinkInfo>)>),
    Subscribe(Operation<dyn FnMut(bool)>),
}

impl PulseRequest {
    fn state(&self) -> OperationState {
        match self {
            PulseRequest::DeviceInfo(op) => op.get_state(),
            PulseRequest::Subscribe(op) => op.get_state(),
        }
    }
}

/// Connection to the PulseAudio server
pub struct PulseConnection {
    // Fields drop in order: the context must go before its mainloop.
    context: Context,
    mainloop: Mainloop,
    watch: Rc<RefCell<WatchContext>>,
    /// Set by the context state callback, consumed after each pump
    state_changed: Rc<Cell<bool>>,
    readiness: Readiness,
}

impl PulseConnection {
    /// Create the mainloop and context and start a non-failing connect
    ///
    /// The client library keeps retrying transport-level reconnects on its
    /// own; readiness only turns `Failed` once it gives up.
    pub fn connect(observed_index: u32) -> Result<Self, MonitorError> {
        let mainloop = Mainloop::new().ok_or(MonitorError::MainloopAllocation)?;

        let mut proplist = Proplist::new().ok_or(MonitorError::ContextAllocation)?;
        proplist
            .set_str(properties::APPLICATION_NAME, APPLICATION_NAME)
            .map_err(|_| MonitorError::ContextAllocation)?;

        let mut context = Context::new_with_proplist(&mainloop, CONTEXT_NAME, &proplist)
            .ok_or(MonitorError::ContextAllocation)?;

        let state_changed = Rc::new(Cell::new(true));
        let state_flag = Rc::clone(&state_changed);
        context.set_state_callback(Some(Box::new(move || state_flag.set(true))));

        let watch = Rc::new(RefCell::new(WatchContext::new(observed_index)));
        let event_watch = Rc::clone(&watch);
        context.set_subscribe_callback(Some(Box::new(move |facility, operation, index| {
            if event_watch.borrow_mut().note_event(facility, operation, index) {
                debug!(index, "observed sink changed");
            }
        })));

        context
            .connect(None, FlagSet::NOFAIL, None)
            .map_err(MonitorError::Connect)?;

        info!(context = CONTEXT_NAME, observed_index, "connecting to pulseaudio");

        Ok(Self {
            context,
            mainloop,
            watch,
            state_changed,
            readiness: Readiness::Waiting,
        })
    }

    fn refresh_readiness(&mut self) {
        if !self.state_changed.replace(false) {
            return;
        }

        let readiness = Readiness::from(self.context.get_state());
        if readiness != self.readiness {
            info!(from = %self.readiness, to = %readiness, "connection readiness changed");
            self.readiness = readiness;
        }
    }
}

impl AudioServer for PulseConnection {
    type Request = PulseRequest;

    fn readiness(&self) -> Readiness {
        self.readiness
    }

    fn query_device(&mut self, index: u32) -> PulseRequest {
        let watch = Rc::clone(&self.watch);
        let op = self
            .context
            .introspect()
            .get_sink_info_by_index(index, move |result| match result {
                ListResult::Item(info) => {
                    watch.borrow_mut().record(info.index, DeviceSnapshot::from(info));
                }
                ListResult::End => {}
                ListResult::Error => warn!(index, "sink info query failed"),
            });

        debug!(index, "sink info requested");
        PulseRequest::DeviceInfo(op)
    }

    fn subscribe_devices(&mut self) -> PulseRequest {
        let op = self.context.subscribe(InterestMaskSet::SINK, |success| {
            if !success {
                warn!("pulseaudio rejected the sink subscription");
            }
        });

        debug!("sink subscription requested");
        PulseRequest::Subscribe(op)
    }

    fn is_complete(&self, request: &PulseRequest) -> bool {
        matches!(request.state(), OperationState::Done)
    }

    fn pump(&mut self) -> Result<(), MonitorError> {
        match self.mainloop.iterate(true) {
            IterateResult::Success(_) => {}
            IterateResult::Quit(retval) => {
                warn!(retval = retval.0, "pulseaudio mainloop quit");
                return Err(MonitorError::MainloopIterate);
            }
            IterateResult::Err(e) => {
                warn!(?e, "pulseaudio mainloop iteration failed");
                return Err(MonitorError::MainloopIterate);
            }
        }

        self.refresh_readiness();
        Ok(())
    }

    fn snapshot(&self) -> Option<DeviceSnapshot> {
        self.watch.borrow().snapshot().cloned()
    }

    fn take_changed(&mut self) -> bool {
        self.watch.borrow_mut().take_changed()
    }
}

impl Drop for PulseConnection {
    fn drop(&mut self) {
        self.context.disconnect();
        debug!("pulseaudio context released");
    }
}
