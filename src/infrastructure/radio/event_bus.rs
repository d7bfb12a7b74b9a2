//! Radio Event Bus
//!
//! Carries radio events from the driver's context into the link state
//! machine. The machine lives inside a `watch` channel, so each event is
//! applied under the channel's write lock and readers only ever see whole
//! transitions.

use crate::domain::link::{LinkSnapshot, LinkStateMachine, TransitionError, Trigger};
use crate::domain::models::{ConnectionState, RadioEvent};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{trace, warn};

/// Cloneable handle through which the radio reports events
#[derive(Clone)]
pub struct RadioEventBus {
    state: Arc<watch::Sender<LinkStateMachine>>,
}

impl RadioEventBus {
    pub fn new(machine: LinkStateMachine) -> Self {
        let (state, _) = watch::channel(machine);
        Self {
            state: Arc::new(state),
        }
    }

    /// Deliver an event from the radio
    ///
    /// Safe to call from any thread. Events the state machine cannot accept
    /// are logged and dropped.
    pub fn dispatch(&self, event: RadioEvent) {
        trace!("Radio event: {:?}", event);
        if let Err(e) = self.apply(Trigger::Radio(event)) {
            warn!("Discarding radio event: {}", e);
        }
    }

    /// Single mutation point for the link state
    pub(crate) fn apply(&self, trigger: Trigger) -> Result<bool, TransitionError> {
        let mut outcome = Ok(false);
        self.state.send_if_modified(|machine| {
            outcome = machine.apply(trigger);
            matches!(outcome, Ok(true))
        });
        outcome
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<LinkStateMachine> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().state()
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        self.state.borrow().snapshot()
    }
}
