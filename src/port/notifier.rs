/*!
 * Notifier Port
 * Emits event ids to every listener attached to the service
 *
 * Deadline enforcement is local bookkeeping: a missed window is reported
 * to the caller but the event is delivered regardless, so listeners can
 * observe both the event and, downstream, the miss.
 */

use crate::core::types::UniqueNotifierId;
use crate::port::event_id::EventId;
use crate::service::dynamic_state::Table;
use crate::service::{Service, ServiceState};
use log::debug;
use std::cell::Cell;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Failures while creating a notifier
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifierCreateError {
    #[error("the maximum number of notifiers supported by the service is already attached")]
    ExceedsMaxSupportedNotifiers,
}

/// Failures while notifying.
///
/// [`NotifierNotifyError::MissedDeadline`] reports a violated timing
/// contract; the event itself was still delivered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifierNotifyError {
    #[error("the event id exceeds the event id max value of the service")]
    EventIdOutOfBounds,

    #[error("the configured deadline between notifications was missed")]
    MissedDeadline,
}

/// Sends event ids to all attached listeners of the service.
///
/// Not a thread-safe handle; the shared state it writes to is.
pub struct Notifier<S: Service> {
    state: Arc<ServiceState<S>>,
    slot: usize,
    id: UniqueNotifierId,
    default_event_id: EventId,
    // Deadline window anchor; the Cell also keeps the port !Sync.
    last_notification: Cell<Instant>,
}

impl<S: Service> Notifier<S> {
    pub(crate) fn create(
        state: Arc<ServiceState<S>>,
        default_event_id: EventId,
    ) -> Result<Self, NotifierCreateError> {
        let Some((slot, id)) = state
            .roster
            .claim(Table::Notifiers, state.node.id().value())
        else {
            return Err(NotifierCreateError::ExceedsMaxSupportedNotifiers);
        };

        let notifier = Self {
            state,
            slot,
            id: UniqueNotifierId(id),
            default_event_id,
            last_notification: Cell::new(Instant::now()),
        };

        // Its first act: announce itself, which also arms the deadline
        // window.
        if let Some(created) = notifier.state.event_config().notifier_created_event() {
            notifier.state.channel.post(created);
            notifier.last_notification.set(Instant::now());
        }
        debug!(
            "created notifier {} on service {}",
            notifier.id.value(),
            notifier.state.static_config.name()
        );
        Ok(notifier)
    }

    pub fn id(&self) -> UniqueNotifierId {
        self.id
    }

    /// The deadline recorded in the service descriptor
    pub fn deadline(&self) -> Option<std::time::Duration> {
        self.state.event_config().deadline()
    }

    /// Emit the default event id; returns the number of notified listeners
    pub fn notify(&self) -> Result<usize, NotifierNotifyError> {
        self.notify_with_custom_event_id(self.default_event_id)
    }

    /// Emit a specific event id; returns the number of notified listeners.
    ///
    /// A deadline miss is reported after the event was delivered and the
    /// window was re-armed.
    pub fn notify_with_custom_event_id(
        &self,
        event_id: EventId,
    ) -> Result<usize, NotifierNotifyError> {
        let event_config = self.state.event_config();
        if event_id.as_value() > event_config.event_id_max_value() {
            return Err(NotifierNotifyError::EventIdOutOfBounds);
        }

        let delivered = self.state.channel.post(event_id.as_value());

        let now = Instant::now();
        let missed = match event_config.deadline() {
            Some(deadline) => now.duration_since(self.last_notification.get()) > deadline,
            None => false,
        };
        self.last_notification.set(now);

        if missed {
            return Err(NotifierNotifyError::MissedDeadline);
        }
        Ok(delivered)
    }
}

impl<S: Service> Drop for Notifier<S> {
    fn drop(&mut self) {
        if let Some(dropped) = self.state.event_config().notifier_dropped_event() {
            self.state.channel.post(dropped);
        }
        self.state.roster.release(Table::Notifiers, self.slot);
        debug!(
            "dropped notifier {} of service {}",
            self.id.value(),
            self.state.static_config.name()
        );
    }
}

impl<S: Service> std::fmt::Debug for Notifier<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("id", &self.id)
            .field("default_event_id", &self.default_event_id)
            .finish_non_exhaustive()
    }
}
