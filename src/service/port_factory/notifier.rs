/*!
 * Notifier Factory
 * Builder of notifier ports on an attached event service
 */

use crate::port::event_id::EventId;
use crate::port::notifier::{Notifier, NotifierCreateError};
use crate::service::{Service, ServiceState};
use std::sync::Arc;

/// Builds a [`Notifier`]; obtained from
/// [`PortFactory::notifier_builder`](super::event::PortFactory::notifier_builder)
pub struct PortFactoryNotifier<S: Service> {
    state: Arc<ServiceState<S>>,
    default_event_id: EventId,
}

impl<S: Service> PortFactoryNotifier<S> {
    pub(crate) fn new(state: Arc<ServiceState<S>>) -> Self {
        Self {
            state,
            default_event_id: EventId::default(),
        }
    }

    /// The id emitted by [`Notifier::notify`](crate::port::notifier::Notifier::notify)
    pub fn default_event_id(mut self, event_id: EventId) -> Self {
        self.default_event_id = event_id;
        self
    }

    pub fn create(self) -> Result<Notifier<S>, NotifierCreateError> {
        Notifier::create(self.state, self.default_event_id)
    }
}
