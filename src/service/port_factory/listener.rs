/*!
 * Listener Factory
 * Builder of listener ports on an attached event service
 */

use crate::port::listener::{Listener, ListenerCreateError};
use crate::service::{Service, ServiceState};
use std::sync::Arc;

/// Builds a [`Listener`]; obtained from
/// [`PortFactory::listener_builder`](super::event::PortFactory::listener_builder)
pub struct PortFactoryListener<S: Service> {
    state: Arc<ServiceState<S>>,
}

impl<S: Service> PortFactoryListener<S> {
    pub(crate) fn new(state: Arc<ServiceState<S>>) -> Self {
        Self { state }
    }

    pub fn create(self) -> Result<Listener<S>, ListenerCreateError> {
        Listener::create(self.state)
    }
}
