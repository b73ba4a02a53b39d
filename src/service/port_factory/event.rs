/*!
 * Event Port Factory
 * The attached view of an event service, vending notifiers and listeners
 *
 * Factories, their ports and the underlying shared state share lifetime:
 * the service stays attached while any of them lives, and the backing is
 * removed when the last participant of the last node detaches.
 */

use super::listener::PortFactoryListener;
use super::notifier::PortFactoryNotifier;
use crate::service::attribute::AttributeSet;
use crate::service::dynamic_state::Table;
use crate::service::service_name::ServiceName;
use crate::service::static_config::StaticConfigEvent;
use crate::service::{Service, ServiceId, ServiceState};
use std::sync::Arc;

/// An opened or created event service
pub struct PortFactory<S: Service> {
    state: Arc<ServiceState<S>>,
}

impl<S: Service> PortFactory<S> {
    pub(crate) fn new(state: Arc<ServiceState<S>>) -> Self {
        Self { state }
    }

    pub fn name(&self) -> &ServiceName {
        self.state.static_config.name()
    }

    pub fn service_id(&self) -> &ServiceId {
        self.state.static_config.service_id()
    }

    /// The immutable QoS recorded at service creation
    pub fn static_config(&self) -> &StaticConfigEvent {
        self.state.event_config()
    }

    pub fn attributes(&self) -> &AttributeSet {
        self.state.static_config.attributes()
    }

    /// Currently attached notifiers, across all participating nodes
    pub fn number_of_notifiers(&self) -> usize {
        self.state.roster.active_count(Table::Notifiers)
    }

    /// Currently attached listeners, across all participating nodes
    pub fn number_of_listeners(&self) -> usize {
        self.state.roster.active_count(Table::Listeners)
    }

    /// Currently participating nodes
    pub fn number_of_nodes(&self) -> usize {
        self.state.roster.active_nodes()
    }

    pub fn notifier_builder(&self) -> PortFactoryNotifier<S> {
        PortFactoryNotifier::new(Arc::clone(&self.state))
    }

    pub fn listener_builder(&self) -> PortFactoryListener<S> {
        PortFactoryListener::new(Arc::clone(&self.state))
    }
}

impl<S: Service> std::fmt::Debug for PortFactory<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortFactory")
            .field("name", self.name())
            .field("service_id", self.service_id())
            .finish_non_exhaustive()
    }
}
