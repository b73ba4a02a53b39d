/*!
 * Service Builder
 * Entry point tying a node, a service name and a messaging pattern together
 */

pub mod event;

use super::service_name::ServiceName;
use super::Service;
use crate::node::NodeShared;
use std::sync::Arc;

/// Selects the messaging pattern to build; obtained from
/// [`Node::service_builder`](crate::node::Node::service_builder)
#[derive(Debug)]
pub struct Builder<S: Service> {
    name: ServiceName,
    node: Arc<NodeShared<S>>,
}

impl<S: Service> Builder<S> {
    pub(crate) fn new(name: &ServiceName, node: Arc<NodeShared<S>>) -> Self {
        Self {
            name: name.clone(),
            node,
        }
    }

    /// Build an event service: notifiers waking listeners with event ids
    pub fn event(self) -> event::Builder<S> {
        event::Builder::new(self.name, self.node)
    }
}
