/*!
 * Node Module
 * Process-scoped participant identity, liveness token and node registry
 *
 * A node owns the monitor token that proves its liveness to other
 * processes and anchors every service attachment of the process. Dropping
 * the last handle releases the token, removes the node's files and
 * opportunistically reaps other nodes that died without cleaning up.
 */

pub mod monitor;
pub mod reaper;

use crate::config::Config;
use crate::core::limits::MAX_NODE_NAME_LENGTH;
use crate::core::serialize;
use crate::core::types::{CallbackProgression, NodeId};
use crate::platform::{MonitorToken, Storage, TokenError, TokenState};
use crate::service::builder::Builder;
use crate::service::service_name::ServiceName;
use crate::service::{Service, ServiceId, ServiceState};
use ahash::HashMap;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use thiserror::Error;

/// Violations of the node name contract
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeNameError {
    #[error("node name exceeds the maximum length of {MAX_NODE_NAME_LENGTH} bytes")]
    TooLong,
}

/// Optional human-readable label of a node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NodeName {
    value: String,
}

impl NodeName {
    pub fn new(value: &str) -> Result<Self, NodeNameError> {
        if value.len() > MAX_NODE_NAME_LENGTH {
            return Err(NodeNameError::TooLong);
        }
        Ok(Self {
            value: value.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Display for NodeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}

impl TryFrom<&str> for NodeName {
    type Error = NodeNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl<'de> Deserialize<'de> for NodeName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::new(&value).map_err(serde::de::Error::custom)
    }
}

/// Persisted identity of a node, readable by every process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDetails {
    node_id: NodeId,
    name: Option<NodeName>,
}

impl NodeDetails {
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn name(&self) -> Option<&NodeName> {
        self.name.as_ref()
    }
}

/// Failures while creating a node
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeCreationFailure {
    #[error("insufficient permissions to create the node")]
    InsufficientPermissions,

    #[error("internal failure while creating the node: {0}")]
    InternalError(String),
}

/// Failures while enumerating nodes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeListFailure {
    #[error("insufficient permissions to enumerate nodes")]
    InsufficientPermissions,

    #[error("internal failure while enumerating nodes: {0}")]
    InternalError(String),
}

/// Failures while reclaiming the resources of a dead node
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeCleanupFailure {
    #[error("insufficient permissions to reclaim the resources")]
    InsufficientPermissions,

    #[error("internal failure while reclaiming resources: {0}")]
    InternalError(String),
}

/// Process-internal anchor shared by the node handle and every service
/// attachment of the node
pub(crate) struct NodeShared<S: Service> {
    id: NodeId,
    name: Option<NodeName>,
    config: Config,
    _token: S::Token,
    registered: Mutex<HashMap<ServiceId, Weak<ServiceState<S>>>>,
}

impl<S: Service> NodeShared<S> {
    pub(crate) fn id(&self) -> &NodeId {
        &self.id
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// Reuse an existing attachment of this node to the service
    pub(crate) fn lookup_service(&self, id: &ServiceId) -> Option<Arc<ServiceState<S>>> {
        self.registered.lock().get(id).and_then(Weak::upgrade)
    }

    pub(crate) fn register_service(&self, id: &ServiceId, state: &Arc<ServiceState<S>>) {
        self.registered
            .lock()
            .insert(id.clone(), Arc::downgrade(state));
    }

    /// Drop the registration entry once its attachment is gone
    pub(crate) fn forget_service(&self, id: &ServiceId) {
        let mut registered = self.registered.lock();
        if let Some(weak) = registered.get(id) {
            if weak.upgrade().is_none() {
                registered.remove(id);
            }
        }
    }
}

impl<S: Service> std::fmt::Debug for NodeShared<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeShared")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<S: Service> Drop for NodeShared<S> {
    fn drop(&mut self) {
        // Every ServiceState holds this anchor; when we drop, all
        // attachments are already detached.
        let stem = self.id.file_stem();
        if let Err(e) = S::Storage::remove(&self.config.node_details_path(&stem)) {
            warn!("failed to remove details of node {stem}: {e}");
        }
        if let Err(e) = S::Storage::remove_tree(&self.config.node_tags_dir(&stem)) {
            warn!("failed to remove participation tags of node {stem}: {e}");
        }
        info!("node {} destroyed", self.id);

        if self.config.global.node.cleanup_dead_nodes_on_destruction {
            reaper::cleanup_dead_nodes::<S>(&self.config);
        }
    }
}

/// Builder of [`Node`]s
#[derive(Debug, Default)]
pub struct NodeBuilder {
    name: Option<NodeName>,
    config: Option<Config>,
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: NodeName) -> Self {
        self.name = Some(name);
        self
    }

    /// Adopt `config` instead of the process-wide default
    pub fn config(mut self, config: &Config) -> Self {
        self.config = Some(config.clone());
        self
    }

    /// Create the node for the chosen service variant
    pub fn create<S: Service>(self) -> Result<Node<S>, NodeCreationFailure> {
        crate::signal::init();
        let config = self
            .config
            .unwrap_or_else(|| Config::global_config().clone());
        let id = NodeId::generate();
        let stem = id.file_stem();

        let token = match S::Token::acquire(&config.node_monitor_path(&stem)) {
            Ok(token) => token,
            Err(TokenError::InsufficientPermissions) => {
                return Err(NodeCreationFailure::InsufficientPermissions)
            }
            Err(e) => return Err(NodeCreationFailure::InternalError(e.to_string())),
        };

        let details = NodeDetails {
            node_id: id,
            name: self.name.clone(),
        };
        let blob = serialize::encode(&details)
            .map_err(|e| NodeCreationFailure::InternalError(e.to_string()))?;
        if let Err(e) = S::Storage::persist(&config.node_details_path(&stem), &blob) {
            return Err(NodeCreationFailure::InternalError(e.to_string()));
        }

        if config.global.node.cleanup_dead_nodes_on_creation {
            reaper::cleanup_dead_nodes::<S>(&config);
        }

        info!(
            "node {id} created{}",
            self.name
                .as_ref()
                .map(|n| format!(" as {n}"))
                .unwrap_or_default()
        );
        Ok(Node {
            shared: Arc::new(NodeShared {
                id,
                name: self.name,
                config,
                _token: token,
                registered: Mutex::new(HashMap::default()),
            }),
        })
    }
}

/// A process-scoped participant.
///
/// Owns the monitor token proving its liveness; every service opened
/// through it keeps the node alive until the service is dropped.
#[derive(Debug)]
pub struct Node<S: Service> {
    shared: Arc<NodeShared<S>>,
}

impl<S: Service> Node<S> {
    pub fn id(&self) -> &NodeId {
        self.shared.id()
    }

    pub fn name(&self) -> Option<&NodeName> {
        self.shared.name.as_ref()
    }

    pub fn config(&self) -> &Config {
        self.shared.config()
    }

    /// Start building a service attachment under this node
    pub fn service_builder(&self, name: &ServiceName) -> Builder<S> {
        Builder::new(name, Arc::clone(&self.shared))
    }

    /// Enumerate every node under `config`, alive or dead
    pub fn list(
        config: &Config,
        mut callback: impl FnMut(NodeState<S>) -> CallbackProgression,
    ) -> Result<(), NodeListFailure> {
        for stem in monitor::list_node_stems::<S>(config)? {
            let state = match monitor::probe_node::<S>(config, &stem) {
                Ok(TokenState::Held) => match monitor::read_details::<S>(config, &stem) {
                    Some(details) => NodeState::Alive(AliveNodeView {
                        details,
                        _service: PhantomData,
                    }),
                    None => NodeState::Undefined(stem),
                },
                Ok(TokenState::Abandoned) => NodeState::Dead(DeadNodeView {
                    details: monitor::read_details::<S>(config, &stem),
                    stem,
                    config: config.clone(),
                    _service: PhantomData,
                }),
                // The node disappeared between listing and probing.
                Ok(TokenState::Missing) => continue,
                Err(TokenError::InsufficientPermissions) => NodeState::Undefined(stem),
                Err(e) => {
                    return Err(NodeListFailure::InternalError(e.to_string()));
                }
            };
            if callback(state) == CallbackProgression::Stop {
                break;
            }
        }
        Ok(())
    }
}

/// Observed state of one enumerated node
#[derive(Debug)]
pub enum NodeState<S: Service> {
    /// The node holds its monitor token
    Alive(AliveNodeView<S>),
    /// The token is abandoned; the node died without cleanup
    Dead(DeadNodeView<S>),
    /// The token exists but the node's identity is not readable
    Undefined(String),
}

/// View of a live node
#[derive(Debug, Clone)]
pub struct AliveNodeView<S: Service> {
    details: NodeDetails,
    _service: PhantomData<S>,
}

impl<S: Service> AliveNodeView<S> {
    pub fn id(&self) -> &NodeId {
        self.details.node_id()
    }

    pub fn details(&self) -> &NodeDetails {
        &self.details
    }
}

/// View of a dead node; the entry point for explicit resource reclamation
#[derive(Debug, Clone)]
pub struct DeadNodeView<S: Service> {
    stem: String,
    details: Option<NodeDetails>,
    config: Config,
    _service: PhantomData<S>,
}

impl<S: Service> DeadNodeView<S> {
    pub fn id(&self) -> Option<&NodeId> {
        self.details.as_ref().map(NodeDetails::node_id)
    }

    pub fn details(&self) -> Option<&NodeDetails> {
        self.details.as_ref()
    }

    /// Run the reaper pass for this node.
    ///
    /// Returns `Ok(true)` when its resources were reclaimed, `Ok(false)`
    /// when the node turned out to be alive or another claimant got there
    /// first.
    pub fn remove_stale_resources(self) -> Result<bool, NodeCleanupFailure> {
        debug!("explicit stale-resource removal for node {}", self.stem);
        reaper::remove_dead_node::<S>(&self.config, &self.stem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_name_enforces_length() {
        assert!(NodeName::new("observer").is_ok());
        let long = "x".repeat(MAX_NODE_NAME_LENGTH + 1);
        assert_eq!(NodeName::new(&long).unwrap_err(), NodeNameError::TooLong);
    }

    #[test]
    fn node_details_round_trip() {
        let details = NodeDetails {
            node_id: NodeId::generate(),
            name: Some(NodeName::new("roundtrip").unwrap()),
        };
        let blob = serialize::encode(&details).unwrap();
        let back: NodeDetails = serialize::decode(&blob).unwrap();
        assert_eq!(back, details);
    }
}
