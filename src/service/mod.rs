/*!
 * Service Module
 * Rendezvous of processes on named, typed shared resources
 *
 * A service is keyed by (prefix, name, messaging pattern). Its immutable
 * half is the static descriptor in the registry, its mutable half the
 * dynamic roster and event channel in shared memory. The `Service` trait
 * is the capability parameter binding every component to either the
 * inter-process or the process-local platform primitives.
 */

pub mod attribute;
pub mod builder;
pub(crate) mod dynamic_state;
pub(crate) mod event_channel;
pub mod messaging_pattern;
pub mod port_factory;
pub mod registry;
pub mod service_name;
pub mod static_config;

use crate::config::Config;
use crate::core::types::CallbackProgression;
use crate::node::NodeShared;
use crate::platform::{MonitorToken, SharedRegion, Storage};
use dynamic_state::Roster;
use event_channel::EventChannel;
use log::debug;
use messaging_pattern::MessagingPattern;
use serde::{Deserialize, Serialize};
use service_name::ServiceName;
use static_config::StaticConfig;
use std::sync::Arc;
use thiserror::Error;

/// Stable, filesystem-safe identifier derived from (prefix, name, pattern)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceId(String);

impl ServiceId {
    /// Derive the identifier; the same inputs hash identically in every
    /// process and across runs
    pub fn new(prefix: &str, name: &ServiceName, pattern: MessagingPattern) -> Self {
        let mut hash = Fnv128::new();
        hash.update(prefix.as_bytes());
        hash.update(&[0xFF]);
        hash.update(name.as_str().as_bytes());
        hash.update(&[0xFF]);
        hash.update(&(pattern as u32).to_le_bytes());
        Self(format!("{:032x}", hash.finish()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap an identifier that already went through [`ServiceId::new`],
    /// recovered from a registry or tag entry name
    pub(crate) fn from_raw(raw: String) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// FNV-1a, 128-bit variant; stable across processes by construction
struct Fnv128 {
    state: u128,
}

impl Fnv128 {
    const OFFSET_BASIS: u128 = 0x6c62272e07bb014262b821756295c58d;
    const PRIME: u128 = 0x0000000001000000000000000000013B;

    fn new() -> Self {
        Self {
            state: Self::OFFSET_BASIS,
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.state ^= u128::from(*byte);
            self.state = self.state.wrapping_mul(Self::PRIME);
        }
    }

    fn finish(&self) -> u128 {
        self.state
    }
}

/// Failures while reading the details of a single service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceDetailsError {
    #[error("failed to open the static service descriptor")]
    FailedToOpenStaticServiceInfo,

    #[error("failed to read the static service descriptor")]
    FailedToReadStaticServiceInfo,

    #[error("the service is in an inconsistent state")]
    ServiceInInconsistentState,

    #[error("the service was created with an incompatible schema version")]
    VersionMismatch,

    #[error("insufficient permissions to inspect the service")]
    InsufficientPermissions,

    #[error("failed to acquire the node state of a participant")]
    FailedToAcquireNodeState,

    #[error("internal failure while inspecting the service: {0}")]
    InternalError(String),
}

/// Failures while enumerating all services
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceListError {
    #[error("insufficient permissions to enumerate services")]
    InsufficientPermissions,

    #[error("internal failure while enumerating services: {0}")]
    InternalError(String),
}

/// Everything discovery exposes about one service without attaching to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDetails {
    static_details: StaticConfig,
}

impl ServiceDetails {
    pub fn static_details(&self) -> &StaticConfig {
        &self.static_details
    }

    pub fn name(&self) -> &ServiceName {
        self.static_details.name()
    }

    pub fn messaging_pattern(&self) -> MessagingPattern {
        self.static_details.messaging_pattern()
    }

    pub fn attributes(&self) -> &attribute::AttributeSet {
        self.static_details.attributes()
    }
}

/// Capability parameter selecting the platform primitives of a variant.
///
/// Implemented by [`ipc::Service`] (shared-memory files) and
/// [`local::Service`] (process-local heap regions); every engine component
/// is generic over it.
pub trait Service: std::fmt::Debug + Send + Sync + Sized + 'static {
    type Storage: Storage;
    type Region: SharedRegion;
    type Token: MonitorToken;

    /// Check whether a Ready service with this name and pattern exists.
    /// Purely registry-based; does not attach.
    fn does_exist(
        name: &ServiceName,
        config: &Config,
        pattern: MessagingPattern,
    ) -> Result<bool, ServiceDetailsError> {
        Ok(Self::details(name, config, pattern)?.is_some())
    }

    /// Read the details of a Ready service without attaching to it
    fn details(
        name: &ServiceName,
        config: &Config,
        pattern: MessagingPattern,
    ) -> Result<Option<ServiceDetails>, ServiceDetailsError> {
        let id = ServiceId::new(&config.global.prefix, name, pattern);
        match registry::is_marked_for_destruction::<Self>(config, &id) {
            Ok(true) => return Ok(None),
            Ok(false) => {}
            Err(e) => return Err(ServiceDetailsError::InternalError(e.to_string())),
        }
        match registry::read_descriptor::<Self>(config, &id) {
            Ok(descriptor) => {
                if descriptor.messaging_pattern() != pattern || descriptor.name() != name {
                    return Ok(None);
                }
                Ok(Some(ServiceDetails {
                    static_details: descriptor,
                }))
            }
            Err(registry::DescriptorReadError::DoesNotExist) => Ok(None),
            Err(registry::DescriptorReadError::VersionMismatch) => {
                Err(ServiceDetailsError::VersionMismatch)
            }
            Err(registry::DescriptorReadError::Corrupted) => {
                Err(ServiceDetailsError::ServiceInInconsistentState)
            }
            Err(registry::DescriptorReadError::InsufficientPermissions) => {
                Err(ServiceDetailsError::InsufficientPermissions)
            }
            Err(registry::DescriptorReadError::Internal(e)) => {
                Err(ServiceDetailsError::InternalError(e))
            }
        }
    }

    /// Enumerate every Ready service, in registry order.
    ///
    /// Descriptors that fail to decode are skipped; the walk continues.
    fn list(
        config: &Config,
        mut callback: impl FnMut(ServiceDetails) -> CallbackProgression,
    ) -> Result<(), ServiceListError> {
        for descriptor in registry::list_descriptors::<Self>(config)? {
            let details = ServiceDetails {
                static_details: descriptor,
            };
            if callback(details) == CallbackProgression::Stop {
                break;
            }
        }
        Ok(())
    }
}

/// Inter-process variant: files, shared mappings and flock tokens
pub mod ipc {
    use crate::platform::file::{FileRegion, FileStorage, FileToken};

    /// Binds the engine to the shared-memory platform primitives
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Service;

    impl super::Service for Service {
        type Storage = FileStorage;
        type Region = FileRegion;
        type Token = FileToken;
    }
}

/// Process-local variant: heap regions and in-process registries
pub mod local {
    use crate::platform::heap::{HeapRegion, HeapStorage, HeapToken};

    /// Binds the engine to the process-local platform primitives
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Service;

    impl super::Service for Service {
        type Storage = HeapStorage;
        type Region = HeapRegion;
        type Token = HeapToken;
    }
}

/// Shared lifetime anchor of one attachment to a service.
///
/// Port factories, notifiers and listeners of one node all hold this via
/// `Arc`; the drop of the last holder detaches the node from the roster
/// and removes the service backing once the roster is empty.
pub(crate) struct ServiceState<S: Service> {
    pub(crate) static_config: StaticConfig,
    pub(crate) config: Config,
    pub(crate) node: Arc<NodeShared<S>>,
    pub(crate) roster: Roster<S::Region>,
    pub(crate) channel: EventChannel<S::Region>,
    node_slot: usize,
}

impl<S: Service> ServiceState<S> {
    pub(crate) fn new(
        static_config: StaticConfig,
        config: Config,
        node: Arc<NodeShared<S>>,
        roster: Roster<S::Region>,
        channel: EventChannel<S::Region>,
        node_slot: usize,
    ) -> Self {
        Self {
            static_config,
            config,
            node,
            roster,
            channel,
            node_slot,
        }
    }

    /// The event section of the descriptor; infallible for states created
    /// by the event builder
    pub(crate) fn event_config(&self) -> &static_config::StaticConfigEvent {
        self.static_config
            .event()
            .expect("service state was created by the event builder")
    }
}

impl<S: Service> Drop for ServiceState<S> {
    fn drop(&mut self) {
        let id = self.static_config.service_id().clone();
        self.node.forget_service(&id);

        let stem = self.node.id().file_stem();
        let _ = S::Storage::remove(&self.config.node_tag_path(&stem, &id));

        self.roster.release_node(self.node_slot);
        if self.roster.active_nodes() == 0 {
            debug!(
                "last participant detached, removing service {}",
                self.static_config.name()
            );
            registry::remove_service_backing::<S>(&self.config, &id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_id_is_stable_and_pattern_scoped() {
        let name = ServiceName::new("stable").unwrap();
        let a = ServiceId::new("zb_", &name, MessagingPattern::Event);
        let b = ServiceId::new("zb_", &name, MessagingPattern::Event);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 32);

        let other_pattern = ServiceId::new("zb_", &name, MessagingPattern::PublishSubscribe);
        assert_ne!(a, other_pattern);

        let other_prefix = ServiceId::new("x_", &name, MessagingPattern::Event);
        assert_ne!(a, other_prefix);
    }
}
