/*!
 * Zerobus Library
 * Zero-copy inter-process eventing and service discovery over shared memory
 *
 * Independent processes rendezvous on named, typed services, negotiate
 * quality-of-service at open/create time and exchange wake-up events
 * through fixed-capacity shared-memory channels. Crashed participants
 * are detected via per-node monitor tokens and their resources are
 * reclaimed opportunistically.
 */

pub mod config;
pub mod core;
pub mod node;
pub mod platform;
pub mod port;
pub mod service;
pub mod signal;

pub use config::Config;
pub use core::types::{CallbackProgression, NodeId, UniqueListenerId, UniqueNotifierId};
pub use node::{
    AliveNodeView, DeadNodeView, Node, NodeBuilder, NodeDetails, NodeName, NodeState,
};
pub use port::event_id::EventId;
pub use port::listener::Listener;
pub use port::notifier::Notifier;
pub use service::attribute::{Attribute, AttributeSet, AttributeSpecifier, AttributeVerifier};
pub use service::messaging_pattern::MessagingPattern;
pub use service::port_factory::event::PortFactory;
pub use service::service_name::ServiceName;
pub use service::{ServiceDetails, ServiceId};
