/*!
 * Static Service Descriptor
 * Immutable per-service metadata persisted at creation
 */

use super::attribute::AttributeSet;
use super::messaging_pattern::MessagingPattern;
use super::service_name::ServiceName;
use super::ServiceId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// QoS of an event service, frozen at creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticConfigEvent {
    pub(crate) max_notifiers: usize,
    pub(crate) max_listeners: usize,
    pub(crate) max_nodes: usize,
    pub(crate) event_id_max_value: usize,
    pub(crate) deadline: Option<Duration>,
    pub(crate) notifier_created_event: Option<usize>,
    pub(crate) notifier_dropped_event: Option<usize>,
    pub(crate) notifier_dead_event: Option<usize>,
}

impl StaticConfigEvent {
    /// Maximum number of concurrently attached notifiers
    pub fn max_notifiers(&self) -> usize {
        self.max_notifiers
    }

    /// Maximum number of concurrently attached listeners
    pub fn max_listeners(&self) -> usize {
        self.max_listeners
    }

    /// Maximum number of nodes that can participate at once
    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    /// Largest event id a notifier may emit
    pub fn event_id_max_value(&self) -> usize {
        self.event_id_max_value
    }

    /// Maximum period between notifications before a notifier is reported
    /// as having missed its deadline
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Event id emitted when a notifier is created
    pub fn notifier_created_event(&self) -> Option<usize> {
        self.notifier_created_event
    }

    /// Event id emitted when a notifier is dropped
    pub fn notifier_dropped_event(&self) -> Option<usize> {
        self.notifier_dropped_event
    }

    /// Event id emitted while reclaiming the ports of a dead node
    pub fn notifier_dead_event(&self) -> Option<usize> {
        self.notifier_dead_event
    }
}

/// QoS of a publish/subscribe service; recorded for discovery, the data
/// plane itself lives outside this crate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticConfigPublishSubscribe {
    pub max_publishers: usize,
    pub max_subscribers: usize,
    pub max_nodes: usize,
    pub subscriber_max_buffer_size: usize,
}

/// QoS of a request/response service; recorded for discovery only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticConfigRequestResponse {
    pub max_clients: usize,
    pub max_servers: usize,
    pub max_nodes: usize,
}

/// Pattern-specific section of the descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternConfig {
    Event(StaticConfigEvent),
    PublishSubscribe(StaticConfigPublishSubscribe),
    RequestResponse(StaticConfigRequestResponse),
}

impl PatternConfig {
    pub fn messaging_pattern(&self) -> MessagingPattern {
        match self {
            Self::Event(_) => MessagingPattern::Event,
            Self::PublishSubscribe(_) => MessagingPattern::PublishSubscribe,
            Self::RequestResponse(_) => MessagingPattern::RequestResponse,
        }
    }
}

/// The full static descriptor of a service.
///
/// Written exactly once, under the creation marker; identical for every
/// process that opens the service afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticConfig {
    service_id: ServiceId,
    name: ServiceName,
    pattern: PatternConfig,
    attributes: AttributeSet,
}

impl StaticConfig {
    pub(crate) fn new(
        service_id: ServiceId,
        name: ServiceName,
        pattern: PatternConfig,
        attributes: AttributeSet,
    ) -> Self {
        Self {
            service_id,
            name,
            pattern,
            attributes,
        }
    }

    pub fn service_id(&self) -> &ServiceId {
        &self.service_id
    }

    pub fn name(&self) -> &ServiceName {
        &self.name
    }

    pub fn messaging_pattern(&self) -> MessagingPattern {
        self.pattern.messaging_pattern()
    }

    pub fn pattern(&self) -> &PatternConfig {
        &self.pattern
    }

    pub fn attributes(&self) -> &AttributeSet {
        &self.attributes
    }

    /// The event section; `None` for other patterns
    pub fn event(&self) -> Option<&StaticConfigEvent> {
        match &self.pattern {
            PatternConfig::Event(event) => Some(event),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::serialize;

    fn sample() -> StaticConfig {
        let name = ServiceName::new("descriptor-sample").unwrap();
        StaticConfig::new(
            ServiceId::new("zb_", &name, MessagingPattern::Event),
            name,
            PatternConfig::Event(StaticConfigEvent {
                max_notifiers: 5,
                max_listeners: 7,
                max_nodes: 12,
                event_id_max_value: 31,
                deadline: Some(Duration::from_millis(100)),
                notifier_created_event: Some(12),
                notifier_dropped_event: Some(13),
                notifier_dead_event: Some(14),
            }),
            AttributeSet::default(),
        )
    }

    #[test]
    fn descriptor_round_trips_through_the_envelope() {
        let descriptor = sample();
        let blob = serialize::encode(&descriptor).unwrap();
        let back: StaticConfig = serialize::decode(&blob).unwrap();
        assert_eq!(back, descriptor);
        let event = back.event().unwrap();
        assert_eq!(event.max_notifiers(), 5);
        assert_eq!(event.max_listeners(), 7);
        assert_eq!(event.notifier_created_event(), Some(12));
        assert_eq!(event.notifier_dropped_event(), Some(13));
        assert_eq!(event.notifier_dead_event(), Some(14));
    }

    #[test]
    fn pattern_accessors_are_consistent() {
        let descriptor = sample();
        assert_eq!(descriptor.messaging_pattern(), MessagingPattern::Event);
        assert!(descriptor.event().is_some());
    }
}
