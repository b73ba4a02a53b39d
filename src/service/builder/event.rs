/*!
 * Event Service Builder
 * The open / create / open-or-create state machine
 *
 * Negotiates QoS compatibility against the recorded descriptor, drives
 * the registry creation protocol and attaches the node to the dynamic
 * roster and event channel.
 */

use crate::config::Config;
use crate::core::limits::{MAX_EVENT_ID_MAX_VALUE, MAX_PORTS_PER_SERVICE};
use crate::node::NodeShared;
use crate::platform::{MonitorToken, RegionError, SharedRegion, Storage, StorageError, TokenState};
use crate::port::event_id::EventId;
use crate::service::attribute::{AttributeSet, AttributeSpecifier, AttributeVerifier};
use crate::service::dynamic_state::{Roster, RosterCapacities, RosterError, Table};
use crate::service::event_channel::{ChannelError, EventChannel};
use crate::service::messaging_pattern::MessagingPattern;
use crate::service::port_factory::event::PortFactory;
use crate::service::registry::{self, DescriptorReadError, ServiceMarkerState};
use crate::service::service_name::ServiceName;
use crate::service::static_config::{PatternConfig, StaticConfig, StaticConfigEvent};
use crate::service::{Service, ServiceId, ServiceState};
use log::{debug, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Pause between retries while another process finishes a creation
const CREATION_RETRY_INTERVAL: Duration = Duration::from_millis(2);

/// Failures while opening an existing event service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventOpenError {
    #[error("the service does not exist")]
    DoesNotExist,

    #[error("insufficient permissions to open the service")]
    InsufficientPermissions,

    #[error("the service is in a corrupted state")]
    ServiceInCorruptedState,

    #[error("the service was created with an incompatible schema version")]
    VersionMismatch,

    #[error("the service was created with a different messaging pattern")]
    IncompatibleMessagingPattern,

    #[error("the service does not satisfy the required attributes: {0}")]
    IncompatibleAttributes(String),

    #[error("internal failure while opening the service")]
    InternalFailure,

    #[error("the service creation did not finish within the creation timeout")]
    HangsInCreation,

    #[error("the service supports fewer notifiers than requested")]
    DoesNotSupportRequestedAmountOfNotifiers,

    #[error("the service supports fewer listeners than requested")]
    DoesNotSupportRequestedAmountOfListeners,

    #[error("the service supports fewer nodes than requested")]
    DoesNotSupportRequestedAmountOfNodes,

    #[error("the service supports a smaller max event id than requested")]
    DoesNotSupportRequestedMaxEventId,

    #[error("the node table of the service is full")]
    ExceedsMaxNumberOfNodes,

    #[error("the service is marked for destruction")]
    IsMarkedForDestruction,
}

/// Failures while creating a new event service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventCreateError {
    #[error("the service is in a corrupted state")]
    ServiceInCorruptedState,

    #[error("internal failure while creating the service")]
    InternalFailure,

    #[error("the service is currently being created by another instance")]
    IsBeingCreatedByAnotherInstance,

    #[error("a service with the same name already exists")]
    AlreadyExists,

    #[error("a previous creation attempt did not finish within the creation timeout")]
    HangsInCreation,

    #[error("insufficient permissions to create the service")]
    InsufficientPermissions,

    #[error("leftover connections of live participants still exist")]
    OldConnectionsStillActive,
}

/// Failures of the combined open-or-create operation, prefixed by the
/// phase they originate from
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventOpenOrCreateError {
    #[error("open failed: {0}")]
    OpenError(#[from] EventOpenError),

    #[error("create failed: {0}")]
    CreateError(#[from] EventCreateError),
}

/// Builder of event services.
///
/// Every unset knob inherits `config.defaults.event`. On `open`, the
/// capacity knobs act as required minimums; on `create`, they size the
/// service.
#[derive(Debug)]
pub struct Builder<S: Service> {
    name: ServiceName,
    node: Arc<NodeShared<S>>,
    max_notifiers: Option<usize>,
    max_listeners: Option<usize>,
    max_nodes: Option<usize>,
    event_id_max_value: Option<usize>,
    // Outer None inherits the config default, Some(None) disables.
    deadline: Option<Option<Duration>>,
    notifier_created_event: Option<Option<usize>>,
    notifier_dropped_event: Option<Option<usize>>,
    notifier_dead_event: Option<Option<usize>>,
}

impl<S: Service> Builder<S> {
    pub(crate) fn new(name: ServiceName, node: Arc<NodeShared<S>>) -> Self {
        Self {
            name,
            node,
            max_notifiers: None,
            max_listeners: None,
            max_nodes: None,
            event_id_max_value: None,
            deadline: None,
            notifier_created_event: None,
            notifier_dropped_event: None,
            notifier_dead_event: None,
        }
    }

    pub fn max_notifiers(mut self, value: usize) -> Self {
        self.max_notifiers = Some(value);
        self
    }

    pub fn max_listeners(mut self, value: usize) -> Self {
        self.max_listeners = Some(value);
        self
    }

    pub fn max_nodes(mut self, value: usize) -> Self {
        self.max_nodes = Some(value);
        self
    }

    pub fn event_id_max_value(mut self, value: usize) -> Self {
        self.event_id_max_value = Some(value);
        self
    }

    /// Require notifications at least every `deadline` apart
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(Some(deadline));
        self
    }

    pub fn disable_deadline(mut self) -> Self {
        self.deadline = Some(None);
        self
    }

    /// Emit `event_id` whenever a notifier is created
    pub fn notifier_created_event(mut self, event_id: EventId) -> Self {
        self.notifier_created_event = Some(Some(event_id.as_value()));
        self
    }

    pub fn disable_notifier_created_event(mut self) -> Self {
        self.notifier_created_event = Some(None);
        self
    }

    /// Emit `event_id` whenever a notifier is dropped
    pub fn notifier_dropped_event(mut self, event_id: EventId) -> Self {
        self.notifier_dropped_event = Some(Some(event_id.as_value()));
        self
    }

    pub fn disable_notifier_dropped_event(mut self) -> Self {
        self.notifier_dropped_event = Some(None);
        self
    }

    /// Emit `event_id` while reclaiming the ports of a dead node
    pub fn notifier_dead_event(mut self, event_id: EventId) -> Self {
        self.notifier_dead_event = Some(Some(event_id.as_value()));
        self
    }

    pub fn disable_notifier_dead_event(mut self) -> Self {
        self.notifier_dead_event = Some(None);
        self
    }

    // ---- terminal operations --------------------------------------------

    /// Open an existing service
    pub fn open(self) -> Result<PortFactory<S>, EventOpenError> {
        self.open_impl(&AttributeVerifier::new())
    }

    /// Open an existing service, additionally requiring `verifier` to be
    /// satisfied by the recorded attributes
    pub fn open_with_attributes(
        self,
        verifier: &AttributeVerifier,
    ) -> Result<PortFactory<S>, EventOpenError> {
        self.open_impl(verifier)
    }

    /// Create a new service
    pub fn create(self) -> Result<PortFactory<S>, EventCreateError> {
        self.create_impl(&AttributeSpecifier::new())
    }

    /// Create a new service carrying the specified attributes
    pub fn create_with_attributes(
        self,
        specifier: &AttributeSpecifier,
    ) -> Result<PortFactory<S>, EventCreateError> {
        self.create_impl(specifier)
    }

    /// Open the service or create it when it does not exist yet.
    ///
    /// Creation races with other instances are retried until the creation
    /// timeout elapses.
    pub fn open_or_create(self) -> Result<PortFactory<S>, EventOpenOrCreateError> {
        self.open_or_create_impl(&AttributeVerifier::new())
    }

    /// As [`Builder::open_or_create`]; when the service must be created,
    /// the verifier's required values become its attributes
    pub fn open_or_create_with_attributes(
        self,
        verifier: &AttributeVerifier,
    ) -> Result<PortFactory<S>, EventOpenOrCreateError> {
        self.open_or_create_impl(verifier)
    }

    // ---- open path ------------------------------------------------------

    fn open_impl(&self, verifier: &AttributeVerifier) -> Result<PortFactory<S>, EventOpenError> {
        let config = self.node.config().clone();
        let id = ServiceId::new(&config.global.prefix, &self.name, MessagingPattern::Event);
        let timeout = config.global.service.creation_timeout;
        let give_up_at = Instant::now() + timeout;

        let marked = loop {
            match registry::probe_state::<S>(&config, &id).map_err(storage_to_open_error)? {
                ServiceMarkerState::Uninitialized => return Err(EventOpenError::DoesNotExist),
                ServiceMarkerState::Creating { elapsed } => {
                    if elapsed >= timeout || Instant::now() >= give_up_at {
                        return Err(EventOpenError::HangsInCreation);
                    }
                    std::thread::sleep(CREATION_RETRY_INTERVAL);
                }
                ServiceMarkerState::Ready => break false,
                ServiceMarkerState::MarkedForDestruction => break true,
            }
        };

        let descriptor = match registry::read_descriptor::<S>(&config, &id) {
            Ok(descriptor) => descriptor,
            Err(DescriptorReadError::DoesNotExist) => return Err(EventOpenError::DoesNotExist),
            Err(DescriptorReadError::VersionMismatch) => {
                return Err(EventOpenError::VersionMismatch)
            }
            Err(DescriptorReadError::Corrupted) => {
                return Err(EventOpenError::ServiceInCorruptedState)
            }
            Err(DescriptorReadError::InsufficientPermissions) => {
                return Err(EventOpenError::InsufficientPermissions)
            }
            Err(DescriptorReadError::Internal(_)) => return Err(EventOpenError::InternalFailure),
        };

        if descriptor.messaging_pattern() != MessagingPattern::Event {
            return Err(EventOpenError::IncompatibleMessagingPattern);
        }
        if descriptor.name() != &self.name {
            return Err(EventOpenError::ServiceInCorruptedState);
        }
        let event_config = descriptor
            .event()
            .ok_or(EventOpenError::IncompatibleMessagingPattern)?
            .clone();

        if let Some(required) = self.max_notifiers {
            if event_config.max_notifiers() < required {
                return Err(EventOpenError::DoesNotSupportRequestedAmountOfNotifiers);
            }
        }
        if let Some(required) = self.max_listeners {
            if event_config.max_listeners() < required {
                return Err(EventOpenError::DoesNotSupportRequestedAmountOfListeners);
            }
        }
        if let Some(required) = self.max_nodes {
            if event_config.max_nodes() < required {
                return Err(EventOpenError::DoesNotSupportRequestedAmountOfNodes);
            }
        }
        if let Some(required) = self.event_id_max_value {
            if event_config.event_id_max_value() < required {
                return Err(EventOpenError::DoesNotSupportRequestedMaxEventId);
            }
        }
        if let Err(missing) = verifier.verify_requirements(descriptor.attributes()) {
            return Err(EventOpenError::IncompatibleAttributes(missing));
        }
        if marked {
            return Err(EventOpenError::IsMarkedForDestruction);
        }

        // A second open through the same node reuses the attachment.
        if let Some(state) = self.node.lookup_service(&id) {
            return Ok(PortFactory::new(state));
        }

        let roster = match Roster::<S::Region>::open(&config.dynamic_state_path(&id)) {
            Ok(roster) => roster,
            Err(RosterError::Region(RegionError::DoesNotExist)) => {
                return Err(EventOpenError::DoesNotExist)
            }
            Err(RosterError::Region(RegionError::InsufficientPermissions)) => {
                return Err(EventOpenError::InsufficientPermissions)
            }
            Err(RosterError::Incompatible) => {
                return Err(EventOpenError::ServiceInCorruptedState)
            }
            Err(_) => return Err(EventOpenError::InternalFailure),
        };
        let expected = RosterCapacities {
            max_nodes: event_config.max_nodes(),
            max_notifiers: event_config.max_notifiers(),
            max_listeners: event_config.max_listeners(),
        };
        if roster.capacities() != expected {
            return Err(EventOpenError::ServiceInCorruptedState);
        }

        let channel = match EventChannel::<S::Region>::open(
            &config.event_channel_path(&id),
            event_config.max_listeners(),
            event_config.event_id_max_value(),
        ) {
            Ok(channel) => channel,
            Err(ChannelError::Region(RegionError::DoesNotExist)) => {
                return Err(EventOpenError::DoesNotExist)
            }
            Err(ChannelError::Region(RegionError::InsufficientPermissions)) => {
                return Err(EventOpenError::InsufficientPermissions)
            }
            Err(ChannelError::Incompatible) => {
                return Err(EventOpenError::ServiceInCorruptedState)
            }
            Err(_) => return Err(EventOpenError::InternalFailure),
        };

        let Some((node_slot, _)) = roster.claim(Table::Nodes, self.node.id().value()) else {
            return Err(EventOpenError::ExceedsMaxNumberOfNodes);
        };

        self.write_participation_tag(&config, &id);
        let state = Arc::new(ServiceState::new(
            descriptor, config, self.node.clone(), roster, channel, node_slot,
        ));
        self.node.register_service(&id, &state);
        debug!("opened event service {}", self.name);
        Ok(PortFactory::new(state))
    }

    // ---- create path ----------------------------------------------------

    fn create_impl(
        &self,
        specifier: &AttributeSpecifier,
    ) -> Result<PortFactory<S>, EventCreateError> {
        self.create_with_attribute_set(specifier.attributes())
    }

    fn create_with_attribute_set(
        &self,
        attributes: &AttributeSet,
    ) -> Result<PortFactory<S>, EventCreateError> {
        let config = self.node.config().clone();
        let id = ServiceId::new(&config.global.prefix, &self.name, MessagingPattern::Event);
        let timeout = config.global.service.creation_timeout;

        match registry::probe_state::<S>(&config, &id).map_err(storage_to_create_error)? {
            ServiceMarkerState::Ready | ServiceMarkerState::MarkedForDestruction => {
                return Err(EventCreateError::AlreadyExists)
            }
            ServiceMarkerState::Creating { elapsed } if elapsed < timeout => {
                return Err(EventCreateError::IsBeingCreatedByAnotherInstance)
            }
            ServiceMarkerState::Creating { .. } => {
                // A previous creator crashed mid-creation.
                if !registry::reclaim_stale_creation::<S>(&config, &id) {
                    return Err(EventCreateError::HangsInCreation);
                }
            }
            ServiceMarkerState::Uninitialized => {}
        }

        match registry::begin_create::<S>(&config, &id) {
            Ok(()) => {}
            Err(StorageError::AlreadyExists) => {
                return Err(EventCreateError::IsBeingCreatedByAnotherInstance)
            }
            Err(StorageError::InsufficientPermissions) => {
                return Err(EventCreateError::InsufficientPermissions)
            }
            Err(_) => return Err(EventCreateError::InternalFailure),
        }

        // The marker is held from here on; roll it back on every failure.
        let result = self.initialize_service(&config, &id, attributes);
        if result.is_err() {
            registry::abort_create::<S>(&config, &id);
        }
        result
    }

    fn initialize_service(
        &self,
        config: &Config,
        id: &ServiceId,
        attributes: &AttributeSet,
    ) -> Result<PortFactory<S>, EventCreateError> {
        // Lost race: another instance published while we probed.
        match S::Storage::exists(&config.static_config_path(id)) {
            Ok(false) => {}
            Ok(true) => return Err(EventCreateError::AlreadyExists),
            Err(e) => return Err(storage_to_create_error(e)),
        }

        self.remove_leftover_regions(config, id)?;

        let event_config = self.resolve_create_config(config);
        let capacities = RosterCapacities {
            max_nodes: event_config.max_nodes(),
            max_notifiers: event_config.max_notifiers(),
            max_listeners: event_config.max_listeners(),
        };

        let roster = match Roster::<S::Region>::create(&config.dynamic_state_path(id), capacities)
        {
            Ok(roster) => roster,
            Err(RosterError::Region(RegionError::InsufficientPermissions)) => {
                return Err(EventCreateError::InsufficientPermissions)
            }
            Err(_) => return Err(EventCreateError::InternalFailure),
        };
        let channel = match EventChannel::<S::Region>::create(
            &config.event_channel_path(id),
            event_config.max_listeners(),
            event_config.event_id_max_value(),
        ) {
            Ok(channel) => channel,
            Err(e) => {
                let _ = S::Region::remove(&config.dynamic_state_path(id));
                return Err(match e {
                    ChannelError::Region(RegionError::InsufficientPermissions) => {
                        EventCreateError::InsufficientPermissions
                    }
                    _ => EventCreateError::InternalFailure,
                });
            }
        };

        let (node_slot, _) = roster
            .claim(Table::Nodes, self.node.id().value())
            .expect("a freshly created roster has room for its creator");

        let descriptor = StaticConfig::new(
            id.clone(),
            self.name.clone(),
            PatternConfig::Event(event_config),
            attributes.clone(),
        );
        match registry::publish_descriptor::<S>(config, id, &descriptor) {
            Ok(()) => {}
            Err(e) => {
                let _ = S::Region::remove(&config.dynamic_state_path(id));
                let _ = S::Region::remove(&config.event_channel_path(id));
                return Err(storage_to_create_error(e));
            }
        }

        self.write_participation_tag(config, id);
        let state = Arc::new(ServiceState::new(
            descriptor,
            config.clone(),
            self.node.clone(),
            roster,
            channel,
            node_slot,
        ));
        self.node.register_service(id, &state);
        debug!("created event service {}", self.name);
        Ok(PortFactory::new(state))
    }

    /// Remove regions a crashed deployment left behind; refuse when a
    /// live participant is still attached to them
    fn remove_leftover_regions(
        &self,
        config: &Config,
        id: &ServiceId,
    ) -> Result<(), EventCreateError> {
        let dynamic_path = config.dynamic_state_path(id);
        match S::Region::exists(&dynamic_path) {
            Ok(false) => {}
            Ok(true) => {
                if let Ok(roster) = Roster::<S::Region>::open(&dynamic_path) {
                    let mut live_participant = false;
                    roster.for_each_active_node(|_, owner| {
                        let stem = format!("{owner:032x}");
                        if matches!(
                            S::Token::probe(&config.node_monitor_path(&stem)),
                            Ok(TokenState::Held)
                        ) {
                            live_participant = true;
                        }
                    });
                    if live_participant {
                        return Err(EventCreateError::OldConnectionsStillActive);
                    }
                }
                warn!("removing leftover dynamic state of service {}", self.name);
                let _ = S::Region::remove(&dynamic_path);
            }
            Err(_) => return Err(EventCreateError::InternalFailure),
        }
        let _ = S::Region::remove(&config.event_channel_path(id));
        Ok(())
    }

    fn resolve_create_config(&self, config: &Config) -> StaticConfigEvent {
        let defaults = &config.defaults.event;
        let clamp = |value: usize| value.clamp(1, MAX_PORTS_PER_SERVICE);
        StaticConfigEvent {
            max_notifiers: clamp(self.max_notifiers.unwrap_or(defaults.max_notifiers)),
            max_listeners: clamp(self.max_listeners.unwrap_or(defaults.max_listeners)),
            max_nodes: clamp(self.max_nodes.unwrap_or(defaults.max_nodes)),
            event_id_max_value: self
                .event_id_max_value
                .unwrap_or(defaults.event_id_max_value)
                .min(MAX_EVENT_ID_MAX_VALUE),
            deadline: self.deadline.unwrap_or(defaults.deadline),
            notifier_created_event: self
                .notifier_created_event
                .unwrap_or(defaults.notifier_created_event),
            notifier_dropped_event: self
                .notifier_dropped_event
                .unwrap_or(defaults.notifier_dropped_event),
            notifier_dead_event: self
                .notifier_dead_event
                .unwrap_or(defaults.notifier_dead_event),
        }
    }

    fn write_participation_tag(&self, config: &Config, id: &ServiceId) {
        let stem = self.node.id().file_stem();
        if let Err(e) = S::Storage::persist(&config.node_tag_path(&stem, id), &[]) {
            warn!("failed to tag participation of node {stem} in service {id}: {e}");
        }
    }

    // ---- open-or-create -------------------------------------------------

    fn open_or_create_impl(
        self,
        verifier: &AttributeVerifier,
    ) -> Result<PortFactory<S>, EventOpenOrCreateError> {
        let timeout = self.node.config().global.service.creation_timeout;
        let give_up_at = Instant::now() + timeout;

        loop {
            match self.open_impl(verifier) {
                Ok(factory) => return Ok(factory),
                Err(EventOpenError::DoesNotExist) => {}
                Err(e) => return Err(e.into()),
            }

            let mut attributes = AttributeSet::default();
            for required in verifier.required_values() {
                attributes.push(required.clone());
            }
            match self.create_with_attribute_set(&attributes) {
                Ok(factory) => return Ok(factory),
                Err(
                    EventCreateError::AlreadyExists
                    | EventCreateError::IsBeingCreatedByAnotherInstance,
                ) => {
                    // Lost the race; the winner's service shows up for open.
                    if Instant::now() >= give_up_at {
                        return Err(EventCreateError::HangsInCreation.into());
                    }
                    std::thread::sleep(CREATION_RETRY_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn storage_to_open_error(e: StorageError) -> EventOpenError {
    match e {
        StorageError::InsufficientPermissions => EventOpenError::InsufficientPermissions,
        _ => EventOpenError::InternalFailure,
    }
}

fn storage_to_create_error(e: StorageError) -> EventCreateError {
    match e {
        StorageError::InsufficientPermissions => EventCreateError::InsufficientPermissions,
        _ => EventCreateError::InternalFailure,
    }
}
