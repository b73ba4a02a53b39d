/*!
 * Static Service Registry
 * Durable (prefix, name, pattern) → descriptor mapping
 *
 * The creation state machine is driven by two markers next to the
 * descriptor: an exclusive `.creating` marker held while a creator
 * initializes the service, and a `.destroy` marker flipping a Ready
 * service into its terminal-pending state.
 */

use super::dynamic_state::Roster;
use super::static_config::StaticConfig;
use super::{Service, ServiceDetailsError, ServiceId, ServiceListError};
use crate::config::Config;
use crate::core::serialize::{self, EnvelopeError};
use crate::platform::{MonitorToken, SharedRegion, Storage, StorageError, TokenState};
use log::{debug, warn};
use std::time::Duration;

/// Observed lifecycle state of a service in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ServiceMarkerState {
    /// Nothing on record
    Uninitialized,
    /// A creator holds the creation marker since `elapsed`
    Creating { elapsed: Duration },
    /// The descriptor is published and openable
    Ready,
    /// Still usable by attached holders, not openable, removed when empty
    MarkedForDestruction,
}

/// Failures while reading a descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DescriptorReadError {
    DoesNotExist,
    VersionMismatch,
    Corrupted,
    InsufficientPermissions,
    Internal(String),
}

pub(crate) fn probe_state<S: Service>(
    config: &Config,
    id: &ServiceId,
) -> Result<ServiceMarkerState, StorageError> {
    if S::Storage::exists(&config.static_config_path(id))? {
        if S::Storage::exists(&config.destroy_marker_path(id))? {
            return Ok(ServiceMarkerState::MarkedForDestruction);
        }
        return Ok(ServiceMarkerState::Ready);
    }
    let marker = config.creating_marker_path(id);
    if S::Storage::exists(&marker)? {
        match S::Storage::age(&marker) {
            Ok(elapsed) => return Ok(ServiceMarkerState::Creating { elapsed }),
            // The creator finished or aborted between the two probes.
            Err(StorageError::DoesNotExist) => {}
            Err(e) => return Err(e),
        }
        if S::Storage::exists(&config.static_config_path(id))? {
            return Ok(ServiceMarkerState::Ready);
        }
    }
    Ok(ServiceMarkerState::Uninitialized)
}

pub(crate) fn is_marked_for_destruction<S: Service>(
    config: &Config,
    id: &ServiceId,
) -> Result<bool, StorageError> {
    S::Storage::exists(&config.destroy_marker_path(id))
}

pub(crate) fn read_descriptor<S: Service>(
    config: &Config,
    id: &ServiceId,
) -> Result<StaticConfig, DescriptorReadError> {
    let blob = match S::Storage::read(&config.static_config_path(id)) {
        Ok(blob) => blob,
        Err(StorageError::DoesNotExist) => return Err(DescriptorReadError::DoesNotExist),
        Err(StorageError::InsufficientPermissions) => {
            return Err(DescriptorReadError::InsufficientPermissions)
        }
        Err(e) => return Err(DescriptorReadError::Internal(e.to_string())),
    };
    match serialize::decode::<StaticConfig>(&blob) {
        Ok(descriptor) => Ok(descriptor),
        Err(EnvelopeError::VersionMismatch { .. }) => Err(DescriptorReadError::VersionMismatch),
        Err(_) => Err(DescriptorReadError::Corrupted),
    }
}

/// Acquire the exclusive creation marker; the caller owns the creation
/// until it publishes or aborts
pub(crate) fn begin_create<S: Service>(
    config: &Config,
    id: &ServiceId,
) -> Result<(), StorageError> {
    S::Storage::create_exclusive(&config.creating_marker_path(id), &[])
}

/// Publish the descriptor and release the creation marker
pub(crate) fn publish_descriptor<S: Service>(
    config: &Config,
    id: &ServiceId,
    descriptor: &StaticConfig,
) -> Result<(), StorageError> {
    let blob = serialize::encode(descriptor)
        .map_err(|e| StorageError::Internal(e.to_string()))?;
    S::Storage::persist(&config.static_config_path(id), &blob)?;
    S::Storage::remove(&config.creating_marker_path(id))?;
    Ok(())
}

/// Roll a failed creation back
pub(crate) fn abort_create<S: Service>(config: &Config, id: &ServiceId) {
    if let Err(e) = S::Storage::remove(&config.creating_marker_path(id)) {
        warn!("failed to roll back creation marker of service {id}: {e}");
    }
}

/// Drop the stale creation marker of a crashed creator along with any
/// leftover regions. Returns whether the path is clear afterwards.
pub(crate) fn reclaim_stale_creation<S: Service>(config: &Config, id: &ServiceId) -> bool {
    debug!("reclaiming stale creation of service {id}");
    let mut clear = true;
    if let Err(e) = S::Storage::remove(&config.creating_marker_path(id)) {
        warn!("failed to remove stale creation marker of service {id}: {e}");
        clear = false;
    }
    if let Err(e) = S::Region::remove(&config.dynamic_state_path(id)) {
        warn!("failed to remove leftover dynamic state of service {id}: {e}");
        clear = false;
    }
    if let Err(e) = S::Region::remove(&config.event_channel_path(id)) {
        warn!("failed to remove leftover event channel of service {id}: {e}");
        clear = false;
    }
    clear
}

/// Identifiers of every service with a Ready or marked descriptor
pub(crate) fn list_service_ids<S: Service>(
    config: &Config,
) -> Result<Vec<ServiceId>, StorageError> {
    let suffix = &config.global.service.static_config_suffix;
    let names = S::Storage::list(&config.service_dir())?;
    Ok(names
        .into_iter()
        .filter_map(|name| {
            name.strip_suffix(suffix.as_str())
                .map(|stem| ServiceId::from_raw(stem.to_string()))
        })
        .collect())
}

/// All Ready descriptors, skipping unreadable entries
pub(crate) fn list_descriptors<S: Service>(
    config: &Config,
) -> Result<Vec<StaticConfig>, ServiceListError> {
    let suffix = &config.global.service.static_config_suffix;
    let names = match S::Storage::list(&config.service_dir()) {
        Ok(names) => names,
        Err(StorageError::InsufficientPermissions) => {
            return Err(ServiceListError::InsufficientPermissions)
        }
        Err(e) => return Err(ServiceListError::InternalError(e.to_string())),
    };

    let mut descriptors = Vec::new();
    for name in names {
        let Some(stem) = name.strip_suffix(suffix.as_str()) else {
            continue;
        };
        let id = ServiceId::from_raw(stem.to_string());
        match is_marked_for_destruction::<S>(config, &id) {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                warn!("skipping service {id} while listing: {e}");
                continue;
            }
        }
        match read_descriptor::<S>(config, &id) {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(DescriptorReadError::DoesNotExist) => {}
            Err(e) => warn!("skipping unreadable service {id} while listing: {e:?}"),
        }
    }
    Ok(descriptors)
}

/// Flip a Ready service into its terminal-pending state.
///
/// Attached holders keep working; new opens fail with
/// `IsMarkedForDestruction`; the backing is removed once the roster
/// empties.
pub fn mark_for_destruction<S: Service>(
    config: &Config,
    id: &ServiceId,
) -> Result<(), ServiceDetailsError> {
    match S::Storage::exists(&config.static_config_path(id)) {
        Ok(true) => {}
        Ok(false) => return Err(ServiceDetailsError::FailedToOpenStaticServiceInfo),
        Err(StorageError::InsufficientPermissions) => {
            return Err(ServiceDetailsError::InsufficientPermissions)
        }
        Err(e) => return Err(ServiceDetailsError::InternalError(e.to_string())),
    }
    match S::Storage::create_exclusive(&config.destroy_marker_path(id), &[]) {
        Ok(()) | Err(StorageError::AlreadyExists) => Ok(()),
        Err(StorageError::InsufficientPermissions) => {
            Err(ServiceDetailsError::InsufficientPermissions)
        }
        Err(e) => Err(ServiceDetailsError::InternalError(e.to_string())),
    }
}

/// Remove descriptor and shared regions when no live participant remains.
///
/// Returns `Ok(true)` when the service was removed, `Ok(false)` when a
/// live participant still holds it.
pub fn destroy_if_orphaned<S: Service>(
    config: &Config,
    id: &ServiceId,
) -> Result<bool, ServiceDetailsError> {
    match Roster::<S::Region>::open(&config.dynamic_state_path(id)) {
        Ok(roster) => {
            let mut all_dead = true;
            roster.for_each_active_node(|_, owner| {
                let stem = format!("{owner:032x}");
                match S::Token::probe(&config.node_monitor_path(&stem)) {
                    Ok(TokenState::Held) => all_dead = false,
                    Ok(_) => {}
                    Err(_) => all_dead = false,
                }
            });
            if !all_dead {
                return Ok(false);
            }
        }
        Err(_) => {
            // No roster backing; only registry remnants are left.
        }
    }
    remove_service_backing::<S>(config, id);
    Ok(true)
}

/// Best-effort removal of everything a service left behind
pub(crate) fn remove_service_backing<S: Service>(config: &Config, id: &ServiceId) {
    if let Err(e) = S::Storage::remove(&config.static_config_path(id)) {
        warn!("failed to remove static descriptor of service {id}: {e}");
    }
    if let Err(e) = S::Storage::remove(&config.destroy_marker_path(id)) {
        warn!("failed to remove destruction marker of service {id}: {e}");
    }
    if let Err(e) = S::Region::remove(&config.dynamic_state_path(id)) {
        warn!("failed to remove dynamic state of service {id}: {e}");
    }
    if let Err(e) = S::Region::remove(&config.event_channel_path(id)) {
        warn!("failed to remove event channel of service {id}: {e}");
    }
}
