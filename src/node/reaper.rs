/*!
 * Dead-Resource Reaper
 * Detects dead nodes and reclaims their slots, files and channel lanes
 *
 * Runs opportunistically on node creation and destruction, and on demand
 * through dead-node views. Reclaim is best-effort: permission failures
 * are logged and skipped, never escalated into the triggering operation.
 */

use super::{monitor, NodeCleanupFailure};
use crate::config::Config;
use crate::core::types::NodeId;
use crate::platform::{MonitorToken, Storage, TokenError, TokenState};
use crate::service::dynamic_state::{Roster, Table};
use crate::service::event_channel::EventChannel;
use crate::service::registry;
use crate::service::{Service, ServiceId};
use log::{debug, info, warn};

/// Outcome of one opportunistic reaper run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CleanupReport {
    pub(crate) dead_nodes_detected: usize,
    pub(crate) dead_nodes_removed: usize,
}

/// Scan all nodes and reap every one whose monitor token is abandoned
pub(crate) fn cleanup_dead_nodes<S: Service>(config: &Config) -> CleanupReport {
    let mut report = CleanupReport::default();
    let stems = match monitor::list_node_stems::<S>(config) {
        Ok(stems) => stems,
        Err(e) => {
            warn!("reaper cannot enumerate nodes: {e}");
            return report;
        }
    };

    for stem in stems {
        match monitor::probe_node::<S>(config, &stem) {
            Ok(TokenState::Abandoned) => {
                report.dead_nodes_detected += 1;
                match remove_dead_node::<S>(config, &stem) {
                    Ok(true) => report.dead_nodes_removed += 1,
                    Ok(false) => {}
                    Err(e) => warn!("failed to reap dead node {stem}: {e}"),
                }
            }
            Ok(_) => {}
            Err(e) => warn!("reaper cannot probe node {stem}: {e}"),
        }
    }

    if report.dead_nodes_detected > 0 {
        info!(
            "reaper removed {} of {} dead nodes",
            report.dead_nodes_removed, report.dead_nodes_detected
        );
    }
    report
}

/// Reclaim everything a single dead node left behind.
///
/// Seizing the monitor token doubles as the death confirmation and as the
/// exclusive claim against competing reapers.
pub(crate) fn remove_dead_node<S: Service>(
    config: &Config,
    stem: &str,
) -> Result<bool, NodeCleanupFailure> {
    match S::Token::seize(&config.node_monitor_path(stem)) {
        Ok(true) => {}
        Ok(false) => return Ok(false),
        Err(TokenError::InsufficientPermissions) => {
            return Err(NodeCleanupFailure::InsufficientPermissions)
        }
        Err(e) => return Err(NodeCleanupFailure::InternalError(e.to_string())),
    }
    debug!("confirmed death of node {stem}, reclaiming its resources");

    if let Some(owner) = NodeId::parse_file_stem(stem) {
        for id in participated_services::<S>(config, stem) {
            reclaim_service_slots::<S>(config, &id, owner);
        }
    } else {
        warn!("node {stem} has an unparsable identity, only removing its files");
    }

    if let Err(e) = S::Storage::remove(&config.node_details_path(stem)) {
        warn!("failed to remove details of dead node {stem}: {e}");
    }
    if let Err(e) = S::Storage::remove_tree(&config.node_tags_dir(stem)) {
        warn!("failed to remove participation tags of dead node {stem}: {e}");
    }
    Ok(true)
}

/// The services a dead node participated in: its tag entries when
/// available, the full registry otherwise
fn participated_services<S: Service>(config: &Config, stem: &str) -> Vec<ServiceId> {
    match S::Storage::list(&config.node_tags_dir(stem)) {
        Ok(names) if !names.is_empty() => {
            return names.into_iter().map(ServiceId::from_raw).collect()
        }
        Ok(_) => {}
        Err(e) => warn!("cannot read participation tags of dead node {stem}: {e}"),
    }
    match registry::list_service_ids::<S>(config) {
        Ok(ids) => ids,
        Err(e) => {
            warn!("reaper cannot enumerate services: {e}");
            Vec::new()
        }
    }
}

/// Free the dead node's slots on one service and notify the survivors
fn reclaim_service_slots<S: Service>(config: &Config, id: &ServiceId, owner: u128) {
    let roster = match Roster::<S::Region>::open(&config.dynamic_state_path(id)) {
        Ok(roster) => roster,
        // No dynamic state, nothing to reclaim here.
        Err(_) => return,
    };

    let event_config = registry::read_descriptor::<S>(config, id)
        .ok()
        .and_then(|descriptor| descriptor.event().cloned());
    let channel = event_config.as_ref().and_then(|event| {
        EventChannel::<S::Region>::open(
            &config.event_channel_path(id),
            event.max_listeners(),
            event.event_id_max_value(),
        )
        .ok()
    });
    let notifier_dead_event = event_config
        .as_ref()
        .and_then(|event| event.notifier_dead_event());

    let freed_notifiers = roster.release_owned(Table::Notifiers, owner).len();

    let mut dead_listener_lanes = Vec::new();
    roster.for_each_active(Table::Listeners, |index, _, slot_owner| {
        if slot_owner == owner {
            dead_listener_lanes.push(index);
        }
    });
    for lane in dead_listener_lanes.iter().copied() {
        if let Some(channel) = &channel {
            // The survivors learn about the loss before the slot goes.
            if let Some(dead_event) = notifier_dead_event {
                channel.post(dead_event);
            }
            channel.close_lane(lane);
        }
        roster.release(Table::Listeners, lane);
    }

    let freed_nodes = roster.release_owned(Table::Nodes, owner).len();
    if freed_notifiers + dead_listener_lanes.len() + freed_nodes > 0 {
        debug!(
            "reclaimed {} notifier, {} listener and {} node slots of service {id}",
            freed_notifiers,
            dead_listener_lanes.len(),
            freed_nodes
        );
    }

    if roster.active_nodes() == 0 {
        debug!("service {id} has no participants left, removing its backing");
        registry::remove_service_backing::<S>(config, id);
    }
}
