/*!
 * Liveness Monitor
 * Probing the per-node monitor tokens of all registered nodes
 */

use super::{NodeDetails, NodeListFailure};
use crate::config::Config;
use crate::core::serialize;
use crate::platform::{MonitorToken, Storage, StorageError, TokenError, TokenState};
use crate::service::Service;
use log::warn;

/// Stems (node id renderings) of every node with a monitor token
pub(crate) fn list_node_stems<S: Service>(
    config: &Config,
) -> Result<Vec<String>, NodeListFailure> {
    let suffix = &config.global.node.monitor_suffix;
    let names = match S::Storage::list(&config.node_dir()) {
        Ok(names) => names,
        Err(StorageError::InsufficientPermissions) => {
            return Err(NodeListFailure::InsufficientPermissions)
        }
        Err(e) => return Err(NodeListFailure::InternalError(e.to_string())),
    };
    Ok(names
        .into_iter()
        .filter_map(|name| name.strip_suffix(suffix.as_str()).map(str::to_string))
        .collect())
}

/// Liveness of one node: can its token still be observed as held?
pub(crate) fn probe_node<S: Service>(
    config: &Config,
    stem: &str,
) -> Result<TokenState, TokenError> {
    S::Token::probe(&config.node_monitor_path(stem))
}

/// The persisted identity of a node, when readable and well-formed
pub(crate) fn read_details<S: Service>(config: &Config, stem: &str) -> Option<NodeDetails> {
    let blob = match S::Storage::read(&config.node_details_path(stem)) {
        Ok(blob) => blob,
        Err(StorageError::DoesNotExist) => return None,
        Err(e) => {
            warn!("failed to read details of node {stem}: {e}");
            return None;
        }
    };
    match serialize::decode::<NodeDetails>(&blob) {
        Ok(details) => Some(details),
        Err(e) => {
            warn!("details of node {stem} are not decodable: {e}");
            None
        }
    }
}
