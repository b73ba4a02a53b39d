/*!
 * Configuration
 * Root paths, file suffix conventions and per-pattern QoS defaults
 *
 * A config is adopted by a node at creation and is read-only afterwards.
 * The process-wide default is an initialize-once lazy value seeded from a
 * TOML file search path (working directory, home directory, /etc).
 */

use crate::service::ServiceId;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

const CONFIG_FILE_NAME: &str = "zerobus.toml";

static GLOBAL_CONFIG: OnceLock<Config> = OnceLock::new();

/// Failures while loading a [`Config`] from a file
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCreationError {
    #[error("the config file does not exist")]
    ConfigFileDoesNotExist,

    #[error("insufficient permissions to read the config file")]
    InsufficientPermissions,

    #[error("failed to read the config file contents")]
    FailedToReadConfigFileContents,

    #[error("failed to deserialize the config file: {0}")]
    UnableToDeserializeContents(String),
}

/// Global settings: paths, prefixes and file suffix conventions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Global {
    /// Directory under which all zerobus resources live
    pub root_path: PathBuf,
    /// Prefix scoping every file and directory name
    pub prefix: String,
    pub service: ServiceLayout,
    pub node: NodeLayout,
}

impl Default for Global {
    fn default() -> Self {
        Self {
            root_path: default_root_path(),
            prefix: "zb_".to_string(),
            service: ServiceLayout::default(),
            node: NodeLayout::default(),
        }
    }
}

/// Service directory layout and creation timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceLayout {
    /// Directory name (under root) holding all service files
    pub directory: String,
    /// Suffix of the immutable static descriptor
    pub static_config_suffix: String,
    /// Suffix of the shared dynamic state region
    pub dynamic_state_suffix: String,
    /// Suffix of the shared event channel region
    pub event_channel_suffix: String,
    /// How long another process waits for an in-flight service creation
    /// to finish before treating it as hanging
    pub creation_timeout: Duration,
}

impl Default for ServiceLayout {
    fn default() -> Self {
        Self {
            directory: "services".to_string(),
            static_config_suffix: ".service".to_string(),
            dynamic_state_suffix: ".dynamic".to_string(),
            event_channel_suffix: ".event".to_string(),
            creation_timeout: Duration::from_millis(500),
        }
    }
}

/// Node directory layout and dead-node cleanup policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeLayout {
    /// Directory name (under root) holding all node files
    pub directory: String,
    /// Suffix of the per-node monitor token
    pub monitor_suffix: String,
    /// Suffix of the per-node details blob
    pub details_suffix: String,
    /// Suffix of the per-node service participation tag directory
    pub service_tag_suffix: String,
    /// Scan for and reap dead nodes whenever a node is created
    pub cleanup_dead_nodes_on_creation: bool,
    /// Scan for and reap dead nodes whenever a node is destroyed
    pub cleanup_dead_nodes_on_destruction: bool,
}

impl Default for NodeLayout {
    fn default() -> Self {
        Self {
            directory: "nodes".to_string(),
            monitor_suffix: ".monitor".to_string(),
            details_suffix: ".details".to_string(),
            service_tag_suffix: ".tags".to_string(),
            cleanup_dead_nodes_on_creation: true,
            cleanup_dead_nodes_on_destruction: true,
        }
    }
}

/// QoS defaults for event services
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventDefaults {
    pub max_notifiers: usize,
    pub max_listeners: usize,
    pub max_nodes: usize,
    /// Largest event id a notifier may emit; sizes the per-listener bitmap
    pub event_id_max_value: usize,
    pub notifier_created_event: Option<usize>,
    pub notifier_dropped_event: Option<usize>,
    pub notifier_dead_event: Option<usize>,
    pub deadline: Option<Duration>,
}

impl Default for EventDefaults {
    fn default() -> Self {
        Self {
            max_notifiers: 16,
            max_listeners: 16,
            max_nodes: 36,
            event_id_max_value: 255,
            notifier_created_event: None,
            notifier_dropped_event: None,
            notifier_dead_event: None,
            deadline: None,
        }
    }
}

/// QoS defaults for publish/subscribe services.
///
/// The data plane lives outside this crate; the capacities are recorded in
/// descriptors so discovery can enumerate such services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishSubscribeDefaults {
    pub max_publishers: usize,
    pub max_subscribers: usize,
    pub max_nodes: usize,
    pub subscriber_max_buffer_size: usize,
}

impl Default for PublishSubscribeDefaults {
    fn default() -> Self {
        Self {
            max_publishers: 2,
            max_subscribers: 8,
            max_nodes: 20,
            subscriber_max_buffer_size: 2,
        }
    }
}

/// QoS defaults for request/response services; descriptor-only, as above
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestResponseDefaults {
    pub max_clients: usize,
    pub max_servers: usize,
    pub max_nodes: usize,
}

impl Default for RequestResponseDefaults {
    fn default() -> Self {
        Self {
            max_clients: 8,
            max_servers: 2,
            max_nodes: 20,
        }
    }
}

/// Per-pattern QoS defaults applied when a builder leaves a knob unset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    pub event: EventDefaults,
    pub publish_subscribe: PublishSubscribeDefaults,
    pub request_response: RequestResponseDefaults,
}

/// All configurable settings of the messaging system
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub global: Global,
    pub defaults: Defaults,
}

impl Config {
    /// Load a config from an explicit TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigCreationError> {
        let contents = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigCreationError::ConfigFileDoesNotExist,
            std::io::ErrorKind::PermissionDenied => ConfigCreationError::InsufficientPermissions,
            _ => ConfigCreationError::FailedToReadConfigFileContents,
        })?;
        toml::from_str(&contents)
            .map_err(|e| ConfigCreationError::UnableToDeserializeContents(e.to_string()))
    }

    /// Install a custom file as the process-wide default config.
    ///
    /// Must be called before any other access to [`Config::global_config`];
    /// otherwise the already-initialized value stays in effect and the call
    /// only logs a warning.
    pub fn setup_global_config_from_file(
        path: &Path,
    ) -> Result<&'static Config, ConfigCreationError> {
        let config = Self::from_file(path)?;
        let installed = GLOBAL_CONFIG.get_or_init(|| config.clone());
        if *installed != config {
            warn!("global config was already initialized, file {path:?} is ignored");
        }
        Ok(installed)
    }

    /// The process-wide default config.
    ///
    /// On first access, searches `$PWD/config/zerobus.toml`,
    /// `$PWD/zerobus.toml`, `$HOME/.config/zerobus/zerobus.toml` and
    /// `/etc/zerobus/zerobus.toml`; falls back to built-in defaults.
    pub fn global_config() -> &'static Config {
        GLOBAL_CONFIG.get_or_init(|| {
            for candidate in config_search_path() {
                match Self::from_file(&candidate) {
                    Ok(config) => {
                        debug!("global config loaded from {candidate:?}");
                        return config;
                    }
                    Err(ConfigCreationError::ConfigFileDoesNotExist) => continue,
                    Err(e) => {
                        warn!("skipping config file {candidate:?}: {e}");
                        continue;
                    }
                }
            }
            Config::default()
        })
    }

    // ---- path derivation ------------------------------------------------

    /// Directory holding all service files
    pub fn service_dir(&self) -> PathBuf {
        self.global
            .root_path
            .join(format!("{}{}", self.global.prefix, self.global.service.directory))
    }

    /// Directory holding all node files
    pub fn node_dir(&self) -> PathBuf {
        self.global
            .root_path
            .join(format!("{}{}", self.global.prefix, self.global.node.directory))
    }

    pub fn static_config_path(&self, id: &ServiceId) -> PathBuf {
        self.service_dir()
            .join(format!("{}{}", id.as_str(), self.global.service.static_config_suffix))
    }

    /// Marker present while a descriptor is being created
    pub fn creating_marker_path(&self, id: &ServiceId) -> PathBuf {
        let mut path = self.static_config_path(id);
        path.set_extension("service.creating");
        path
    }

    /// Marker present once a service is marked for destruction
    pub fn destroy_marker_path(&self, id: &ServiceId) -> PathBuf {
        let mut path = self.static_config_path(id);
        path.set_extension("service.destroy");
        path
    }

    pub fn dynamic_state_path(&self, id: &ServiceId) -> PathBuf {
        self.service_dir()
            .join(format!("{}{}", id.as_str(), self.global.service.dynamic_state_suffix))
    }

    pub fn event_channel_path(&self, id: &ServiceId) -> PathBuf {
        self.service_dir()
            .join(format!("{}{}", id.as_str(), self.global.service.event_channel_suffix))
    }

    pub fn node_monitor_path(&self, node_stem: &str) -> PathBuf {
        self.node_dir()
            .join(format!("{}{}", node_stem, self.global.node.monitor_suffix))
    }

    pub fn node_details_path(&self, node_stem: &str) -> PathBuf {
        self.node_dir()
            .join(format!("{}{}", node_stem, self.global.node.details_suffix))
    }

    /// Directory of per-service participation tags of one node
    pub fn node_tags_dir(&self, node_stem: &str) -> PathBuf {
        self.node_dir()
            .join(format!("{}{}", node_stem, self.global.node.service_tag_suffix))
    }

    pub fn node_tag_path(&self, node_stem: &str, id: &ServiceId) -> PathBuf {
        self.node_tags_dir(node_stem).join(id.as_str())
    }
}

fn default_root_path() -> PathBuf {
    if cfg!(unix) {
        PathBuf::from("/tmp/zerobus/")
    } else {
        std::env::temp_dir().join("zerobus")
    }
}

fn config_search_path() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join("config").join(CONFIG_FILE_NAME));
        candidates.push(cwd.join(CONFIG_FILE_NAME));
    }
    if let Some(home) = std::env::var_os("HOME") {
        candidates.push(
            PathBuf::from(home)
                .join(".config")
                .join("zerobus")
                .join(CONFIG_FILE_NAME),
        );
    }
    candidates.push(PathBuf::from("/etc/zerobus").join(CONFIG_FILE_NAME));
    candidates
}
