/*!
 * Core Types
 * Common identifiers used across the service and port layers
 */

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Process ID type
pub type Pid = u32;

/// Controls whether an enumeration callback keeps receiving entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackProgression {
    /// Deliver the next entry
    Continue,
    /// Abort the enumeration
    Stop,
}

/// Unique identity of a node.
///
/// Carries a 128-bit random value, the process id of the creating process
/// and the creation timestamps (wall clock and monotonic clock).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    value: u128,
    pid: Pid,
    created_wall_nanos: u64,
    created_monotonic_nanos: u64,
}

impl NodeId {
    pub(crate) fn generate() -> Self {
        Self {
            value: uuid::Uuid::new_v4().as_u128(),
            pid: std::process::id(),
            created_wall_nanos: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0),
            created_monotonic_nanos: monotonic_nanos(),
        }
    }

    /// The 128-bit unique value
    pub fn value(&self) -> u128 {
        self.value
    }

    /// The process id of the process that created the node
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Wall-clock creation time in nanoseconds since the Unix epoch
    pub fn creation_time(&self) -> u64 {
        self.created_wall_nanos
    }

    /// Monotonic-clock creation time in nanoseconds
    pub fn creation_time_monotonic(&self) -> u64 {
        self.created_monotonic_nanos
    }

    /// Filesystem-safe rendering of the unique value, 32 hex characters
    pub fn file_stem(&self) -> String {
        format!("{:032x}", self.value)
    }

    pub(crate) fn parse_file_stem(stem: &str) -> Option<u128> {
        if stem.len() != 32 {
            return None;
        }
        u128::from_str_radix(stem, 16).ok()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.value)
    }
}

/// Unique identifier of a notifier port, assigned from the service roster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UniqueNotifierId(pub(crate) u64);

impl UniqueNotifierId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Unique identifier of a listener port, assigned from the service roster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UniqueListenerId(pub(crate) u64);

impl UniqueListenerId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Nanoseconds from the OS monotonic clock
pub(crate) fn monotonic_nanos() -> u64 {
    #[cfg(unix)]
    {
        let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
        if unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) } == 0 {
            return (ts.tv_sec as u64) * 1_000_000_000 + ts.tv_nsec as u64;
        }
        0
    }
    #[cfg(not(unix))]
    {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique() {
        let a = NodeId::generate();
        let b = NodeId::generate();
        assert_ne!(a.value(), b.value());
        assert_eq!(a.pid(), std::process::id());
    }

    #[test]
    fn file_stem_round_trips() {
        let id = NodeId::generate();
        let stem = id.file_stem();
        assert_eq!(stem.len(), 32);
        assert_eq!(NodeId::parse_file_stem(&stem), Some(id.value()));
        assert_eq!(NodeId::parse_file_stem("not-a-node-id"), None);
    }
}
