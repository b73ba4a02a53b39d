/*!
 * Platform Traits
 * Blob storage, shared regions and liveness tokens
 */

use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Failures of the durable blob store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("the entry already exists")]
    AlreadyExists,

    #[error("the entry does not exist")]
    DoesNotExist,

    #[error("insufficient permissions")]
    InsufficientPermissions,

    #[error("storage failure: {0}")]
    Internal(String),
}

/// Durable storage for small immutable blobs, keyed by path.
///
/// Backs static descriptors, markers, node details and participation tags.
pub trait Storage: Send + Sync + 'static {
    /// Atomically create a new entry; fails with [`StorageError::AlreadyExists`]
    /// when the key is taken. This is the rendezvous primitive of the
    /// service creation state machine.
    fn create_exclusive(path: &Path, bytes: &[u8]) -> Result<(), StorageError>;

    /// Publish an entry atomically, replacing any previous content
    fn persist(path: &Path, bytes: &[u8]) -> Result<(), StorageError>;

    fn read(path: &Path) -> Result<Vec<u8>, StorageError>;

    fn exists(path: &Path) -> Result<bool, StorageError>;

    /// Remove an entry; `Ok(false)` when it was already gone
    fn remove(path: &Path) -> Result<bool, StorageError>;

    /// Remove an entry subtree (a directory of entries)
    fn remove_tree(path: &Path) -> Result<(), StorageError>;

    /// Names of the entries directly under `dir`; empty when `dir` is absent
    fn list(dir: &Path) -> Result<Vec<String>, StorageError>;

    /// Time since the entry was last written
    fn age(path: &Path) -> Result<Duration, StorageError>;
}

/// Failures while mapping a shared region
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegionError {
    #[error("the region already exists")]
    AlreadyExists,

    #[error("the region does not exist")]
    DoesNotExist,

    #[error("insufficient permissions")]
    InsufficientPermissions,

    #[error("region failure: {0}")]
    Internal(String),
}

/// A named, fixed-size byte region shared between all participants.
///
/// All concurrent access goes through atomics placed inside the region;
/// the region itself only guarantees a stable, 8-byte aligned mapping for
/// as long as the handle lives, even when the backing name is removed.
pub trait SharedRegion: Send + Sync + Sized + 'static {
    fn create(path: &Path, size: usize) -> Result<Self, RegionError>;

    fn open(path: &Path) -> Result<Self, RegionError>;

    /// Unlink the backing name; existing mappings stay valid
    fn remove(path: &Path) -> Result<bool, RegionError>;

    fn exists(path: &Path) -> Result<bool, RegionError>;

    fn base(&self) -> *mut u8;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Observed state of a monitor token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// The owner holds the token: the node is alive
    Held,
    /// The token exists but nobody holds it: the owner died
    Abandoned,
    /// No such token
    Missing,
}

/// Failures while acquiring or probing a monitor token
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("the token is already owned")]
    AlreadyOwned,

    #[error("insufficient permissions")]
    InsufficientPermissions,

    #[error("token failure: {0}")]
    Internal(String),
}

/// A liveness token: held for the lifetime of its owner, probeable by
/// everyone. Dropping the holder releases and removes the token.
pub trait MonitorToken: Send + Sync + Sized + 'static {
    /// Create and hold the token
    fn acquire(path: &Path) -> Result<Self, TokenError>;

    /// Observe the token without taking it
    fn probe(path: &Path) -> Result<TokenState, TokenError>;

    /// Claim an abandoned token and remove it; `Ok(true)` confirms the
    /// owner's death and transfers cleanup responsibility to the caller.
    /// `Ok(false)` means the token is held or another claimant won.
    fn seize(path: &Path) -> Result<bool, TokenError>;
}
