/*!
 * Heap-Backed Platform Bindings
 * Process-local rendition of storage, regions and tokens
 *
 * Single global registries keyed by the same paths the file bindings
 * would use, so the engine code is identical for both variants. Names
 * under different config roots stay isolated because the keys are full
 * paths.
 */

use super::traits::{
    MonitorToken, RegionError, SharedRegion, Storage, StorageError, TokenError, TokenState,
};
use ahash::RandomState;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

struct HeapBlob {
    bytes: Vec<u8>,
    written: Instant,
}

fn blobs() -> &'static DashMap<PathBuf, HeapBlob, RandomState> {
    static BLOBS: OnceLock<DashMap<PathBuf, HeapBlob, RandomState>> = OnceLock::new();
    BLOBS.get_or_init(|| DashMap::with_hasher(RandomState::new()))
}

fn regions() -> &'static DashMap<PathBuf, Arc<HeapBacking>, RandomState> {
    static REGIONS: OnceLock<DashMap<PathBuf, Arc<HeapBacking>, RandomState>> = OnceLock::new();
    REGIONS.get_or_init(|| DashMap::with_hasher(RandomState::new()))
}

fn held_tokens() -> &'static DashMap<PathBuf, (), RandomState> {
    static HELD: OnceLock<DashMap<PathBuf, (), RandomState>> = OnceLock::new();
    HELD.get_or_init(|| DashMap::with_hasher(RandomState::new()))
}

/// Blob storage in a process-wide map
#[derive(Debug)]
pub struct HeapStorage;

impl Storage for HeapStorage {
    fn create_exclusive(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        match blobs().entry(path.to_path_buf()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StorageError::AlreadyExists),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(HeapBlob {
                    bytes: bytes.to_vec(),
                    written: Instant::now(),
                });
                Ok(())
            }
        }
    }

    fn persist(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        blobs().insert(
            path.to_path_buf(),
            HeapBlob {
                bytes: bytes.to_vec(),
                written: Instant::now(),
            },
        );
        Ok(())
    }

    fn read(path: &Path) -> Result<Vec<u8>, StorageError> {
        blobs()
            .get(path)
            .map(|blob| blob.bytes.clone())
            .ok_or(StorageError::DoesNotExist)
    }

    fn exists(path: &Path) -> Result<bool, StorageError> {
        Ok(blobs().contains_key(path))
    }

    fn remove(path: &Path) -> Result<bool, StorageError> {
        Ok(blobs().remove(path).is_some())
    }

    fn remove_tree(path: &Path) -> Result<(), StorageError> {
        blobs().retain(|key, _| !key.starts_with(path));
        Ok(())
    }

    fn list(dir: &Path) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        for entry in blobs().iter() {
            if entry.key().parent() == Some(dir) {
                if let Some(name) = entry.key().file_name().and_then(|n| n.to_str()) {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    fn age(path: &Path) -> Result<Duration, StorageError> {
        blobs()
            .get(path)
            .map(|blob| blob.written.elapsed())
            .ok_or(StorageError::DoesNotExist)
    }
}

/// 8-byte aligned raw allocation shared by every open handle
struct HeapBacking {
    base: *mut u8,
    len: usize,
}

unsafe impl Send for HeapBacking {}
unsafe impl Sync for HeapBacking {}

impl HeapBacking {
    fn allocate(len: usize) -> Result<Self, RegionError> {
        let layout = std::alloc::Layout::from_size_align(len.max(8), 8)
            .map_err(|e| RegionError::Internal(e.to_string()))?;
        let base = unsafe { std::alloc::alloc_zeroed(layout) };
        if base.is_null() {
            return Err(RegionError::Internal("allocation failed".to_string()));
        }
        Ok(Self { base, len })
    }
}

impl Drop for HeapBacking {
    fn drop(&mut self) {
        let layout = std::alloc::Layout::from_size_align(self.len.max(8), 8)
            .expect("layout was valid at allocation");
        unsafe { std::alloc::dealloc(self.base, layout) };
    }
}

/// A shared region on the process heap.
///
/// Handles share one backing allocation; the allocation survives
/// [`SharedRegion::remove`] until the last handle is gone, mirroring the
/// unlink semantics of the file bindings.
#[derive(Clone)]
pub struct HeapRegion {
    backing: Arc<HeapBacking>,
}

impl SharedRegion for HeapRegion {
    fn create(path: &Path, size: usize) -> Result<Self, RegionError> {
        let backing = Arc::new(HeapBacking::allocate(size)?);
        match regions().entry(path.to_path_buf()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(RegionError::AlreadyExists),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&backing));
                Ok(Self { backing })
            }
        }
    }

    fn open(path: &Path) -> Result<Self, RegionError> {
        regions()
            .get(path)
            .map(|backing| Self {
                backing: Arc::clone(&backing),
            })
            .ok_or(RegionError::DoesNotExist)
    }

    fn remove(path: &Path) -> Result<bool, RegionError> {
        Ok(regions().remove(path).is_some())
    }

    fn exists(path: &Path) -> Result<bool, RegionError> {
        Ok(regions().contains_key(path))
    }

    fn base(&self) -> *mut u8 {
        self.backing.base
    }

    fn len(&self) -> usize {
        self.backing.len
    }
}

/// A monitor token in the process-wide held set.
///
/// Existence comes from the blob store, holdership from the set; an entry
/// present in the store but absent from the set reads as abandoned, which
/// is what dead-node simulations create.
#[derive(Debug)]
pub struct HeapToken {
    path: PathBuf,
}

impl MonitorToken for HeapToken {
    fn acquire(path: &Path) -> Result<Self, TokenError> {
        match HeapStorage::create_exclusive(path, &[]) {
            Ok(()) => {}
            Err(StorageError::AlreadyExists) => return Err(TokenError::AlreadyOwned),
            Err(e) => return Err(TokenError::Internal(e.to_string())),
        }
        held_tokens().insert(path.to_path_buf(), ());
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    fn probe(path: &Path) -> Result<TokenState, TokenError> {
        if !blobs().contains_key(path) {
            return Ok(TokenState::Missing);
        }
        if held_tokens().contains_key(path) {
            Ok(TokenState::Held)
        } else {
            Ok(TokenState::Abandoned)
        }
    }

    fn seize(path: &Path) -> Result<bool, TokenError> {
        if held_tokens().contains_key(path) {
            return Ok(false);
        }
        // The map removal is the atomic claim.
        Ok(blobs().remove(path).is_some())
    }
}

impl Drop for HeapToken {
    fn drop(&mut self) {
        held_tokens().remove(&self.path);
        blobs().remove(&self.path);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;

    /// Drop holdership of a token while keeping its registration,
    /// simulating an owner that died without cleanup
    pub(crate) fn abandon_token(path: &Path) {
        super::held_tokens().remove(path);
    }
}
