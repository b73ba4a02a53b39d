/*!
 * File-Backed Platform Bindings
 * Durable files, mmap(MAP_SHARED) regions and flock-held monitor tokens
 *
 * Everything lives under the configured root directory; filesystem
 * permissions are the only access control.
 */

use super::traits::{
    MonitorToken, RegionError, SharedRegion, Storage, StorageError, TokenError, TokenState,
};
use log::warn;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn ensure_parent(path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(map_storage_err)?;
    }
    Ok(())
}

fn map_storage_err(e: std::io::Error) -> StorageError {
    match e.kind() {
        ErrorKind::NotFound => StorageError::DoesNotExist,
        ErrorKind::AlreadyExists => StorageError::AlreadyExists,
        ErrorKind::PermissionDenied => StorageError::InsufficientPermissions,
        _ => StorageError::Internal(e.to_string()),
    }
}

/// Blob storage as plain files
#[derive(Debug)]
pub struct FileStorage;

impl Storage for FileStorage {
    fn create_exclusive(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        ensure_parent(path)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(map_storage_err)?;
        file.write_all(bytes).map_err(map_storage_err)?;
        file.sync_all().map_err(map_storage_err)?;
        Ok(())
    }

    fn persist(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        ensure_parent(path)?;
        // Temp file + rename keeps readers from ever seeing a torn blob.
        let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)
            .map_err(map_storage_err)?;
        file.write_all(bytes).map_err(map_storage_err)?;
        file.sync_all().map_err(map_storage_err)?;
        drop(file);
        std::fs::rename(&tmp, path).map_err(map_storage_err)
    }

    fn read(path: &Path) -> Result<Vec<u8>, StorageError> {
        let mut bytes = Vec::new();
        File::open(path)
            .map_err(map_storage_err)?
            .read_to_end(&mut bytes)
            .map_err(map_storage_err)?;
        Ok(bytes)
    }

    fn exists(path: &Path) -> Result<bool, StorageError> {
        Ok(path.exists())
    }

    fn remove(path: &Path) -> Result<bool, StorageError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(map_storage_err(e)),
        }
    }

    fn remove_tree(path: &Path) -> Result<(), StorageError> {
        match std::fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(map_storage_err(e)),
        }
    }

    fn list(dir: &Path) -> Result<Vec<String>, StorageError> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(map_storage_err(e)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(map_storage_err)?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    fn age(path: &Path) -> Result<Duration, StorageError> {
        let modified = std::fs::metadata(path)
            .map_err(map_storage_err)?
            .modified()
            .map_err(map_storage_err)?;
        Ok(modified.elapsed().unwrap_or(Duration::ZERO))
    }
}

fn map_region_err(e: std::io::Error) -> RegionError {
    match e.kind() {
        ErrorKind::NotFound => RegionError::DoesNotExist,
        ErrorKind::AlreadyExists => RegionError::AlreadyExists,
        ErrorKind::PermissionDenied => RegionError::InsufficientPermissions,
        _ => RegionError::Internal(e.to_string()),
    }
}

/// A shared region backed by a mmap'd file.
///
/// The mapping stays valid after the backing file is unlinked; the kernel
/// reclaims the pages once the last mapping goes away.
#[derive(Debug)]
pub struct FileRegion {
    base: *mut u8,
    len: usize,
    path: PathBuf,
}

// The raw base pointer is only dereferenced through atomics.
unsafe impl Send for FileRegion {}
unsafe impl Sync for FileRegion {}

impl FileRegion {
    fn map(file: &File, len: usize) -> Result<*mut u8, RegionError> {
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(RegionError::Internal(
                std::io::Error::last_os_error().to_string(),
            ));
        }
        Ok(base as *mut u8)
    }
}

impl SharedRegion for FileRegion {
    fn create(path: &Path, size: usize) -> Result<Self, RegionError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(map_region_err)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(map_region_err)?;
        // ftruncate zero-fills, which doubles as slot initialization.
        if unsafe { libc::ftruncate(file.as_raw_fd(), size as libc::off_t) } != 0 {
            let err = std::io::Error::last_os_error();
            let _ = std::fs::remove_file(path);
            return Err(RegionError::Internal(err.to_string()));
        }
        let base = Self::map(&file, size)?;
        Ok(Self {
            base,
            len: size,
            path: path.to_path_buf(),
        })
    }

    fn open(path: &Path) -> Result<Self, RegionError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(map_region_err)?;
        let len = file.metadata().map_err(map_region_err)?.len() as usize;
        if len == 0 {
            return Err(RegionError::Internal("region file is empty".to_string()));
        }
        let base = Self::map(&file, len)?;
        Ok(Self {
            base,
            len,
            path: path.to_path_buf(),
        })
    }

    fn remove(path: &Path) -> Result<bool, RegionError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(map_region_err(e)),
        }
    }

    fn exists(path: &Path) -> Result<bool, RegionError> {
        Ok(path.exists())
    }

    fn base(&self) -> *mut u8 {
        self.base
    }

    fn len(&self) -> usize {
        self.len
    }
}

impl Drop for FileRegion {
    fn drop(&mut self) {
        let rc = unsafe { libc::munmap(self.base as *mut libc::c_void, self.len) };
        if rc != 0 {
            warn!(
                "failed to unmap region {:?}: {}",
                self.path,
                std::io::Error::last_os_error()
            );
        }
    }
}

/// A monitor token as a flock-held file.
///
/// The advisory lock vanishes with the owning process, whatever the cause
/// of death, which makes it a reliable liveness probe.
#[derive(Debug)]
pub struct FileToken {
    file: File,
    path: PathBuf,
}

impl MonitorToken for FileToken {
    fn acquire(path: &Path) -> Result<Self, TokenError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TokenError::Internal(e.to_string()))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => TokenError::AlreadyOwned,
                ErrorKind::PermissionDenied => TokenError::InsufficientPermissions,
                _ => TokenError::Internal(e.to_string()),
            })?;
        if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } != 0 {
            let err = std::io::Error::last_os_error();
            let _ = std::fs::remove_file(path);
            return Err(TokenError::Internal(err.to_string()));
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    fn probe(path: &Path) -> Result<TokenState, TokenError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(TokenState::Missing),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Err(TokenError::InsufficientPermissions)
            }
            Err(e) => return Err(TokenError::Internal(e.to_string())),
        };
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
            Ok(TokenState::Abandoned)
        } else {
            match std::io::Error::last_os_error().raw_os_error() {
                Some(libc::EWOULDBLOCK) => Ok(TokenState::Held),
                _ => Err(TokenError::Internal(
                    std::io::Error::last_os_error().to_string(),
                )),
            }
        }
    }

    fn seize(path: &Path) -> Result<bool, TokenError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Err(TokenError::InsufficientPermissions)
            }
            Err(e) => return Err(TokenError::Internal(e.to_string())),
        };
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            // Held by a live owner or by a competing reaper.
            return Ok(false);
        }
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                Err(TokenError::InsufficientPermissions)
            }
            Err(e) => Err(TokenError::Internal(e.to_string())),
        }
    }
}

impl Drop for FileToken {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("failed to remove monitor token {:?}: {e}", self.path);
            }
        }
        // Dropping the file handle releases the advisory lock.
        let _ = &self.file;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "zerobus_platform_test_{}",
            uuid::Uuid::new_v4().simple()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn exclusive_create_is_exclusive() {
        let dir = scratch_dir();
        let path = dir.join("blob");
        FileStorage::create_exclusive(&path, b"one").unwrap();
        assert_eq!(
            FileStorage::create_exclusive(&path, b"two").unwrap_err(),
            StorageError::AlreadyExists
        );
        assert_eq!(FileStorage::read(&path).unwrap(), b"one");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn region_create_open_share_bytes() {
        let dir = scratch_dir();
        let path = dir.join("region");
        let writer = FileRegion::create(&path, 4096).unwrap();
        let reader = FileRegion::open(&path).unwrap();

        let word = unsafe { &*(writer.base() as *const AtomicU64) };
        word.store(0xDEAD_BEEF, Ordering::Release);
        let seen = unsafe { &*(reader.base() as *const AtomicU64) };
        assert_eq!(seen.load(Ordering::Acquire), 0xDEAD_BEEF);

        // Mappings survive removal of the backing file.
        assert!(FileRegion::remove(&path).unwrap());
        assert_eq!(seen.load(Ordering::Acquire), 0xDEAD_BEEF);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn token_states() {
        let dir = scratch_dir();
        let path = dir.join("node.monitor");
        assert_eq!(FileToken::probe(&path).unwrap(), TokenState::Missing);

        let token = FileToken::acquire(&path).unwrap();
        assert_eq!(FileToken::probe(&path).unwrap(), TokenState::Held);
        drop(token);
        assert_eq!(FileToken::probe(&path).unwrap(), TokenState::Missing);

        // A token file without a holder reads as abandoned.
        std::fs::write(&path, b"").unwrap();
        assert_eq!(FileToken::probe(&path).unwrap(), TokenState::Abandoned);
        assert!(FileToken::seize(&path).unwrap());
        assert_eq!(FileToken::probe(&path).unwrap(), TokenState::Missing);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
