//! Directory-backed storage pools
//!
//! Each pool is a directory under a root; each volume is a regular file in
//! its pool directory. The durable key of a volume is the canonical absolute
//! path of its file, the convention directory pools use.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{PoolInfo, StorageBackend, VolumeHandle, VolumeKey, validate_volume_name};
use crate::CidataError;

/// Storage backend over a directory of pool directories
#[derive(Debug, Clone)]
pub struct DirBackend {
    root: PathBuf,
}

impl DirBackend {
    /// Open the backend rooted at `root`, which must already exist
    pub fn open(root: impl AsRef<Path>) -> Result<Self, CidataError> {
        let root = root.as_ref();
        let root = fs::canonicalize(root).map_err(|e| {
            CidataError::ConnectionUnavailable(format!(
                "storage root {} is not accessible: {}",
                root.display(),
                e
            ))
        })?;
        if !root.is_dir() {
            return Err(CidataError::ConnectionUnavailable(format!(
                "storage root {} is not a directory",
                root.display()
            )));
        }
        debug!("Opened directory storage backend at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a pool directory (used by tests and first-time setup)
    pub fn create_pool(&self, name: &str) -> Result<PoolInfo, CidataError> {
        validate_volume_name(name)?;
        let path = self.root.join(name);
        fs::create_dir_all(&path)
            .map_err(|e| CidataError::backend(format!("creating pool '{}'", name), e))?;
        Ok(PoolInfo {
            name: name.to_string(),
            path: Some(path),
        })
    }

    fn pool_dir(&self, pool: &str) -> Result<PathBuf, CidataError> {
        validate_volume_name(pool)?;
        let path = self.root.join(pool);
        if path.is_dir() {
            Ok(path)
        } else {
            Err(CidataError::Backend(format!("storage pool '{}' not found", pool)))
        }
    }

    fn handle_for(&self, path: &Path) -> Result<VolumeHandle, CidataError> {
        let not_found = || CidataError::NotFound(format!("no volume with key {}", path.display()));

        let relative = path.strip_prefix(&self.root).map_err(|_| not_found())?;
        let mut parts = relative.components();
        let (Some(pool), Some(name), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(not_found());
        };
        let metadata = fs::metadata(path).map_err(|_| not_found())?;
        if !metadata.is_file() {
            return Err(not_found());
        }

        Ok(VolumeHandle {
            pool: pool.as_os_str().to_string_lossy().into_owned(),
            name: name.as_os_str().to_string_lossy().into_owned(),
            key: VolumeKey::new(path.to_string_lossy()),
            capacity: metadata.len(),
        })
    }

    fn volume_path(&self, volume: &VolumeHandle) -> Result<PathBuf, CidataError> {
        validate_volume_name(&volume.name)?;
        Ok(self.pool_dir(&volume.pool)?.join(&volume.name))
    }
}

impl StorageBackend for DirBackend {
    fn name(&self) -> &'static str {
        "dir"
    }

    fn ping(&self) -> Result<(), CidataError> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(CidataError::ConnectionUnavailable(format!(
                "storage root {} disappeared",
                self.root.display()
            )))
        }
    }

    fn list_pools(&self) -> Result<Vec<PoolInfo>, CidataError> {
        let mut pools = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                pools.push(PoolInfo {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    path: Some(entry.path()),
                });
            }
        }
        pools.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(pools)
    }

    fn get_pool(&self, name: &str) -> Result<PoolInfo, CidataError> {
        let path = self.pool_dir(name)?;
        Ok(PoolInfo {
            name: name.to_string(),
            path: Some(path),
        })
    }

    fn lookup_volume_by_name(
        &self,
        pool: &str,
        name: &str,
    ) -> Result<Option<VolumeHandle>, CidataError> {
        validate_volume_name(name)?;
        let path = self.pool_dir(pool)?.join(name);
        if path.exists() {
            self.handle_for(&path).map(Some)
        } else {
            Ok(None)
        }
    }

    fn define_volume(
        &self,
        pool: &str,
        name: &str,
        capacity: u64,
    ) -> Result<VolumeHandle, CidataError> {
        validate_volume_name(name)?;
        let path = self.pool_dir(pool)?.join(name);

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => CidataError::Backend(format!(
                    "volume '{}' already exists in pool '{}'",
                    name, pool
                )),
                _ => CidataError::backend(format!("defining volume '{}'", name), e),
            })?;
        file.set_len(capacity)
            .map_err(|e| CidataError::backend(format!("allocating volume '{}'", name), e))?;

        debug!("Defined volume {} ({} bytes)", path.display(), capacity);
        self.handle_for(&path)
    }

    fn upload_bytes(&self, volume: &VolumeHandle, bytes: &[u8]) -> Result<VolumeKey, CidataError> {
        if bytes.len() as u64 > volume.capacity {
            return Err(CidataError::Backend(format!(
                "upload of {} bytes exceeds capacity {} of volume '{}'",
                bytes.len(),
                volume.capacity,
                volume.name
            )));
        }

        let path = self.volume_path(volume)?;
        let mut file = OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|e| CidataError::backend(format!("opening volume '{}'", volume.name), e))?;
        file.write_all(bytes)
            .and_then(|()| file.sync_all())
            .map_err(|e| CidataError::backend(format!("writing volume '{}'", volume.name), e))?;

        Ok(self.handle_for(&path)?.key)
    }

    fn lookup_volume_by_key(&self, key: &VolumeKey) -> Result<VolumeHandle, CidataError> {
        let path = Path::new(key.as_str());
        let path = fs::canonicalize(path)
            .map_err(|_| CidataError::NotFound(format!("no volume with key {}", key)))?;
        self.handle_for(&path)
    }

    fn download_bytes(&self, volume: &VolumeHandle) -> Result<Vec<u8>, CidataError> {
        let path = self.volume_path(volume)?;
        fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => CidataError::NotFound(format!("volume {} disappeared", volume.key)),
            _ => CidataError::backend(format!("reading volume '{}'", volume.name), e),
        })
    }

    fn delete_volume(&self, volume: &VolumeHandle) -> Result<(), CidataError> {
        let path = self.volume_path(volume)?;
        fs::remove_file(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => CidataError::NotFound(format!("volume {} disappeared", volume.key)),
            _ => CidataError::backend(format!("deleting volume '{}'", volume.name), e),
        })?;
        debug!("Deleted volume {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backend() -> (TempDir, DirBackend) {
        let temp_dir = TempDir::new().unwrap();
        let backend = DirBackend::open(temp_dir.path()).unwrap();
        backend.create_pool("default").unwrap();
        (temp_dir, backend)
    }

    #[test]
    fn test_open_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let err = DirBackend::open(temp_dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, CidataError::ConnectionUnavailable(_)));
    }

    #[test]
    fn test_define_upload_download() {
        let (_temp_dir, backend) = backend();

        let handle = backend.define_volume("default", "ci1.iso", 5).unwrap();
        assert_eq!(handle.pool, "default");
        assert_eq!(handle.name, "ci1.iso");
        assert_eq!(handle.capacity, 5);

        let key = backend.upload_bytes(&handle, b"hello").unwrap();
        assert!(key.as_str().ends_with("default/ci1.iso"));

        let resolved = backend.lookup_volume_by_key(&key).unwrap();
        assert_eq!(resolved, handle);
        assert_eq!(backend.download_bytes(&resolved).unwrap(), b"hello");
    }

    #[test]
    fn test_define_existing_volume_fails() {
        let (_temp_dir, backend) = backend();
        backend.define_volume("default", "ci1.iso", 1).unwrap();

        let err = backend.define_volume("default", "ci1.iso", 1).unwrap_err();
        assert!(matches!(err, CidataError::Backend(_)));
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_define_in_missing_pool_fails() {
        let (_temp_dir, backend) = backend();
        let err = backend.define_volume("nope", "ci1.iso", 1).unwrap_err();
        assert!(matches!(err, CidataError::Backend(_)));
    }

    #[test]
    fn test_upload_over_capacity_fails() {
        let (_temp_dir, backend) = backend();
        let handle = backend.define_volume("default", "ci1.iso", 2).unwrap();
        assert!(backend.upload_bytes(&handle, b"too long").is_err());
    }

    #[test]
    fn test_lookup_unknown_keys() {
        let (temp_dir, backend) = backend();

        let missing = VolumeKey::new(temp_dir.path().join("default/gone.iso").to_string_lossy());
        assert!(backend.lookup_volume_by_key(&missing).unwrap_err().is_not_found());

        let outside = VolumeKey::new("/etc/hostname");
        assert!(backend.lookup_volume_by_key(&outside).unwrap_err().is_not_found());

        let pool_dir = VolumeKey::new(temp_dir.path().join("default").to_string_lossy());
        assert!(backend.lookup_volume_by_key(&pool_dir).unwrap_err().is_not_found());
    }

    #[test]
    fn test_delete_volume() {
        let (_temp_dir, backend) = backend();
        let handle = backend.define_volume("default", "ci1.iso", 1).unwrap();
        let key = backend.upload_bytes(&handle, b"x").unwrap();

        backend.delete_volume(&handle).unwrap();
        assert!(backend.lookup_volume_by_key(&key).unwrap_err().is_not_found());
        assert!(backend.delete_volume(&handle).unwrap_err().is_not_found());
    }

    #[test]
    fn test_list_pools() {
        let (_temp_dir, backend) = backend();
        backend.create_pool("images").unwrap();

        let names: Vec<String> = backend.list_pools().unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["default", "images"]);
        assert!(backend.get_pool("images").is_ok());
        assert!(backend.get_pool("missing").is_err());
    }

    #[test]
    fn test_lookup_volume_by_name() {
        let (_temp_dir, backend) = backend();
        assert!(backend.lookup_volume_by_name("default", "ci1.iso").unwrap().is_none());
        backend.define_volume("default", "ci1.iso", 1).unwrap();
        assert!(backend.lookup_volume_by_name("default", "ci1.iso").unwrap().is_some());
    }
}
