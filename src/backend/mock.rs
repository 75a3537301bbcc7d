//! Mock storage backend for testing
//!
//! Keeps pools and volumes in memory and can be configured to fail in the
//! ways a real virtualization backend does.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::{PoolInfo, StorageBackend, VolumeHandle, VolumeKey, validate_volume_name};
use crate::CidataError;

#[derive(Debug, Default)]
struct MockState {
    pools: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    capacities: BTreeMap<VolumeKey, u64>,
}

/// Mock storage backend
///
/// # Example
/// ```
/// use cidata_rs::backend::{MockBackend, StorageBackend};
///
/// let mock = MockBackend::new()
///     .with_pool("default")
///     .with_upload_error("quota exceeded");
///
/// let handle = mock.define_volume("default", "ci1.iso", 4).unwrap();
/// assert!(mock.upload_bytes(&handle, b"data").is_err());
/// ```
#[derive(Debug)]
pub struct MockBackend {
    available: bool,
    upload_error: Option<String>,
    download_error: Option<String>,
    corrupt_downloads: bool,
    state: Mutex<MockState>,
}

impl MockBackend {
    /// Create a new mock backend with no pools
    pub fn new() -> Self {
        Self {
            available: true,
            upload_error: None,
            download_error: None,
            corrupt_downloads: false,
            state: Mutex::new(MockState::default()),
        }
    }

    /// Add an empty pool
    pub fn with_pool(self, name: &str) -> Self {
        self.lock().pools.entry(name.to_string()).or_default();
        self
    }

    /// Set whether the connection is usable
    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    /// Configure to reject every upload
    pub fn with_upload_error(mut self, error: &str) -> Self {
        self.upload_error = Some(error.to_string());
        self
    }

    /// Configure to fail every download
    pub fn with_download_error(mut self, error: &str) -> Self {
        self.download_error = Some(error.to_string());
        self
    }

    /// Configure downloads to return bytes that are not an image
    pub fn with_corrupt_downloads(mut self) -> Self {
        self.corrupt_downloads = true;
        self
    }

    /// Stored bytes of a volume, for assertions
    pub fn volume_bytes(&self, pool: &str, name: &str) -> Option<Vec<u8>> {
        self.lock().pools.get(pool)?.get(name).cloned()
    }

    /// Number of volumes across all pools
    pub fn volume_count(&self) -> usize {
        self.lock().pools.values().map(BTreeMap::len).sum()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A poisoned lock only means another test thread panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn key_for(pool: &str, name: &str) -> VolumeKey {
        VolumeKey::new(format!("mock://{}/{}", pool, name))
    }

    fn check_available(&self) -> Result<(), CidataError> {
        if self.available {
            Ok(())
        } else {
            Err(CidataError::ConnectionUnavailable("mock backend is offline".into()))
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn ping(&self) -> Result<(), CidataError> {
        self.check_available()
    }

    fn list_pools(&self) -> Result<Vec<PoolInfo>, CidataError> {
        self.check_available()?;
        Ok(self
            .lock()
            .pools
            .keys()
            .map(|name| PoolInfo {
                name: name.clone(),
                path: None,
            })
            .collect())
    }

    fn get_pool(&self, name: &str) -> Result<PoolInfo, CidataError> {
        self.check_available()?;
        if self.lock().pools.contains_key(name) {
            Ok(PoolInfo {
                name: name.to_string(),
                path: None,
            })
        } else {
            Err(CidataError::Backend(format!("storage pool '{}' not found", name)))
        }
    }

    fn lookup_volume_by_name(
        &self,
        pool: &str,
        name: &str,
    ) -> Result<Option<VolumeHandle>, CidataError> {
        self.check_available()?;
        let state = self.lock();
        let volumes = state
            .pools
            .get(pool)
            .ok_or_else(|| CidataError::Backend(format!("storage pool '{}' not found", pool)))?;
        let key = Self::key_for(pool, name);
        Ok(volumes.contains_key(name).then(|| VolumeHandle {
            pool: pool.to_string(),
            name: name.to_string(),
            capacity: state.capacities.get(&key).copied().unwrap_or_default(),
            key,
        }))
    }

    fn define_volume(
        &self,
        pool: &str,
        name: &str,
        capacity: u64,
    ) -> Result<VolumeHandle, CidataError> {
        self.check_available()?;
        validate_volume_name(name)?;

        let mut state = self.lock();
        let volumes = state
            .pools
            .get_mut(pool)
            .ok_or_else(|| CidataError::Backend(format!("storage pool '{}' not found", pool)))?;
        if volumes.contains_key(name) {
            return Err(CidataError::Backend(format!(
                "volume '{}' already exists in pool '{}'",
                name, pool
            )));
        }
        volumes.insert(name.to_string(), vec![0; capacity as usize]);

        let key = Self::key_for(pool, name);
        state.capacities.insert(key.clone(), capacity);
        Ok(VolumeHandle {
            pool: pool.to_string(),
            name: name.to_string(),
            key,
            capacity,
        })
    }

    fn upload_bytes(&self, volume: &VolumeHandle, bytes: &[u8]) -> Result<VolumeKey, CidataError> {
        self.check_available()?;
        if let Some(error) = &self.upload_error {
            return Err(CidataError::Backend(error.clone()));
        }
        if bytes.len() as u64 > volume.capacity {
            return Err(CidataError::Backend(format!(
                "upload of {} bytes exceeds capacity {}",
                bytes.len(),
                volume.capacity
            )));
        }

        let mut state = self.lock();
        let stored = state
            .pools
            .get_mut(&volume.pool)
            .and_then(|volumes| volumes.get_mut(&volume.name))
            .ok_or_else(|| CidataError::NotFound(format!("volume {} disappeared", volume.key)))?;
        stored[..bytes.len()].copy_from_slice(bytes);
        Ok(volume.key.clone())
    }

    fn lookup_volume_by_key(&self, key: &VolumeKey) -> Result<VolumeHandle, CidataError> {
        self.check_available()?;
        let state = self.lock();
        let capacity = state
            .capacities
            .get(key)
            .copied()
            .ok_or_else(|| CidataError::NotFound(format!("no volume with key {}", key)))?;

        let (pool, name) = key
            .as_str()
            .strip_prefix("mock://")
            .and_then(|rest| rest.split_once('/'))
            .ok_or_else(|| CidataError::NotFound(format!("no volume with key {}", key)))?;
        Ok(VolumeHandle {
            pool: pool.to_string(),
            name: name.to_string(),
            key: key.clone(),
            capacity,
        })
    }

    fn download_bytes(&self, volume: &VolumeHandle) -> Result<Vec<u8>, CidataError> {
        self.check_available()?;
        if let Some(error) = &self.download_error {
            return Err(CidataError::Backend(error.clone()));
        }
        if self.corrupt_downloads {
            return Ok(b"this is not an ISO image".to_vec());
        }
        self.volume_bytes(&volume.pool, &volume.name)
            .ok_or_else(|| CidataError::NotFound(format!("volume {} disappeared", volume.key)))
    }

    fn delete_volume(&self, volume: &VolumeHandle) -> Result<(), CidataError> {
        self.check_available()?;
        let mut state = self.lock();
        state
            .pools
            .get_mut(&volume.pool)
            .and_then(|volumes| volumes.remove(&volume.name))
            .ok_or_else(|| CidataError::NotFound(format!("volume {} disappeared", volume.key)))?;
        state.capacities.remove(&volume.key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_backend_default() {
        let mock = MockBackend::new();
        assert_eq!(mock.name(), "mock");
        assert!(mock.ping().is_ok());
        assert!(mock.list_pools().unwrap().is_empty());
    }

    #[test]
    fn test_mock_backend_round_trip() {
        let mock = MockBackend::new().with_pool("default");
        let handle = mock.define_volume("default", "ci1.iso", 3).unwrap();
        let key = mock.upload_bytes(&handle, b"abc").unwrap();

        let resolved = mock.lookup_volume_by_key(&key).unwrap();
        assert_eq!(resolved, handle);
        assert_eq!(mock.download_bytes(&resolved).unwrap(), b"abc");

        mock.delete_volume(&resolved).unwrap();
        assert!(mock.lookup_volume_by_key(&key).unwrap_err().is_not_found());
        assert_eq!(mock.volume_count(), 0);
    }

    #[test]
    fn test_mock_backend_unavailable() {
        let mock = MockBackend::new().with_available(false);
        assert!(matches!(
            mock.ping(),
            Err(CidataError::ConnectionUnavailable(_))
        ));
    }

    #[test]
    fn test_mock_backend_missing_pool() {
        let mock = MockBackend::new();
        assert!(matches!(
            mock.define_volume("default", "ci1.iso", 1),
            Err(CidataError::Backend(_))
        ));
    }

    #[test]
    fn test_mock_backend_upload_error_leaves_volume() {
        let mock = MockBackend::new()
            .with_pool("default")
            .with_upload_error("permission denied");
        let handle = mock.define_volume("default", "ci1.iso", 1).unwrap();

        let err = mock.upload_bytes(&handle, b"x").unwrap_err();
        assert!(err.to_string().contains("permission denied"));
        assert_eq!(mock.volume_count(), 1);
    }
}
