//! Storage backend contract
//!
//! The virtualization backend owns storage pools and the volumes inside them.
//! Every component takes the backend explicitly as `&dyn StorageBackend`;
//! nothing looks a connection up from ambient state.

pub mod dir;
pub mod mock;

pub use dir::DirBackend;
pub use mock::MockBackend;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::CidataError;

/// Backend-assigned durable identifier of a volume
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeKey(String);

impl VolumeKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VolumeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&str> for VolumeKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

/// A volume resolved by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeHandle {
    pub pool: String,
    pub name: String,
    pub key: VolumeKey,
    /// Allocated size in bytes
    pub capacity: u64,
}

/// A storage pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolInfo {
    pub name: String,
    /// Backing location, if the backend has one
    pub path: Option<PathBuf>,
}

/// Operations consumed from the virtualization backend
///
/// Implementations are expected to be safe to share; callers issue at most
/// one outstanding call per logical operation.
pub trait StorageBackend: Send + Sync {
    /// Name of this backend (e.g., "dir", "mock")
    fn name(&self) -> &'static str;

    /// Check that the connection is usable
    fn ping(&self) -> Result<(), CidataError>;

    fn list_pools(&self) -> Result<Vec<PoolInfo>, CidataError>;

    /// Look up a pool; a missing pool is a `Backend` error
    fn get_pool(&self, name: &str) -> Result<PoolInfo, CidataError>;

    /// Look up a volume by name, `None` if the pool has no such volume
    fn lookup_volume_by_name(
        &self,
        pool: &str,
        name: &str,
    ) -> Result<Option<VolumeHandle>, CidataError>;

    /// Create a new empty volume; an existing volume with the same name is an error
    fn define_volume(
        &self,
        pool: &str,
        name: &str,
        capacity: u64,
    ) -> Result<VolumeHandle, CidataError>;

    /// Write the full contents of a volume and return its durable key
    fn upload_bytes(&self, volume: &VolumeHandle, bytes: &[u8]) -> Result<VolumeKey, CidataError>;

    /// Resolve a key; a key that no longer resolves is `NotFound`
    fn lookup_volume_by_key(&self, key: &VolumeKey) -> Result<VolumeHandle, CidataError>;

    fn download_bytes(&self, volume: &VolumeHandle) -> Result<Vec<u8>, CidataError>;

    fn delete_volume(&self, volume: &VolumeHandle) -> Result<(), CidataError>;
}

/// Check a volume name before handing it to a backend
pub(crate) fn validate_volume_name(name: &str) -> Result<(), CidataError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
        return Err(CidataError::Backend(format!("invalid volume name '{}'", name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_key_serializes_transparently() {
        let key = VolumeKey::new("/var/lib/pools/default/ci1.iso");
        assert_eq!(
            serde_json::to_string(&key).unwrap(),
            "\"/var/lib/pools/default/ci1.iso\""
        );
        assert_eq!(key.to_string(), "/var/lib/pools/default/ci1.iso");
    }

    #[test]
    fn test_validate_volume_name() {
        assert!(validate_volume_name("ci1.iso").is_ok());
        assert!(validate_volume_name("").is_err());
        assert!(validate_volume_name("../escape").is_err());
        assert!(validate_volume_name("..").is_err());
    }
}
