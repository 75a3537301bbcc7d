//! Create, read and delete of cidata volumes
//!
//! The durable [`VolumeKey`] returned by create is the only identity a caller
//! needs to keep; read and delete work from it alone.

use serde::Serialize;
use tracing::{info, warn};

use crate::backend::{StorageBackend, VolumeKey};
use crate::definition::{CloudInitDefinition, CloudInitInputs, build};
use crate::package::{ImagePackager, NativePackager, package_with};
use crate::remote::fetch_and_parse;
use crate::upload::upload;
use crate::CidataError;
use crate::hash::fingerprint_bytes;

/// Fields recovered from a stored volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciledFields {
    pub volume_key: VolumeKey,
    pub name: String,
    pub pool: String,
    pub local_hostname: Option<String>,
    /// Set only when exactly one key was stored
    pub ssh_authorized_key: Option<String>,
    pub volid: String,
    pub user_data_path: String,
    /// Fingerprint of free-form user-data
    pub user_data_fingerprint: Option<String>,
    pub instance_id: Option<String>,
}

impl ReconciledFields {
    fn from_definition(volume_key: VolumeKey, def: CloudInitDefinition, pool: String) -> Self {
        let ssh_authorized_key = match def.user_data.ssh_authorized_keys.as_slice() {
            [key] => Some(key.clone()),
            _ => None,
        };
        Self {
            volume_key,
            name: def.name,
            pool,
            local_hostname: Some(def.metadata.local_hostname).filter(|h| !h.is_empty()),
            ssh_authorized_key,
            volid: def.volid,
            user_data_path: def.user_data_path,
            user_data_fingerprint: def.user_data_content.as_deref().map(fingerprint_bytes),
            instance_id: Some(def.metadata.instance_id).filter(|id| !id.is_empty()),
        }
    }

    /// Names of the fields whose stored value differs from `inputs`
    ///
    /// User-data is compared by fingerprint, so a change of encoding alone is
    /// not drift. The SSH key only counts when user-data does not override it.
    pub fn drift(&self, inputs: &CloudInitInputs) -> Vec<&'static str> {
        let mut drifted = Vec::new();

        if self.name != inputs.name {
            drifted.push("name");
        }
        if self.pool != inputs.pool {
            drifted.push("pool");
        }
        if self.local_hostname.as_deref().unwrap_or_default()
            != inputs.local_hostname.as_deref().unwrap_or_default()
        {
            drifted.push("local_hostname");
        }
        if self.volid != inputs.volid {
            drifted.push("volid");
        }
        if self.user_data_path != inputs.user_data_path {
            drifted.push("user_data_path");
        }

        let desired_fingerprint = (!inputs.user_data.is_empty()).then(|| inputs.user_data.fingerprint());
        if self.user_data_fingerprint != desired_fingerprint {
            drifted.push("user_data");
        }
        if desired_fingerprint.is_none()
            && self.ssh_authorized_key.as_deref().unwrap_or_default()
                != inputs.ssh_authorized_key.as_deref().unwrap_or_default()
        {
            drifted.push("ssh_authorized_key");
        }
        if let Some(id) = inputs.instance_id.as_deref().filter(|id| !id.is_empty())
            && self.instance_id.as_deref() != Some(id)
        {
            drifted.push("instance_id");
        }

        drifted
    }
}

/// Result of a create: the key always, the read-back state when it worked
#[derive(Debug)]
pub struct CreateOutcome {
    pub volume_key: VolumeKey,
    pub state: Result<ReconciledFields, CidataError>,
    /// Input conflicts that were resolved rather than rejected
    pub warnings: Vec<String>,
}

/// Create/read/delete over an explicit backend connection
pub struct CloudInitResource<'a> {
    conn: &'a dyn StorageBackend,
    packager: &'a dyn ImagePackager,
}

impl<'a> CloudInitResource<'a> {
    /// Use the native packager
    pub fn new(conn: &'a dyn StorageBackend) -> Self {
        Self {
            conn,
            packager: &NativePackager,
        }
    }

    pub fn with_packager(mut self, packager: &'a dyn ImagePackager) -> Self {
        self.packager = packager;
        self
    }

    /// Build, package and upload a new volume
    pub fn create(&self, inputs: &CloudInitInputs) -> Result<CreateOutcome, CidataError> {
        self.conn.ping()?;

        let def = build(inputs)?;
        let warnings: Vec<String> = def.precedence_warning().into_iter().collect();
        info!("Creating cloud-init volume '{}' in pool '{}'", def.name, def.pool_name);

        let packaged = package_with(&def, self.packager)?;
        let volume_key = upload(self.conn, &def.pool_name, &def.name, &packaged.bytes)?;

        // The key exists from here on; a failed read-back must not lose it
        let state = self.read(&volume_key);
        if let Err(e) = &state {
            warn!("Created {} but reading it back failed: {}", volume_key, e);
        }
        Ok(CreateOutcome {
            volume_key,
            state,
            warnings,
        })
    }

    /// Read back the fields of a stored volume
    pub fn read(&self, key: &VolumeKey) -> Result<ReconciledFields, CidataError> {
        self.conn.ping()?;
        let (def, pool) = fetch_and_parse(self.conn, key)?;
        Ok(ReconciledFields::from_definition(key.clone(), def, pool))
    }

    /// Remove a stored volume
    pub fn delete(&self, key: &VolumeKey) -> Result<(), CidataError> {
        self.conn.ping()?;
        let volume = self.conn.lookup_volume_by_key(key)?;
        self.conn.delete_volume(&volume)?;
        info!("Deleted cloud-init volume '{}' from pool '{}'", volume.name, volume.pool);
        Ok(())
    }
}
