//! Rendering and read-back of the cloud-init files
//!
//! Handles the two files stored in a cidata volume:
//! - `meta-data`: instance id and local hostname
//! - `user-data`: either custom content or a cloud-config carrying SSH keys
//!
//! Key-mode user-data carries [`SSH_KEYS_MARKER`] so that reading it back
//! does not have to guess which mode produced it.

pub mod types;

pub use types::{
    CLOUD_CONFIG_HEADER, MetaDataDocument, SSH_KEYS_MARKER, SshKeysConfig, UserDataKind,
};

use crate::CidataError;
use crate::definition::CloudInitDefinition;
use tracing::{debug, warn};

/// Render the `meta-data` file
pub fn render_meta_data(def: &CloudInitDefinition) -> Result<String, CidataError> {
    let doc = MetaDataDocument {
        instance_id: def.metadata.instance_id.clone(),
        local_hostname: def.metadata.local_hostname.clone(),
    };
    Ok(serde_yaml::to_string(&doc)?)
}

/// Render the `user-data` file
///
/// Custom content wins over SSH keys. It was base64-normalized when the
/// definition was built, so encoded input is never stored encoded.
pub fn render_user_data(def: &CloudInitDefinition) -> Result<Vec<u8>, CidataError> {
    if let Some(content) = def.user_data_content.as_ref().filter(|c| !c.is_empty()) {
        return Ok(content.clone());
    }

    let config = SshKeysConfig {
        ssh_authorized_keys: def.user_data.ssh_authorized_keys.clone(),
    };
    let body = serde_yaml::to_string(&config)?;
    Ok(format!("{}\n{}\n{}", CLOUD_CONFIG_HEADER, SSH_KEYS_MARKER, body).into_bytes())
}

/// Parse a stored `meta-data` file
pub fn parse_meta_data(content: &str) -> Result<MetaDataDocument, CidataError> {
    if content.trim().is_empty() {
        return Ok(MetaDataDocument::default());
    }
    serde_yaml::from_str(content).map_err(|e| CidataError::parse("invalid meta-data", e))
}

/// Classify a stored `user-data` file
///
/// Only UTF-8 cloud-config carrying [`SSH_KEYS_MARKER`] can be key mode;
/// everything else, binary payloads included, is custom content.
pub fn classify(content: &[u8]) -> UserDataKind {
    let text = std::str::from_utf8(content).ok().filter(|text| {
        SshKeysConfig::is_cloud_config(text)
            && text.lines().any(|line| line.trim_end() == SSH_KEYS_MARKER)
    });
    let Some(text) = text else {
        debug!("User-data is free-form ({} bytes)", content.len());
        return UserDataKind::Custom(content.to_vec());
    };

    match SshKeysConfig::from_yaml(text) {
        Ok(config) => UserDataKind::SshKeys(config.ssh_authorized_keys),
        Err(e) => {
            warn!("User-data carries the SSH key marker but does not parse: {}", e);
            UserDataKind::Custom(content.to_vec())
        }
    }
}

/// Apply a classified user-data file to a definition
pub fn apply_user_data(def: &mut CloudInitDefinition, kind: UserDataKind) {
    match kind {
        UserDataKind::SshKeys(keys) => {
            def.user_data.ssh_authorized_keys = keys;
            def.user_data_content = None;
        }
        UserDataKind::Custom(content) => {
            def.user_data.ssh_authorized_keys.clear();
            def.user_data_content = Some(content);
        }
    }
}
