//! Document types for the two cloud-init files
//!
//! Both files are YAML. `meta-data` uses kebab-case keys, `user-data` is a
//! cloud-config document that starts with `#cloud-config`.

use serde::{Deserialize, Serialize};

/// Header line of every cloud-config document
pub const CLOUD_CONFIG_HEADER: &str = "#cloud-config";

/// Comment line identifying user-data rendered from SSH keys
pub const SSH_KEYS_MARKER: &str = "# cidata: ssh-authorized-keys";

/// The `meta-data` document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MetaDataDocument {
    #[serde(default)]
    pub instance_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub local_hostname: String,
}

/// Minimal cloud-config document carrying only SSH keys
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshKeysConfig {
    /// SSH authorized keys for the default user
    #[serde(default)]
    pub ssh_authorized_keys: Vec<String>,
}

impl SshKeysConfig {
    /// Parse cloud-config from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        // Strip #cloud-config header if present
        let yaml = yaml
            .trim_start()
            .strip_prefix(CLOUD_CONFIG_HEADER)
            .map(|s| s.trim_start())
            .unwrap_or(yaml);

        serde_yaml::from_str(yaml)
    }

    /// Check if this looks like a cloud-config (starts with #cloud-config)
    pub fn is_cloud_config(data: &str) -> bool {
        data.trim_start().starts_with(CLOUD_CONFIG_HEADER)
    }
}

/// How a stored user-data file was produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserDataKind {
    /// Rendered from SSH keys
    SshKeys(Vec<String>),
    /// Free-form content, carried verbatim
    Custom(Vec<u8>),
}
