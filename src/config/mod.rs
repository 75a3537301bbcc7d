//! Tool settings
//!
//! Settings come from a YAML base file, then drop-ins, then command-line and
//! environment overrides. Every field has a default, so no file is required.

pub mod loader;
pub mod merge;

pub use loader::SettingsLoader;

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::definition::{DEFAULT_POOL, DEFAULT_USER_DATA_PATH, DEFAULT_VOLID};
use crate::package::PackagerKind;

/// Default settings file
pub const DEFAULT_CONFIG_FILE: &str = "/etc/cidata/cidata.yaml";

/// Default root of the directory storage backend
pub const DEFAULT_STORAGE_ROOT: &str = "/var/lib/cidata/pools";

/// Settings for the `cidata` tool
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Directory holding one subdirectory per storage pool
    pub storage_root: PathBuf,

    /// Pool used when inputs do not name one
    pub default_pool: String,

    /// Default ISO volume label
    pub volid: String,

    /// Default name of the user-data file inside the image
    pub user_data_path: String,

    /// How images are built
    pub packager: PackagerKind,

    /// Parent directory for packaging scratch space
    pub scratch_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from(DEFAULT_STORAGE_ROOT),
            default_pool: DEFAULT_POOL.to_string(),
            volid: DEFAULT_VOLID.to_string(),
            user_data_path: DEFAULT_USER_DATA_PATH.to_string(),
            packager: PackagerKind::default(),
            scratch_dir: None,
        }
    }
}

impl Settings {
    /// Parse settings from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml)
    }

    /// Drop-in directory next to a settings file (`<dir>/cidata.d`)
    pub fn dropin_dir(config_file: &Path) -> PathBuf {
        config_file
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("cidata.d")
    }
}
