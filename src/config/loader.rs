//! Settings loader
//!
//! Loads the base settings file and its drop-ins and merges them.

use super::{DEFAULT_CONFIG_FILE, Settings, merge};
use crate::CidataError;
use serde_yaml::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Load one settings file as a YAML value, `None` if it is missing or unusable
fn load_settings_file(path: impl AsRef<Path>) -> Result<Option<Value>, CidataError> {
    let path = path.as_ref();

    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path)?;

    match serde_yaml::from_str::<Value>(&content) {
        Ok(Value::Null) => Ok(None),
        Ok(value @ Value::Mapping(_)) => Ok(Some(value)),
        Ok(_) => {
            warn!("Ignoring {}: not a mapping", path.display());
            Ok(None)
        }
        Err(e) => {
            warn!("Failed to parse {}: {}", path.display(), e);
            Ok(None)
        }
    }
}

/// Load all drop-in settings from a directory (sorted alphabetically)
fn load_dropin_settings(dir: impl AsRef<Path>) -> Result<Vec<Value>, CidataError> {
    let dir = dir.as_ref();

    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();

        // Only process .yaml / .yml files
        if path
            .extension()
            .is_some_and(|e| e == "yaml" || e == "yml")
        {
            entries.push(path);
        }
    }

    // Sort alphabetically
    entries.sort();

    let mut values = Vec::new();
    for path in entries {
        if let Some(value) = load_settings_file(&path)? {
            debug!("Loaded drop-in settings from {}", path.display());
            values.push(value);
        }
    }

    info!("Loaded {} drop-in settings files", values.len());
    Ok(values)
}

/// Settings loader builder
#[derive(Debug, Clone)]
pub struct SettingsLoader {
    config_file: PathBuf,
    include_dropins: bool,
}

impl SettingsLoader {
    /// Create a loader for the default settings file
    pub fn new() -> Self {
        Self {
            config_file: PathBuf::from(DEFAULT_CONFIG_FILE),
            include_dropins: true,
        }
    }

    /// Use a custom settings file
    pub fn with_config_file(mut self, path: impl AsRef<Path>) -> Self {
        self.config_file = path.as_ref().to_path_buf();
        self
    }

    /// Skip loading drop-in settings
    pub fn skip_dropins(mut self) -> Self {
        self.include_dropins = false;
        self
    }

    /// Load and merge all settings layers
    pub fn load(self) -> Result<Settings, CidataError> {
        let mut layers = Vec::new();

        if let Some(value) = load_settings_file(&self.config_file)? {
            debug!("Loaded settings from {}", self.config_file.display());
            layers.push(value);
        }

        if self.include_dropins {
            layers.extend(load_dropin_settings(Settings::dropin_dir(&self.config_file))?);
        }

        match merge::merge_all(&layers) {
            Value::Null => Ok(Settings::default()),
            merged => serde_yaml::from_value(merged)
                .map_err(|e| CidataError::Config(format!("invalid settings: {}", e))),
        }
    }
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}
