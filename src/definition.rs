//! Cloud-init definition and its builder
//!
//! A [`CloudInitDefinition`] is the in-memory form of a cidata volume. It is
//! built transiently from [`CloudInitInputs`] on create and rebuilt from the
//! stored image on read; only the packaged bytes are ever persisted.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::CidataError;
use crate::hash::UserDataInput;

/// Default storage pool
pub const DEFAULT_POOL: &str = "default";

/// Default ISO volume label expected by the NoCloud datasource
pub const DEFAULT_VOLID: &str = "cidata";

/// Default name of the user-data file inside the image
pub const DEFAULT_USER_DATA_PATH: &str = "user-data";

/// Name of the meta-data file inside the image
pub const META_DATA_PATH: &str = "meta-data";

/// Declarative inputs for a cidata volume
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloudInitInputs {
    /// Name of the volume to create
    pub name: String,

    /// Storage pool the volume is created in
    #[serde(default = "default_pool")]
    pub pool: String,

    pub local_hostname: Option<String>,

    pub ssh_authorized_key: Option<String>,

    /// ISO volume label
    #[serde(default = "default_volid")]
    pub volid: String,

    #[serde(default = "default_user_data_path")]
    pub user_data_path: String,

    /// Custom user-data; takes precedence over `ssh_authorized_key`
    #[serde(default)]
    pub user_data: UserDataInput,

    /// Instance id written to meta-data (generated when absent)
    pub instance_id: Option<String>,
}

fn default_pool() -> String {
    DEFAULT_POOL.to_string()
}

fn default_volid() -> String {
    DEFAULT_VOLID.to_string()
}

fn default_user_data_path() -> String {
    DEFAULT_USER_DATA_PATH.to_string()
}

impl CloudInitInputs {
    /// Inputs with defaults for everything but the volume name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pool: default_pool(),
            local_hostname: None,
            ssh_authorized_key: None,
            volid: default_volid(),
            user_data_path: default_user_data_path(),
            user_data: UserDataInput::default(),
            instance_id: None,
        }
    }

    pub fn with_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = pool.into();
        self
    }

    pub fn with_local_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.local_hostname = Some(hostname.into());
        self
    }

    pub fn with_ssh_authorized_key(mut self, key: impl Into<String>) -> Self {
        self.ssh_authorized_key = Some(key.into());
        self
    }

    pub fn with_volid(mut self, volid: impl Into<String>) -> Self {
        self.volid = volid.into();
        self
    }

    pub fn with_user_data_path(mut self, path: impl Into<String>) -> Self {
        self.user_data_path = path.into();
        self
    }

    pub fn with_user_data(mut self, user_data: UserDataInput) -> Self {
        self.user_data = user_data;
        self
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    /// Load inputs from a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self, CidataError> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

/// Contents of the `meta-data` file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub instance_id: String,
    /// Empty when no hostname is set
    pub local_hostname: String,
}

/// Structured part of the `user-data` file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserDataSection {
    pub ssh_authorized_keys: Vec<String>,
}

/// In-memory representation of a cidata volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudInitDefinition {
    pub name: String,
    pub pool_name: String,
    pub metadata: Metadata,
    pub user_data: UserDataSection,
    /// Custom user-data after base64 normalization; when set, `user_data`
    /// is not rendered
    pub user_data_content: Option<Vec<u8>>,
    pub user_data_path: String,
    pub meta_data_path: String,
    pub volid: String,
}

impl CloudInitDefinition {
    /// Empty definition with the conventional file names and label
    pub fn new(name: impl Into<String>, pool_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pool_name: pool_name.into(),
            metadata: Metadata::default(),
            user_data: UserDataSection::default(),
            user_data_content: None,
            user_data_path: DEFAULT_USER_DATA_PATH.to_string(),
            meta_data_path: META_DATA_PATH.to_string(),
            volid: DEFAULT_VOLID.to_string(),
        }
    }

    /// Whether the custom content, not the SSH keys, produces user-data
    pub fn uses_custom_user_data(&self) -> bool {
        self.user_data_content.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// Warning for a definition carrying both custom user-data and SSH keys
    pub fn precedence_warning(&self) -> Option<String> {
        (self.uses_custom_user_data() && !self.user_data.ssh_authorized_keys.is_empty()).then(|| {
            format!(
                "Both user_data and ssh_authorized_key specified for '{}', only user_data will be used",
                self.name
            )
        })
    }
}

/// Build a definition from declarative inputs
pub fn build(inputs: &CloudInitInputs) -> Result<CloudInitDefinition, CidataError> {
    if inputs.name.is_empty() {
        return Err(CidataError::InvalidData("volume name must not be empty".into()));
    }
    if inputs.pool.is_empty() {
        return Err(CidataError::InvalidData("pool name must not be empty".into()));
    }

    let mut def = CloudInitDefinition::new(&inputs.name, &inputs.pool);
    def.volid = inputs.volid.clone();
    def.user_data_path = inputs.user_data_path.clone();
    def.metadata.local_hostname = inputs.local_hostname.clone().unwrap_or_default();
    def.metadata.instance_id = match &inputs.instance_id {
        Some(id) if !id.is_empty() => id.clone(),
        _ => format!("iid-{}", uuid::Uuid::new_v4()),
    };

    let ssh_key = inputs.ssh_authorized_key.as_deref().filter(|k| !k.is_empty());
    if let Some(key) = ssh_key {
        def.user_data.ssh_authorized_keys.push(key.to_string());
    }

    if !inputs.user_data.is_empty() {
        def.user_data_content = Some(inputs.user_data.normalize()?);
    }
    if let Some(warning) = def.precedence_warning() {
        warn!("{}", warning);
    }

    debug!("Built cloud-init definition: {:?}", def);
    Ok(def)
}
