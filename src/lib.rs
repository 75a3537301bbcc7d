//! cidata-rs library
//!
//! Builds cloud-init NoCloud configuration volumes ("cidata" ISO images),
//! uploads them into a storage pool and reads them back for reconciliation.
//!
//! # Data flow
//!
//! - Create: [`CloudInitInputs`] → [`definition::build`] → [`package::package`]
//!   → [`upload::upload`] → [`VolumeKey`]
//! - Read: [`VolumeKey`] → [`remote::fetch_and_parse`] → [`ReconciledFields`]
//! - Delete: [`VolumeKey`] → backend volume deletion
//!
//! # Example
//! ```
//! use cidata_rs::backend::MockBackend;
//! use cidata_rs::{CloudInitInputs, CloudInitResource};
//!
//! let backend = MockBackend::new().with_pool("default");
//! let resource = CloudInitResource::new(&backend);
//!
//! let inputs = CloudInitInputs::new("ci1")
//!     .with_local_hostname("node1")
//!     .with_ssh_authorized_key("ssh-ed25519 AAAAC3Nza user@host");
//! let created = resource.create(&inputs).unwrap();
//!
//! let state = resource.read(&created.volume_key).unwrap();
//! assert_eq!(state.local_hostname.as_deref(), Some("node1"));
//! resource.delete(&created.volume_key).unwrap();
//! ```

pub mod backend;
pub mod config;
pub mod definition;
pub mod hash;
pub mod iso;
pub mod package;
pub mod remote;
pub mod resource;
pub mod upload;
pub mod userdata;

mod error;

pub use backend::{StorageBackend, VolumeKey};
pub use definition::{CloudInitDefinition, CloudInitInputs};
pub use error::CidataError;
pub use hash::UserDataInput;
pub use resource::{CloudInitResource, CreateOutcome, ReconciledFields};
