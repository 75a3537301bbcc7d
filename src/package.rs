//! Image packaging
//!
//! Renders a [`CloudInitDefinition`] into its `meta-data` and `user-data`
//! files and packs them into an ISO9660 image labelled with the definition's
//! volume id. Two packagers exist:
//! - [`NativePackager`] writes the image in-process
//! - [`ExternalPackager`] stages the files in a scratch directory and runs
//!   `genisoimage`, `mkisofs` or `xorriso`

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::definition::CloudInitDefinition;
use crate::iso::{IsoWriter, validate_file_name, validate_label};
use crate::userdata::{render_meta_data, render_user_data};
use crate::CidataError;

/// Default external ISO tool
pub const DEFAULT_ISO_PROGRAM: &str = "genisoimage";

/// Builds a filesystem image from named files
pub trait ImagePackager: Send + Sync {
    /// Name of this packager (e.g., "native", "genisoimage")
    fn name(&self) -> &str;

    /// Build an image with the given label holding `files` at its root
    fn build_image(&self, label: &str, files: &[(&str, &[u8])]) -> Result<Vec<u8>, CidataError>;
}

/// Packager selection, as found in settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum PackagerKind {
    #[default]
    Native,
    External {
        #[serde(default = "default_program")]
        program: String,
    },
}

fn default_program() -> String {
    DEFAULT_ISO_PROGRAM.to_string()
}

impl PackagerKind {
    /// Instantiate the packager, staging external builds under `scratch_dir`
    pub fn packager(&self, scratch_dir: Option<&Path>) -> Box<dyn ImagePackager> {
        match self {
            Self::Native => Box::new(NativePackager),
            Self::External { program } => {
                let mut packager = ExternalPackager::new(program);
                if let Some(dir) = scratch_dir {
                    packager = packager.with_scratch_dir(dir);
                }
                Box::new(packager)
            }
        }
    }
}

/// A packaged image together with the rendered file contents
#[derive(Debug, Clone)]
pub struct PackagedImage {
    pub bytes: Vec<u8>,
    pub meta_data: String,
    pub user_data: Vec<u8>,
}

/// Package a definition with the native packager
pub fn package(def: &CloudInitDefinition) -> Result<PackagedImage, CidataError> {
    package_with(def, &NativePackager)
}

/// Package a definition with the given packager
pub fn package_with(
    def: &CloudInitDefinition,
    packager: &dyn ImagePackager,
) -> Result<PackagedImage, CidataError> {
    validate_label(&def.volid)?;
    validate_file_name(&def.user_data_path)?;
    validate_file_name(&def.meta_data_path)?;
    if def.user_data_path == def.meta_data_path {
        return Err(CidataError::Packaging(format!(
            "user-data path '{}' collides with the meta-data file",
            def.user_data_path
        )));
    }

    let meta_data = render_meta_data(def)?;
    let user_data = render_user_data(def)?;

    let files = [
        (def.user_data_path.as_str(), user_data.as_slice()),
        (def.meta_data_path.as_str(), meta_data.as_bytes()),
    ];
    let bytes = packager.build_image(&def.volid, &files)?;

    debug!(
        "Packaged '{}' with {} packager ({} bytes)",
        def.name,
        packager.name(),
        bytes.len()
    );
    Ok(PackagedImage {
        bytes,
        meta_data,
        user_data,
    })
}

/// Writes ISO9660 + Joliet images in-process
#[derive(Debug, Clone, Copy, Default)]
pub struct NativePackager;

impl ImagePackager for NativePackager {
    fn name(&self) -> &str {
        "native"
    }

    fn build_image(&self, label: &str, files: &[(&str, &[u8])]) -> Result<Vec<u8>, CidataError> {
        let mut writer = IsoWriter::new(label);
        for (name, data) in files {
            writer.add_file(*name, data.to_vec())?;
        }
        writer.write()
    }
}

/// Runs an mkisofs-compatible tool over a scratch directory
#[derive(Debug, Clone)]
pub struct ExternalPackager {
    program: String,
    scratch_dir: Option<PathBuf>,
}

impl ExternalPackager {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            scratch_dir: None,
        }
    }

    /// Create scratch directories under `dir` instead of the system temp dir
    pub fn with_scratch_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.scratch_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    fn is_xorriso(&self) -> bool {
        Path::new(&self.program)
            .file_name()
            .is_some_and(|name| name == "xorriso")
    }
}

impl ImagePackager for ExternalPackager {
    fn name(&self) -> &str {
        &self.program
    }

    fn build_image(&self, label: &str, files: &[(&str, &[u8])]) -> Result<Vec<u8>, CidataError> {
        validate_label(label)?;

        let mut builder = tempfile::Builder::new();
        builder.prefix("cidata-");
        let scratch = match &self.scratch_dir {
            Some(dir) => builder.tempdir_in(dir),
            None => builder.tempdir(),
        }
        .map_err(|e| CidataError::packaging("creating scratch directory", e))?;
        debug!("Staging image files in {}", scratch.path().display());

        for (name, data) in files {
            validate_file_name(name)?;
            fs::write(scratch.path().join(name), data)
                .map_err(|e| CidataError::packaging(format!("staging '{}'", name), e))?;
        }

        let output_path = scratch.path().join(".cidata.iso");
        let mut command = Command::new(&self.program);
        if self.is_xorriso() {
            command.args(["-as", "mkisofs"]);
        }
        command
            .current_dir(scratch.path())
            .arg("-output")
            .arg(&output_path)
            .arg("-volid")
            .arg(label)
            .args(["-joliet", "-rock"])
            // "./" keeps names like "-graft-points" from being read as options
            .args(files.iter().map(|(name, _)| format!("./{}", name)));

        let output = command
            .output()
            .map_err(|e| CidataError::packaging(format!("running {}", self.program), e))?;
        if !output.status.success() {
            return Err(CidataError::Packaging(format!(
                "{} failed ({}): {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let bytes = fs::read(&output_path)
            .map_err(|e| CidataError::packaging(format!("reading {} output", self.program), e))?;

        if let Err(e) = scratch.close() {
            warn!("Failed to remove scratch directory: {}", e);
        }
        Ok(bytes)
    }
}
