//! Minimal ISO9660 images with Joliet names
//!
//! Only what a cidata volume needs: a single session, a single volume and a
//! flat root directory holding a handful of small files.
//!
//! Layout written by [`IsoWriter`]:
//!
//! ```text
//! sector 0..16   system area (zeros)
//! sector 16      primary volume descriptor
//! sector 17      Joliet supplementary volume descriptor
//! sector 18      volume descriptor set terminator
//! sector 19..23  path tables (L and M, primary then Joliet)
//! sector 23..    primary root directory, Joliet root directory, file extents
//! ```

mod reader;
mod writer;

pub use reader::{IsoImage, read_image};
pub use writer::IsoWriter;

use crate::CidataError;

/// Logical sector and block size
pub const SECTOR_SIZE: usize = 2048;

/// First sector of the volume descriptor set
pub(crate) const DESCRIPTOR_START: usize = 16;

pub(crate) const STANDARD_ID: &[u8; 5] = b"CD001";

pub(crate) const TYPE_PRIMARY: u8 = 1;
pub(crate) const TYPE_SUPPLEMENTARY: u8 = 2;
pub(crate) const TYPE_TERMINATOR: u8 = 255;

/// Joliet UCS-2 level 3 escape sequence
pub(crate) const JOLIET_ESCAPE: &[u8; 3] = b"%/E";

/// Maximum volume label length
pub const MAX_LABEL_LEN: usize = 32;

/// Maximum Joliet file name length, in characters
pub const MAX_NAME_LEN: usize = 64;

pub(crate) const FLAG_DIRECTORY: u8 = 0x02;

/// Check a volume label
pub fn validate_label(label: &str) -> Result<(), CidataError> {
    if label.is_empty() || label.len() > MAX_LABEL_LEN {
        return Err(CidataError::Packaging(format!(
            "volume label '{}' must be 1 to {} characters",
            label, MAX_LABEL_LEN
        )));
    }
    if let Some(c) = label
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(CidataError::Packaging(format!(
            "volume label '{}' contains invalid character {:?}",
            label, c
        )));
    }
    Ok(())
}

/// Check a file name for the root directory
pub fn validate_file_name(name: &str) -> Result<(), CidataError> {
    let chars = name.chars().count();
    if chars == 0 || chars > MAX_NAME_LEN {
        return Err(CidataError::Packaging(format!(
            "file name '{}' must be 1 to {} characters",
            name, MAX_NAME_LEN
        )));
    }
    if name == "." || name == ".." || name.contains(['/', '\0', ';']) {
        return Err(CidataError::Packaging(format!("invalid file name '{}'", name)));
    }
    if name.chars().any(|c| c as u32 > 0xFFFF) {
        return Err(CidataError::Packaging(format!(
            "file name '{}' is not representable in UCS-2",
            name
        )));
    }
    Ok(())
}

pub(crate) fn sectors_for(len: usize) -> usize {
    len.div_ceil(SECTOR_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_label() {
        assert!(validate_label("cidata").is_ok());
        assert!(validate_label("CIDATA").is_ok());
        assert!(validate_label("config-2").is_ok());
        assert!(validate_label("").is_err());
        assert!(validate_label("ci data").is_err());
        assert!(validate_label(&"a".repeat(33)).is_err());
    }

    #[test]
    fn test_validate_file_name() {
        assert!(validate_file_name("user-data").is_ok());
        assert!(validate_file_name("meta-data").is_ok());
        assert!(validate_file_name("").is_err());
        assert!(validate_file_name("a/b").is_err());
        assert!(validate_file_name("user-data;1").is_err());
        assert!(validate_file_name("..").is_err());
        assert!(validate_file_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_sectors_for() {
        assert_eq!(sectors_for(0), 0);
        assert_eq!(sectors_for(1), 1);
        assert_eq!(sectors_for(2048), 1);
        assert_eq!(sectors_for(2049), 2);
    }
}
