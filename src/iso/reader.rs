//! ISO9660 image reader
//!
//! Reads the root directory of an image, preferring the Joliet tree so that
//! lowercase names such as `user-data` survive. Subdirectories are ignored.

use std::collections::BTreeMap;

use tracing::debug;

use super::{
    DESCRIPTOR_START, FLAG_DIRECTORY, SECTOR_SIZE, STANDARD_ID, TYPE_PRIMARY, TYPE_SUPPLEMENTARY,
    TYPE_TERMINATOR,
};
use crate::CidataError;

/// Upper bound on descriptors scanned before giving up on a terminator
const MAX_DESCRIPTORS: usize = 64;

/// Root directory record offset inside a volume descriptor
const ROOT_RECORD_OFFSET: usize = 156;

/// A parsed image: its label and the files in its root directory
#[derive(Debug, Clone, Default)]
pub struct IsoImage {
    label: String,
    joliet: bool,
    files: BTreeMap<String, Vec<u8>>,
}

impl IsoImage {
    /// Volume label from the primary volume descriptor
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether names were read from the Joliet tree
    pub fn is_joliet(&self) -> bool {
        self.joliet
    }

    /// File contents by name, falling back to a case-insensitive match
    pub fn file(&self, name: &str) -> Option<&[u8]> {
        self.entry(name).map(|(_, data)| data)
    }

    /// Stored name and contents of a file, matched like [`IsoImage::file`]
    pub fn entry(&self, name: &str) -> Option<(&str, &[u8])> {
        self.files
            .get_key_value(name)
            .or_else(|| self.files.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)))
            .map(|(n, data)| (n.as_str(), data.as_slice()))
    }

    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}

fn le_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn extent<'a>(image: &'a [u8], location: u32, size: u32, what: &str) -> Result<&'a [u8], CidataError> {
    let start = (location as usize)
        .checked_mul(SECTOR_SIZE)
        .ok_or_else(|| CidataError::Parse(format!("{} extent out of range", what)))?;
    let end = start
        .checked_add(size as usize)
        .filter(|end| *end <= image.len())
        .ok_or_else(|| {
            CidataError::Parse(format!(
                "{} extent at sector {} ({} bytes) exceeds image size {}",
                what,
                location,
                size,
                image.len()
            ))
        })?;
    Ok(&image[start..end])
}

fn is_joliet_descriptor(vd: &[u8]) -> bool {
    vd[0] == TYPE_SUPPLEMENTARY && vd[88] == b'%' && vd[89] == b'/' && matches!(vd[90], b'@' | b'C' | b'E')
}

fn decode_name(id: &[u8], joliet: bool) -> Result<String, CidataError> {
    let mut name = if joliet {
        if id.len() % 2 != 0 {
            return Err(CidataError::Parse("odd-length Joliet file identifier".into()));
        }
        let units: Vec<u16> = id
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&units).map_err(|e| CidataError::parse("invalid Joliet file name", e))?
    } else {
        String::from_utf8_lossy(id).into_owned()
    };

    if let Some(version) = name.rfind(';') {
        name.truncate(version);
    }
    if !joliet && name.ends_with('.') {
        name.pop();
    }
    Ok(name)
}

fn read_root_directory(
    image: &[u8],
    vd: &[u8],
    joliet: bool,
) -> Result<BTreeMap<String, Vec<u8>>, CidataError> {
    let root = &vd[ROOT_RECORD_OFFSET..ROOT_RECORD_OFFSET + 34];
    let dir = extent(image, le_u32(root, 2), le_u32(root, 10), "root directory")?;

    let mut files = BTreeMap::new();
    let mut pos = 0;
    while pos < dir.len() {
        let len = dir[pos] as usize;
        if len == 0 {
            // records never span sectors; the rest of this one is padding
            pos = (pos / SECTOR_SIZE + 1) * SECTOR_SIZE;
            continue;
        }
        if len < 34 || pos + len > dir.len() {
            return Err(CidataError::Parse(format!(
                "malformed directory record at offset {}",
                pos
            )));
        }

        let rec = &dir[pos..pos + len];
        let id_len = rec[32] as usize;
        if 33 + id_len > len {
            return Err(CidataError::Parse(format!(
                "directory record identifier overruns record at offset {}",
                pos
            )));
        }

        if rec[25] & FLAG_DIRECTORY == 0 {
            let name = decode_name(&rec[33..33 + id_len], joliet)?;
            let data = extent(image, le_u32(rec, 2), le_u32(rec, 10), &name)?;
            files.insert(name, data.to_vec());
        }
        pos += len;
    }

    Ok(files)
}

/// Parse an ISO9660 image held in memory
pub fn read_image(image: &[u8]) -> Result<IsoImage, CidataError> {
    let mut primary = None;
    let mut joliet = None;

    for index in 0..MAX_DESCRIPTORS {
        let start = (DESCRIPTOR_START + index) * SECTOR_SIZE;
        let vd = image.get(start..start + SECTOR_SIZE).ok_or_else(|| {
            CidataError::Parse(format!(
                "image of {} bytes ends inside the volume descriptor set",
                image.len()
            ))
        })?;
        if &vd[1..6] != STANDARD_ID {
            return Err(CidataError::Parse("not an ISO9660 image".into()));
        }

        match vd[0] {
            TYPE_TERMINATOR => break,
            TYPE_PRIMARY if primary.is_none() => primary = Some(vd),
            _ if joliet.is_none() && is_joliet_descriptor(vd) => joliet = Some(vd),
            _ => {}
        }
    }

    let pvd = primary.ok_or_else(|| CidataError::Parse("missing primary volume descriptor".into()))?;
    let label = String::from_utf8_lossy(&pvd[40..72])
        .trim_end_matches([' ', '\0'])
        .to_string();

    let (vd, is_joliet) = match joliet {
        Some(svd) => (svd, true),
        None => (pvd, false),
    };
    let files = read_root_directory(image, vd, is_joliet)?;

    debug!(
        "Read ISO image '{}' ({} files, joliet: {})",
        label,
        files.len(),
        is_joliet
    );
    Ok(IsoImage {
        label,
        joliet: is_joliet,
        files,
    })
}
