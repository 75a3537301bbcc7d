//! ISO9660 image writer

use std::collections::HashSet;

use tracing::debug;

use super::{
    DESCRIPTOR_START, FLAG_DIRECTORY, JOLIET_ESCAPE, SECTOR_SIZE, STANDARD_ID, TYPE_PRIMARY,
    TYPE_SUPPLEMENTARY, TYPE_TERMINATOR, sectors_for, validate_file_name, validate_label,
};
use crate::CidataError;

const APPLICATION_ID: &str = "CIDATA-RS";

/// Path tables for both trees, one sector each: primary L, primary M, Joliet L, Joliet M
const PATH_TABLE_START: usize = DESCRIPTOR_START + 3;
const FIRST_DIRECTORY_SECTOR: usize = PATH_TABLE_START + 4;

/// Both path tables describe only the root directory
const PATH_TABLE_SIZE: u32 = 10;

/// Builds a single-volume ISO9660 image with a Joliet tree
///
/// # Example
/// ```
/// use cidata_rs::iso::{IsoWriter, read_image};
///
/// let mut writer = IsoWriter::new("cidata");
/// writer.add_file("meta-data", b"instance-id: iid-1\n".to_vec()).unwrap();
/// let image = writer.write().unwrap();
///
/// let parsed = read_image(&image).unwrap();
/// assert_eq!(parsed.label(), "cidata");
/// assert_eq!(parsed.file("meta-data"), Some(&b"instance-id: iid-1\n"[..]));
/// ```
#[derive(Debug, Clone)]
pub struct IsoWriter {
    label: String,
    files: Vec<(String, Vec<u8>)>,
}

/// A file placed in the image
struct Placed<'a> {
    primary_id: Vec<u8>,
    joliet_id: Vec<u8>,
    data: &'a [u8],
    extent: u32,
}

impl IsoWriter {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            files: Vec::new(),
        }
    }

    /// Add a file to the root directory
    pub fn add_file(
        &mut self,
        name: impl Into<String>,
        data: Vec<u8>,
    ) -> Result<&mut Self, CidataError> {
        let name = name.into();
        validate_file_name(&name)?;
        if self.files.iter().any(|(existing, _)| *existing == name) {
            return Err(CidataError::Packaging(format!("duplicate file name '{}'", name)));
        }
        self.files.push((name, data));
        Ok(self)
    }

    /// Serialize the image
    pub fn write(&self) -> Result<Vec<u8>, CidataError> {
        validate_label(&self.label)?;

        let primary_ids = primary_identifiers(&self.files);
        let mut placed: Vec<Placed<'_>> = self
            .files
            .iter()
            .zip(primary_ids)
            .map(|((name, data), primary_id)| Placed {
                primary_id,
                joliet_id: joliet_identifier(name),
                data,
                extent: 0,
            })
            .collect();

        for (_, data) in &self.files {
            if u32::try_from(data.len()).is_err() {
                return Err(CidataError::Packaging("file too large for ISO9660".into()));
            }
        }

        let primary_dir_sectors =
            directory_sectors(placed.iter().map(|p| p.primary_id.len()));
        let joliet_dir_sectors = directory_sectors(placed.iter().map(|p| p.joliet_id.len()));

        let primary_root = FIRST_DIRECTORY_SECTOR;
        let joliet_root = primary_root + primary_dir_sectors;
        let mut next = joliet_root + joliet_dir_sectors;
        for file in placed.iter_mut() {
            file.extent = to_u32(next)?;
            next += sectors_for(file.data.len());
        }
        let total_sectors = next;

        let mut image = vec![0u8; total_sectors * SECTOR_SIZE];

        let primary_root_size = primary_dir_sectors * SECTOR_SIZE;
        let joliet_root_size = joliet_dir_sectors * SECTOR_SIZE;

        let pvd = volume_descriptor(
            TYPE_PRIMARY,
            &self.label,
            to_u32(total_sectors)?,
            PATH_TABLE_START,
            &directory_record(&[0], to_u32(primary_root)?, to_u32(primary_root_size)?, FLAG_DIRECTORY),
        );
        let svd = volume_descriptor(
            TYPE_SUPPLEMENTARY,
            &self.label,
            to_u32(total_sectors)?,
            PATH_TABLE_START + 2,
            &directory_record(&[0], to_u32(joliet_root)?, to_u32(joliet_root_size)?, FLAG_DIRECTORY),
        );
        put_sector(&mut image, DESCRIPTOR_START, &pvd);
        put_sector(&mut image, DESCRIPTOR_START + 1, &svd);
        put_sector(&mut image, DESCRIPTOR_START + 2, &terminator());

        put_sector(&mut image, PATH_TABLE_START, &path_table(to_u32(primary_root)?, false));
        put_sector(&mut image, PATH_TABLE_START + 1, &path_table(to_u32(primary_root)?, true));
        put_sector(&mut image, PATH_TABLE_START + 2, &path_table(to_u32(joliet_root)?, false));
        put_sector(&mut image, PATH_TABLE_START + 3, &path_table(to_u32(joliet_root)?, true));

        placed.sort_by(|a, b| a.primary_id.cmp(&b.primary_id));
        let primary_entries: Vec<(&[u8], u32, u32)> = placed
            .iter()
            .map(|p| (p.primary_id.as_slice(), p.extent, p.data.len() as u32))
            .collect();
        let dir = directory(to_u32(primary_root)?, to_u32(primary_root_size)?, &primary_entries);
        image[primary_root * SECTOR_SIZE..][..dir.len()].copy_from_slice(&dir);

        placed.sort_by(|a, b| a.joliet_id.cmp(&b.joliet_id));
        let joliet_entries: Vec<(&[u8], u32, u32)> = placed
            .iter()
            .map(|p| (p.joliet_id.as_slice(), p.extent, p.data.len() as u32))
            .collect();
        let dir = directory(to_u32(joliet_root)?, to_u32(joliet_root_size)?, &joliet_entries);
        image[joliet_root * SECTOR_SIZE..][..dir.len()].copy_from_slice(&dir);

        for file in &placed {
            let start = file.extent as usize * SECTOR_SIZE;
            image[start..start + file.data.len()].copy_from_slice(file.data);
        }

        debug!(
            "Wrote ISO image '{}' with {} files ({} sectors)",
            self.label,
            placed.len(),
            total_sectors
        );
        Ok(image)
    }
}

fn to_u32(value: usize) -> Result<u32, CidataError> {
    u32::try_from(value).map_err(|_| CidataError::Packaging("image too large for ISO9660".into()))
}

fn put_sector(image: &mut [u8], sector: usize, data: &[u8]) {
    image[sector * SECTOR_SIZE..][..data.len()].copy_from_slice(data);
}

fn put_both_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    buf[offset + 2..offset + 4].copy_from_slice(&value.to_be_bytes());
}

fn put_both_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    buf[offset + 4..offset + 8].copy_from_slice(&value.to_be_bytes());
}

/// Length of a directory record for an identifier of `id_len` bytes
fn record_len(id_len: usize) -> usize {
    let len = 33 + id_len;
    len + len % 2
}

fn directory_record(id: &[u8], extent: u32, size: u32, flags: u8) -> Vec<u8> {
    let mut rec = vec![0u8; record_len(id.len())];
    rec[0] = rec.len() as u8;
    put_both_u32(&mut rec, 2, extent);
    put_both_u32(&mut rec, 10, size);
    // bytes 18..25: recording date left unspecified
    rec[25] = flags;
    put_both_u16(&mut rec, 28, 1);
    rec[32] = id.len() as u8;
    rec[33..33 + id.len()].copy_from_slice(id);
    rec
}

/// Number of sectors the root directory needs; records never span sectors
fn directory_sectors(id_lens: impl Iterator<Item = usize>) -> usize {
    let mut sectors = 1;
    // "." and ".."
    let mut used = 2 * record_len(1);
    for len in id_lens.map(record_len) {
        if used + len > SECTOR_SIZE {
            sectors += 1;
            used = 0;
        }
        used += len;
    }
    sectors
}

fn directory(self_extent: u32, self_size: u32, entries: &[(&[u8], u32, u32)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(self_size as usize);
    out.extend(directory_record(&[0], self_extent, self_size, FLAG_DIRECTORY));
    out.extend(directory_record(&[1], self_extent, self_size, FLAG_DIRECTORY));
    for (id, extent, size) in entries {
        let rec = directory_record(id, *extent, *size, 0);
        let room = SECTOR_SIZE - out.len() % SECTOR_SIZE;
        if rec.len() > room {
            out.resize(out.len() + room, 0);
        }
        out.extend(rec);
    }
    out
}

fn path_table(root_extent: u32, big_endian: bool) -> [u8; PATH_TABLE_SIZE as usize] {
    let mut table = [0u8; PATH_TABLE_SIZE as usize];
    table[0] = 1;
    let (extent, parent) = if big_endian {
        (root_extent.to_be_bytes(), 1u16.to_be_bytes())
    } else {
        (root_extent.to_le_bytes(), 1u16.to_le_bytes())
    };
    table[2..6].copy_from_slice(&extent);
    table[6..8].copy_from_slice(&parent);
    // table[8] is the root identifier (0), table[9] padding
    table
}

fn fill_ascii(buf: &mut [u8], value: &str) {
    buf.fill(b' ');
    let bytes = value.as_bytes();
    let n = bytes.len().min(buf.len());
    buf[..n].copy_from_slice(&bytes[..n]);
}

fn fill_ucs2(buf: &mut [u8], value: &str) {
    for pair in buf.chunks_mut(2) {
        pair[0] = 0;
        if let Some(b) = pair.get_mut(1) {
            *b = b' ';
        }
    }
    for (i, unit) in value.encode_utf16().take(buf.len() / 2).enumerate() {
        buf[2 * i..2 * i + 2].copy_from_slice(&unit.to_be_bytes());
    }
}

fn volume_descriptor(
    kind: u8,
    label: &str,
    volume_sectors: u32,
    path_table_sector: usize,
    root_record: &[u8],
) -> [u8; SECTOR_SIZE] {
    let joliet = kind == TYPE_SUPPLEMENTARY;
    let fill: fn(&mut [u8], &str) = if joliet { fill_ucs2 } else { fill_ascii };

    let mut vd = [0u8; SECTOR_SIZE];
    vd[0] = kind;
    vd[1..6].copy_from_slice(STANDARD_ID);
    vd[6] = 1;
    fill(&mut vd[8..40], "");
    fill(&mut vd[40..72], label);
    put_both_u32(&mut vd, 80, volume_sectors);
    if joliet {
        vd[88..91].copy_from_slice(JOLIET_ESCAPE);
    }
    put_both_u16(&mut vd, 120, 1);
    put_both_u16(&mut vd, 124, 1);
    put_both_u16(&mut vd, 128, SECTOR_SIZE as u16);
    put_both_u32(&mut vd, 132, PATH_TABLE_SIZE);
    vd[140..144].copy_from_slice(&(path_table_sector as u32).to_le_bytes());
    vd[148..152].copy_from_slice(&(path_table_sector as u32 + 1).to_be_bytes());
    vd[156..156 + root_record.len()].copy_from_slice(root_record);
    fill(&mut vd[190..318], "");
    fill(&mut vd[318..446], "");
    fill(&mut vd[446..574], "");
    fill(&mut vd[574..702], APPLICATION_ID);
    fill(&mut vd[702..739], "");
    fill(&mut vd[739..776], "");
    fill(&mut vd[776..813], "");
    // creation, modification, expiration and effective dates: not specified
    for date in vd[813..881].chunks_mut(17) {
        date[..16].fill(b'0');
        date[16] = 0;
    }
    vd[881] = 1;
    vd
}

fn terminator() -> [u8; 7] {
    let mut vd = [0u8; 7];
    vd[0] = TYPE_TERMINATOR;
    vd[1..6].copy_from_slice(STANDARD_ID);
    vd[6] = 1;
    vd
}

/// Joliet identifier: UCS-2 big-endian name plus version
fn joliet_identifier(name: &str) -> Vec<u8> {
    format!("{};1", name)
        .encode_utf16()
        .flat_map(u16::to_be_bytes)
        .collect()
}

/// Map a name onto ISO level-1 d-characters (`NAME.EXT`)
fn level1_name(name: &str) -> (String, String) {
    let map = |s: &str, max: usize| -> String {
        s.chars()
            .map(|c| {
                let c = c.to_ascii_uppercase();
                if c.is_ascii_uppercase() || c.is_ascii_digit() {
                    c
                } else {
                    '_'
                }
            })
            .take(max)
            .collect()
    };
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (map(stem, 8), map(ext, 3)),
        _ => (map(name, 8), String::new()),
    }
}

/// Primary-tree identifiers, deduplicated by overwriting the stem tail with a counter
fn primary_identifiers(files: &[(String, Vec<u8>)]) -> Vec<Vec<u8>> {
    let mut seen = HashSet::new();
    files
        .iter()
        .map(|(name, _)| {
            let (stem, ext) = level1_name(name);
            let mut candidate = format!("{}.{};1", stem, ext);
            let mut counter = 1u32;
            while !seen.insert(candidate.clone()) {
                let suffix = counter.to_string();
                let keep = stem.len().min(8 - suffix.len());
                candidate = format!("{}{}.{};1", &stem[..keep], suffix, ext);
                counter += 1;
            }
            candidate.into_bytes()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level1_name() {
        assert_eq!(level1_name("user-data"), ("USER_DAT".into(), String::new()));
        assert_eq!(level1_name("config.yaml"), ("CONFIG".into(), "YAM".into()));
        assert_eq!(level1_name(".hidden"), ("_HIDDEN".into(), String::new()));
    }

    #[test]
    fn test_primary_identifiers_dedupe() {
        let files = vec![
            ("user-data".to_string(), vec![]),
            ("user-datb".to_string(), vec![]),
            ("meta-data".to_string(), vec![]),
        ];
        let ids: Vec<String> = primary_identifiers(&files)
            .into_iter()
            .map(|id| String::from_utf8(id).unwrap())
            .collect();
        assert_eq!(ids, vec!["USER_DAT.;1", "USER_DA1.;1", "META_DAT.;1"]);
    }

    #[test]
    fn test_joliet_identifier() {
        assert_eq!(joliet_identifier("ab"), vec![0, b'a', 0, b'b', 0, b';', 0, b'1']);
    }

    #[test]
    fn test_directory_record_is_even_length() {
        assert_eq!(directory_record(&[0], 23, 2048, FLAG_DIRECTORY).len(), 34);
        assert_eq!(directory_record(b"AB", 30, 5, 0).len(), 36);
        assert_eq!(directory_record(b"ABC", 30, 5, 0).len(), 36);
    }

    #[test]
    fn test_write_layout() {
        let mut writer = IsoWriter::new("cidata");
        writer.add_file("user-data", b"#cloud-config\n".to_vec()).unwrap();
        writer.add_file("meta-data", b"instance-id: x\n".to_vec()).unwrap();
        let image = writer.write().unwrap();

        // 16 system sectors, 3 descriptors, 4 path tables, 2 directories, 2 files
        assert_eq!(image.len(), 27 * SECTOR_SIZE);
        assert_eq!(image[16 * SECTOR_SIZE], TYPE_PRIMARY);
        assert_eq!(&image[16 * SECTOR_SIZE + 1..16 * SECTOR_SIZE + 6], STANDARD_ID);
        assert_eq!(&image[16 * SECTOR_SIZE + 40..16 * SECTOR_SIZE + 46], b"cidata");
        assert_eq!(image[17 * SECTOR_SIZE], TYPE_SUPPLEMENTARY);
        assert_eq!(&image[17 * SECTOR_SIZE + 88..17 * SECTOR_SIZE + 91], JOLIET_ESCAPE);
        assert_eq!(image[18 * SECTOR_SIZE], TYPE_TERMINATOR);
    }

    #[test]
    fn test_write_is_deterministic() {
        let mut writer = IsoWriter::new("cidata");
        writer.add_file("meta-data", b"instance-id: x\n".to_vec()).unwrap();
        assert_eq!(writer.write().unwrap(), writer.write().unwrap());
    }

    #[test]
    fn test_write_rejects_bad_label() {
        let writer = IsoWriter::new("ci data");
        assert!(matches!(writer.write(), Err(CidataError::Packaging(_))));
    }

    #[test]
    fn test_add_file_rejects_duplicates() {
        let mut writer = IsoWriter::new("cidata");
        writer.add_file("user-data", vec![]).unwrap();
        assert!(writer.add_file("user-data", vec![]).is_err());
    }
}
