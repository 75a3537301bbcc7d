//! Remote reader
//!
//! Fetches a stored cidata volume back from the backend and reconstructs the
//! definition it was packaged from.

use tracing::debug;

use crate::CidataError;
use crate::backend::{StorageBackend, VolumeKey};
use crate::definition::{CloudInitDefinition, DEFAULT_USER_DATA_PATH, META_DATA_PATH};
use crate::iso::{IsoImage, read_image};
use crate::userdata::{apply_user_data, classify, parse_meta_data};

/// Fetch the volume behind `key` and parse it into a definition
///
/// Returns the definition and the pool the volume lives in.
pub fn fetch_and_parse(
    conn: &dyn StorageBackend,
    key: &VolumeKey,
) -> Result<(CloudInitDefinition, String), CidataError> {
    let volume = conn.lookup_volume_by_key(key)?;
    let bytes = conn.download_bytes(&volume)?;
    debug!(
        "Downloaded {} bytes of volume '{}' from pool '{}'",
        bytes.len(),
        volume.name,
        volume.pool
    );

    let image = read_image(&bytes)?;
    let def = parse_image(&image, &volume.name, &volume.pool)?;
    Ok((def, volume.pool))
}

/// Reconstruct a definition from a parsed image
pub fn parse_image(
    image: &IsoImage,
    name: &str,
    pool: &str,
) -> Result<CloudInitDefinition, CidataError> {
    let meta_data = image
        .file(META_DATA_PATH)
        .ok_or_else(|| CidataError::Parse(format!("image has no {} file", META_DATA_PATH)))?;
    let meta_data = std::str::from_utf8(meta_data)
        .map_err(|e| CidataError::parse("meta-data is not UTF-8", e))?;

    let (user_data_path, user_data) = find_user_data(image)?;

    let meta = parse_meta_data(meta_data)?;

    let mut def = CloudInitDefinition::new(name, pool);
    def.volid = image.label().to_string();
    def.user_data_path = user_data_path;
    def.metadata.instance_id = meta.instance_id;
    def.metadata.local_hostname = meta.local_hostname;
    apply_user_data(&mut def, classify(user_data));

    Ok(def)
}

/// The conventional `user-data` file, or the only other file in the image
fn find_user_data(image: &IsoImage) -> Result<(String, &[u8]), CidataError> {
    if let Some((name, data)) = image.entry(DEFAULT_USER_DATA_PATH) {
        return Ok((name.to_string(), data));
    }

    let others: Vec<&str> = image
        .file_names()
        .filter(|name| !name.eq_ignore_ascii_case(META_DATA_PATH))
        .collect();
    match others.as_slice() {
        [name] => {
            let data = image
                .file(name)
                .ok_or_else(|| CidataError::Parse(format!("image lost file {}", name)))?;
            Ok((name.to_string(), data))
        }
        [] => Err(CidataError::Parse("image has no user-data file".into())),
        _ => Err(CidataError::Parse(format!(
            "image has no {} file and several candidates: {}",
            DEFAULT_USER_DATA_PATH,
            others.join(", ")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::definition::{CloudInitInputs, build};
    use crate::iso::IsoWriter;
    use crate::package::package;
    use crate::upload::upload;
    use crate::UserDataInput;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    fn store(mock: &MockBackend, inputs: &CloudInitInputs) -> VolumeKey {
        let def = build(inputs).unwrap();
        let packaged = package(&def).unwrap();
        upload(mock, &def.pool_name, &def.name, &packaged.bytes).unwrap()
    }

    #[test]
    fn test_round_trip_key_mode() {
        let mock = MockBackend::new().with_pool("default");
        let inputs = CloudInitInputs::new("ci1")
            .with_local_hostname("node1")
            .with_ssh_authorized_key("ssh-rsa AAAA...")
            .with_instance_id("iid-ci1");
        let key = store(&mock, &inputs);

        let (def, pool) = fetch_and_parse(&mock, &key).unwrap();
        assert_eq!(pool, "default");
        assert_eq!(def.name, "ci1");
        assert_eq!(def.metadata.local_hostname, "node1");
        assert_eq!(def.metadata.instance_id, "iid-ci1");
        assert_eq!(def.user_data.ssh_authorized_keys, vec!["ssh-rsa AAAA..."]);
        assert!(def.user_data_content.is_none());
        assert_eq!(def.volid, "cidata");
    }

    #[test]
    fn test_round_trip_custom_user_data() {
        let mock = MockBackend::new().with_pool("default");
        let inputs = CloudInitInputs::new("ci1")
            .with_ssh_authorized_key("ssh-rsa AAAA...")
            .with_user_data(UserDataInput::Sniff("I2Nsb3VkLWNvbmZpZw==".into()));
        let key = store(&mock, &inputs);

        let (def, _) = fetch_and_parse(&mock, &key).unwrap();
        assert!(def.user_data.ssh_authorized_keys.is_empty());
        assert_eq!(
            def.user_data_content.as_deref(),
            Some(&b"#cloud-config"[..])
        );
    }

    #[test]
    fn test_custom_user_data_path_is_recovered() {
        let mock = MockBackend::new().with_pool("default");
        let key = store(&mock, &CloudInitInputs::new("ci1").with_user_data_path("userdata.txt"));

        let (def, _) = fetch_and_parse(&mock, &key).unwrap();
        assert_eq!(def.user_data_path, "userdata.txt");
    }

    #[test]
    fn test_user_data_path_case_is_preserved() {
        let mock = MockBackend::new().with_pool("default");
        let key = store(&mock, &CloudInitInputs::new("ci1").with_user_data_path("USER-DATA"));

        let (def, _) = fetch_and_parse(&mock, &key).unwrap();
        assert_eq!(def.user_data_path, "USER-DATA");
    }

    #[test]
    fn test_binary_user_data_round_trip() {
        let gzip = vec![0x1f, 0x8b, 0x08, 0x00, 0xff, 0xfe, 0x00, 0x01, 0x02];
        let mock = MockBackend::new().with_pool("default");
        let inputs = CloudInitInputs::new("ci1").with_user_data(UserDataInput::Base64(STANDARD.encode(&gzip)));
        let key = store(&mock, &inputs);

        let (def, _) = fetch_and_parse(&mock, &key).unwrap();
        assert_eq!(def.user_data_content, Some(gzip));
    }

    #[test]
    fn test_unknown_key_is_not_found() {
        let mock = MockBackend::new().with_pool("default");
        let err = fetch_and_parse(&mock, &VolumeKey::new("mock://default/gone")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_corrupt_image_is_parse_error() {
        let mock = MockBackend::new().with_pool("default");
        let key = store(&mock, &CloudInitInputs::new("ci1"));

        let mock = mock.with_corrupt_downloads();
        assert!(matches!(
            fetch_and_parse(&mock, &key),
            Err(CidataError::Parse(_))
        ));
    }

    #[test]
    fn test_image_missing_meta_data() {
        let mut writer = IsoWriter::new("cidata");
        writer.add_file("user-data", b"#cloud-config\n".to_vec()).unwrap();
        let image = read_image(&writer.write().unwrap()).unwrap();

        let err = parse_image(&image, "ci1", "default").unwrap_err();
        assert!(err.to_string().contains("meta-data"));
    }

    #[test]
    fn test_image_with_ambiguous_user_data() {
        let mut writer = IsoWriter::new("cidata");
        writer.add_file("meta-data", b"instance-id: x\n".to_vec()).unwrap();
        writer.add_file("a", b"one".to_vec()).unwrap();
        writer.add_file("b", b"two".to_vec()).unwrap();
        let image = read_image(&writer.write().unwrap()).unwrap();

        assert!(matches!(
            parse_image(&image, "ci1", "default"),
            Err(CidataError::Parse(_))
        ));
    }
}
