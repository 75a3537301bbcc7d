//! Lifecycle tests against the mock storage backend

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cidata_rs::backend::{MockBackend, StorageBackend};
use cidata_rs::definition::build;
use cidata_rs::iso::read_image;
use cidata_rs::package::package;
use cidata_rs::upload::upload;
use cidata_rs::{CidataError, CloudInitInputs, CloudInitResource, UserDataInput, hash};

fn node1_inputs() -> CloudInitInputs {
    CloudInitInputs::new("ci1")
        .with_pool("default")
        .with_local_hostname("node1")
        .with_ssh_authorized_key("ssh-rsa AAAA...")
}

// ==================== Packaged content ====================

/// SSH key inputs produce a cloud-config listing exactly that key
#[test]
fn test_ssh_key_inputs_packaged_content() {
    let def = build(&node1_inputs()).unwrap();
    let packaged = package(&def).unwrap();

    assert!(packaged.meta_data.contains("local-hostname: node1"));
    let user_data = String::from_utf8(packaged.user_data.clone()).unwrap();
    assert!(user_data.starts_with("#cloud-config"));
    assert_eq!(user_data.matches("ssh-rsa AAAA...").count(), 1);

    let image = read_image(&packaged.bytes).unwrap();
    assert_eq!(image.label(), "cidata");
    assert_eq!(
        image.file("user-data").unwrap(),
        packaged.user_data.as_slice()
    );
    assert_eq!(
        image.file("meta-data").unwrap(),
        packaged.meta_data.as_bytes()
    );
}

/// Custom user-data wins over the SSH key and is packaged verbatim
#[test]
fn test_custom_user_data_packaged_verbatim() {
    let custom = "#cloud-config\npackages:\n  - nginx\n";
    let inputs = node1_inputs().with_user_data(UserDataInput::Raw(custom.to_string()));

    let packaged = package(&build(&inputs).unwrap()).unwrap();
    assert_eq!(packaged.user_data, custom.as_bytes());
}

/// Base64 user-data is decoded before packaging
#[test]
fn test_base64_user_data_decoded() {
    let custom = "#cloud-config\nruncmd:\n  - echo hi\n";
    let inputs = node1_inputs().with_user_data(UserDataInput::Base64(STANDARD.encode(custom)));

    let packaged = package(&build(&inputs).unwrap()).unwrap();
    assert_eq!(packaged.user_data, custom.as_bytes());
}

/// Base64 of binary content is written decoded and does not drift after create
#[test]
fn test_binary_user_data_create_then_check() {
    let gzip = [0x1f, 0x8b, 0x08, 0x00, 0xff, 0xfe, 0x00, 0x01, 0x02];
    let inputs = CloudInitInputs::new("ci1").with_user_data(UserDataInput::Sniff(STANDARD.encode(gzip)));

    let packaged = package(&build(&inputs).unwrap()).unwrap();
    assert_eq!(packaged.user_data, gzip);

    let mock = MockBackend::new().with_pool("default");
    let state = CloudInitResource::new(&mock)
        .create(&inputs)
        .unwrap()
        .state
        .unwrap();
    assert!(state.drift(&inputs).is_empty());
}

/// Packaging the same definition twice yields identical images
#[test]
fn test_packaging_is_deterministic() {
    let def = build(&node1_inputs().with_instance_id("iid-fixed")).unwrap();
    assert_eq!(package(&def).unwrap().bytes, package(&def).unwrap().bytes);
}

// ==================== Fingerprints ====================

/// Raw and base64 forms of the same content share a fingerprint
#[test]
fn test_fingerprint_encoding_independent() {
    assert_eq!(hash::hash("I2Nsb3VkLWNvbmZpZw=="), hash::hash("#cloud-config"));

    let content = "#cloud-config\nhostname: web\n";
    assert_eq!(
        UserDataInput::Raw(content.to_string()).fingerprint(),
        UserDataInput::Sniff(STANDARD.encode(content)).fingerprint()
    );
}

// ==================== Create / read / delete ====================

/// Round trip reproduces hostname and the single SSH key
#[test]
fn test_round_trip_hostname_and_key() {
    let mock = MockBackend::new().with_pool("default");
    let resource = CloudInitResource::new(&mock);

    let outcome = resource.create(&node1_inputs()).unwrap();
    let state = outcome.state.unwrap();

    assert_eq!(state.local_hostname.as_deref(), Some("node1"));
    assert_eq!(state.ssh_authorized_key.as_deref(), Some("ssh-rsa AAAA..."));
    assert_eq!(state.volid, "cidata");
    assert_eq!(state.user_data_path, "user-data");
    assert!(state.drift(&node1_inputs()).is_empty());
}

/// Round trip of custom user-data reports its fingerprint, not the key
#[test]
fn test_round_trip_custom_user_data() {
    let mock = MockBackend::new().with_pool("default");
    let resource = CloudInitResource::new(&mock);

    let inputs = node1_inputs().with_user_data(UserDataInput::Sniff("I2Nsb3VkLWNvbmZpZw==".into()));
    let outcome = resource.create(&inputs).unwrap();
    assert_eq!(outcome.warnings.len(), 1);
    let state = outcome.state.unwrap();

    assert_eq!(state.user_data_fingerprint, Some(hash::hash("#cloud-config")));
    assert!(state.ssh_authorized_key.is_none());

    // Re-supplying the content raw is not drift
    let raw = node1_inputs().with_user_data(UserDataInput::Raw("#cloud-config".into()));
    assert!(state.drift(&raw).is_empty());
}

/// A changed hostname shows up as drift
#[test]
fn test_drift_detected() {
    let mock = MockBackend::new().with_pool("default");
    let resource = CloudInitResource::new(&mock);
    let state = resource.create(&node1_inputs()).unwrap().state.unwrap();

    let changed = node1_inputs().with_local_hostname("node2");
    assert_eq!(state.drift(&changed), vec!["local_hostname"]);
}

/// Upload into a missing pool is a backend error and leaves nothing behind
#[test]
fn test_upload_missing_pool() {
    let mock = MockBackend::new().with_pool("default");
    let packaged = package(&build(&node1_inputs()).unwrap()).unwrap();

    let err = upload(&mock, "nonexistent", "ci1", &packaged.bytes).unwrap_err();
    assert!(matches!(err, CidataError::Backend(_)));
    assert_eq!(mock.volume_count(), 0);
}

/// A second create under the same name fails
#[test]
fn test_create_name_collision() {
    let mock = MockBackend::new().with_pool("default");
    let resource = CloudInitResource::new(&mock);

    resource.create(&node1_inputs()).unwrap();
    let err = resource.create(&node1_inputs()).unwrap_err();
    assert!(matches!(err, CidataError::Backend(_)));
    assert_eq!(mock.volume_count(), 1);
}

/// An unreachable backend fails before any work
#[test]
fn test_connection_unavailable() {
    let mock = MockBackend::new().with_pool("default").with_available(false);
    let resource = CloudInitResource::new(&mock);

    let err = resource.create(&node1_inputs()).unwrap_err();
    assert!(matches!(err, CidataError::ConnectionUnavailable(_)));
}

/// A failed read-back still hands the key to the caller
#[test]
fn test_create_read_back_failure_keeps_key() {
    let mock = MockBackend::new()
        .with_pool("default")
        .with_corrupt_downloads();
    let resource = CloudInitResource::new(&mock);

    let outcome = resource.create(&node1_inputs()).unwrap();
    assert!(matches!(outcome.state, Err(CidataError::Parse(_))));
    assert!(mock.lookup_volume_by_key(&outcome.volume_key).is_ok());
}

/// Deleting twice reports the volume as gone
#[test]
fn test_delete_then_read() {
    let mock = MockBackend::new().with_pool("default");
    let resource = CloudInitResource::new(&mock);

    let key = resource.create(&node1_inputs()).unwrap().volume_key;
    resource.delete(&key).unwrap();

    assert!(resource.read(&key).unwrap_err().is_not_found());
    assert!(resource.delete(&key).unwrap_err().is_not_found());
}
