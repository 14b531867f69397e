//! Integration tests for the reconcile decision logic
//!
//! These tests exercise the convergence helpers end to end with a
//! deterministic fake decryptor: rendering, drift detection, fan-out
//! garbage collection, and ownership protection.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use tokio_test::block_on;

use sops_secret_operator::crd::{SecretTemplate, SopsSecret, SopsSecretSpec};
use sops_secret_operator::decrypt::Decryptor;
use sops_secret_operator::error::Error;
use sops_secret_operator::reconcilers::ownership::{OwnerRef, OWNERSHIP_LABEL};
use sops_secret_operator::reconcilers::sops_secret::{
    checksum, data_checksum, desired_annotations, desired_labels, in_sync, render_data,
    stale_targets, target_name, target_namespaces, SECRET_CHECKSUM_ANNOTATION,
    SOPS_CHECKSUM_ANNOTATION,
};

// ============================================================================
// Test Helpers
// ============================================================================

/// Decryptor returning a fixed plaintext regardless of ciphertext
struct FakeDecryptor {
    plaintext: &'static str,
}

#[async_trait]
impl Decryptor for FakeDecryptor {
    async fn decrypt(
        &self,
        _ciphertext: &[u8],
        _format: &str,
    ) -> sops_secret_operator::Result<Vec<u8>> {
        Ok(self.plaintext.as_bytes().to_vec())
    }
}

/// Decryptor that always fails, like a missing key would
struct BrokenDecryptor;

#[async_trait]
impl Decryptor for BrokenDecryptor {
    async fn decrypt(
        &self,
        _ciphertext: &[u8],
        _format: &str,
    ) -> sops_secret_operator::Result<Vec<u8>> {
        Err(Error::decrypt("no key could decrypt the data"))
    }
}

fn source(name: &str, namespace: &str, namespaces: &[&str]) -> SopsSecret {
    let mut obj = SopsSecret::new(
        name,
        namespace,
        SopsSecretSpec {
            template: SecretTemplate {
                namespaces: namespaces.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
            ..Default::default()
        },
    );
    obj.data = "ENC[AES256_GCM,data:opaque]".to_string();
    obj
}

fn bytes(value: &str) -> ByteString {
    ByteString(value.as_bytes().to_vec())
}

/// A Secret exactly as a previous reconcile would have written it
fn written_secret(obj: &SopsSecret, owner: &OwnerRef, data: BTreeMap<String, ByteString>) -> Secret {
    let secret_checksum = data_checksum(Some(&data)).unwrap();
    let sops_checksum = checksum(obj.data.as_bytes());
    Secret {
        metadata: ObjectMeta {
            name: Some(target_name(obj)),
            namespace: obj.metadata.namespace.clone(),
            labels: Some(desired_labels(obj, owner)),
            annotations: Some(desired_annotations(obj, &secret_checksum, &sops_checksum)),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

fn owned_secret(namespace: &str, name: &str, owner: &OwnerRef) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(
                [(OWNERSHIP_LABEL.to_string(), owner.encode())]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        },
        ..Default::default()
    }
}

// ============================================================================
// Convergence
// ============================================================================

#[test]
fn render_produces_the_decrypted_mapping() {
    let obj = source("app", "ns1", &[]);
    let decryptor = FakeDecryptor {
        plaintext: "PASSWORD: abc\nUSER: svc\n",
    };

    let data = block_on(render_data(&decryptor, &obj, None)).unwrap();

    assert_eq!(data.len(), 2);
    assert_eq!(data.get("PASSWORD"), Some(&bytes("abc")));
    assert_eq!(data.get("USER"), Some(&bytes("svc")));
}

#[test]
fn ignored_keys_keep_their_live_values() {
    let mut obj = source("app", "ns1", &[]);
    obj.spec.ignored_keys = vec!["ROTATED_PASSWORD".to_string()];

    let live: BTreeMap<String, ByteString> = [
        ("ROTATED_PASSWORD".to_string(), bytes("set-by-rotation-job")),
        ("PASSWORD".to_string(), bytes("stale")),
    ]
    .into_iter()
    .collect();

    let decryptor = FakeDecryptor {
        plaintext: "PASSWORD: abc\nROTATED_PASSWORD: from-template\n",
    };
    let data = block_on(render_data(&decryptor, &obj, Some(&live))).unwrap();

    // the externally managed key survives, everything else converges
    assert_eq!(data.get("ROTATED_PASSWORD"), Some(&bytes("set-by-rotation-job")));
    assert_eq!(data.get("PASSWORD"), Some(&bytes("abc")));
}

#[test]
fn ignored_key_absent_downstream_takes_the_decrypted_value() {
    let mut obj = source("app", "ns1", &[]);
    obj.spec.ignored_keys = vec!["ROTATED_PASSWORD".to_string()];

    let decryptor = FakeDecryptor {
        plaintext: "ROTATED_PASSWORD: initial\n",
    };
    let data = block_on(render_data(&decryptor, &obj, Some(&BTreeMap::new()))).unwrap();

    assert_eq!(data.get("ROTATED_PASSWORD"), Some(&bytes("initial")));
}

// ============================================================================
// Idempotence / drift detection
// ============================================================================

#[test]
fn second_cycle_is_a_zero_write_skip() {
    let owner = OwnerRef::new("app", "ns1");
    let obj = source("app", "ns1", &[]);
    let decryptor = FakeDecryptor {
        plaintext: "PASSWORD: abc\n",
    };

    let data = block_on(render_data(&decryptor, &obj, None)).unwrap();
    let written = written_secret(&obj, &owner, data);

    // next cycle recomputes fingerprints against the live Secret
    let fresh_secret_checksum = data_checksum(written.data.as_ref()).unwrap();
    let fresh_annotations = desired_annotations(
        &obj,
        &fresh_secret_checksum,
        &checksum(obj.data.as_bytes()),
    );

    assert!(in_sync(&written, &desired_labels(&obj, &owner), &fresh_annotations));
}

#[test]
fn ciphertext_change_breaks_the_skip() {
    let owner = OwnerRef::new("app", "ns1");
    let mut obj = source("app", "ns1", &[]);
    let decryptor = FakeDecryptor {
        plaintext: "PASSWORD: abc\n",
    };

    let data = block_on(render_data(&decryptor, &obj, None)).unwrap();
    let written = written_secret(&obj, &owner, data);

    obj.data = "ENC[AES256_GCM,data:reencrypted]".to_string();
    let fresh_annotations = desired_annotations(
        &obj,
        &data_checksum(written.data.as_ref()).unwrap(),
        &checksum(obj.data.as_bytes()),
    );

    assert!(!in_sync(&written, &desired_labels(&obj, &owner), &fresh_annotations));
}

#[test]
fn tampered_output_breaks_the_skip() {
    let owner = OwnerRef::new("app", "ns1");
    let obj = source("app", "ns1", &[]);
    let decryptor = FakeDecryptor {
        plaintext: "PASSWORD: abc\n",
    };

    let data = block_on(render_data(&decryptor, &obj, None)).unwrap();
    let mut written = written_secret(&obj, &owner, data);

    // someone edited the generated Secret behind the operator's back
    written
        .data
        .as_mut()
        .unwrap()
        .insert("PASSWORD".to_string(), bytes("tampered"));

    let fresh_annotations = desired_annotations(
        &obj,
        &data_checksum(written.data.as_ref()).unwrap(),
        &checksum(obj.data.as_bytes()),
    );

    assert!(!in_sync(&written, &desired_labels(&obj, &owner), &fresh_annotations));
}

#[test]
fn template_relabel_breaks_the_skip_with_unchanged_content() {
    let owner = OwnerRef::new("app", "ns1");
    let mut obj = source("app", "ns1", &[]);
    let decryptor = FakeDecryptor {
        plaintext: "PASSWORD: abc\n",
    };

    let data = block_on(render_data(&decryptor, &obj, None)).unwrap();
    let written = written_secret(&obj, &owner, data);

    obj.spec
        .template
        .labels
        .insert("tier".to_string(), "backend".to_string());

    let fresh_annotations = desired_annotations(
        &obj,
        &data_checksum(written.data.as_ref()).unwrap(),
        &checksum(obj.data.as_bytes()),
    );

    assert!(!in_sync(&written, &desired_labels(&obj, &owner), &fresh_annotations));
}

// ============================================================================
// Fan-out
// ============================================================================

#[test]
fn dropping_a_namespace_schedules_exactly_its_secret_for_deletion() {
    let owner = OwnerRef::new("app", "ns1");
    let owned = vec![
        owned_secret("a", "app", &owner),
        owned_secret("b", "app", &owner),
        owned_secret("c", "app", &owner),
    ];

    let obj = source("app", "ns1", &["a", "b"]);
    let stale = stale_targets(&owned, &target_namespaces(&obj));

    assert_eq!(stale, vec![("c".to_string(), "app".to_string())]);
}

#[test]
fn empty_namespace_list_defaults_to_the_source_namespace() {
    let obj = source("app", "ns1", &[]);
    assert_eq!(target_namespaces(&obj), vec!["ns1"]);
}

// ============================================================================
// Ownership protection
// ============================================================================

#[test]
fn foreign_secret_never_maps_to_a_reconcile_target() {
    let foreign = Secret {
        metadata: ObjectMeta {
            name: Some("app".to_string()),
            namespace: Some("ns2".to_string()),
            labels: Some(
                [("app.kubernetes.io/name".to_string(), "app".to_string())]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        },
        ..Default::default()
    };

    assert_eq!(OwnerRef::of_secret(&foreign), None);
}

#[test]
fn owned_secret_maps_back_to_its_source() {
    let owner = OwnerRef::new("app", "ns1");
    let secret = owned_secret("ns2", "app", &owner);

    assert_eq!(OwnerRef::of_secret(&secret), Some(owner));
}

// ============================================================================
// Error taxonomy
// ============================================================================

#[test]
fn decrypt_failure_is_surfaced_as_retryable() {
    let obj = source("app", "ns1", &[]);
    let err = block_on(render_data(&BrokenDecryptor, &obj, None)).unwrap_err();

    match err {
        Error::Decrypt(msg) => assert!(msg.contains("no key could decrypt")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn non_mapping_plaintext_is_malformed() {
    let obj = source("app", "ns1", &[]);

    for plaintext in ["just a scalar", "- a\n- list\n", "nested:\n  too: deep\n"] {
        let decryptor = FakeDecryptor { plaintext };
        let err = block_on(render_data(&decryptor, &obj, None)).unwrap_err();
        assert!(
            matches!(err, Error::MalformedPlaintext(_)),
            "plaintext {plaintext:?} should not parse as a flat mapping"
        );
    }
}

// ============================================================================
// Worked example
// ============================================================================

#[test]
fn worked_example_yields_owned_checksummed_secrets() {
    let owner = OwnerRef::new("app", "ns1");
    let obj = source("app", "ns1", &["ns1", "ns2"]);
    let decryptor = FakeDecryptor {
        plaintext: "PASSWORD: abc\n",
    };

    assert_eq!(target_namespaces(&obj), vec!["ns1", "ns2"]);
    assert_eq!(target_name(&obj), "app");

    let data = block_on(render_data(&decryptor, &obj, None)).unwrap();
    assert_eq!(data.get("PASSWORD"), Some(&bytes("abc")));

    let labels = desired_labels(&obj, &owner);
    assert_eq!(labels.get(OWNERSHIP_LABEL), Some(&"app.ns1".to_string()));

    let annotations = desired_annotations(
        &obj,
        &data_checksum(Some(&data)).unwrap(),
        &checksum(obj.data.as_bytes()),
    );
    assert!(annotations.contains_key(SECRET_CHECKSUM_ANNOTATION));
    assert!(annotations.contains_key(SOPS_CHECKSUM_ANNOTATION));
    assert_eq!(
        annotations.get(SOPS_CHECKSUM_ANNOTATION),
        Some(&checksum(b"ENC[AES256_GCM,data:opaque]"))
    );
}
