//! SopsSecret reconciler
//!
//! Converges one SopsSecret into plaintext Secrets across its target
//! namespaces: drift detection through checksum annotations, ownership-label
//! protection of foreign Secrets, finalizer-gated deletion ordering, and
//! garbage collection of Secrets left behind in namespaces that dropped out
//! of the target set.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::{
    api::{DeleteParams, ListParams, PostParams},
    runtime::controller::Action,
    Api, ResourceExt,
};
use tracing::{debug, info};

use crate::controllers::Context;
use crate::crd::SopsSecret;
use crate::decrypt::Decryptor;
use crate::error::{Error, Result};
use crate::metrics;
use crate::reconcilers::finalizer;
use crate::reconcilers::ownership::{OwnerRef, OWNERSHIP_LABEL};

/// Annotation storing the fingerprint of the generated Secret's content
pub const SECRET_CHECKSUM_ANNOTATION: &str = "secrets.opsrs.io/secret-checksum";

/// Annotation storing the fingerprint of the source ciphertext
pub const SOPS_CHECKSUM_ANNOTATION: &str = "secrets.opsrs.io/sops-checksum";

/// Requeue interval when a namespace pass asked to be re-driven
const REQUEUE_AFTER: Duration = Duration::from_secs(5);

/// Reconcile one SopsSecret identity to convergence
///
/// The object is re-fetched by identity every cycle; a missing object means
/// cleanup already happened and is a successful no-op.
pub async fn reconcile_source(ctx: &Context, namespace: &str, name: &str) -> Result<Action> {
    let api: Api<SopsSecret> = Api::namespaced(ctx.client.clone(), namespace);

    let Some(mut obj) = api.get_opt(name).await? else {
        debug!(name, namespace, "SopsSecret gone, nothing to do");
        return Ok(Action::await_change());
    };

    let owner = OwnerRef::new(name, namespace);
    let targets = target_namespaces(&obj);

    // Resolved before any write decision; gates every finalizer write and
    // child deletion below.
    let finalizers_enabled = ctx.finalizers.finalizers_enabled(&obj);

    cleanup_stale_secrets(ctx, &owner, &targets).await?;

    let deleting = obj.metadata.deletion_timestamp.is_some();

    if !deleting && !finalizer::has_finalizer(&obj) && finalizers_enabled {
        // The finalizer must land before any generated Secret exists, so a
        // crash between the two writes is always recoverable. The update
        // re-triggers reconciliation for the fan-out.
        finalizer::add_finalizer(&mut obj);
        api.replace(name, &PostParams::default(), &obj)
            .await
            .map_err(Error::classify_write)?;
        info!(name, namespace, "added finalizer");
        return Ok(Action::await_change());
    }

    if !finalizers_enabled && finalizer::has_finalizer(&obj) {
        finalizer::remove_finalizer(&mut obj);
        api.replace(name, &PostParams::default(), &obj)
            .await
            .map_err(Error::classify_write)?;
        info!(name, namespace, "finalizers disabled, removed finalizer");
        return Ok(Action::await_change());
    }

    let secret_name = target_name(&obj);
    let mut requeue = false;
    for target_ns in &targets {
        // The first hard error aborts the remaining namespaces for this
        // cycle; unattempted ones are retried on the next.
        requeue |= reconcile_namespace(
            ctx,
            &obj,
            &owner,
            finalizers_enabled,
            &secret_name,
            target_ns,
        )
        .await?;
    }

    if deleting && finalizer::has_finalizer(&obj) {
        // Every target namespace finished its deletion pass; only now may the
        // control plane erase the source.
        finalizer::remove_finalizer(&mut obj);
        api.replace(name, &PostParams::default(), &obj)
            .await
            .map_err(Error::classify_write)?;
        info!(name, namespace, "cleanup complete, removed finalizer");
        return Ok(Action::await_change());
    }

    if requeue {
        Ok(Action::requeue(REQUEUE_AFTER))
    } else {
        Ok(Action::await_change())
    }
}

/// Reconcile one (SopsSecret, target namespace) pair
///
/// Returns whether the caller should requeue the whole source.
async fn reconcile_namespace(
    ctx: &Context,
    obj: &SopsSecret,
    owner: &OwnerRef,
    finalizers_enabled: bool,
    secret_name: &str,
    target_ns: &str,
) -> Result<bool> {
    let api: Api<Secret> = Api::namespaced(ctx.client.clone(), target_ns);
    let existing = api.get_opt(secret_name).await?;

    // A pre-existing Secret this source does not own is left alone entirely,
    // whether it is foreign or belongs to another SopsSecret.
    if let Some(secret) = &existing {
        let owned_by_us = secret
            .labels()
            .get(OWNERSHIP_LABEL)
            .is_some_and(|value| *value == owner.encode());
        if !owned_by_us {
            debug!(
                secret = %secret_name,
                namespace = %target_ns,
                "existing Secret is not owned by this source, skipping"
            );
            return Ok(false);
        }
    }

    if obj.metadata.deletion_timestamp.is_some() {
        if finalizer::has_finalizer(obj) && finalizers_enabled && existing.is_some() {
            delete_secret(&api, secret_name, target_ns).await?;
        }
        // Never upsert into an object that is on its way out.
        return Ok(false);
    }

    // Fingerprints of what is live right now
    let live_data = existing.as_ref().and_then(|s| s.data.as_ref());
    let mut secret_checksum = data_checksum(live_data)?;
    let sops_checksum = checksum(obj.data.as_bytes());

    let labels = desired_labels(obj, owner);
    let mut annotations = desired_annotations(obj, &secret_checksum, &sops_checksum);

    if let Some(current) = &existing {
        if in_sync(current, &labels, &annotations) {
            debug!(secret = %secret_name, namespace = %target_ns, "Secret in sync, skipping");
            metrics::SECRETS_IN_SYNC.inc();
            return Ok(false);
        }
    }

    let data = render_data(ctx.decryptor.as_ref(), obj, live_data).await?;

    // The comparison next cycle must account for overlaid ignored keys.
    secret_checksum = data_checksum(Some(&data))?;
    annotations.insert(SECRET_CHECKSUM_ANNOTATION.to_string(), secret_checksum);

    match existing {
        None => {
            let secret = Secret {
                metadata: ObjectMeta {
                    name: Some(secret_name.to_string()),
                    namespace: Some(target_ns.to_string()),
                    labels: Some(labels),
                    annotations: Some(annotations),
                    ..Default::default()
                },
                type_: obj.type_.clone(),
                data: Some(data),
                ..Default::default()
            };
            api.create(&PostParams::default(), &secret)
                .await
                .map_err(Error::classify_write)?;
            info!(secret = %secret_name, namespace = %target_ns, "created Secret");
        }
        Some(mut current) => {
            current.metadata.labels = Some(labels);
            current.metadata.annotations = Some(annotations);
            current.type_ = obj.type_.clone();
            current.data = Some(data);
            current.string_data = None;
            api.replace(secret_name, &PostParams::default(), &current)
                .await
                .map_err(Error::classify_write)?;
            info!(secret = %secret_name, namespace = %target_ns, "updated Secret");
        }
    }
    metrics::SECRETS_WRITTEN.with_label_values(&[target_ns]).inc();

    Ok(false)
}

/// Delete Secrets owned by this source in namespaces that left the target set
async fn cleanup_stale_secrets(ctx: &Context, owner: &OwnerRef, targets: &[String]) -> Result<()> {
    let all: Api<Secret> = Api::all(ctx.client.clone());
    let selector = format!("{}={}", OWNERSHIP_LABEL, owner.encode());
    let owned = all.list(&ListParams::default().labels(&selector)).await?;

    for (namespace, name) in stale_targets(&owned.items, targets) {
        let api: Api<Secret> = Api::namespaced(ctx.client.clone(), &namespace);
        delete_secret(&api, &name, &namespace).await?;
    }

    Ok(())
}

/// Delete one generated Secret, treating not-found as success
async fn delete_secret(api: &Api<Secret>, name: &str, namespace: &str) -> Result<()> {
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            info!(secret = %name, namespace = %namespace, "deleted generated Secret");
            metrics::SECRETS_DELETED.with_label_values(&[namespace]).inc();
            Ok(())
        }
        Err(kube::Error::Api(ref err)) if err.code == 404 => Ok(()),
        Err(err) => Err(Error::classify_write(err)),
    }
}

/// Owned Secrets whose namespace is no longer targeted, as (namespace, name)
pub fn stale_targets(owned: &[Secret], targets: &[String]) -> Vec<(String, String)> {
    owned
        .iter()
        .filter_map(|secret| {
            let namespace = secret.namespace()?;
            if targets.contains(&namespace) {
                None
            } else {
                Some((namespace, secret.name_any()))
            }
        })
        .collect()
}

/// Target namespaces, defaulting to the object's own namespace
///
/// An unset and an explicitly-empty list are indistinguishable on the wire
/// and both mean "my own namespace".
pub fn target_namespaces(obj: &SopsSecret) -> Vec<String> {
    if obj.spec.template.namespaces.is_empty() {
        obj.namespace().into_iter().collect()
    } else {
        obj.spec.template.namespaces.clone()
    }
}

/// Name of the generated Secrets, defaulting to the object's own name
pub fn target_name(obj: &SopsSecret) -> String {
    match obj.spec.template.name.as_deref() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => obj.name_any(),
    }
}

/// Template labels plus the ownership label
pub fn desired_labels(obj: &SopsSecret, owner: &OwnerRef) -> BTreeMap<String, String> {
    let mut labels = obj.spec.template.labels.clone();
    labels.insert(OWNERSHIP_LABEL.to_string(), owner.encode());
    labels
}

/// Template annotations plus both checksum annotations
pub fn desired_annotations(
    obj: &SopsSecret,
    secret_checksum: &str,
    sops_checksum: &str,
) -> BTreeMap<String, String> {
    let mut annotations = obj.spec.template.annotations.clone();
    annotations.insert(
        SECRET_CHECKSUM_ANNOTATION.to_string(),
        secret_checksum.to_string(),
    );
    annotations.insert(
        SOPS_CHECKSUM_ANNOTATION.to_string(),
        sops_checksum.to_string(),
    );
    annotations
}

/// Whether the live Secret already matches the desired state
///
/// Requires both checksum annotations to be present and the full label and
/// annotation maps to be structurally equal, so relabeling the template
/// forces a rewrite even when the content is unchanged.
pub fn in_sync(
    current: &Secret,
    desired_labels: &BTreeMap<String, String>,
    desired_annotations: &BTreeMap<String, String>,
) -> bool {
    let current_annotations = current.annotations();
    current_annotations.contains_key(SECRET_CHECKSUM_ANNOTATION)
        && current_annotations.contains_key(SOPS_CHECKSUM_ANNOTATION)
        && current_annotations == desired_annotations
        && current.labels() == desired_labels
}

/// Decrypt the ciphertext and assemble the generated data map
///
/// Ignored keys present in the live Secret keep their live values so an
/// external actor can manage them without being overwritten.
pub async fn render_data(
    decryptor: &dyn Decryptor,
    obj: &SopsSecret,
    live: Option<&BTreeMap<String, ByteString>>,
) -> Result<BTreeMap<String, ByteString>> {
    let plaintext = decryptor.decrypt(obj.data.as_bytes(), "yaml").await?;
    let parsed: BTreeMap<String, String> = serde_yaml::from_slice(&plaintext)?;

    let mut data: BTreeMap<String, ByteString> = parsed
        .into_iter()
        .map(|(key, value)| (key, ByteString(value.into_bytes())))
        .collect();

    if let Some(live) = live {
        for key in &obj.spec.ignored_keys {
            if let Some(value) = live.get(key) {
                data.insert(key.clone(), value.clone());
            }
        }
    }

    Ok(data)
}

/// Fingerprint of arbitrary bytes, as lowercase hex
pub fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// Fingerprint of a Secret data map over its canonical JSON serialization
///
/// `BTreeMap` ordering plus base64 values make the serialization canonical;
/// an absent map serializes as `null`, matching a Secret that does not exist.
pub fn data_checksum(data: Option<&BTreeMap<String, ByteString>>) -> Result<String> {
    Ok(checksum(&serde_json::to_vec(&data)?))
}
