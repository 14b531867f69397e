//! Finalizer policy and bookkeeping
//!
//! Finalizer management can be switched off globally through the
//! `DISABLE_FINALIZERS` environment variable or per object through
//! `spec.skipFinalizers`. The policy is resolved into a plain bool once per
//! reconcile invocation, before any write decision, so the whole cycle sees
//! one consistent answer. The per-object flag is folded in at resolution time
//! and never latched across objects.

use std::sync::Mutex;

use kube::ResourceExt;
use tracing::warn;

use crate::crd::SopsSecret;

/// Finalizer the operator places on live SopsSecrets
pub const FINALIZER: &str = "secrets.opsrs.io/cleanup";

/// Environment variable globally disabling finalizer management
pub const DISABLE_FINALIZERS_ENV: &str = "DISABLE_FINALIZERS";

/// Process-wide finalizer-disable policy
///
/// The environment lookup happens at most once and is cached behind a mutex
/// shared by all concurrent reconciliations.
#[derive(Debug)]
pub struct FinalizerPolicy {
    env_disabled: Mutex<Option<bool>>,
}

impl FinalizerPolicy {
    /// Policy backed by the `DISABLE_FINALIZERS` environment variable
    pub fn from_env() -> Self {
        Self {
            env_disabled: Mutex::new(None),
        }
    }

    /// Policy with a fixed global answer, bypassing the environment
    pub fn with_global_disable(disabled: bool) -> Self {
        Self {
            env_disabled: Mutex::new(Some(disabled)),
        }
    }

    /// Whether finalizers are enabled for this object in this invocation
    pub fn finalizers_enabled(&self, obj: &SopsSecret) -> bool {
        let mut cached = self.env_disabled.lock().unwrap_or_else(|e| e.into_inner());
        let disabled_by_env = *cached.get_or_insert_with(read_env_flag);
        !(disabled_by_env || obj.spec.skip_finalizers)
    }
}

/// Parse the global disable flag, degrading to enabled on ambiguity
fn read_env_flag() -> bool {
    let Ok(raw) = std::env::var(DISABLE_FINALIZERS_ENV) else {
        return false;
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => true,
        "0" | "f" | "false" | "" => false,
        _ => {
            warn!(
                value = %raw,
                "unparseable {} value, finalizers stay enabled", DISABLE_FINALIZERS_ENV
            );
            false
        }
    }
}

/// Whether the object currently carries the operator's finalizer
pub fn has_finalizer(obj: &SopsSecret) -> bool {
    obj.finalizers().iter().any(|f| f == FINALIZER)
}

/// Add the operator's finalizer to the object's metadata
pub fn add_finalizer(obj: &mut SopsSecret) {
    if !has_finalizer(obj) {
        obj.metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(FINALIZER.to_string());
    }
}

/// Remove the operator's finalizer from the object's metadata
pub fn remove_finalizer(obj: &mut SopsSecret) {
    if let Some(finalizers) = obj.metadata.finalizers.as_mut() {
        finalizers.retain(|f| f != FINALIZER);
    }
}
