//! SopsSecret controller
//!
//! Wires the reconciler into kube-runtime: primary watch on SopsSecret
//! resources, secondary watch on generated Secrets mapped back to their
//! owner, and the error policy driving taxonomy-based backoff.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::ListParams,
    runtime::{
        controller::{Action, Controller},
        reflector::ObjectRef,
        watcher::Config as WatcherConfig,
    },
    Api, Client, ResourceExt,
};
use tracing::{error, info, instrument, warn};

use crate::controllers::Context;
use crate::crd::SopsSecret;
use crate::error::{Error, Result};
use crate::metrics;
use crate::reconcilers::ownership::{OwnerRef, OWNERSHIP_LABEL};
use crate::reconcilers::sops_secret as reconciler;

/// Environment variable restricting the controller to one namespace
const WATCH_NAMESPACE_ENV: &str = "WATCH_NAMESPACE";

/// Run the SopsSecret controller
pub async fn run(client: Client, context: Arc<Context>) {
    let api = sops_secret_api(&client);

    // Verify CRD is installed
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("SopsSecret CRD not installed: {}", e);
        return;
    }

    info!("Starting SopsSecret controller");

    // Only Secrets carrying the ownership label can map back to a source;
    // foreign Secrets never enter the work queue.
    let owned_secrets: Api<Secret> = Api::all(client.clone());
    let owned_selector = WatcherConfig::default().labels(OWNERSHIP_LABEL);

    Controller::new(api, WatcherConfig::default())
        .watches(owned_secrets, owned_selector, |secret| {
            OwnerRef::of_secret(&secret)
                .map(|owner| ObjectRef::new(&owner.name).within(&owner.namespace))
        })
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    info!(
                        name = %obj.name,
                        namespace = obj.namespace.as_deref().unwrap_or("default"),
                        "Reconciled SopsSecret"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation error");
                    metrics::RECONCILIATION_ERRORS.inc();
                }
            }
        })
        .await;
}

/// Main reconciliation function
#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<SopsSecret>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = metrics::RECONCILE_DURATION.start_timer();
    metrics::RECONCILIATIONS.inc();

    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    reconciler::reconcile_source(&ctx, &namespace, &obj.name_any()).await
}

/// Error policy for the controller
fn error_policy(obj: Arc<SopsSecret>, error: &Error, _ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    error!(
        name = %name,
        error = %error,
        "Reconciliation failed, scheduling retry"
    );

    let requeue_duration = match error {
        Error::Conflict(_) => Duration::from_secs(5),
        Error::Decrypt(_) | Error::MalformedPlaintext(_) => Duration::from_secs(60),
        Error::Config(_) => Duration::from_secs(300),
        _ => Duration::from_secs(30),
    };

    Action::requeue(requeue_duration)
}

/// Scope the primary watch; unset or empty `WATCH_NAMESPACE` is cluster-wide
fn sops_secret_api(client: &Client) -> Api<SopsSecret> {
    match std::env::var(WATCH_NAMESPACE_ENV) {
        Ok(ns) if !ns.trim().is_empty() => {
            let ns = ns.trim();
            if ns.contains(',') {
                warn!(
                    namespaces = %ns,
                    "multiple WATCH_NAMESPACE entries are not supported, watching the whole cluster"
                );
                Api::all(client.clone())
            } else {
                info!(namespace = %ns, "watching a single namespace");
                Api::namespaced(client.clone(), ns)
            }
        }
        _ => Api::all(client.clone()),
    }
}
