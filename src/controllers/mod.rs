//! Kubernetes controller wiring for the SopsSecret CRD
//!
//! This module contains the controller implementation that watches for
//! resource changes and triggers reconciliation.

mod sops_secret_controller;

pub use sops_secret_controller::run as run_sops_secret_controller;

use std::sync::Arc;

use kube::Client;

use crate::decrypt::Decryptor;
use crate::reconcilers::finalizer::FinalizerPolicy;

/// Shared context for all reconciliations
pub struct Context {
    /// Kubernetes client
    pub client: Client,

    /// Injected decrypt capability
    pub decryptor: Arc<dyn Decryptor>,

    /// Process-wide finalizer-disable policy
    pub finalizers: FinalizerPolicy,
}

impl Context {
    /// Create a new context with the environment-backed finalizer policy
    pub fn new(client: Client, decryptor: Arc<dyn Decryptor>) -> Self {
        Self {
            client,
            decryptor,
            finalizers: FinalizerPolicy::from_env(),
        }
    }
}
