//! Reconciliation logic for the SOPS Secret Operator
//!
//! This module holds the business logic the controller drives:
//! - converging one SopsSecret across its target namespaces
//! - the ownership-label contract on generated Secrets
//! - the finalizer policy and state bookkeeping

pub mod finalizer;
pub mod ownership;
pub mod sops_secret;
