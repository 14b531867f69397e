//! Custom Resource Definitions for the SOPS Secret Operator

mod sops_secret;

pub use sops_secret::*;

/// Generate all CRD YAML manifests
pub fn generate_crds() -> Vec<String> {
    vec![serde_yaml::to_string(&SopsSecret::crd()).unwrap()]
}
