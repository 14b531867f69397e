//! Ownership labeling of generated Secrets
//!
//! Every Secret the operator writes carries a label naming its owning
//! SopsSecret as `{name}.{namespace}`. Namespace names cannot contain dots,
//! so the encoding is injective for any owner the operator would actually
//! write; a label that does not split into exactly two non-empty components
//! is rejected rather than split naively.

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;

/// Label pointing from a generated Secret back to its owning SopsSecret
pub const OWNERSHIP_LABEL: &str = "secrets.opsrs.io/owned-by";

/// Identity of an owning SopsSecret, as encoded in the ownership label
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnerRef {
    pub name: String,
    pub namespace: String,
}

impl OwnerRef {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }

    /// Label value for this owner
    pub fn encode(&self) -> String {
        format!("{}.{}", self.name, self.namespace)
    }

    /// Parse a label value back into an owner identity
    ///
    /// Returns `None` for anything other than two non-empty components, so a
    /// foreign or mangled label never produces a reconcile target.
    pub fn decode(label: &str) -> Option<Self> {
        let mut parts = label.split('.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), Some(namespace), None) if !name.is_empty() && !namespace.is_empty() => {
                Some(Self::new(name, namespace))
            }
            _ => None,
        }
    }

    /// The owner encoded on a Secret, if it carries a decodable ownership label
    pub fn of_secret(secret: &Secret) -> Option<Self> {
        secret
            .labels()
            .get(OWNERSHIP_LABEL)
            .and_then(|value| Self::decode(value))
    }
}
