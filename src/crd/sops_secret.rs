//! SopsSecret custom resource
//!
//! The ciphertext lives in a top-level `data` field next to `spec`, mirroring
//! the layout of a plain `v1/Secret`. `#[derive(CustomResource)]` can only
//! generate root objects whose payload sits under `spec`, so the resource
//! type, its serialization, and the CRD manifest are defined by hand.

use std::borrow::Cow;
use std::collections::BTreeMap;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

/// API group of the SopsSecret resource
pub const GROUP: &str = "secrets.opsrs.io";

/// Served and stored API version
pub const VERSION: &str = "v1beta1";

/// Resource kind
pub const KIND: &str = "SopsSecret";

/// Plural name used in API paths
pub const PLURAL: &str = "sopssecrets";

/// SopsSecret root object
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SopsSecret {
    #[serde(default)]
    pub metadata: ObjectMeta,

    pub spec: SopsSecretSpec,

    /// SOPS-encrypted ciphertext, YAML encoded
    #[serde(default)]
    pub data: String,

    /// Secret type stamped onto generated Secrets (e.g. `Opaque`)
    #[serde(default, rename = "type")]
    pub type_: Option<String>,
}

/// SopsSecret resource specification
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SopsSecretSpec {
    /// Shape of the generated Secrets
    #[serde(default)]
    pub template: SecretTemplate,

    /// Data keys the operator must not overwrite once present downstream
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignored_keys: Vec<String>,

    /// Opt this object out of finalizer management
    #[serde(default)]
    pub skip_finalizers: bool,
}

/// Template for the generated Secrets
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretTemplate {
    /// Name of the generated Secrets; defaults to the SopsSecret's own name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Target namespaces; empty defaults to the SopsSecret's own namespace
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,

    /// Labels copied onto the generated Secrets
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Annotations copied onto the generated Secrets
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Serialize for SopsSecret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut obj = serializer.serialize_struct("SopsSecret", 6)?;
        obj.serialize_field("apiVersion", &format!("{GROUP}/{VERSION}"))?;
        obj.serialize_field("kind", KIND)?;
        obj.serialize_field("metadata", &self.metadata)?;
        obj.serialize_field("spec", &self.spec)?;
        obj.serialize_field("data", &self.data)?;
        match &self.type_ {
            Some(t) => obj.serialize_field("type", t)?,
            None => obj.skip_field("type")?,
        }
        obj.end()
    }
}

impl kube::core::Resource for SopsSecret {
    type DynamicType = ();
    type Scope = NamespaceResourceScope;

    fn kind(_dt: &()) -> Cow<'_, str> {
        KIND.into()
    }

    fn group(_dt: &()) -> Cow<'_, str> {
        GROUP.into()
    }

    fn version(_dt: &()) -> Cow<'_, str> {
        VERSION.into()
    }

    fn plural(_dt: &()) -> Cow<'_, str> {
        PLURAL.into()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl SopsSecret {
    /// Construct a SopsSecret with the given identity
    pub fn new(name: &str, namespace: &str, spec: SopsSecretSpec) -> Self {
        Self {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec,
            data: String::new(),
            type_: None,
        }
    }

    /// The CRD manifest for this resource
    pub fn crd() -> CustomResourceDefinition {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "CustomResourceDefinition",
            "metadata": { "name": format!("{PLURAL}.{GROUP}") },
            "spec": {
                "group": GROUP,
                "names": {
                    "kind": KIND,
                    "listKind": "SopsSecretList",
                    "plural": PLURAL,
                    "singular": "sopssecret",
                    "shortNames": ["sops"]
                },
                "scope": "Namespaced",
                "versions": [{
                    "name": VERSION,
                    "served": true,
                    "storage": true,
                    "additionalPrinterColumns": [
                        { "name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp" }
                    ],
                    "schema": { "openAPIV3Schema": {
                        "type": "object",
                        "required": ["spec", "data"],
                        "properties": {
                            "spec": {
                                "type": "object",
                                "properties": {
                                    "template": {
                                        "type": "object",
                                        "properties": {
                                            "name": { "type": "string" },
                                            "namespaces": {
                                                "type": "array",
                                                "items": { "type": "string" }
                                            },
                                            "labels": {
                                                "type": "object",
                                                "additionalProperties": { "type": "string" }
                                            },
                                            "annotations": {
                                                "type": "object",
                                                "additionalProperties": { "type": "string" }
                                            }
                                        }
                                    },
                                    "ignoredKeys": {
                                        "type": "array",
                                        "items": { "type": "string" }
                                    },
                                    "skipFinalizers": { "type": "boolean" }
                                }
                            },
                            "data": { "type": "string" },
                            "type": { "type": "string" }
                        }
                    }}
                }]
            }
        }))
        .expect("static SopsSecret CRD manifest is valid")
    }
}
