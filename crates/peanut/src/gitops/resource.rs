//! Cluster resource model: identities, unstructured manifests and live objects.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{GitOpsError, Result};
use super::ownership::OwnershipSignature;

/// Annotation carrying the ownership signature on every applied resource.
pub const OWNERSHIP_ANNOTATION: &str = "gitops-agent.argoproj.io/gc-mark";

/// The minimal key identifying a cluster-manageable object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceIdentity {
    /// API group, empty for core resources.
    pub group: String,
    pub kind: String,
    /// Namespace, empty for cluster-scoped or defaulted resources.
    pub namespace: String,
    pub name: String,
}

impl ResourceIdentity {
    pub fn new(
        group: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Returns the `kind.group` form accepted by kubectl (`kind` for core).
    pub fn kubectl_type(&self) -> String {
        if self.group.is_empty() {
            self.kind.clone()
        } else {
            format!("{}.{}", self.kind, self.group)
        }
    }

    /// Returns a copy with the namespace filled in when it was empty.
    pub fn with_default_namespace(&self, namespace: &str) -> Self {
        let mut id = self.clone();
        if id.namespace.is_empty() {
            id.namespace = namespace.to_string();
        }
        id
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.group, self.kind, self.namespace, self.name
        )
    }
}

/// Extracts the API group from an `apiVersion` string.
pub fn group_from_api_version(api_version: &str) -> &str {
    match api_version.split_once('/') {
        Some((group, _)) => group,
        None => "",
    }
}

/// An unstructured resource document, as produced by a manifest parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    object: Value,
}

impl Manifest {
    /// Wraps a JSON value, validating that it looks like a resource.
    ///
    /// `source` is only used for error reporting.
    pub fn from_value(object: Value, source: &Path) -> Result<Self> {
        let manifest = Self { object };
        manifest.validate(source)?;
        Ok(manifest)
    }

    fn validate(&self, source: &Path) -> Result<()> {
        let invalid = |message: &str| GitOpsError::InvalidManifest {
            path: source.to_path_buf(),
            message: message.to_string(),
        };

        if !self.object.is_object() {
            return Err(invalid("document is not a mapping"));
        }
        if self.api_version().is_empty() {
            return Err(invalid("missing apiVersion"));
        }
        if self.kind().is_empty() {
            return Err(invalid("missing kind"));
        }
        if self.name().is_empty() {
            return Err(invalid(&format!("{} is missing metadata.name", self.kind())));
        }
        Ok(())
    }

    fn str_field(&self, pointer: &str) -> &str {
        self.object
            .pointer(pointer)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn api_version(&self) -> &str {
        self.str_field("/apiVersion")
    }

    pub fn kind(&self) -> &str {
        self.str_field("/kind")
    }

    pub fn name(&self) -> &str {
        self.str_field("/metadata/name")
    }

    pub fn namespace(&self) -> &str {
        self.str_field("/metadata/namespace")
    }

    /// Returns the identity key of this resource.
    pub fn identity(&self) -> ResourceIdentity {
        ResourceIdentity::new(
            group_from_api_version(self.api_version()),
            self.kind(),
            self.namespace(),
            self.name(),
        )
    }

    /// Returns the resource annotations.
    pub fn annotations(&self) -> BTreeMap<String, String> {
        self.object
            .pointer("/metadata/annotations")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns a single annotation value.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.object
            .get("metadata")
            .and_then(|m| m.get("annotations"))
            .and_then(|a| a.get(key))
            .and_then(Value::as_str)
    }

    /// Sets an annotation, creating the annotations map if needed.
    pub fn set_annotation(&mut self, key: &str, value: &str) {
        let Some(object) = self.object.as_object_mut() else {
            return;
        };
        let metadata = object
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if !metadata.is_object() {
            *metadata = Value::Object(Map::new());
        }
        let Some(metadata) = metadata.as_object_mut() else {
            return;
        };
        let annotations = metadata
            .entry("annotations")
            .or_insert_with(|| Value::Object(Map::new()));
        if !annotations.is_object() {
            *annotations = Value::Object(Map::new());
        }
        if let Some(annotations) = annotations.as_object_mut() {
            annotations.insert(key.to_string(), Value::String(value.to_string()));
        }
    }

    /// Returns the ownership signature this resource carries, if any.
    pub fn ownership(&self) -> Option<OwnershipSignature> {
        self.annotation(OWNERSHIP_ANNOTATION)
            .filter(|mark| !mark.is_empty())
            .map(OwnershipSignature::from_annotation)
    }

    pub fn as_value(&self) -> &Value {
        &self.object
    }

    pub fn into_value(self) -> Value {
        self.object
    }
}

/// A manifest that has been annotated with its ownership signature.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedManifest {
    pub identity: ResourceIdentity,
    pub signature: OwnershipSignature,
    pub manifest: Manifest,
}

/// A resource observed in the cluster.
///
/// `ownership` is `None` when the live object carries no ownership annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveResource {
    pub identity: ResourceIdentity,
    pub ownership: Option<OwnershipSignature>,
}

impl LiveResource {
    /// Builds the live view of a resource from its cluster representation.
    pub fn from_manifest(manifest: &Manifest) -> Self {
        Self {
            identity: manifest.identity(),
            ownership: manifest.ownership(),
        }
    }
}
