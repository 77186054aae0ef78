//! Manifest parsers.
//!
//! A parser turns a directory of the working copy into an ordered list of
//! resource documents. The strategy is picked once at startup from
//! [`ParserKind`] and injected into the repository tracker.

mod kustomize;
mod manifest;

pub use kustomize::{KustomizeParser, DEFAULT_KUSTOMIZE_TIMEOUT};
pub use manifest::PlainManifestParser;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{GitOpsError, Result};
use super::resource::Manifest;

/// Renders a manifest directory into resource documents.
///
/// Implementations must not block the runtime and must release any child
/// process when the returned future is dropped.
#[async_trait]
pub trait ManifestParser: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Parses every resource under `root`, in a stable order.
    async fn parse(&self, root: &Path) -> Result<Vec<Manifest>>;
}

/// The parser strategies available from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParserKind {
    /// `kustomize build <dir>`.
    #[default]
    Kustomize,
    /// Plain YAML/JSON files.
    Manifest,
}

impl ParserKind {
    /// Builds the parser. `kustomize_bin` and `timeout` are only used by the
    /// kustomize strategy.
    pub fn build(self, kustomize_bin: &str, timeout: Duration) -> Arc<dyn ManifestParser> {
        match self {
            ParserKind::Kustomize => {
                Arc::new(KustomizeParser::new(kustomize_bin).with_timeout(timeout))
            }
            ParserKind::Manifest => Arc::new(PlainManifestParser::new()),
        }
    }
}

impl fmt::Display for ParserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParserKind::Kustomize => f.write_str("kustomize"),
            ParserKind::Manifest => f.write_str("manifest"),
        }
    }
}

impl FromStr for ParserKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kustomize" => Ok(ParserKind::Kustomize),
            "manifest" => Ok(ParserKind::Manifest),
            other => Err(format!(
                "unknown parser '{}' (expected kustomize or manifest)",
                other
            )),
        }
    }
}

/// Fails with a parse error unless `root` is an existing directory.
pub(crate) fn ensure_directory(root: &Path) -> Result<()> {
    if root.is_dir() {
        Ok(())
    } else {
        Err(GitOpsError::Parse {
            path: root.to_path_buf(),
            message: "not a directory".to_string(),
        })
    }
}

/// Splits a multi-document YAML stream into manifests.
///
/// Empty documents are dropped and `kind: List` documents are expanded into
/// their items. `source` is used for error reporting.
pub fn split_yaml_documents(text: &str, source: &Path) -> Result<Vec<Manifest>> {
    let mut manifests = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = Value::deserialize(document).map_err(|e| GitOpsError::Parse {
            path: source.to_path_buf(),
            message: e.to_string(),
        })?;
        push_document(value, source, &mut manifests)?;
    }
    Ok(manifests)
}

/// Appends one decoded document, expanding lists.
pub(crate) fn push_document(
    value: Value,
    source: &Path,
    manifests: &mut Vec<Manifest>,
) -> Result<()> {
    if value.is_null() {
        return Ok(());
    }

    if is_list(&value) {
        let items = match value.get("items") {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(_) => {
                return Err(GitOpsError::InvalidManifest {
                    path: source.to_path_buf(),
                    message: "List items is not a sequence".to_string(),
                })
            }
        };
        for item in items {
            push_document(item, source, manifests)?;
        }
        return Ok(());
    }

    manifests.push(Manifest::from_value(value, source)?);
    Ok(())
}

fn is_list(value: &Value) -> bool {
    value
        .get("kind")
        .and_then(Value::as_str)
        .is_some_and(|kind| {
            kind == "List" || (kind.ends_with("List") && value.get("items").is_some())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_split_drops_empty_documents() {
        let text = r#"---
apiVersion: v1
kind: ConfigMap
metadata:
  name: first
---
---
# only a comment
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: second
  namespace: ns
"#;
        let manifests = split_yaml_documents(text, &PathBuf::from("all.yaml")).unwrap();
        let names: Vec<_> = manifests.iter().map(|m| m.name().to_string()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn test_split_expands_lists() {
        let text = r#"
apiVersion: v1
kind: List
items:
  - apiVersion: v1
    kind: Service
    metadata:
      name: a
  - apiVersion: v1
    kind: Service
    metadata:
      name: b
"#;
        let manifests = split_yaml_documents(text, &PathBuf::from("list.yaml")).unwrap();
        assert_eq!(manifests.len(), 2);
        assert_eq!(manifests[1].name(), "b");
    }

    #[test]
    fn test_split_reports_source_on_syntax_error() {
        let err = split_yaml_documents("kind: [unclosed", &PathBuf::from("broken.yaml"))
            .unwrap_err();
        assert!(matches!(err, GitOpsError::Parse { .. }));
        assert!(err.to_string().contains("broken.yaml"));
    }

    #[test]
    fn test_parser_kind_from_str() {
        assert_eq!("manifest".parse::<ParserKind>().unwrap(), ParserKind::Manifest);
        assert_eq!("Kustomize".parse::<ParserKind>().unwrap(), ParserKind::Kustomize);
        assert!("helm".parse::<ParserKind>().is_err());
        assert_eq!(ParserKind::default().to_string(), "kustomize");
    }

    #[test]
    fn test_ensure_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(ensure_directory(dir.path()).is_ok());
        assert!(matches!(
            ensure_directory(&dir.path().join("missing")),
            Err(GitOpsError::Parse { .. })
        ));
    }
}
