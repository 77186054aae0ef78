//! Plain manifest directory parser.

use std::path::Path;

use async_trait::async_trait;

use walkdir::{DirEntry, WalkDir};

use super::{ensure_directory, push_document, split_yaml_documents, ManifestParser};
use crate::gitops::error::{GitOpsError, Result};
use crate::gitops::resource::Manifest;

/// Reads every `.yaml`, `.yml` and `.json` file below the root.
///
/// Files are visited in sorted path order so repeated runs produce the same
/// manifest order. Hidden files and directories are skipped.
#[derive(Debug, Clone, Default)]
pub struct PlainManifestParser;

impl PlainManifestParser {
    pub fn new() -> Self {
        Self
    }

    fn parse_file(&self, path: &Path, manifests: &mut Vec<Manifest>) -> Result<()> {
        let content = std::fs::read_to_string(path).map_err(|e| GitOpsError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
            "json" => {
                let value: serde_json::Value =
                    serde_json::from_str(&content).map_err(|e| GitOpsError::Parse {
                        path: path.to_path_buf(),
                        message: e.to_string(),
                    })?;
                push_document(value, path, manifests)
            }
            _ => {
                manifests.extend(split_yaml_documents(&content, path)?);
                Ok(())
            }
        }
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

fn is_manifest_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml" | "json")
    )
}

#[async_trait]
impl ManifestParser for PlainManifestParser {
    fn name(&self) -> &'static str {
        "manifest"
    }

    async fn parse(&self, root: &Path) -> Result<Vec<Manifest>> {
        let parser = self.clone();
        let dir = root.to_path_buf();
        tokio::task::spawn_blocking(move || parser.parse_dir(&dir))
            .await
            .map_err(|e| GitOpsError::Parse {
                path: root.to_path_buf(),
                message: format!("parser task failed: {}", e),
            })?
    }
}

impl PlainManifestParser {
    /// Walks `root` on the calling thread.
    fn parse_dir(&self, root: &Path) -> Result<Vec<Manifest>> {
        ensure_directory(root)?;

        let mut manifests = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_hidden(e));

        for entry in walker {
            let entry = entry.map_err(|e| GitOpsError::Parse {
                path: e.path().unwrap_or(root).to_path_buf(),
                message: e.to_string(),
            })?;
            let path = entry.path();
            if !entry.file_type().is_file() || !is_manifest_file(path) {
                continue;
            }
            self.parse_file(path, &mut manifests)?;
        }

        log::debug!(
            "Parsed {} manifests from {}",
            manifests.len(),
            root.display()
        );
        Ok(manifests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn config_map(name: &str) -> String {
        format!("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {}\n", name)
    }

    #[tokio::test]
    async fn test_parse_walks_sorted_and_skips_hidden() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "b.yaml", &config_map("b"));
        write(dir.path(), "a.yml", &config_map("a"));
        write(dir.path(), "nested/c.yaml", &config_map("c"));
        write(dir.path(), ".hidden/d.yaml", &config_map("d"));
        write(dir.path(), ".e.yaml", &config_map("e"));
        write(dir.path(), "README.md", "# not a manifest");
        write(
            dir.path(),
            "z.json",
            r#"{"apiVersion":"v1","kind":"Secret","metadata":{"name":"z"}}"#,
        );

        let manifests = PlainManifestParser::new().parse(dir.path()).await.unwrap();
        let names: Vec<_> = manifests.iter().map(|m| m.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b", "c", "z"]);
    }

    #[tokio::test]
    async fn test_parse_missing_root_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("deploy");
        let err = PlainManifestParser::new().parse(&missing).await.unwrap_err();
        match err {
            GitOpsError::Parse { path, .. } => assert_eq!(path, missing),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_parse_invalid_document_names_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "svc.yaml", "apiVersion: v1\nkind: Service\n");
        let err = PlainManifestParser::new().parse(dir.path()).await.unwrap_err();
        assert!(matches!(err, GitOpsError::InvalidManifest { .. }));
        assert!(err.to_string().contains("svc.yaml"));
    }

    #[tokio::test]
    async fn test_parse_empty_directory() {
        let dir = TempDir::new().unwrap();
        assert!(PlainManifestParser::new().parse(dir.path()).await.unwrap().is_empty());
    }
}
