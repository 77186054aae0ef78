//! Ownership signatures.
//!
//! Every manifest applied by the agent is annotated with a signature derived
//! from the repository URL, the path within the repository and the resource's
//! group/kind/name. A live resource is only considered owned (and therefore a
//! prune candidate) when its annotation matches the recomputed signature, so
//! two agents pointed at different paths of the same repository never prune
//! each other's resources.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::git::types::RepositoryRef;
use super::resource::{Manifest, ResourceIdentity, TaggedManifest, OWNERSHIP_ANNOTATION};

/// Errors from signature computation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OwnershipError {
    #[error("Signature digest failed: {0}")]
    Digest(String),
}

/// A fixed-length opaque ownership tag, e.g. `sha256.<base64url>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnershipSignature(String);

impl OwnershipSignature {
    /// Wraps a value read back from a live resource annotation.
    pub fn from_annotation(value: &str) -> Self {
        Self(value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnershipSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Digest primitive used to derive signatures.
pub trait SignatureDigest: Send + Sync {
    /// Short algorithm tag used as the signature prefix.
    fn algorithm(&self) -> &'static str;

    /// Digests the given byte chunks in order.
    fn digest(&self, chunks: &[&[u8]]) -> Result<Vec<u8>, OwnershipError>;
}

/// SHA-256 digest.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Digest;

impl SignatureDigest for Sha256Digest {
    fn algorithm(&self) -> &'static str {
        "sha256"
    }

    fn digest(&self, chunks: &[&[u8]]) -> Result<Vec<u8>, OwnershipError> {
        let mut hasher = Sha256::new();
        for chunk in chunks {
            hasher.update(chunk);
        }
        Ok(hasher.finalize().to_vec())
    }
}

/// Computes and checks ownership signatures for one repository scope.
pub struct OwnershipTagger {
    scope: String,
    digest: Box<dyn SignatureDigest>,
}

impl fmt::Debug for OwnershipTagger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnershipTagger")
            .field("scope", &self.scope)
            .field("algorithm", &self.digest.algorithm())
            .finish()
    }
}

impl OwnershipTagger {
    /// Creates a SHA-256 tagger for the given repository.
    pub fn new(repo: &RepositoryRef) -> Self {
        Self::with_digest(repo, Box::new(Sha256Digest))
    }

    /// Creates a tagger with a custom digest primitive.
    pub fn with_digest(repo: &RepositoryRef, digest: Box<dyn SignatureDigest>) -> Self {
        Self {
            scope: format!("{}/{}", repo.url, repo.path),
            digest,
        }
    }

    /// Computes the signature for a resource identity.
    ///
    /// The namespace is not part of the input: a resource moved between
    /// namespaces by a default-namespace change keeps its signature.
    pub fn tag(&self, id: &ResourceIdentity) -> Result<OwnershipSignature, OwnershipError> {
        let key = [id.group.as_str(), id.kind.as_str(), id.name.as_str()].join("/");
        let digest = self
            .digest
            .digest(&[self.scope.as_bytes(), key.as_bytes()])?;
        Ok(OwnershipSignature(format!(
            "{}.{}",
            self.digest.algorithm(),
            URL_SAFE_NO_PAD.encode(digest)
        )))
    }

    /// Annotates a manifest with its signature.
    pub fn tag_manifest(&self, mut manifest: Manifest) -> Result<TaggedManifest, OwnershipError> {
        let identity = manifest.identity();
        let signature = self.tag(&identity)?;
        manifest.set_annotation(OWNERSHIP_ANNOTATION, signature.as_str());
        Ok(TaggedManifest {
            identity,
            signature,
            manifest,
        })
    }

    /// Returns true only when `signature` is present and matches the
    /// recomputed signature for `id`. Any digest failure means not owned.
    pub fn is_owned(&self, signature: Option<&OwnershipSignature>, id: &ResourceIdentity) -> bool {
        let Some(signature) = signature else {
            return false;
        };
        match self.tag(id) {
            Ok(expected) => &expected == signature,
            Err(e) => {
                log::warn!("Treating {} as not owned: {}", id, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn repo(url: &str, path: &str) -> RepositoryRef {
        RepositoryRef::new(url, "main", path)
    }

    fn taxi() -> ResourceIdentity {
        ResourceIdentity::new("apps", "Deployment", "ns", "taxi")
    }

    struct FailingDigest;

    impl SignatureDigest for FailingDigest {
        fn algorithm(&self) -> &'static str {
            "broken"
        }

        fn digest(&self, _chunks: &[&[u8]]) -> Result<Vec<u8>, OwnershipError> {
            Err(OwnershipError::Digest("forced failure".to_string()))
        }
    }

    #[test]
    fn test_tag_is_deterministic_and_path_scoped() {
        let deploy = OwnershipTagger::new(&repo("https://x/y.git", "deploy"));
        let first = deploy.tag(&taxi()).unwrap();
        let second = deploy.tag(&taxi()).unwrap();
        assert_eq!(first, second);

        let other = OwnershipTagger::new(&repo("https://x/y.git", "other"));
        assert_ne!(first, other.tag(&taxi()).unwrap());
    }

    #[test]
    fn test_tag_format() {
        let tagger = OwnershipTagger::new(&repo("https://x/y.git", "deploy"));
        let sig = tagger.tag(&taxi()).unwrap();
        let encoded = sig.as_str().strip_prefix("sha256.").unwrap();
        // 32 bytes in unpadded base64
        assert_eq!(encoded.len(), 43);
        assert!(encoded
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_tag_ignores_namespace() {
        let tagger = OwnershipTagger::new(&repo("https://x/y.git", "deploy"));
        let mut moved = taxi();
        moved.namespace = "elsewhere".to_string();
        assert_eq!(tagger.tag(&taxi()).unwrap(), tagger.tag(&moved).unwrap());
    }

    #[test]
    fn test_is_owned() {
        let tagger = OwnershipTagger::new(&repo("https://x/y.git", "deploy"));
        let sig = tagger.tag(&taxi()).unwrap();
        assert!(tagger.is_owned(Some(&sig), &taxi()));
        assert!(!tagger.is_owned(None, &taxi()));

        let foreign = OwnershipTagger::new(&repo("https://x/y.git", "other"))
            .tag(&taxi())
            .unwrap();
        assert!(!tagger.is_owned(Some(&foreign), &taxi()));
    }

    #[test]
    fn test_digest_failure_is_never_owned() {
        let tagger =
            OwnershipTagger::with_digest(&repo("https://x/y.git", "deploy"), Box::new(FailingDigest));
        assert!(tagger.tag(&taxi()).is_err());

        let sig = OwnershipTagger::new(&repo("https://x/y.git", "deploy"))
            .tag(&taxi())
            .unwrap();
        assert!(!tagger.is_owned(Some(&sig), &taxi()));
    }

    #[test]
    fn test_tag_manifest_sets_annotation() {
        let tagger = OwnershipTagger::new(&repo("https://x/y.git", "deploy"));
        let manifest = Manifest::from_value(
            json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": {"name": "taxi", "namespace": "ns", "annotations": {"team": "a"}},
            }),
            &PathBuf::from("deploy/taxi.yaml"),
        )
        .unwrap();

        let tagged = tagger.tag_manifest(manifest).unwrap();
        assert_eq!(tagged.identity, taxi());
        assert_eq!(
            tagged.manifest.annotation(OWNERSHIP_ANNOTATION),
            Some(tagged.signature.as_str())
        );
        assert_eq!(tagged.manifest.annotation("team"), Some("a"));
    }
}
