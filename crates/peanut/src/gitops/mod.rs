//! Pull-based GitOps core.
//!
//! This module provides:
//! - Ownership signatures that keep pruning scoped to one repository path
//! - A git working copy tracker with pluggable manifest parsers
//! - The reconciliation loop and the trigger queue feeding it
//! - The engine boundary and a kubectl-backed engine

pub mod engine;
pub mod error;
pub mod git;
pub mod ownership;
pub mod parser;
pub mod reconciler;
pub mod resource;
pub mod source;
pub mod sync_scheduler;

pub use engine::{
    EngineError, KubeClient, KubectlEngine, ReconcileRequest, ReconciliationEngine,
    ResourceSyncResult, SyncOutcome,
};
pub use error::{GitOpsError, Result};
pub use git::types::*;
pub use git::RepositoryTracker;
pub use ownership::{OwnershipError, OwnershipSignature, OwnershipTagger, SignatureDigest};
pub use parser::{KustomizeParser, ManifestParser, ParserKind, PlainManifestParser};
pub use reconciler::{CycleError, LoopState, ReconcilerConfig, ReconciliationLoop};
pub use resource::{LiveResource, Manifest, ResourceIdentity, TaggedManifest, OWNERSHIP_ANNOTATION};
pub use source::ManifestSource;
pub use sync_scheduler::{
    Activation, Delivery, LoopEvent, Shutdown, ShutdownSignal, SyncScheduler, SyncTrigger,
    TriggerReceiver, TriggerSource,
};
