//! A reconciliation engine that drives the cluster through kubectl.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;

use super::{EngineError, ReconcileRequest, ReconciliationEngine, ResourceSyncResult, SyncOutcome};
use crate::gitops::git::parse::format_command_error;
use crate::gitops::resource::{
    group_from_api_version, LiveResource, Manifest, ResourceIdentity, TaggedManifest,
};

/// Handle to an authenticated cluster: the kubectl binary plus the
/// kubeconfig and context it should use.
#[derive(Debug, Clone)]
pub struct KubeClient {
    kubectl: String,
    kubeconfig: Option<PathBuf>,
    context: Option<String>,
}

impl Default for KubeClient {
    fn default() -> Self {
        Self::new("kubectl")
    }
}

impl KubeClient {
    pub fn new(kubectl: impl Into<String>) -> Self {
        Self {
            kubectl: kubectl.into(),
            kubeconfig: None,
            context: None,
        }
    }

    pub fn with_kubeconfig(mut self, kubeconfig: Option<PathBuf>) -> Self {
        self.kubeconfig = kubeconfig;
        self
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    /// Runs kubectl with `args`, optionally feeding `stdin`.
    pub async fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> std::io::Result<Output> {
        let mut cmd = Command::new(&self.kubectl);
        cmd.args(args);
        if let Some(kubeconfig) = &self.kubeconfig {
            cmd.arg("--kubeconfig").arg(kubeconfig);
        }
        if let Some(context) = &self.context {
            cmd.arg("--context").arg(context);
        }
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input).await?;
                // Closing stdin lets kubectl see EOF
                drop(pipe);
            }
        }
        child.wait_with_output().await
    }

    /// Returns the namespace of the current context, if one is set.
    pub async fn current_namespace(&self) -> Option<String> {
        let output = self
            .run(
                &["config", "view", "--minify", "-o", "jsonpath={..namespace}"],
                None,
            )
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let namespace = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!namespace.is_empty()).then_some(namespace)
    }
}

/// One listable, deletable resource type served by the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResource {
    /// Plural resource name, e.g. `deployments`.
    pub name: String,
    pub group: String,
    pub kind: String,
    pub namespaced: bool,
}

impl ApiResource {
    /// The `name.group` form kubectl accepts.
    pub fn type_name(&self) -> String {
        if self.group.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.name, self.group)
        }
    }
}

/// Parses `kubectl api-resources --no-headers` output.
///
/// The SHORTNAMES column may be empty, so columns are read from the right.
pub fn parse_api_resources(text: &str) -> Vec<ApiResource> {
    text.lines()
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            if columns.len() < 4 {
                return None;
            }
            let n = columns.len();
            let namespaced = match columns[n - 2] {
                "true" => true,
                "false" => false,
                _ => return None,
            };
            Some(ApiResource {
                name: columns[0].to_string(),
                group: group_from_api_version(columns[n - 3]).to_string(),
                kind: columns[n - 1].to_string(),
                namespaced,
            })
        })
        .collect()
}

/// Apply order rank: namespaces and CRDs before everything else.
fn apply_rank(kind: &str) -> u8 {
    match kind {
        "Namespace" => 0,
        "CustomResourceDefinition" => 1,
        _ => 2,
    }
}

/// Reconciles through `kubectl apply`, `get` and `delete`.
#[derive(Debug)]
pub struct KubectlEngine {
    client: KubeClient,
    api_resources: Mutex<Option<Arc<Vec<ApiResource>>>>,
    closed: AtomicBool,
}

impl KubectlEngine {
    pub fn new(client: KubeClient) -> Self {
        Self {
            client,
            api_resources: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Lists resource types, cached for the engine's lifetime.
    async fn api_resources(&self) -> Result<Arc<Vec<ApiResource>>, EngineError> {
        let mut cache = self.api_resources.lock().await;
        if let Some(resources) = cache.as_ref() {
            return Ok(Arc::clone(resources));
        }

        let output = self
            .client
            .run(&["api-resources", "--verbs=list,delete", "--no-headers"], None)
            .await
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        if !output.status.success() {
            return Err(EngineError::Discovery(format_command_error(&output)));
        }

        let resources = Arc::new(parse_api_resources(&String::from_utf8_lossy(
            &output.stdout,
        )));
        log::debug!("Discovered {} resource types", resources.len());
        *cache = Some(Arc::clone(&resources));
        Ok(resources)
    }

    /// Fetches every live resource of the given types.
    async fn live_resources(
        &self,
        types: &[&ApiResource],
        namespace: &str,
        namespaced: bool,
    ) -> Result<Vec<LiveResource>, EngineError> {
        if types.is_empty() {
            return Ok(Vec::new());
        }

        let type_list = types
            .iter()
            .map(|t| t.type_name())
            .collect::<Vec<_>>()
            .join(",");
        let mut args = vec!["get", type_list.as_str(), "-o", "json", "--ignore-not-found"];
        if namespaced {
            args.extend(["-n", namespace]);
        } else {
            args.push("--all-namespaces");
        }

        let output = self
            .client
            .run(&args, None)
            .await
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        if !output.status.success() {
            return Err(EngineError::Discovery(format_command_error(&output)));
        }
        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        let list: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| EngineError::Discovery(format!("invalid get output: {}", e)))?;
        let items = list
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let origin = Path::new("<cluster>");
        Ok(items
            .into_iter()
            .filter_map(|item| match Manifest::from_value(item, origin) {
                Ok(manifest) => Some(LiveResource::from_manifest(&manifest)),
                Err(e) => {
                    log::debug!("Skipping unreadable live object: {}", e);
                    None
                }
            })
            .collect())
    }

    /// Applies one target. `namespace` is the resolved namespace of a
    /// namespaced kind and `None` for cluster-scoped kinds.
    async fn apply(&self, target: &TaggedManifest, namespace: Option<&str>) -> (SyncOutcome, String) {
        let body = match serde_json::to_vec(target.manifest.as_value()) {
            Ok(body) => body,
            Err(e) => return (SyncOutcome::SyncFailed, e.to_string()),
        };

        let mut args = vec!["apply"];
        if let Some(namespace) = namespace {
            args.extend(["-n", namespace]);
        }
        args.extend(["-f", "-"]);

        match self.client.run(&args, Some(&body)).await {
            Ok(output) if output.status.success() => (
                SyncOutcome::Synced,
                String::from_utf8_lossy(&output.stdout).trim().to_string(),
            ),
            Ok(output) => (SyncOutcome::SyncFailed, format_command_error(&output)),
            Err(e) => (SyncOutcome::SyncFailed, e.to_string()),
        }
    }

    async fn delete(&self, id: &ResourceIdentity) -> (SyncOutcome, String) {
        let target = format!("{}/{}", id.kubectl_type(), id.name);
        let mut args = vec!["delete", target.as_str(), "--ignore-not-found", "--wait=false"];
        if !id.namespace.is_empty() {
            args.extend(["-n", id.namespace.as_str()]);
        }

        match self.client.run(&args, None).await {
            Ok(output) if output.status.success() => (SyncOutcome::Pruned, "pruned".to_string()),
            Ok(output) => (SyncOutcome::SyncFailed, format_command_error(&output)),
            Err(e) => (SyncOutcome::SyncFailed, e.to_string()),
        }
    }
}

#[async_trait]
impl ReconciliationEngine for KubectlEngine {
    async fn reconcile(
        &self,
        request: ReconcileRequest<'_>,
    ) -> Result<Vec<ResourceSyncResult>, EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Shutdown);
        }

        let resources = self.api_resources().await?;
        let scope: HashMap<(&str, &str), bool> = resources
            .iter()
            .map(|r| ((r.group.as_str(), r.kind.as_str()), r.namespaced))
            .collect();
        let is_namespaced = |id: &ResourceIdentity| {
            scope
                .get(&(id.group.as_str(), id.kind.as_str()))
                .copied()
                // Unknown kinds (e.g. CRs of a CRD applied this cycle) default to namespaced
                .unwrap_or(true)
        };

        let mut ordered: Vec<&TaggedManifest> = request.targets.iter().collect();
        ordered.sort_by_key(|t| apply_rank(&t.identity.kind));

        let mut results = Vec::with_capacity(ordered.len());
        let mut desired = HashSet::with_capacity(ordered.len());

        for target in ordered {
            let namespaced_kind = is_namespaced(&target.identity);
            let id = if namespaced_kind {
                target.identity.with_default_namespace(request.namespace)
            } else {
                let mut id = target.identity.clone();
                id.namespace.clear();
                id
            };
            desired.insert(id.clone());

            if request.namespaced {
                if !namespaced_kind {
                    results.push(ResourceSyncResult::new(
                        id,
                        SyncOutcome::SyncFailed,
                        "cluster-scoped resources cannot be managed in namespaced mode",
                    ));
                    continue;
                }
                if id.namespace != request.namespace {
                    let message = format!(
                        "namespace {} is outside the managed namespace {}",
                        id.namespace, request.namespace
                    );
                    results.push(ResourceSyncResult::new(id, SyncOutcome::SyncFailed, message));
                    continue;
                }
            }

            let apply_namespace = namespaced_kind.then_some(id.namespace.as_str());
            let (outcome, message) = self.apply(target, apply_namespace).await;
            if outcome == SyncOutcome::SyncFailed {
                log::warn!("Failed to apply {}: {}", id, message);
            }
            results.push(ResourceSyncResult::new(id, outcome, message));
        }

        let types: Vec<&ApiResource> = resources
            .iter()
            .filter(|r| !request.namespaced || r.namespaced)
            .collect();
        let live = self
            .live_resources(&types, request.namespace, request.namespaced)
            .await?;

        for resource in live {
            if resource.ownership.is_none() || desired.contains(&resource.identity) {
                continue;
            }
            if !(request.is_owned)(&resource) {
                log::debug!("Leaving foreign resource {} untouched", resource.identity);
                continue;
            }

            if request.prune {
                let (outcome, message) = self.delete(&resource.identity).await;
                if outcome == SyncOutcome::Pruned {
                    log::info!("Pruned {}", resource.identity);
                } else {
                    log::warn!("Failed to prune {}: {}", resource.identity, message);
                }
                results.push(ResourceSyncResult::new(resource.identity, outcome, message));
            } else {
                results.push(ResourceSyncResult::new(
                    resource.identity,
                    SyncOutcome::PruneSkipped,
                    "ignored (requires pruning)",
                ));
            }
        }

        log::debug!(
            "Reconciled revision {} with {} results",
            request.revision,
            results.len()
        );
        Ok(results)
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.api_resources.lock().await.take();
        log::info!("Kubectl engine stopped");
    }
}
