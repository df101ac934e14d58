//! Cluster preparation
//!
//! Idempotent cluster-level mutations: labels, workload identity, telemetry,
//! the cluster-admin binding for the acting identity, and the designated
//! system namespace. Label application always merges with what is already on
//! the cluster.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::exec::Executor;
use crate::ops::{Op, SYSTEM_NAMESPACE};
use crate::project::acting_identity;
use crate::release::ReleaseDescriptor;
use crate::workspace::Workspace;

/// Name of the cluster-admin binding applied for the acting identity
const ADMIN_BINDING_NAME: &str = "meshctl-cluster-admin-binding";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterDescription {
    #[serde(default)]
    resource_labels: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct NamespaceList {
    items: Vec<NamespaceItem>,
}

#[derive(Debug, Deserialize)]
struct NamespaceItem {
    metadata: NamespaceMeta,
}

#[derive(Debug, Deserialize)]
struct NamespaceMeta {
    name: String,
}

/// Prepares the target cluster
pub struct ClusterPreparer<'a> {
    config: &'a RunConfig,
    executor: &'a Executor,
    workspace: &'a Workspace,
    release: &'a ReleaseDescriptor,
    project_number: u64,
}

impl<'a> ClusterPreparer<'a> {
    pub fn new(
        config: &'a RunConfig,
        executor: &'a Executor,
        workspace: &'a Workspace,
        release: &'a ReleaseDescriptor,
        project_number: u64,
    ) -> Self {
        Self {
            config,
            executor,
            workspace,
            release,
            project_number,
        }
    }

    pub async fn run(&self) -> Result<()> {
        self.label_cluster().await?;
        self.enable_workload_identity().await?;
        self.enable_telemetry().await?;
        self.grant_cluster_admin().await?;
        self.ensure_system_namespace().await?;
        Ok(())
    }

    /// Merge the mesh-identity and installer-version labels into the
    /// cluster's existing labels and apply the full set. Pre-existing labels
    /// must survive.
    async fn label_cluster(&self) -> Result<()> {
        info!("Labeling cluster...");
        let existing = match self
            .executor
            .capture(&Op::DescribeCluster {
                project: self.config.project_id.clone(),
                location: self.config.cluster_location.clone(),
                cluster: self.config.cluster_name.clone(),
            })
            .await?
        {
            Some(output) if output.status_ok => {
                let description: ClusterDescription = serde_json::from_str(&output.stdout)?;
                description.resource_labels
            }
            Some(output) => {
                return Err(Error::external("cluster describe", output.stderr.trim()))
            }
            None => BTreeMap::new(), // dry-run
        };

        let labels = merged_labels(&existing, self.project_number, &self.release.label_value);
        self.executor
            .retry(
                3,
                &Op::UpdateClusterLabels {
                    project: self.config.project_id.clone(),
                    location: self.config.cluster_location.clone(),
                    cluster: self.config.cluster_name.clone(),
                    labels: render_labels(&labels),
                },
            )
            .await?;
        Ok(())
    }

    async fn enable_workload_identity(&self) -> Result<()> {
        info!("Enabling workload identity...");
        self.executor
            .retry(
                3,
                &Op::EnableWorkloadIdentity {
                    project: self.config.project_id.clone(),
                    location: self.config.cluster_location.clone(),
                    cluster: self.config.cluster_name.clone(),
                },
            )
            .await?;
        Ok(())
    }

    async fn enable_telemetry(&self) -> Result<()> {
        info!("Enabling telemetry integration...");
        self.executor
            .retry(
                3,
                &Op::EnableTelemetry {
                    project: self.config.project_id.clone(),
                    location: self.config.cluster_location.clone(),
                    cluster: self.config.cluster_name.clone(),
                },
            )
            .await?;
        Ok(())
    }

    /// Generate the cluster-admin binding manifest locally and apply it.
    /// Generation cannot fail on a missing binding; apply is idempotent.
    async fn grant_cluster_admin(&self) -> Result<()> {
        let identity = acting_identity(self.config, self.executor).await?;
        info!("Granting cluster-admin to {}...", identity.account);
        let manifest = cluster_admin_binding(&identity.account)?;
        self.executor
            .execute_ok(&Op::ApplyManifest {
                kubeconfig: self.workspace.kubeconfig_path(),
                manifest,
            })
            .await?;
        Ok(())
    }

    /// Create the designated namespace only when a listing shows no match.
    async fn ensure_system_namespace(&self) -> Result<()> {
        let Some(output) = self
            .executor
            .capture(&Op::ListNamespaces {
                kubeconfig: self.workspace.kubeconfig_path(),
            })
            .await?
        else {
            return Ok(());
        };
        if !output.status_ok {
            return Err(Error::external("namespace listing", output.stderr.trim()));
        }

        let namespaces: NamespaceList = serde_json::from_str(&output.stdout)?;
        let matches = namespaces
            .items
            .iter()
            .filter(|ns| ns.metadata.name == SYSTEM_NAMESPACE)
            .count();
        if matches > 0 {
            info!("Namespace {} already exists", SYSTEM_NAMESPACE);
            return Ok(());
        }

        info!("Creating namespace {}...", SYSTEM_NAMESPACE);
        self.executor
            .execute_ok(&Op::CreateNamespace {
                kubeconfig: self.workspace.kubeconfig_path(),
                namespace: SYSTEM_NAMESPACE.to_string(),
            })
            .await?;
        Ok(())
    }
}

/// Existing labels plus the mesh-identity and installer-version labels.
fn merged_labels(
    existing: &BTreeMap<String, String>,
    project_number: u64,
    label_value: &str,
) -> BTreeMap<String, String> {
    let mut labels = existing.clone();
    labels.insert("mesh_id".to_string(), format!("proj-{}", project_number));
    labels.insert("asmv".to_string(), label_value.to_string());
    labels
}

/// Render labels as the comma-separated `key=value` list the cluster update
/// expects. BTreeMap keeps the order deterministic.
fn render_labels(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(",")
}

/// ClusterRoleBinding manifest granting cluster-admin to the given account.
fn cluster_admin_binding(account: &str) -> Result<String> {
    let binding = json!({
        "apiVersion": "rbac.authorization.k8s.io/v1",
        "kind": "ClusterRoleBinding",
        "metadata": {
            "name": ADMIN_BINDING_NAME,
        },
        "subjects": [{
            "kind": "User",
            "name": account,
            "apiGroup": "rbac.authorization.k8s.io",
        }],
        "roleRef": {
            "kind": "ClusterRole",
            "name": "cluster-admin",
            "apiGroup": "rbac.authorization.k8s.io",
        },
    });
    Ok(serde_yaml::to_string(&binding)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::testing::test_config;
    use crate::exec::testing::ScriptedRunner;
    use crate::exec::CommandOutput;
    use std::sync::Arc;

    #[test]
    fn test_merged_labels_preserve_existing() {
        let mut existing = BTreeMap::new();
        existing.insert("env".to_string(), "prod".to_string());
        existing.insert("team".to_string(), "platform".to_string());

        let labels = merged_labels(&existing, 123456, "1-7-3-asm-6");
        assert_eq!(labels.get("env").map(String::as_str), Some("prod"));
        assert_eq!(labels.get("team").map(String::as_str), Some("platform"));
        assert_eq!(labels.get("mesh_id").map(String::as_str), Some("proj-123456"));
        assert_eq!(labels.get("asmv").map(String::as_str), Some("1-7-3-asm-6"));
    }

    #[test]
    fn test_merged_labels_overwrite_stale_mesh_labels() {
        let mut existing = BTreeMap::new();
        existing.insert("asmv".to_string(), "1-6-11-asm-1".to_string());

        let labels = merged_labels(&existing, 9, "1-7-3-asm-6");
        assert_eq!(labels.get("asmv").map(String::as_str), Some("1-7-3-asm-6"));
    }

    #[test]
    fn test_render_labels_deterministic() {
        let mut labels = BTreeMap::new();
        labels.insert("b".to_string(), "2".to_string());
        labels.insert("a".to_string(), "1".to_string());
        assert_eq!(render_labels(&labels), "a=1,b=2");
    }

    #[test]
    fn test_cluster_admin_binding_manifest() {
        let manifest = cluster_admin_binding("alice@example.com").unwrap();
        assert!(manifest.contains("kind: ClusterRoleBinding"));
        assert!(manifest.contains("name: alice@example.com"));
        assert!(manifest.contains("name: cluster-admin"));
    }

    fn preparer_runner() -> ScriptedRunner {
        ScriptedRunner::new()
            .respond("config get-value", CommandOutput::ok("alice@example.com"))
            .respond(
                "clusters describe",
                CommandOutput::ok(r#"{"resourceLabels": {"env": "prod"}}"#),
            )
            .respond(
                "get namespaces",
                CommandOutput::ok(r#"{"items": [{"metadata": {"name": "default"}}]}"#),
            )
    }

    #[tokio::test]
    async fn test_label_update_preserves_existing_labels() {
        let runner = Arc::new(preparer_runner());
        let executor = Executor::new(runner.clone(), false, false);
        let config = test_config();
        let release = ReleaseDescriptor::current();
        let workspace = Workspace::acquire(None).unwrap();

        ClusterPreparer::new(&config, &executor, &workspace, &release, 123456)
            .run()
            .await
            .unwrap();

        let update = runner
            .commands()
            .into_iter()
            .find(|c| c.contains("--update-labels"))
            .expect("label update command");
        assert!(update.contains("env=prod"));
        assert!(update.contains("mesh_id=proj-123456"));
        assert!(update.contains("asmv=1-7-3-asm-6"));
        workspace.release();
    }

    #[tokio::test]
    async fn test_namespace_created_when_absent() {
        let runner = Arc::new(preparer_runner());
        let executor = Executor::new(runner.clone(), false, false);
        let config = test_config();
        let release = ReleaseDescriptor::current();
        let workspace = Workspace::acquire(None).unwrap();

        ClusterPreparer::new(&config, &executor, &workspace, &release, 1)
            .run()
            .await
            .unwrap();
        assert_eq!(runner.count_matching("create namespace istio-system"), 1);
        workspace.release();
    }

    #[tokio::test]
    async fn test_namespace_not_recreated_when_present() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .respond("config get-value", CommandOutput::ok("alice@example.com"))
                .respond(
                    "clusters describe",
                    CommandOutput::ok(r#"{"resourceLabels": {}}"#),
                )
                .respond(
                    "get namespaces",
                    CommandOutput::ok(
                        r#"{"items": [{"metadata": {"name": "istio-system"}}]}"#,
                    ),
                ),
        );
        let executor = Executor::new(runner.clone(), false, false);
        let config = test_config();
        let release = ReleaseDescriptor::current();
        let workspace = Workspace::acquire(None).unwrap();

        ClusterPreparer::new(&config, &executor, &workspace, &release, 1)
            .run()
            .await
            .unwrap();
        assert_eq!(runner.count_matching("create namespace"), 0);
        workspace.release();
    }

    #[tokio::test]
    async fn test_cluster_feature_updates_issued() {
        let runner = Arc::new(preparer_runner());
        let executor = Executor::new(runner.clone(), false, false);
        let config = test_config();
        let release = ReleaseDescriptor::current();
        let workspace = Workspace::acquire(None).unwrap();

        ClusterPreparer::new(&config, &executor, &workspace, &release, 1)
            .run()
            .await
            .unwrap();
        assert_eq!(runner.count_matching("--workload-pool=my-proj.svc.id.goog"), 1);
        assert_eq!(runner.count_matching("--enable-stackdriver-kubernetes"), 1);
        assert_eq!(runner.count_matching("apply -f -"), 1);
        workspace.release();
    }
}
