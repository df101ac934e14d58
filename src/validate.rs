//! Precondition validation
//!
//! An ordered chain of read-only checks against the target project, cluster,
//! node pools, and existing control-plane state. The first failing check
//! aborts the whole run; there is no partial-result aggregation. In
//! validate-only mode the chain runs to completion and the pipeline exits
//! without mutating anything.

use std::collections::HashSet;

use serde::Deserialize;
use tracing::info;

use crate::config::{Mode, RunConfig};
use crate::error::{Error, Result};
use crate::exec::Executor;
use crate::ops::{Op, CONTROL_PLANE_DEPLOYMENT, REQUIRED_APIS, SYSTEM_NAMESPACE};
use crate::release::{ReleaseDescriptor, MANAGED_MARKER};
use crate::workspace::Workspace;

/// Pools with smaller machines don't count toward control-plane capacity
const MIN_MACHINE_VCPUS: u64 = 4;
/// Minimum aggregate vCPUs across eligible pools
const MIN_TOTAL_VCPUS: u64 = 8;

// ---------------------------------------------------------------------------
// Wire types for `--format json` / `-o json` output
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectDescription {
    project_number: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NodePool {
    pub(crate) name: String,
    pub(crate) config: NodePoolConfig,
    #[serde(default)]
    pub(crate) autoscaling: Option<Autoscaling>,
    #[serde(default)]
    pub(crate) initial_node_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NodePoolConfig {
    pub(crate) machine_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Autoscaling {
    #[serde(default)]
    pub(crate) enabled: bool,
    #[serde(default)]
    pub(crate) max_node_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MachineType {
    guest_cpus: u64,
}

#[derive(Debug, Deserialize)]
struct ObjectList {
    items: Vec<NamespacedObject>,
}

#[derive(Debug, Deserialize)]
struct NamespacedObject {
    metadata: ObjectMeta,
}

#[derive(Debug, Deserialize)]
struct ObjectMeta {
    name: String,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MeshVersionReport {
    #[serde(default, rename = "meshVersion")]
    mesh_version: Vec<MeshComponent>,
}

#[derive(Debug, Deserialize)]
struct MeshComponent {
    #[serde(rename = "Info")]
    info: ComponentInfo,
}

#[derive(Debug, Deserialize)]
struct ComponentInfo {
    version: String,
}

#[derive(Debug, Deserialize)]
struct EnabledService {
    config: ServiceConfig,
}

#[derive(Debug, Deserialize)]
struct ServiceConfig {
    name: String,
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// Runs the ordered precondition checks
pub struct Validator<'a> {
    config: &'a RunConfig,
    executor: &'a Executor,
    workspace: &'a Workspace,
    release: &'a ReleaseDescriptor,
}

impl<'a> Validator<'a> {
    pub fn new(
        config: &'a RunConfig,
        executor: &'a Executor,
        workspace: &'a Workspace,
        release: &'a ReleaseDescriptor,
    ) -> Self {
        Self {
            config,
            executor,
            workspace,
            release,
        }
    }

    /// Run all checks in order. Returns the numeric project number needed by
    /// later labeling (`None` when nothing was queried, i.e. dry-run).
    pub async fn run(&self) -> Result<Option<u64>> {
        info!("Validating project {}...", self.config.project_id);
        let project_number = self.check_project().await?;

        info!("Validating cluster {}...", self.config.cluster_name);
        self.check_cluster().await?;
        self.fetch_cluster_credentials().await?;

        info!("Validating node pool capacity...");
        self.check_node_pool_capacity().await?;

        info!("Validating existing control-plane state...");
        self.check_control_plane_state().await?;

        if self.config.mode == Mode::Migrate {
            info!("Validating control-plane version compatibility...");
            self.check_version_compatibility().await?;
        }

        self.check_required_apis().await?;

        info!("All preconditions satisfied");
        Ok(project_number)
    }

    /// Checks 1 and 2: the project resolves, and it has a numeric number.
    async fn check_project(&self) -> Result<Option<u64>> {
        let op = Op::DescribeProject {
            project: self.config.project_id.clone(),
        };
        let Some(output) = self.executor.capture(&op).await? else {
            return Ok(None);
        };
        if !output.status_ok {
            return Err(Error::ResourceNotFound {
                kind: "project",
                name: self.config.project_id.clone(),
                remediation: "gcloud projects list".to_string(),
            });
        }

        let description: ProjectDescription = serde_json::from_str(&output.stdout)?;
        let number = description.project_number.parse::<u64>().map_err(|_| {
            Error::external(
                op.summary(),
                format!(
                    "could not resolve a numeric project number from '{}'",
                    description.project_number
                ),
            )
        })?;
        Ok(Some(number))
    }

    /// Check 3: the cluster exists at (name, location) within the project.
    async fn check_cluster(&self) -> Result<()> {
        let op = Op::DescribeCluster {
            project: self.config.project_id.clone(),
            location: self.config.cluster_location.clone(),
            cluster: self.config.cluster_name.clone(),
        };
        let Some(output) = self.executor.capture(&op).await? else {
            return Ok(());
        };
        if !output.status_ok {
            return Err(Error::ResourceNotFound {
                kind: "cluster",
                name: format!(
                    "{}/{}",
                    self.config.cluster_location, self.config.cluster_name
                ),
                remediation: format!(
                    "gcloud container clusters list --project={}",
                    self.config.project_id
                ),
            });
        }
        Ok(())
    }

    /// Prime the run-scoped kubeconfig so every later cluster-control command
    /// talks to the validated cluster.
    async fn fetch_cluster_credentials(&self) -> Result<()> {
        self.executor
            .retry(
                2,
                &Op::GetClusterCredentials {
                    project: self.config.project_id.clone(),
                    location: self.config.cluster_location.clone(),
                    cluster: self.config.cluster_name.clone(),
                    kubeconfig: self.workspace.kubeconfig_path(),
                },
            )
            .await?;
        Ok(())
    }

    /// Check 4: aggregate capacity over eligible pools.
    async fn check_node_pool_capacity(&self) -> Result<()> {
        let Some(output) = self
            .executor
            .capture(&Op::ListNodePools {
                project: self.config.project_id.clone(),
                location: self.config.cluster_location.clone(),
                cluster: self.config.cluster_name.clone(),
            })
            .await?
        else {
            return Ok(());
        };
        if !output.status_ok {
            return Err(Error::external("node pool listing", output.stderr.trim()));
        }

        let pools: Vec<NodePool> = serde_json::from_str(&output.stdout)?;
        let mut sized_pools = Vec::with_capacity(pools.len());
        for pool in pools {
            let vcpus = self.machine_vcpus(&pool.config.machine_type).await?;
            sized_pools.push((pool, vcpus));
        }

        let total = total_eligible_vcpus(&sized_pools);
        if total < MIN_TOTAL_VCPUS {
            return Err(Error::insufficient(format!(
                "eligible node pools provide {} vCPUs, need at least {} \
                 (pools with machines under {} vCPUs are not counted)",
                total, MIN_TOTAL_VCPUS, MIN_MACHINE_VCPUS
            )));
        }
        Ok(())
    }

    async fn machine_vcpus(&self, machine_type: &str) -> Result<u64> {
        let op = Op::DescribeMachineType {
            project: self.config.project_id.clone(),
            location: self.config.cluster_location.clone(),
            machine_type: machine_type.to_string(),
        };
        let Some(output) = self.executor.capture(&op).await? else {
            return Ok(0);
        };
        if !output.status_ok {
            return Err(Error::external(op.summary(), output.stderr.trim()));
        }
        let machine: MachineType = serde_json::from_str(&output.stdout)?;
        Ok(machine.guest_cpus)
    }

    /// Checks 5 and 6: namespace discipline, then the mode-specific state.
    async fn check_control_plane_state(&self) -> Result<()> {
        let Some(output) = self
            .executor
            .capture(&Op::ListDeployments {
                kubeconfig: self.workspace.kubeconfig_path(),
            })
            .await?
        else {
            return Ok(());
        };
        if !output.status_ok {
            return Err(Error::external("deployment listing", output.stderr.trim()));
        }

        let deployments: ObjectList = serde_json::from_str(&output.stdout)?;
        let names: Vec<(String, String)> = deployments
            .items
            .into_iter()
            .map(|d| {
                (
                    d.metadata.namespace.unwrap_or_default(),
                    d.metadata.name,
                )
            })
            .collect();

        let (total, in_system) = control_plane_counts(&names);
        check_namespace_discipline(total, in_system)?;
        check_mode_state(self.config.mode, in_system)
    }

    /// Check 7 (migrate only): the existing control plane must not already be
    /// managed, and at least one reported version must match the target line.
    async fn check_version_compatibility(&self) -> Result<()> {
        let istioctl = self
            .workspace
            .root()
            .join(self.release.install_dir())
            .join("bin")
            .join("istioctl");
        let Some(output) = self
            .executor
            .capture(&Op::MeshVersion {
                istioctl,
                kubeconfig: self.workspace.kubeconfig_path(),
            })
            .await?
        else {
            return Ok(());
        };
        if !output.status_ok {
            return Err(Error::external(
                "control-plane version query",
                output.stderr.trim(),
            ));
        }

        let report: MeshVersionReport = serde_json::from_str(&output.stdout)?;
        let versions: Vec<String> = report
            .mesh_version
            .into_iter()
            .map(|c| c.info.version)
            .collect();
        check_version_line(&versions, &self.release.release_line)
    }

    /// Check 8: required APIs already enabled, reported all at once.
    ///
    /// Skipped when the operator permitted auto-enable — except in
    /// validate-only mode, which must report the complete picture since the
    /// enabling step will never run.
    async fn check_required_apis(&self) -> Result<()> {
        if self.config.enable_apis && !self.config.only_validate {
            info!("API enablement permitted, skipping enablement check");
            return Ok(());
        }

        info!("Validating required APIs...");
        let Some(output) = self
            .executor
            .capture(&Op::ListEnabledServices {
                project: self.config.project_id.clone(),
            })
            .await?
        else {
            return Ok(());
        };
        if !output.status_ok {
            return Err(Error::external("service listing", output.stderr.trim()));
        }

        let services: Vec<EnabledService> = serde_json::from_str(&output.stdout)?;
        let enabled: HashSet<String> = services.into_iter().map(|s| s.config.name).collect();
        let missing: Vec<String> = REQUIRED_APIS
            .iter()
            .filter(|api| !enabled.contains(**api))
            .map(|api| api.to_string())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            let remediation = format!(
                "gcloud services enable {} --project={}",
                missing.join(" "),
                self.config.project_id
            );
            Err(Error::ApisNotEnabled {
                apis: missing,
                remediation,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Pure check logic
// ---------------------------------------------------------------------------

/// Effective node count: the autoscaling maximum when autoscaling is enabled,
/// otherwise the current count.
pub(crate) fn effective_node_count(pool: &NodePool) -> u64 {
    match &pool.autoscaling {
        Some(autoscaling) if autoscaling.enabled => autoscaling.max_node_count,
        _ => pool.initial_node_count,
    }
}

/// Σ(effective_count × vCPUs) over pools whose machines have at least
/// [`MIN_MACHINE_VCPUS`] vCPUs. An aggregate check, not per-pool.
pub(crate) fn total_eligible_vcpus(pools: &[(NodePool, u64)]) -> u64 {
    pools
        .iter()
        .filter(|(_, vcpus)| *vcpus >= MIN_MACHINE_VCPUS)
        .map(|(pool, vcpus)| effective_node_count(pool) * vcpus)
        .sum()
}

/// Count control-plane deployments: (all namespaces, designated namespace).
pub(crate) fn control_plane_counts(deployments: &[(String, String)]) -> (usize, usize) {
    let control_plane: Vec<_> = deployments
        .iter()
        .filter(|(_, name)| name.starts_with(CONTROL_PLANE_DEPLOYMENT))
        .collect();
    let in_system = control_plane
        .iter()
        .filter(|(namespace, _)| namespace == SYSTEM_NAMESPACE)
        .count();
    (control_plane.len(), in_system)
}

/// Every control-plane deployment must live in the designated namespace.
pub(crate) fn check_namespace_discipline(total: usize, in_system: usize) -> Result<()> {
    if total != in_system {
        return Err(Error::topology(format!(
            "found {} control-plane deployment(s) but only {} in namespace {}; \
             control planes outside {} are unsupported",
            total, in_system, SYSTEM_NAMESPACE, SYSTEM_NAMESPACE
        )));
    }
    Ok(())
}

/// Install requires a pristine cluster; migrate requires something to migrate.
pub(crate) fn check_mode_state(mode: Mode, existing: usize) -> Result<()> {
    match mode {
        Mode::Install if existing != 0 => Err(Error::topology(format!(
            "found {} existing control-plane deployment(s) in {}; \
             use --mode migrate for clusters with an existing control plane",
            existing, SYSTEM_NAMESPACE
        ))),
        Mode::Migrate if existing == 0 => Err(Error::topology(format!(
            "no existing control-plane deployment in {}; \
             use --mode install for clusters without a control plane",
            SYSTEM_NAMESPACE
        ))),
        _ => Ok(()),
    }
}

/// A version already carrying the managed-distribution marker can never be
/// re-migrated; otherwise at least one reported version must sit on the
/// target release line (major.minor prefix match).
pub(crate) fn check_version_line(versions: &[String], release_line: &str) -> Result<()> {
    if let Some(managed) = versions.iter().find(|v| v.contains(MANAGED_MARKER)) {
        return Err(Error::version_incompatible(format!(
            "control plane reports version {} which is already the managed distribution",
            managed
        )));
    }
    if versions.iter().any(|v| v.starts_with(release_line)) {
        Ok(())
    } else {
        Err(Error::version_incompatible(format!(
            "no control-plane version matches release line {} (found: {})",
            release_line,
            versions.join(", ")
        )))
    }
}
