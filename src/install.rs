//! Control-plane installation
//!
//! Configures the fetched package with the run's project and cluster
//! coordinates, installs the revisioned control plane, and optionally deploys
//! the canonical service controller. Finishes with an operator-facing
//! summary of what was installed and where the artifacts live.

use std::path::PathBuf;

use tracing::info;

use crate::config::{Mode, RunConfig};
use crate::error::Result;
use crate::exec::Executor;
use crate::ops::{
    Op, CONTROLLER_DEPLOYMENT, CONTROLLER_NAMESPACE, CONTROLLER_WAIT_SECS,
};
use crate::release::{ReleaseDescriptor, PACKAGE_DIR};
use crate::workspace::Workspace;

/// Attempts for the control-plane install itself
const INSTALL_ATTEMPTS: u32 = 5;

/// Installs the control plane from the workspace artifacts
pub struct Installer<'a> {
    config: &'a RunConfig,
    executor: &'a Executor,
    workspace: &'a Workspace,
    release: &'a ReleaseDescriptor,
    project_number: u64,
}

impl<'a> Installer<'a> {
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
        self.configure_package().await?;
        self.install_control_plane().await?;
        if !self.config.skip_canonical_controller {
            self.install_canonical_controller().await?;
        }
        self.print_summary();
        Ok(())
    }

    fn package_dir(&self) -> PathBuf {
        self.workspace.root().join(PACKAGE_DIR)
    }

    fn istioctl(&self) -> PathBuf {
        self.workspace
            .root()
            .join(self.release.install_dir())
            .join("bin")
            .join("istioctl")
    }

    /// Write the run's coordinates into the configuration package setters.
    async fn configure_package(&self) -> Result<()> {
        info!("Configuring package for {}...", self.config.cluster_name);
        let mut setters = vec![
            ("gcloud.container.cluster", self.config.cluster_name.clone()),
            ("gcloud.core.project", self.config.project_id.clone()),
            (
                "gcloud.project.projectNumber",
                self.project_number.to_string(),
            ),
            ("gcloud.compute.location", self.config.cluster_location.clone()),
        ];
        if let Some(hub) = &self.config.staging.image_location {
            setters.push(("anthos.servicemesh.hub", hub.clone()));
        }
        if let Some(tag) = &self.config.staging.image_tag {
            setters.push(("anthos.servicemesh.tag", tag.clone()));
        }

        for (setter, value) in setters {
            self.executor
                .execute_ok(&Op::SetPackageValue {
                    package_dir: self.package_dir(),
                    setter: setter.to_string(),
                    value,
                })
                .await?;
        }
        Ok(())
    }

    /// Install the revisioned control plane, layering the operator's custom
    /// overlay (when one exists on disk) over the base manifest.
    async fn install_control_plane(&self) -> Result<()> {
        info!("Installing the control plane (revision {})...", self.release.revision_label);
        let mut manifests = vec![self
            .package_dir()
            .join("cluster")
            .join("istio-operator.yaml")];
        if let Some(overlay) = &self.config.custom_overlay {
            if overlay.exists() {
                manifests.push(overlay.clone());
            } else {
                info!("Overlay {} not found, skipping", overlay.display());
            }
        }

        self.executor
            .retry(
                INSTALL_ATTEMPTS,
                &Op::InstallControlPlane {
                    istioctl: self.istioctl(),
                    kubeconfig: self.workspace.kubeconfig_path(),
                    manifests,
                    revision: self.release.revision_label.clone(),
                },
            )
            .await?;
        Ok(())
    }

    /// Deploy the canonical service controller and wait for availability.
    /// The wait is not retried; a second wait would not make the rollout
    /// finish any sooner.
    async fn install_canonical_controller(&self) -> Result<()> {
        info!("Installing the canonical service controller...");
        self.executor
            .retry(
                3,
                &Op::ApplyFile {
                    kubeconfig: self.workspace.kubeconfig_path(),
                    path: self
                        .package_dir()
                        .join("canonical-service")
                        .join("controller.yaml"),
                },
            )
            .await?;

        info!("Waiting for the canonical service controller...");
        self.executor
            .execute_ok(&Op::WaitForDeployment {
                kubeconfig: self.workspace.kubeconfig_path(),
                namespace: CONTROLLER_NAMESPACE.to_string(),
                deployment: CONTROLLER_DEPLOYMENT.to_string(),
                timeout_secs: CONTROLLER_WAIT_SECS,
            })
            .await?;
        Ok(())
    }

    /// Final operator-facing summary on stdout.
    fn print_summary(&self) {
        for line in self.summary_lines() {
            println!("{}", line);
        }
    }

    /// The mode-specific completion guidance is printed on every successful
    /// run; the artifact locations are omitted for service-account runs,
    /// which are unattended.
    fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![match self.config.mode {
            Mode::Install => format!(
                "Successfully installed the mesh control plane (revision {}).",
                self.release.revision_label
            ),
            Mode::Migrate => format!(
                "Successfully installed the mesh control plane (revision {}) alongside \
                 the existing one. Migrate your workloads to the new revision, then \
                 remove the old control plane.",
                self.release.revision_label
            ),
        }];
        if self.config.service_account.is_none() {
            lines.push(format!(
                "Installation artifacts are in {}.",
                self.workspace.root().display()
            ));
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::testing::test_config;
    use crate::exec::testing::ScriptedRunner;
    use std::sync::Arc;

    fn installer_parts() -> (Arc<ScriptedRunner>, Executor, ReleaseDescriptor, Workspace) {
        let runner = Arc::new(ScriptedRunner::new());
        let executor = Executor::new(runner.clone(), false, false);
        let release = ReleaseDescriptor::current();
        let workspace = Workspace::acquire(None).unwrap();
        (runner, executor, release, workspace)
    }

    #[tokio::test]
    async fn test_package_configured_with_run_coordinates() {
        let (runner, executor, release, workspace) = installer_parts();
        let config = test_config();

        Installer::new(&config, &executor, &workspace, &release, 987654)
            .run()
            .await
            .unwrap();

        assert_eq!(
            runner.count_matching("gcloud.container.cluster my-cluster"),
            1
        );
        assert_eq!(runner.count_matching("gcloud.core.project my-proj"), 1);
        assert_eq!(
            runner.count_matching("gcloud.project.projectNumber 987654"),
            1
        );
        assert_eq!(
            runner.count_matching("gcloud.compute.location us-central1-a"),
            1
        );
        // No staging overrides, so no image setters.
        assert_eq!(runner.count_matching("anthos.servicemesh"), 0);
        workspace.release();
    }

    #[tokio::test]
    async fn test_staging_image_setters_applied() {
        let (runner, executor, release, workspace) = installer_parts();
        let mut config = test_config();
        config.staging.image_location = Some("gcr.io/asm-staging".to_string());
        config.staging.image_tag = Some("1.7.3-asm.6.staging".to_string());

        Installer::new(&config, &executor, &workspace, &release, 1)
            .run()
            .await
            .unwrap();

        assert_eq!(
            runner.count_matching("anthos.servicemesh.hub gcr.io/asm-staging"),
            1
        );
        assert_eq!(
            runner.count_matching("anthos.servicemesh.tag 1.7.3-asm.6.staging"),
            1
        );
        workspace.release();
    }

    #[tokio::test]
    async fn test_control_plane_installed_with_revision() {
        let (runner, executor, release, workspace) = installer_parts();
        let config = test_config();

        Installer::new(&config, &executor, &workspace, &release, 1)
            .run()
            .await
            .unwrap();

        let install = runner
            .commands()
            .into_iter()
            .find(|c| c.contains("istioctl install"))
            .expect("control-plane install command");
        assert!(install.contains("istio-operator.yaml"));
        assert!(install.contains("revision=asm-173-6"));
        workspace.release();
    }

    #[tokio::test]
    async fn test_missing_overlay_skipped() {
        let (runner, executor, release, workspace) = installer_parts();
        let mut config = test_config();
        config.custom_overlay = Some(PathBuf::from("/nonexistent/overlay.yaml"));

        Installer::new(&config, &executor, &workspace, &release, 1)
            .run()
            .await
            .unwrap();
        assert_eq!(runner.count_matching("overlay.yaml"), 0);
        workspace.release();
    }

    #[tokio::test]
    async fn test_present_overlay_layered_over_base() {
        let (runner, executor, release, workspace) = installer_parts();
        let overlay_dir = tempfile::tempdir().unwrap();
        let overlay = overlay_dir.path().join("overlay.yaml");
        std::fs::write(&overlay, "spec: {}\n").unwrap();
        let mut config = test_config();
        config.custom_overlay = Some(overlay.clone());

        Installer::new(&config, &executor, &workspace, &release, 1)
            .run()
            .await
            .unwrap();

        let install = runner
            .commands()
            .into_iter()
            .find(|c| c.contains("istioctl install"))
            .expect("control-plane install command");
        let base_at = install.find("istio-operator.yaml").unwrap();
        let overlay_at = install.find("overlay.yaml").unwrap();
        assert!(base_at < overlay_at, "base manifest must come first");
        workspace.release();
    }

    #[tokio::test]
    async fn test_canonical_controller_installed_and_awaited() {
        let (runner, executor, release, workspace) = installer_parts();
        let config = test_config();

        Installer::new(&config, &executor, &workspace, &release, 1)
            .run()
            .await
            .unwrap();
        assert_eq!(runner.count_matching("canonical-service/controller.yaml"), 1);
        assert_eq!(
            runner.count_matching(
                "wait --for=condition=available --timeout=600s -n asm-system"
            ),
            1
        );
        workspace.release();
    }

    #[tokio::test]
    async fn test_summary_guidance_survives_service_account_runs() {
        let (_runner, executor, release, workspace) = installer_parts();
        let mut config = test_config();
        config.mode = crate::config::Mode::Migrate;
        config.service_account = Some("robot@proj.iam.gserviceaccount.com".to_string());
        config.key_file = Some(PathBuf::from("/tmp/key.json"));

        let installer = Installer::new(&config, &executor, &workspace, &release, 1);
        let lines = installer.summary_lines();
        // Migrate guidance always prints; only the artifact locations are
        // dropped for unattended runs.
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("Migrate your workloads"));
        assert!(lines[0].contains("asm-173-6"));
        workspace.release();
    }

    #[tokio::test]
    async fn test_summary_includes_artifacts_for_operator_runs() {
        let (_runner, executor, release, workspace) = installer_parts();
        let config = test_config();

        let installer = Installer::new(&config, &executor, &workspace, &release, 1);
        let lines = installer.summary_lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("Successfully installed"));
        assert!(lines[1].contains("Installation artifacts are in"));
        workspace.release();
    }

    #[tokio::test]
    async fn test_canonical_controller_skippable() {
        let (runner, executor, release, workspace) = installer_parts();
        let mut config = test_config();
        config.skip_canonical_controller = true;

        Installer::new(&config, &executor, &workspace, &release, 1)
            .run()
            .await
            .unwrap();
        assert_eq!(runner.count_matching("canonical-service"), 0);
        assert_eq!(runner.count_matching("wait --for"), 0);
        workspace.release();
    }
}
