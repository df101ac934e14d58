//! Pipeline orchestration
//!
//! One strictly sequential run: workspace acquisition, dependency
//! resolution, validation, project and cluster preparation, and the install
//! itself. There is no rollback; every stage is idempotent, so a failed run
//! converges on re-execution. The workspace is released on every exit path.

use std::sync::Arc;

use tracing::info;

use crate::cluster::ClusterPreparer;
use crate::config::RunConfig;
use crate::deps;
use crate::error::Result;
use crate::exec::{CommandRunner, Executor, ProcessRunner};
use crate::install::Installer;
use crate::ops::Op;
use crate::project::ProjectPreparer;
use crate::release::ReleaseDescriptor;
use crate::validate::Validator;
use crate::workspace::Workspace;

/// Run the full pipeline against real external processes.
pub async fn run(config: RunConfig) -> Result<()> {
    run_with_runner(config, Arc::new(ProcessRunner)).await
}

/// Run the full pipeline over the given command runner.
pub async fn run_with_runner(config: RunConfig, runner: Arc<dyn CommandRunner>) -> Result<()> {
    deps::ensure_supported_platform(std::env::consts::OS, std::env::consts::ARCH)?;

    let mut executor = Executor::new(runner, config.dry_run, config.verbose);
    let tools = deps::required_tools(&config);
    deps::ensure_tools_present(&executor, &tools).await?;
    deps::authenticate_service_identity(&config, &executor).await?;

    let workspace = Workspace::acquire(config.output_dir.as_deref())?;
    executor.set_credential_refresh(Op::GetClusterCredentials {
        project: config.project_id.clone(),
        location: config.cluster_location.clone(),
        cluster: config.cluster_name.clone(),
        kubeconfig: workspace.kubeconfig_path(),
    });

    let release = ReleaseDescriptor::current();
    let result = run_stages(&config, &executor, &workspace, &release).await;
    // Released on both arms so a failed run never leaks the scoped
    // kubeconfig or a temporary artifact directory.
    workspace.release();
    result
}

async fn run_stages(
    config: &RunConfig,
    executor: &Executor,
    workspace: &Workspace,
    release: &ReleaseDescriptor,
) -> Result<()> {
    deps::ensure_artifacts(config, executor, workspace, release).await?;

    let project_number = Validator::new(config, executor, workspace, release)
        .run()
        .await?;
    if config.only_validate {
        info!("Validation passed; no changes were made");
        return Ok(());
    }

    ProjectPreparer::new(config, executor).run().await?;
    // Dry-run never queried the project, so no number was captured; the
    // placeholder only ever shows up in would-be command logs.
    let project_number = project_number.unwrap_or(0);
    ClusterPreparer::new(config, executor, workspace, release, project_number)
        .run()
        .await?;
    Installer::new(config, executor, workspace, release, project_number)
        .run()
        .await?;

    info!("Done");
    Ok(())
}
