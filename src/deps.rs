//! Dependency resolution
//!
//! Confirms the host can run the pipeline (tools present, platform
//! supported), authenticates an optional service identity, and fetches the
//! versioned installer artifacts into the workspace when they are not
//! already there.

use std::path::PathBuf;

use tracing::info;

use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::exec::Executor;
use crate::ops::Op;
use crate::release::{ReleaseDescriptor, PACKAGE_DIR, PACKAGE_REPO, RELEASE_BUCKET_URL};
use crate::workspace::Workspace;

/// Tools every run needs on PATH
pub const REQUIRED_TOOLS: &[&str] = &["gcloud", "kubectl", "kpt", "curl", "tar"];

/// Attempts for artifact and package retrieval
const FETCH_ATTEMPTS: u32 = 3;

/// Probe every required tool and fail with the full list of absentees.
///
/// Checking all tools before failing saves the operator a round-trip per
/// missing tool.
pub async fn ensure_tools_present(executor: &Executor, tools: &[&str]) -> Result<()> {
    let mut missing = Vec::new();
    for tool in tools {
        let output = executor
            .execute(&Op::CheckTool {
                tool: tool.to_string(),
            })
            .await?;
        if !output.status_ok {
            missing.push(tool.to_string());
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::MissingDependency { tools: missing })
    }
}

/// Tools needed for this specific config (staged artifacts need gsutil).
pub fn required_tools(config: &RunConfig) -> Vec<&'static str> {
    let mut tools = REQUIRED_TOOLS.to_vec();
    if config.staging.artifact_location.is_some() {
        tools.push("gsutil");
    }
    tools
}

/// Fail unless the host is 64-bit x86 Linux or macOS.
pub fn ensure_supported_platform(os: &str, arch: &str) -> Result<()> {
    let os_supported = os.eq_ignore_ascii_case("linux")
        || os.eq_ignore_ascii_case("macos")
        || os.eq_ignore_ascii_case("darwin");
    if arch == "x86_64" && os_supported {
        Ok(())
    } else {
        Err(Error::UnsupportedPlatform {
            os: os.to_string(),
            arch: arch.to_string(),
        })
    }
}

/// Authenticate the configured service identity, if any.
pub async fn authenticate_service_identity(config: &RunConfig, executor: &Executor) -> Result<()> {
    let (Some(account), Some(key_file)) = (&config.service_account, &config.key_file) else {
        return Ok(());
    };
    info!("Authenticating service account {}...", account);
    executor
        .execute_ok(&Op::ActivateServiceAccount {
            account: account.clone(),
            key_file: key_file.clone(),
        })
        .await?;
    Ok(())
}

/// Fetch the installer tarball and the configuration package into the
/// workspace, skipping the download when either expected artifact path is
/// already present (a reused output directory).
pub async fn ensure_artifacts(
    config: &RunConfig,
    executor: &Executor,
    workspace: &Workspace,
    release: &ReleaseDescriptor,
) -> Result<()> {
    let install_dir = workspace.root().join(release.install_dir());
    let package_dir = workspace.root().join(PACKAGE_DIR);

    if install_dir.exists() || package_dir.exists() {
        info!(
            "Artifacts already present in {}, skipping download",
            workspace.root().display()
        );
        return Ok(());
    }

    fetch_installer_tarball(config, executor, workspace, release).await?;
    fetch_config_package(executor, &package_dir, release).await?;
    Ok(())
}

async fn fetch_installer_tarball(
    config: &RunConfig,
    executor: &Executor,
    workspace: &Workspace,
    release: &ReleaseDescriptor,
) -> Result<()> {
    let tarball = release.tarball_name(std::env::consts::OS);
    let dest = workspace.root().join(&tarball);

    // Staged builds come from an authenticated bucket; releases from the
    // public one.
    let fetch = match &config.staging.artifact_location {
        Some(location) => Op::AuthenticatedCopy {
            source: format!("{}/{}", location.trim_end_matches('/'), tarball),
            dest: dest.clone(),
        },
        None => Op::FetchTarball {
            url: format!("{}/{}", RELEASE_BUCKET_URL, tarball),
            dest: dest.clone(),
        },
    };

    info!("Downloading {}...", tarball);
    executor.retry(FETCH_ATTEMPTS, &fetch).await?;
    executor
        .execute_ok(&Op::ExtractTarball {
            archive: dest,
            dest_dir: workspace.root().to_path_buf(),
        })
        .await?;
    Ok(())
}

async fn fetch_config_package(
    executor: &Executor,
    package_dir: &PathBuf,
    release: &ReleaseDescriptor,
) -> Result<()> {
    info!("Fetching configuration package @{}...", release.branch);
    executor
        .retry(
            FETCH_ATTEMPTS,
            &Op::FetchPackage {
                source: PACKAGE_REPO.to_string(),
                branch: release.branch.clone(),
                dest_dir: package_dir.clone(),
            },
        )
        .await?;
    Ok(())
}
