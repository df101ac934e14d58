//! meshctl library
//!
//! Idempotent installer for the managed service-mesh control plane on a
//! managed Kubernetes cluster: validates preconditions, prepares the target
//! project and cluster, and installs a revisioned control plane.

pub mod cluster;
pub mod config;
pub mod deps;
pub mod error;
pub mod exec;
pub mod install;
pub mod ops;
pub mod pipeline;
pub mod project;
pub mod release;
pub mod validate;
pub mod workspace;

pub use error::{Error, Result};

use std::path::PathBuf;

use clap::Parser;

use config::{parse_ca, parse_mode, CaOption, Mode, RunConfig};

/// meshctl - install the managed service mesh on a cluster
#[derive(Parser, Debug)]
#[command(name = "meshctl")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Project the target cluster belongs to
    #[arg(long, env = "PROJECT_ID")]
    pub project_id: String,

    /// Name of the target cluster
    #[arg(long, env = "CLUSTER_NAME")]
    pub cluster_name: String,

    /// Location (zone or region) of the target cluster
    #[arg(long, env = "CLUSTER_LOCATION")]
    pub cluster_location: String,

    /// Operation mode: install or migrate
    #[arg(long, env = "MODE", value_parser = parse_mode)]
    pub mode: Mode,

    /// Certificate authority: mesh_ca or citadel (defaults to mesh_ca for install)
    #[arg(long, env = "CA", value_parser = parse_ca)]
    pub ca: Option<CaOption>,

    /// Manifest overlay applied on top of the base control-plane manifest
    #[arg(long, env = "CUSTOM_OVERLAY")]
    pub custom_overlay: Option<PathBuf>,

    /// Service account to act as (requires --key-file)
    #[arg(long, env = "SERVICE_ACCOUNT")]
    pub service_account: Option<String>,

    /// Key file for the service account (requires --service-account)
    #[arg(long, env = "KEY_FILE")]
    pub key_file: Option<PathBuf>,

    /// Directory installation artifacts are kept in after the run
    #[arg(long, env = "OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Permit enabling required APIs that are not yet enabled
    #[arg(long, env = "ENABLE_APIS")]
    pub enable_apis: bool,

    /// Skip installing the canonical service controller
    #[arg(long, env = "SKIP_CANONICAL_CONTROLLER")]
    pub skip_canonical_controller: bool,

    /// Log the commands that would run without executing them
    #[arg(long, env = "DRY_RUN")]
    pub dry_run: bool,

    /// Log every external command before and after execution
    #[arg(short, long, env = "VERBOSE")]
    pub verbose: bool,

    /// Run the precondition checks only, then exit without changing anything
    #[arg(long, env = "ONLY_VALIDATE")]
    pub only_validate: bool,
}

impl Cli {
    /// Validate the arguments and run the pipeline
    pub async fn run(self) -> Result<()> {
        let config = RunConfig::from_cli(self)?;
        pipeline::run(config).await
    }
}
