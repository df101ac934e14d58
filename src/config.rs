//! Run configuration
//!
//! [`RunConfig`] is constructed once from the parsed CLI arguments (plus a few
//! env-only staging overrides), validated, and then passed by shared reference
//! into every pipeline component. Nothing mutates it after construction.

use std::fmt;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::Cli;

/// Env var selecting an authenticated artifact source (staging pipelines only)
pub const STAGING_ARTIFACT_LOCATION_ENV: &str = "MESHCTL_STAGING_ARTIFACT_LOCATION";
/// Env var overriding the control-plane image location (staging pipelines only)
pub const IMAGE_LOCATION_ENV: &str = "MESHCTL_IMAGE_LOCATION";
/// Env var overriding the control-plane image tag (staging pipelines only)
pub const IMAGE_TAG_ENV: &str = "MESHCTL_IMAGE_TAG";

/// Operation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Fresh install onto a cluster with no existing control plane
    Install,
    /// Migrate an existing in-cluster control plane to the managed distribution
    Migrate,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Install => write!(f, "install"),
            Mode::Migrate => write!(f, "migrate"),
        }
    }
}

/// Certificate authority choice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaOption {
    /// Managed certificate authority
    MeshCa,
    /// Self-managed in-cluster certificate authority
    Citadel,
}

impl fmt::Display for CaOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaOption::MeshCa => write!(f, "mesh_ca"),
            CaOption::Citadel => write!(f, "citadel"),
        }
    }
}

pub(crate) fn parse_mode(s: &str) -> std::result::Result<Mode, String> {
    match s.to_lowercase().as_str() {
        "install" => Ok(Mode::Install),
        "migrate" => Ok(Mode::Migrate),
        _ => Err(format!(
            "invalid mode '{}', must be 'install' or 'migrate'",
            s
        )),
    }
}

pub(crate) fn parse_ca(s: &str) -> std::result::Result<CaOption, String> {
    match s.to_lowercase().as_str() {
        "mesh_ca" => Ok(CaOption::MeshCa),
        "citadel" => Ok(CaOption::Citadel),
        _ => Err(format!(
            "invalid certificate authority '{}', must be 'mesh_ca' or 'citadel'",
            s
        )),
    }
}

/// Env-only overrides used by non-production release pipelines.
///
/// Never exposed as CLI flags; read from the environment at startup.
#[derive(Debug, Clone, Default)]
pub struct StagingOverrides {
    /// Authenticated bucket holding staged installer tarballs
    pub artifact_location: Option<String>,
    /// Control-plane image location override
    pub image_location: Option<String>,
    /// Control-plane image tag override
    pub image_tag: Option<String>,
}

impl StagingOverrides {
    /// Read the overrides from the process environment.
    pub fn from_env() -> Self {
        Self {
            artifact_location: std::env::var(STAGING_ARTIFACT_LOCATION_ENV).ok(),
            image_location: std::env::var(IMAGE_LOCATION_ENV).ok(),
            image_tag: std::env::var(IMAGE_TAG_ENV).ok(),
        }
    }
}

/// Immutable configuration for one pipeline run
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Target project identifier
    pub project_id: String,
    /// Target cluster name
    pub cluster_name: String,
    /// Cluster location (zone or region)
    pub cluster_location: String,
    /// Operation mode
    pub mode: Mode,
    /// Certificate authority choice (defaulted to mesh_ca for install)
    pub ca: CaOption,
    /// Optional manifest overlay applied on top of the base manifest
    pub custom_overlay: Option<PathBuf>,
    /// Optional service account to act as
    pub service_account: Option<String>,
    /// Key file for the service account
    pub key_file: Option<PathBuf>,
    /// Persistent output directory; artifacts survive the run when set
    pub output_dir: Option<PathBuf>,
    /// Permit enabling required APIs that are not yet enabled
    pub enable_apis: bool,
    /// Skip the canonical service controller install
    pub skip_canonical_controller: bool,
    /// Log would-be commands without executing anything
    pub dry_run: bool,
    /// Log every external command before and after execution
    pub verbose: bool,
    /// Run precondition checks only, then exit without mutating
    pub only_validate: bool,
    /// Env-only staging overrides
    pub staging: StagingOverrides,
}

impl RunConfig {
    /// Build and validate a config from parsed CLI arguments.
    pub fn from_cli(cli: Cli) -> Result<Self> {
        Self::build(cli, StagingOverrides::from_env())
    }

    pub(crate) fn build(cli: Cli, staging: StagingOverrides) -> Result<Self> {
        let ca = resolve_ca(cli.mode, cli.ca)?;

        if cli.service_account.is_some() != cli.key_file.is_some() {
            return Err(Error::configuration(
                "--service-account and --key-file must be supplied together",
            ));
        }

        Ok(Self {
            project_id: cli.project_id,
            cluster_name: cli.cluster_name,
            cluster_location: cli.cluster_location,
            mode: cli.mode,
            ca,
            custom_overlay: cli.custom_overlay,
            service_account: cli.service_account,
            key_file: cli.key_file,
            output_dir: cli.output_dir,
            enable_apis: cli.enable_apis,
            skip_canonical_controller: cli.skip_canonical_controller,
            dry_run: cli.dry_run,
            verbose: cli.verbose,
            only_validate: cli.only_validate,
            staging,
        })
    }
}

/// Resolve the effective CA for the given mode.
///
/// Install defaults to the managed CA; migrate must state the CA explicitly
/// because the wrong choice breaks trust for existing workloads.
fn resolve_ca(mode: Mode, ca: Option<CaOption>) -> Result<CaOption> {
    match (mode, ca) {
        (_, Some(ca)) => Ok(ca),
        (Mode::Install, None) => Ok(CaOption::MeshCa),
        (Mode::Migrate, None) => Err(Error::configuration(
            "--ca is required for migrate (mesh_ca or citadel)",
        )),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(extra: &[&str]) -> Cli {
        let mut args = vec![
            "meshctl",
            "--project-id",
            "my-proj",
            "--cluster-name",
            "my-cluster",
            "--cluster-location",
            "us-central1-a",
        ];
        args.extend_from_slice(extra);
        Cli::try_parse_from(args).expect("args should parse")
    }

    #[test]
    fn test_install_defaults_to_mesh_ca() {
        let config = RunConfig::build(
            cli(&["--mode", "install"]),
            StagingOverrides::default(),
        )
        .unwrap();
        assert_eq!(config.ca, CaOption::MeshCa);
    }

    #[test]
    fn test_install_with_explicit_citadel() {
        let config = RunConfig::build(
            cli(&["--mode", "install", "--ca", "citadel"]),
            StagingOverrides::default(),
        )
        .unwrap();
        assert_eq!(config.ca, CaOption::Citadel);
    }

    #[test]
    fn test_migrate_requires_ca() {
        let result = RunConfig::build(cli(&["--mode", "migrate"]), StagingOverrides::default());
        assert!(matches!(result, Err(Error::Configuration { .. })));
    }

    #[test]
    fn test_migrate_with_ca() {
        let config = RunConfig::build(
            cli(&["--mode", "migrate", "--ca", "mesh_ca"]),
            StagingOverrides::default(),
        )
        .unwrap();
        assert_eq!(config.mode, Mode::Migrate);
        assert_eq!(config.ca, CaOption::MeshCa);
    }

    #[test]
    fn test_service_account_without_key_file_rejected() {
        let result = RunConfig::build(
            cli(&["--mode", "install", "--service-account", "sa@proj.iam"]),
            StagingOverrides::default(),
        );
        assert!(matches!(result, Err(Error::Configuration { .. })));
    }

    #[test]
    fn test_key_file_without_service_account_rejected() {
        let result = RunConfig::build(
            cli(&["--mode", "install", "--key-file", "/tmp/key.json"]),
            StagingOverrides::default(),
        );
        assert!(matches!(result, Err(Error::Configuration { .. })));
    }

    #[test]
    fn test_service_account_pair_accepted() {
        let config = RunConfig::build(
            cli(&[
                "--mode",
                "install",
                "--service-account",
                "sa@proj.iam",
                "--key-file",
                "/tmp/key.json",
            ]),
            StagingOverrides::default(),
        )
        .unwrap();
        assert_eq!(config.service_account.as_deref(), Some("sa@proj.iam"));
    }

    #[test]
    fn test_parse_mode_case_insensitive() {
        assert!(matches!(parse_mode("INSTALL"), Ok(Mode::Install)));
        assert!(matches!(parse_mode("Migrate"), Ok(Mode::Migrate)));
        assert!(parse_mode("upgrade").is_err());
    }

    #[test]
    fn test_parse_ca() {
        assert!(matches!(parse_ca("mesh_ca"), Ok(CaOption::MeshCa)));
        assert!(matches!(parse_ca("CITADEL"), Ok(CaOption::Citadel)));
        assert!(parse_ca("letsencrypt").is_err());
    }
}
