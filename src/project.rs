//! Project preparation
//!
//! Idempotent project-level mutations: role grants for the acting identity,
//! optional API enablement, and one-time managed-CA initialization. Re-running
//! any of these against an already-prepared project is a no-op from the
//! caller's perspective.

use tracing::info;

use crate::config::{CaOption, RunConfig};
use crate::error::{Error, Result};
use crate::exec::Executor;
use crate::ops::{Op, OPERATOR_ROLES, REQUIRED_APIS};

/// The identity this run acts as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// IAM member string, e.g. "user:alice@example.com"
    pub member: String,
    /// Bare account, e.g. "alice@example.com"
    pub account: String,
}

/// Resolve the acting identity: the configured service account, or the
/// operator's active account.
pub async fn acting_identity(config: &RunConfig, executor: &Executor) -> Result<Identity> {
    if let Some(account) = &config.service_account {
        return Ok(Identity {
            member: format!("serviceAccount:{}", account),
            account: account.clone(),
        });
    }

    let Some(output) = executor.capture(&Op::GetCoreAccount).await? else {
        // Dry-run: nothing was queried; the placeholder only ever shows up
        // in would-be command logs.
        return Ok(Identity {
            member: "user:unknown".to_string(),
            account: "unknown".to_string(),
        });
    };
    if !output.status_ok {
        return Err(Error::external(
            "gcloud config get-value core/account",
            output.stderr.trim(),
        ));
    }

    let account = output.stdout.trim().to_string();
    if account.is_empty() {
        return Err(Error::configuration(
            "no active account; run 'gcloud auth login' or supply --service-account",
        ));
    }
    Ok(Identity {
        member: format!("user:{}", account),
        account,
    })
}

/// Prepares the target project
pub struct ProjectPreparer<'a> {
    config: &'a RunConfig,
    executor: &'a Executor,
}

impl<'a> ProjectPreparer<'a> {
    pub fn new(config: &'a RunConfig, executor: &'a Executor) -> Self {
        Self { config, executor }
    }

    pub async fn run(&self) -> Result<()> {
        self.bind_operator_roles().await?;
        if self.config.enable_apis {
            self.enable_required_apis().await?;
        }
        if self.config.ca == CaOption::MeshCa {
            self.initialize_managed_ca().await?;
        }
        Ok(())
    }

    /// Grant the fixed role set to the acting identity. Granting an
    /// already-held role is a no-op on the IAM side.
    async fn bind_operator_roles(&self) -> Result<()> {
        let identity = acting_identity(self.config, self.executor).await?;
        info!("Binding project roles to {}...", identity.member);
        for role in OPERATOR_ROLES {
            self.executor
                .retry(
                    3,
                    &Op::AddIamPolicyBinding {
                        project: self.config.project_id.clone(),
                        member: identity.member.clone(),
                        role: role.to_string(),
                    },
                )
                .await?;
        }
        Ok(())
    }

    /// Enable the full API list in one batched call.
    async fn enable_required_apis(&self) -> Result<()> {
        info!("Enabling required APIs...");
        self.executor
            .retry(
                3,
                &Op::EnableServices {
                    project: self.config.project_id.clone(),
                    apis: REQUIRED_APIS.iter().map(|api| api.to_string()).collect(),
                },
            )
            .await?;
        Ok(())
    }

    /// One-time managed-CA provisioning call with a freshly minted token.
    async fn initialize_managed_ca(&self) -> Result<()> {
        info!("Initializing managed certificate authority...");
        let token = match self.executor.capture(&Op::PrintAccessToken).await? {
            Some(output) if output.status_ok => output.stdout.trim().to_string(),
            Some(output) => {
                return Err(Error::external(
                    "gcloud auth print-access-token",
                    output.stderr.trim(),
                ))
            }
            None => String::new(), // dry-run
        };

        self.executor
            .execute_ok(&Op::InitializeMeshCa {
                project: self.config.project_id.clone(),
                token,
            })
            .await?;
        Ok(())
    }
}
