//! Error types for meshctl
//!
//! Every variant is fatal: the pipeline emits the diagnostic and aborts the
//! run. Variants carry the context needed to print actionable remediation
//! guidance (the follow-up command the operator should run).

use thiserror::Error;

/// meshctl Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Bad or missing CLI arguments, including partially supplied option pairs
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of what's invalid
        message: String,
    },

    /// Required external tools absent from PATH (all absentees listed at once)
    #[error("missing required tools: {}", .tools.join(", "))]
    MissingDependency {
        /// Names of the tools that could not be found
        tools: Vec<String>,
    },

    /// Host platform is not supported
    #[error("unsupported platform: {os}/{arch} (supported: linux/x86_64, macos/x86_64)")]
    UnsupportedPlatform {
        /// Reported operating system
        os: String,
        /// Reported CPU architecture
        arch: String,
    },

    /// Project or cluster could not be resolved
    #[error("{kind} not found: {name} (to list candidates, run: {remediation})")]
    ResourceNotFound {
        /// Resource kind ("project", "cluster")
        kind: &'static str,
        /// Identifier that failed to resolve
        name: String,
        /// Command the operator can run to find the right identifier
        remediation: String,
    },

    /// Node pool capacity below the minimum for the control plane
    #[error("insufficient cluster capacity: {message}")]
    InsufficientResources {
        /// Description of the shortfall
        message: String,
    },

    /// Control-plane deployments in an unsupported layout or wrong install/migrate state
    #[error("unsupported control-plane topology: {message}")]
    Topology {
        /// Description of what was found
        message: String,
    },

    /// Existing control plane unsuitable for migration
    #[error("incompatible control-plane version: {message}")]
    VersionIncompatible {
        /// Description of the version mismatch
        message: String,
    },

    /// Required APIs not enabled on the project (all missing APIs listed at once)
    #[error("required APIs not enabled: {} (to enable them, run: {remediation})", .apis.join(", "))]
    ApisNotEnabled {
        /// APIs that are required but not enabled
        apis: Vec<String>,
        /// Command that enables the missing APIs
        remediation: String,
    },

    /// External command exited nonzero after exhausting its retry budget
    #[error("external operation failed: {operation}: {message}")]
    ExternalOperation {
        /// The command that failed
        operation: String,
        /// Stderr or a description of the failure
        message: String,
    },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parse error on external command output
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error while generating manifests
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Create a configuration error with the given message
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Create a topology error with the given message
    pub fn topology(message: impl Into<String>) -> Self {
        Error::Topology {
            message: message.into(),
        }
    }

    /// Create a version-incompatibility error with the given message
    pub fn version_incompatible(message: impl Into<String>) -> Self {
        Error::VersionIncompatible {
            message: message.into(),
        }
    }

    /// Create an insufficient-resources error with the given message
    pub fn insufficient(message: impl Into<String>) -> Self {
        Error::InsufficientResources {
            message: message.into(),
        }
    }

    /// Create an external-operation error for the given command
    pub fn external(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ExternalOperation {
            operation: operation.into(),
            message: message.into(),
        }
    }
}
