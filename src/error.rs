//! Error types for the Quobyte deployer
//!
//! Provides structured error types for configuration loading, manifest
//! handling, control plane access and readiness checks, together with the
//! policy that decides which of them abort a deployment run.

use thiserror::Error;

/// Unified error type for the deployer
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Manifest error in {path}: {reason}")]
    Manifest { path: String, reason: String },

    // =========================================================================
    // Control Plane Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Control plane read failed: {operation}: {reason}")]
    ControlPlaneRead { operation: String, reason: String },

    #[error("Control plane write failed: {operation}: {reason}")]
    ControlPlaneWrite { operation: String, reason: String },

    // =========================================================================
    // Deployment Errors
    // =========================================================================
    #[error("{component} did not become ready after {attempts} attempts")]
    DeploymentTimeout { component: String, attempts: u32 },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take when a deployment step reports an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Stop the run; resources created so far are left in place
    Abort,
    /// Log the failure and move on to the next step
    LogAndContinue,
}

impl Error {
    /// Determine what the sequencer does with this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Individual reads and writes are best effort
            Error::ControlPlaneRead { .. } | Error::ControlPlaneWrite { .. } => {
                ErrorAction::LogAndContinue
            }

            Error::Configuration(_)
            | Error::Manifest { .. }
            | Error::DeploymentTimeout { .. }
            | Error::Kube(_)
            | Error::Yaml(_)
            | Error::JsonParse(_)
            | Error::Io(_) => ErrorAction::Abort,
        }
    }

    /// Check if this error terminates the run
    pub fn is_fatal(&self) -> bool {
        matches!(self.action(), ErrorAction::Abort)
    }

    pub(crate) fn read(operation: impl Into<String>, reason: impl ToString) -> Self {
        Error::ControlPlaneRead {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn write(operation: impl Into<String>, reason: impl ToString) -> Self {
        Error::ControlPlaneWrite {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn manifest(path: impl Into<String>, reason: impl ToString) -> Self {
        Error::Manifest {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for the deployer
pub type Result<T> = std::result::Result<T, Error>;
