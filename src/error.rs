//! Domain error types for the provisioning pipeline.

use std::fmt;

use color_eyre::Report;
use thiserror::Error;

use crate::provision::ProvisionStep;

/// Result alias for operations that may return a [`ProvisionError`].
pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Result alias for client invocations.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Result alias for configuration fallible operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level error exposed by the crate.
///
/// Every variant halts the pipeline; nothing performed before the failure is
/// rolled back, so re-running the provisioning is the recovery path.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Indicates the supplied configuration is missing or inconsistent.
    #[error("configuration invalid")]
    Config(#[from] ConfigError),
    /// Indicates the requested service start action failed.
    #[error("failed to start the database service")]
    ServiceStart(#[from] ServiceStartError),
    /// Indicates the connectivity check against the bootstrap database failed.
    #[error("database server unreachable")]
    ServerUnreachable(#[source] ClientError),
    /// Indicates a client command failed while executing `step`.
    #[error("{step} failed")]
    Step {
        /// Step that was executing when the client failed.
        step: ProvisionStep,
        /// Underlying client failure.
        #[source]
        source: ClientError,
    },
    /// Indicates the effective password could not be written out.
    #[error("failed to report provisioning outcome")]
    Report(#[from] ReportError),
}

impl ProvisionError {
    /// Wraps a client failure with the step that was executing.
    #[must_use]
    pub const fn step(step: ProvisionStep, source: ClientError) -> Self {
        Self::Step { step, source }
    }

    /// Returns the client failure underlying this error, when there is one.
    #[must_use]
    pub const fn client_error(&self) -> Option<&ClientError> {
        match self {
            Self::ServerUnreachable(source) | Self::Step { source, .. } => Some(source),
            Self::Config(_) | Self::ServiceStart(_) | Self::Report(_) => None,
        }
    }
}

/// Captures a failed invocation of the database client.
///
/// `exit_code` is absent when the client could not be spawned at all or was
/// terminated by a signal.
#[derive(Debug, Error)]
pub struct ClientError {
    context: String,
    exit_code: Option<i32>,
    stderr: String,
}

impl ClientError {
    /// Builds an error for a client that ran and exited unsuccessfully.
    #[must_use]
    pub fn exited(context: impl Into<String>, exit_code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            exit_code,
            stderr: stderr.into(),
        }
    }

    /// Builds an error for a client that could not be executed.
    #[must_use]
    pub fn spawn(context: impl Into<String>, err: &std::io::Error) -> Self {
        Self {
            context: context.into(),
            exit_code: None,
            stderr: err.to_string(),
        }
    }

    /// Returns the process exit code, if the client exited normally.
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Returns the captured standard error text.
    #[must_use]
    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Returns the description of the command that failed.
    #[must_use]
    pub fn context(&self) -> &str {
        &self.context
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "{} (exit code {code})", self.context)?,
            None => write!(f, "{} (no exit code)", self.context)?,
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            write!(f, ": {stderr}")?;
        }
        Ok(())
    }
}

/// Captures configuration failures.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ConfigError(#[from] Report);

/// Captures failures of the optional service start action.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ServiceStartError(#[from] Report);

/// Captures failures writing the provisioning result.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ReportError(#[from] Report);
