//! Starts the backing database service before any connection is attempted.

use std::process::{Command, Stdio};

use color_eyre::eyre::eyre;
use tracing::info;

use crate::error::ServiceStartError;
use crate::observability::LOG_TARGET;

/// Service start action used when none is configured.
pub const DEFAULT_SERVICE_START_COMMAND: &str = "serveradmin start postgres";

/// Ensures the database service is running.
///
/// The action is treated as pass/fail; its own protocol is opaque.
#[cfg_attr(test, mockall::automock)]
pub trait ServiceStarter {
    /// Starts the service, succeeding when it is (or already was) running.
    ///
    /// # Errors
    /// Returns a [`ServiceStartError`] when the service cannot be started.
    fn start(&self) -> Result<(), ServiceStartError>;
}

/// Starts the service by running an external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandServiceStarter {
    program: String,
    args: Vec<String>,
}

impl CommandServiceStarter {
    /// Builds a starter from a whitespace-separated command line.
    ///
    /// Returns `None` when `command_line` contains no program.
    ///
    /// # Examples
    /// ```
    /// use pg_provision::CommandServiceStarter;
    ///
    /// let starter = CommandServiceStarter::parse("serveradmin start postgres");
    /// assert!(starter.is_some());
    /// assert!(CommandServiceStarter::parse("   ").is_none());
    /// ```
    #[must_use]
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_owned);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Returns the program that is executed.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Returns the arguments passed to the program.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Default for CommandServiceStarter {
    fn default() -> Self {
        Self {
            program: "serveradmin".to_owned(),
            args: vec!["start".to_owned(), "postgres".to_owned()],
        }
    }
}

impl ServiceStarter for CommandServiceStarter {
    fn start(&self) -> Result<(), ServiceStartError> {
        let command_line = self.command_line();
        info!(target: LOG_TARGET, command = %command_line, "starting database service");
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| {
                ServiceStartError::from(eyre!("failed to run '{command_line}': {err}"))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if output.status.success() {
            info!(
                target: LOG_TARGET,
                state = %stdout.trim_end(),
                "database service start requested"
            );
            Ok(())
        } else {
            Err(ServiceStartError::from(eyre!(
                "'{command_line}' exited with {}\nstdout: {}\nstderr: {}",
                output.status,
                stdout.trim_end(),
                String::from_utf8_lossy(&output.stderr).trim_end()
            )))
        }
    }
}
