//! Surfaces the effective password once provisioning succeeds.

use std::io::Write;
use std::str::FromStr;

use color_eyre::eyre::{Context, eyre};
use secrecy::ExposeSecret;
use serde::Serialize;

use crate::error::{ConfigError, ReportError};
use crate::provision::ProvisioningOutcome;

/// Rendering used for the provisioning result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// The effective password on a single line.
    #[default]
    Plain,
    /// A JSON object describing the outcome.
    Json,
}

impl FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "plain" => Ok(Self::Plain),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::from(eyre!(
                "unknown output format '{other}' (expected 'plain' or 'json')"
            ))),
        }
    }
}

#[derive(Serialize)]
struct OutcomeRecord<'a> {
    effective_password: &'a str,
    database_was_freshly_created: bool,
    applied_script: Option<&'static str>,
    mutations: Vec<&'static str>,
}

/// Writes a [`ProvisioningOutcome`] to an output stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultReporter {
    format: OutputFormat,
}

impl ResultReporter {
    /// Creates a reporter rendering with `format`.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns the password the caller should use for the role.
    #[must_use]
    pub fn effective_password(outcome: &ProvisioningOutcome) -> &str {
        outcome.effective_password().expose_secret()
    }

    /// Writes `outcome` to `out`.
    ///
    /// # Errors
    /// Returns a [`ReportError`] when serialisation or the write fails.
    pub fn write<W: Write>(
        &self,
        outcome: &ProvisioningOutcome,
        mut out: W,
    ) -> Result<(), ReportError> {
        match self.format {
            OutputFormat::Plain => writeln!(out, "{}", Self::effective_password(outcome))
                .context("write effective password")?,
            OutputFormat::Json => {
                let record = OutcomeRecord {
                    effective_password: Self::effective_password(outcome),
                    database_was_freshly_created: outcome.database_was_freshly_created(),
                    applied_script: outcome.applied_script().map(|kind| kind.as_str()),
                    mutations: outcome.mutations().iter().map(|step| step.as_str()).collect(),
                };
                serde_json::to_writer(&mut out, &record).context("serialise outcome")?;
                writeln!(out).context("write outcome")?;
            }
        }
        out.flush().context("flush outcome")?;
        Ok(())
    }
}
