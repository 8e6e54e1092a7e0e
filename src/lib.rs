//! Idempotent provisioning of a PostgreSQL role and the database it owns.
//!
//! The library drives a server towards a desired end-state through a
//! database client: it optionally starts the service, verifies
//! connectivity, ensures the role exists with the requested password
//! policy, ensures the database exists (optionally dropping and recreating
//! it), then applies a creation or update script depending on whether the
//! database was created in this run. Every step probes before it mutates,
//! so re-running after a failure resumes where the previous run stopped.

mod client;
mod config;
mod error;
mod fs;
mod observability;
mod probe;
mod provision;
mod report;
mod secret;
mod service;
pub mod sql;
#[doc(hidden)]
pub mod test_support;

use std::ffi::OsString;
use std::io;

use tracing::info;

#[cfg(feature = "native-client")]
pub use client::NativeClient;
pub use client::{
    ConnectionTarget, Credentials, DEFAULT_CLIENT_BINARY, DEFAULT_INITIAL_DATABASE,
    InvocationTemplate, PrivilegeContext, PsqlClient, SqlClient, connection_keys,
};
pub use config::{Backend, ProvisionCfg, ProvisionPlan};
pub use error::{
    ClientError, ClientResult, ConfigError, ConfigResult, ProvisionError, ReportError, Result,
    ServiceStartError,
};
pub use observability::init_logging;
pub use probe::{database_exists, role_exists};
pub use provision::{
    DatabaseSpec, ProvisionRequest, ProvisionStep, Provisioner, ProvisioningOutcome, RoleSpec,
    ScriptKind, SqlScripts,
};
pub use report::{OutputFormat, ResultReporter};
pub use secret::{DEFAULT_PASSWORD_LENGTH, generate_password};
pub use service::{CommandServiceStarter, DEFAULT_SERVICE_START_COMMAND, ServiceStarter};

use crate::observability::LOG_TARGET;

/// Provisions using configuration from the process arguments and environment,
/// writing the effective password to standard output.
///
/// # Errors
/// Returns a [`ProvisionError`] describing the first failure.
pub fn run() -> Result<()> {
    run_with_args(std::env::args_os())
}

/// Provisions using configuration parsed from `args` (program name first)
/// layered over the environment.
///
/// # Errors
/// Returns a [`ProvisionError`] describing the first failure.
pub fn run_with_args<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cfg = ProvisionCfg::load_from_args(args)?;
    init_logging(cfg.debug_enabled());
    let plan = cfg.to_plan()?;
    let outcome = provision(&plan)?;
    ResultReporter::new(plan.output_format()).write(&outcome, io::stdout().lock())?;
    Ok(())
}

/// Executes a validated plan and returns its outcome without reporting it.
///
/// # Errors
/// Returns a [`ProvisionError`] describing the first failure.
pub fn provision(plan: &ProvisionPlan) -> Result<ProvisioningOutcome> {
    let client = plan.client()?;
    info!(
        target: LOG_TARGET,
        backend = ?plan.backend(),
        initial_database = client.initial_database(),
        "database client ready"
    );
    Provisioner::new(client.as_ref(), plan.service_starter()).run(plan.request().clone())
}
