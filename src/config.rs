//! Layered configuration and its validation into a provisioning plan.
//!
//! [`ProvisionCfg`] is loaded by `ortho_config` from `PGPROV_*` environment
//! variables, command-line flags and configuration files. Every field is
//! optional; [`ProvisionCfg::to_plan`] applies defaults and rejects invalid
//! combinations before any client is invoked.

use std::ffi::OsString;
use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::eyre;
use nix::unistd::User;
use ortho_config::OrthoConfig;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::client::{
    ConnectionTarget, Credentials, DEFAULT_CLIENT_BINARY, PrivilegeContext, PsqlClient, SqlClient,
};
use crate::error::{ConfigError, ConfigResult};
use crate::fs::{require_executable, require_regular_file};
use crate::provision::{DatabaseSpec, ProvisionRequest, RoleSpec, SqlScripts};
use crate::report::OutputFormat;
use crate::secret::DEFAULT_PASSWORD_LENGTH;
use crate::service::{CommandServiceStarter, DEFAULT_SERVICE_START_COMMAND};

const APP_NAME: &str = "pg-provision";

/// Captures provisioning settings supplied via environment, flags or files.
///
/// # Examples
/// ```
/// use pg_provision::ProvisionCfg;
///
/// let cfg = ProvisionCfg {
///     database: Some("app_db".into()),
///     role_name: Some("app_user".into()),
///     start_service_if_needed: Some(false),
///     ..ProvisionCfg::default()
/// };
/// let plan = cfg.to_plan()?;
/// assert_eq!(plan.request().database().owner_role(), "app_user");
/// # Ok::<(), pg_provision::ConfigError>(())
/// ```
#[derive(Clone, Serialize, Deserialize, OrthoConfig, Default)]
#[ortho_config(prefix = "PGPROV")]
pub struct ProvisionCfg {
    /// Server host; libpq defaults apply when absent.
    pub host: Option<String>,
    /// Server port; libpq defaults apply when absent.
    pub port: Option<u16>,
    /// Administrative user the client connects as.
    pub admin_name: Option<String>,
    /// Password for the administrative user. Ignored without `admin_name`.
    pub admin_password: Option<String>,
    /// Database to provision.
    pub database: Option<String>,
    /// Role owning the database.
    pub role_name: Option<String>,
    /// Password for the role; generated when absent.
    pub role_password: Option<String>,
    /// Overwrite the password of a pre-existing role.
    pub always_replace_role_password: Option<bool>,
    /// Run the service start command before connecting.
    pub start_service_if_needed: Option<bool>,
    /// Command line used to start the database service.
    pub service_start_command: Option<String>,
    /// Drop and recreate a pre-existing database.
    pub drop_db_if_exist: Option<bool>,
    /// Script applied when the database already existed.
    pub update_input: Option<Utf8PathBuf>,
    /// Script applied when the database was created in this run.
    pub creation_input: Option<Utf8PathBuf>,
    /// Client program, resolved through `PATH` unless it contains a separator.
    pub client_binary_path: Option<String>,
    /// Local account the client runs as via `sudo -u`.
    pub sudo_account: Option<String>,
    /// Database used to connect before the target exists.
    pub initial_connection_database: Option<String>,
    /// Length of generated role passwords.
    pub password_length: Option<usize>,
    /// Result rendering: `plain` or `json`.
    pub output_format: Option<String>,
    /// Client backend: `cli`, or `native` with the `native-client` feature.
    pub backend: Option<String>,
    /// Emit debug-level diagnostics.
    pub debug: Option<bool>,
}

impl fmt::Debug for ProvisionCfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = |value: &Option<String>| value.as_ref().map(|_| "***");
        f.debug_struct("ProvisionCfg")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("admin_name", &self.admin_name)
            .field("admin_password", &redacted(&self.admin_password))
            .field("database", &self.database)
            .field("role_name", &self.role_name)
            .field("role_password", &redacted(&self.role_password))
            .field(
                "always_replace_role_password",
                &self.always_replace_role_password,
            )
            .field("start_service_if_needed", &self.start_service_if_needed)
            .field("service_start_command", &self.service_start_command)
            .field("drop_db_if_exist", &self.drop_db_if_exist)
            .field("update_input", &self.update_input)
            .field("creation_input", &self.creation_input)
            .field("client_binary_path", &self.client_binary_path)
            .field("sudo_account", &self.sudo_account)
            .field(
                "initial_connection_database",
                &self.initial_connection_database,
            )
            .field("password_length", &self.password_length)
            .field("output_format", &self.output_format)
            .field("backend", &self.backend)
            .field("debug", &self.debug)
            .finish()
    }
}

impl ProvisionCfg {
    /// Loads configuration from environment variables without parsing CLI arguments.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] when a value cannot be parsed.
    pub fn load() -> ConfigResult<Self> {
        Self::load_from_args([OsString::from(APP_NAME)])
    }

    /// Loads configuration from `args` (program name first) layered over
    /// the environment and any discovered configuration file.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] when a flag or value cannot be parsed.
    pub fn load_from_args<I, T>(args: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::load_from_iter(args).map_err(|err| ConfigError::from(eyre!(err)))
    }

    /// Reports whether debug diagnostics were requested.
    #[must_use]
    pub fn debug_enabled(&self) -> bool {
        self.debug.unwrap_or(false)
    }

    /// Validates the configuration and applies defaults.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] naming the first invalid or missing value.
    pub fn to_plan(&self) -> ConfigResult<ProvisionPlan> {
        let database_name = required(self.database.as_deref(), "database")?;
        let role_name = required(self.role_name.as_deref(), "role_name")?;
        let initial_database = match self.initial_connection_database.as_deref() {
            Some(name) => Some(required(Some(name), "initial_connection_database")?),
            None => None,
        };
        if self.port == Some(0) {
            return Err(invalid("port must be between 1 and 65535"));
        }

        let role = self.role_spec(role_name)?;
        let database =
            DatabaseSpec::new(database_name, &role, self.drop_db_if_exist.unwrap_or(false));
        let scripts = SqlScripts::new(
            script(self.creation_input.as_deref(), "creation_input")?,
            script(self.update_input.as_deref(), "update_input")?,
        );
        let start_service = self.start_service_if_needed.unwrap_or(true);
        let service_starter = self.service_starter(start_service)?;

        let backend = self
            .backend
            .as_deref()
            .map_or(Ok(Backend::default()), str::parse::<Backend>)?;
        let sudo_account = present(self.sudo_account.as_deref());
        if let Some(account) = sudo_account.as_deref() {
            if backend == Backend::Native {
                return Err(invalid(
                    "sudo_account cannot be combined with the native backend",
                ));
            }
            resolve_account(account)?;
        }
        let client_binary = self.client_binary()?;

        let admin_name = present(self.admin_name.as_deref());
        let admin_password = admin_name
            .as_ref()
            .and(self.admin_password.clone())
            .map(SecretString::from);

        Ok(ProvisionPlan {
            target: ConnectionTarget::new(
                present(self.host.as_deref()),
                self.port,
                initial_database,
            ),
            credentials: Credentials::new(admin_name, admin_password),
            privileges: PrivilegeContext::new(sudo_account),
            client_binary,
            backend,
            service_starter,
            request: ProvisionRequest::new(role, database, scripts, start_service),
            output_format: self
                .output_format
                .as_deref()
                .map_or(Ok(OutputFormat::default()), str::parse::<OutputFormat>)?,
        })
    }

    fn role_spec(&self, name: String) -> ConfigResult<RoleSpec> {
        let replace = self.always_replace_role_password.unwrap_or(false);
        if let Some(password) = self.role_password.as_deref() {
            if password.trim().is_empty() {
                return Err(invalid("role_password must not be blank"));
            }
            return Ok(RoleSpec::new(name, SecretString::from(password), replace));
        }

        let length = self.password_length.unwrap_or(DEFAULT_PASSWORD_LENGTH);
        if length == 0 {
            return Err(invalid("password_length must be at least 1"));
        }
        Ok(RoleSpec::with_generated_password(name, length, replace))
    }

    fn service_starter(&self, start_service: bool) -> ConfigResult<CommandServiceStarter> {
        let command = self
            .service_start_command
            .as_deref()
            .unwrap_or(DEFAULT_SERVICE_START_COMMAND);
        match CommandServiceStarter::parse(command) {
            Some(starter) => Ok(starter),
            None if start_service => Err(invalid(
                "service_start_command must not be empty while start_service_if_needed is set",
            )),
            None => Ok(CommandServiceStarter::default()),
        }
    }

    fn client_binary(&self) -> ConfigResult<String> {
        let binary = match self.client_binary_path.as_deref().map(str::trim) {
            None => DEFAULT_CLIENT_BINARY,
            Some("") => return Err(invalid("client_binary_path must not be blank")),
            Some(path) => path,
        };
        if binary.contains(std::path::MAIN_SEPARATOR) {
            require_executable(Utf8Path::new(binary)).map_err(|err| {
                ConfigError::from(err.wrap_err("client_binary_path is not usable"))
            })?;
        }
        Ok(binary.to_owned())
    }
}

/// Client implementation used to reach the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Backend {
    /// Spawn the command-line client.
    #[default]
    Cli,
    /// Connect through the `postgres` driver.
    Native,
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cli" | "psql" => Ok(Self::Cli),
            "native" if cfg!(feature = "native-client") => Ok(Self::Native),
            "native" => Err(invalid(
                "the native backend requires the native-client feature",
            )),
            other => Err(invalid(format!(
                "unknown backend '{other}' (expected 'cli' or 'native')"
            ))),
        }
    }
}

/// Validated, fully-defaulted inputs for one provisioning run.
#[derive(Debug, Clone)]
pub struct ProvisionPlan {
    target: ConnectionTarget,
    credentials: Credentials,
    privileges: PrivilegeContext,
    client_binary: String,
    backend: Backend,
    service_starter: CommandServiceStarter,
    request: ProvisionRequest,
    output_format: OutputFormat,
}

impl ProvisionPlan {
    /// Returns the connection target.
    #[must_use]
    pub const fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    /// Returns the administrative credentials.
    #[must_use]
    pub const fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Returns the privilege wrapper settings.
    #[must_use]
    pub const fn privileges(&self) -> &PrivilegeContext {
        &self.privileges
    }

    /// Returns the client program.
    #[must_use]
    pub fn client_binary(&self) -> &str {
        &self.client_binary
    }

    /// Returns the selected backend.
    #[must_use]
    pub const fn backend(&self) -> Backend {
        self.backend
    }

    /// Returns the service starter used when a start is requested.
    #[must_use]
    pub const fn service_starter(&self) -> &CommandServiceStarter {
        &self.service_starter
    }

    /// Returns the desired end-state.
    #[must_use]
    pub const fn request(&self) -> &ProvisionRequest {
        &self.request
    }

    /// Returns the result rendering.
    #[must_use]
    pub const fn output_format(&self) -> OutputFormat {
        self.output_format
    }

    /// Builds the client for the selected backend.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] when the native backend cannot determine a
    /// user to connect as.
    pub fn client(&self) -> ConfigResult<Box<dyn SqlClient>> {
        match self.backend {
            Backend::Cli => Ok(Box::new(PsqlClient::new(
                &self.client_binary,
                &self.target,
                &self.credentials,
                &self.privileges,
            ))),
            #[cfg(feature = "native-client")]
            Backend::Native => crate::client::NativeClient::new(&self.target, &self.credentials)
                .map(|client| Box::new(client) as Box<dyn SqlClient>)
                .map_err(|err| ConfigError::from(eyre!(err))),
            #[cfg(not(feature = "native-client"))]
            Backend::Native => Err(invalid(
                "the native backend requires the native-client feature",
            )),
        }
    }
}

fn invalid(message: impl fmt::Display) -> ConfigError {
    ConfigError::from(eyre!("{message}"))
}

fn present(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

fn required(value: Option<&str>, field: &str) -> ConfigResult<String> {
    present(value).ok_or_else(|| invalid(format!("{field} must be provided and not blank")))
}

fn script(path: Option<&Utf8Path>, field: &str) -> ConfigResult<Option<Utf8PathBuf>> {
    let Some(path) = path else {
        return Ok(None);
    };
    require_regular_file(path)
        .map_err(|err| ConfigError::from(err.wrap_err(format!("{field} is not usable"))))?;
    Ok(Some(path.to_owned()))
}

fn resolve_account(account: &str) -> ConfigResult<()> {
    match User::from_name(account) {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(invalid(format!(
            "sudo_account '{account}' does not name a local account"
        ))),
        Err(err) => Err(invalid(format!(
            "failed to resolve sudo_account '{account}': {err}"
        ))),
    }
}
