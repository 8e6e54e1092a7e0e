//! Driver-backed [`SqlClient`] for hosts where linking a client library is
//! preferable to spawning `psql`.

use camino::Utf8Path;
use nix::unistd::{User, getuid};
use postgres::{Client, Config, NoTls, SimpleQueryMessage};
use secrecy::ExposeSecret;
use tracing::debug;

use super::{ConnectionTarget, Credentials, SqlClient};
use crate::error::{ClientError, ClientResult};
use crate::observability::LOG_TARGET;
use crate::sql;

/// Connects through the `postgres` crate instead of the command-line client.
///
/// Output mirrors `psql -t -A`: rows are newline separated and columns are
/// joined with `|`.
#[derive(Debug, Clone)]
pub struct NativeClient {
    config: Config,
    initial_database: String,
}

impl NativeClient {
    /// Builds a client from the connection target and credentials.
    ///
    /// Without an admin name the current operating-system account name is
    /// used, matching libpq's default.
    ///
    /// # Errors
    /// Returns a [`ClientError`] when no user name can be determined.
    pub fn new(target: &ConnectionTarget, credentials: &Credentials) -> ClientResult<Self> {
        let mut config = Config::new();
        if let Some(host) = target.host() {
            config.host(host);
        }
        if let Some(port) = target.port() {
            config.port(port);
        }
        let user = match credentials.admin_name() {
            Some(name) => name.to_owned(),
            None => ambient_user_name()?,
        };
        config.user(&user);
        if credentials.admin_name().is_some() {
            if let Some(password) = credentials.admin_password() {
                config.password(password.expose_secret());
            }
        }
        Ok(Self {
            config,
            initial_database: target.initial_database().to_owned(),
        })
    }

    fn connect(&self, database: &str) -> ClientResult<Client> {
        let mut config = self.config.clone();
        config.dbname(database);
        config
            .connect(NoTls)
            .map_err(|err| failure(format!("connect to {database}"), &err))
    }
}

impl SqlClient for NativeClient {
    fn initial_database(&self) -> &str {
        &self.initial_database
    }

    fn query(&self, sql: &str, database: Option<&str>) -> ClientResult<String> {
        let database = database.unwrap_or(&self.initial_database);
        debug!(target: LOG_TARGET, database, sql = %sql::redact(sql), "running native query");
        let mut client = self.connect(database)?;
        let messages = client
            .simple_query(sql)
            .map_err(|err| failure(sql::redact(sql), &err))?;

        let rows: Vec<String> = messages
            .iter()
            .filter_map(|message| match message {
                SimpleQueryMessage::Row(row) => Some(
                    (0..row.len())
                        .map(|idx| row.get(idx).unwrap_or_default())
                        .collect::<Vec<_>>()
                        .join("|"),
                ),
                _ => None,
            })
            .collect();
        Ok(rows.join("\n").trim_end().to_owned())
    }

    fn execute_file(&self, script: &Utf8Path, database: &str) -> ClientResult<()> {
        debug!(target: LOG_TARGET, database, script = %script, "running native script");
        let contents = std::fs::read_to_string(script.as_std_path())
            .map_err(|err| ClientError::spawn(format!("read {script}"), &err))?;
        let mut client = self.connect(database)?;
        client
            .batch_execute(&contents)
            .map_err(|err| failure(format!("execute {script}"), &err))
    }
}

fn ambient_user_name() -> ClientResult<String> {
    match User::from_uid(getuid()) {
        Ok(Some(user)) => Ok(user.name),
        Ok(None) => Err(ClientError::exited(
            "resolve current account",
            None,
            "no account entry for the current uid",
        )),
        Err(err) => Err(ClientError::exited(
            "resolve current account",
            None,
            err.to_string(),
        )),
    }
}

fn failure(context: impl Into<String>, err: &postgres::Error) -> ClientError {
    let detail = err
        .as_db_error()
        .map_or_else(|| err.to_string(), |db| db.message().to_owned());
    ClientError::exited(context, None, detail)
}
