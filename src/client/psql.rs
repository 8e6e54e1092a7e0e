//! Drives the `psql` command-line client as a subprocess.

use std::process::{Command, Stdio};

use camino::Utf8Path;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use super::output::{decode_stderr, decode_stdout};
use super::{
    ConnectionTarget, Credentials, PrivilegeContext, SqlClient, connection_keys, keyword,
    redact_connection_keys,
};
use crate::error::{ClientError, ClientResult};
use crate::observability::LOG_TARGET;
use crate::sql;

const PRIVILEGE_WRAPPER: &str = "sudo";

/// Fully constructed base invocation shared by every client call.
///
/// The template is built once and never mutated; each call appends its own
/// arguments to a fresh [`Command`].
#[derive(Debug, Clone)]
pub struct InvocationTemplate {
    program: String,
    leading_args: Vec<String>,
    connection_keys: Option<SecretString>,
}

impl InvocationTemplate {
    /// Builds the template for `client_binary`, wrapping it in
    /// `sudo -u <account>` when `privileges` names an account.
    #[must_use]
    pub fn new(
        client_binary: &str,
        privileges: &PrivilegeContext,
        connection_keys: Option<SecretString>,
    ) -> Self {
        let (program, leading_args) = match privileges.run_as_account() {
            Some(account) => (
                PRIVILEGE_WRAPPER.to_owned(),
                vec!["-u".to_owned(), account.to_owned(), client_binary.to_owned()],
            ),
            None => (client_binary.to_owned(), Vec::new()),
        };
        Self {
            program,
            leading_args,
            connection_keys,
        }
    }

    /// Returns the program that is executed directly.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Returns the value passed to `-d` for `database`.
    ///
    /// With connection keys present the value is a conninfo string, which
    /// `psql` expands in place of a bare database name.
    #[must_use]
    pub fn database_arg(&self, database: &str) -> String {
        match &self.connection_keys {
            Some(keys) => format!("{} {}", keyword("dbname", database), keys.expose_secret()),
            None if is_conninfo(database) => keyword("dbname", database),
            None => database.to_owned(),
        }
    }

    /// Returns the complete argument vector for a call against `database`,
    /// secrets included.
    #[must_use]
    pub fn argv(&self, database: &str, args: &[&str]) -> Vec<String> {
        let mut argv = self.leading_args.clone();
        argv.push("-d".to_owned());
        argv.push(self.database_arg(database));
        argv.extend(args.iter().map(|arg| (*arg).to_owned()));
        argv
    }

    /// Renders the invocation for diagnostics with passwords masked.
    #[must_use]
    pub fn describe(&self, database: &str, args: &[&str]) -> String {
        let mut parts = Vec::with_capacity(self.leading_args.len() + args.len() + 3);
        parts.push(self.program.clone());
        parts.extend(self.leading_args.iter().cloned());
        parts.push("-d".to_owned());
        parts.push(redact_connection_keys(&self.database_arg(database)));
        let mut previous = "";
        for arg in args {
            if previous == "-c" {
                parts.push(sql::redact(arg));
            } else {
                parts.push((*arg).to_owned());
            }
            previous = *arg;
        }
        parts.join(" ")
    }

    fn command(&self, database: &str, args: &[&str]) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(self.argv(database, args))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

/// A bare name `psql` would itself expand as a connection string.
fn is_conninfo(database: &str) -> bool {
    database.contains('=')
        || database.starts_with("postgresql://")
        || database.starts_with("postgres://")
}

/// [`SqlClient`] backed by the `psql` program.
///
/// # Examples
/// ```no_run
/// use pg_provision::{ConnectionTarget, Credentials, PrivilegeContext, PsqlClient, SqlClient};
///
/// # fn main() -> pg_provision::ClientResult<()> {
/// let client = PsqlClient::new(
///     "psql",
///     &ConnectionTarget::default(),
///     &Credentials::default(),
///     &PrivilegeContext::new(Some("postgres".into())),
/// );
/// let version = client.query("SHOW server_version", None)?;
/// assert!(!version.is_empty());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PsqlClient {
    template: InvocationTemplate,
    initial_database: String,
}

impl PsqlClient {
    /// Builds a client for `client_binary` connecting to `target`.
    #[must_use]
    pub fn new(
        client_binary: &str,
        target: &ConnectionTarget,
        credentials: &Credentials,
        privileges: &PrivilegeContext,
    ) -> Self {
        let keys = connection_keys(target, credentials);
        Self {
            template: InvocationTemplate::new(client_binary, privileges, keys),
            initial_database: target.initial_database().to_owned(),
        }
    }

    /// Returns the invocation template shared by every call.
    #[must_use]
    pub const fn template(&self) -> &InvocationTemplate {
        &self.template
    }

    /// Runs the client against `database` with `args` appended to the base
    /// invocation and returns standard output with trailing whitespace
    /// trimmed.
    ///
    /// # Errors
    /// Returns a [`ClientError`] when the program cannot be executed or exits
    /// unsuccessfully; the error carries the exit code and standard error.
    pub fn invoke(&self, database: &str, args: &[&str]) -> ClientResult<String> {
        let description = self.template.describe(database, args);
        debug!(target: LOG_TARGET, command = %description, "invoking database client");

        let output = self
            .template
            .command(database, args)
            .output()
            .map_err(|err| ClientError::spawn(description.clone(), &err))?;

        if output.status.success() {
            Ok(decode_stdout(&output.stdout))
        } else {
            let stderr = decode_stderr(&output.stderr);
            debug!(
                target: LOG_TARGET,
                command = %description,
                exit_code = ?output.status.code(),
                "database client failed"
            );
            Err(ClientError::exited(description, output.status.code(), stderr))
        }
    }
}

impl SqlClient for PsqlClient {
    fn initial_database(&self) -> &str {
        &self.initial_database
    }

    fn query(&self, sql: &str, database: Option<&str>) -> ClientResult<String> {
        let database = database.unwrap_or(&self.initial_database);
        self.invoke(database, &["-t", "-A", "-c", sql])
    }

    fn execute_file(&self, script: &Utf8Path, database: &str) -> ClientResult<()> {
        self.invoke(database, &["-v", "ON_ERROR_STOP=1", "-f", script.as_str()])
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn keys(raw: &str) -> Option<SecretString> {
        Some(SecretString::from(raw))
    }

    #[test]
    fn plain_template_runs_client_directly() {
        let template = InvocationTemplate::new("psql", &PrivilegeContext::default(), None);
        assert_eq!(template.program(), "psql");
        assert_eq!(template.argv("template1", &["-t"]), ["-d", "template1", "-t"]);
    }

    #[test]
    fn privileged_template_wraps_with_sudo() {
        let privileges = PrivilegeContext::new(Some("_postgres".into()));
        let template = InvocationTemplate::new("/usr/bin/psql", &privileges, keys("port=5432"));
        assert_eq!(template.program(), "sudo");
        assert_eq!(
            template.argv("template1", &[]),
            ["-u", "_postgres", "/usr/bin/psql", "-d", "dbname=template1 port=5432"]
        );
    }

    #[rstest]
    #[case(None, "app_db", "app_db")]
    #[case(None, "odd=name", "dbname=odd=name")]
    #[case(None, "postgres://elsewhere", "dbname=postgres://elsewhere")]
    #[case(Some("host=db.local port=6543"), "app_db", "dbname=app_db host=db.local port=6543")]
    #[case(Some("port=1"), "my db", "dbname='my db' port=1")]
    fn connection_keys_become_part_of_the_database_argument(
        #[case] connection_keys: Option<&str>,
        #[case] database: &str,
        #[case] expected: &str,
    ) {
        let template = InvocationTemplate::new(
            "psql",
            &PrivilegeContext::default(),
            connection_keys.map(SecretString::from),
        );
        assert_eq!(template.database_arg(database), expected);
    }

    #[test]
    fn template_is_reused_without_accumulating_arguments() {
        let template = InvocationTemplate::new("psql", &PrivilegeContext::default(), None);
        let first = template.argv("app_db", &["-c", "SELECT 1"]);
        let second = template.argv("app_db", &["-c", "SELECT 2"]);
        assert_eq!(first, ["-d", "app_db", "-c", "SELECT 1"]);
        assert_eq!(second, ["-d", "app_db", "-c", "SELECT 2"]);
    }

    #[test]
    fn description_masks_secrets() {
        let template = InvocationTemplate::new(
            "psql",
            &PrivilegeContext::default(),
            keys("user=alice password=secret host=db.local"),
        );
        let description = template.describe(
            "template1",
            &["-c", "ALTER ROLE \"app\" WITH PASSWORD 'hunter2'"],
        );
        assert_eq!(
            description,
            "psql -d dbname=template1 user=alice password=*** host=db.local -c ALTER ROLE \"app\" WITH PASSWORD ***"
        );
        assert!(!description.contains("hunter2"));
        assert!(!description.contains("secret"));
    }

    #[test]
    fn client_uses_target_initial_database() {
        let target = ConnectionTarget::new(None, None, Some("postgres".into()));
        let client = PsqlClient::new(
            "psql",
            &target,
            &Credentials::default(),
            &PrivilegeContext::default(),
        );
        assert_eq!(client.initial_database(), "postgres");
    }
}
