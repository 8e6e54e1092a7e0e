//! Client invocation contract and the connection data it is built from.
//!
//! The provisioning core treats the database client as the authoritative
//! oracle for server state. [`SqlClient`] captures the contract; the
//! default implementation, [`PsqlClient`], drives the `psql` command-line
//! program, and the optional `native-client` feature offers a driver-backed
//! alternative with identical semantics.

use camino::Utf8Path;
use secrecy::{ExposeSecret, SecretString};

use crate::error::ClientResult;

#[cfg(feature = "native-client")]
mod native;
mod output;
mod psql;

#[cfg(feature = "native-client")]
pub use native::NativeClient;
pub use psql::{InvocationTemplate, PsqlClient};

/// Database used to open connections when none is named explicitly.
pub const DEFAULT_INITIAL_DATABASE: &str = "template1";

/// Client program used when no explicit path is configured.
pub const DEFAULT_CLIENT_BINARY: &str = "psql";

/// Executes SQL against the server and reports raw textual results.
///
/// Implementations must not cache: every call reflects the server state at
/// the moment it runs.
pub trait SqlClient {
    /// Returns the database used when a query names none.
    fn initial_database(&self) -> &str;

    /// Runs `sql` in tuples-only, unaligned mode against `database` (or the
    /// initial database) and returns the output with trailing whitespace
    /// removed.
    ///
    /// # Errors
    /// Returns a [`crate::ClientError`] when the client cannot run or reports
    /// failure.
    fn query(&self, sql: &str, database: Option<&str>) -> ClientResult<String>;

    /// Executes the SQL script at `script` against `database`.
    ///
    /// # Errors
    /// Returns a [`crate::ClientError`] when the client cannot run or reports
    /// failure.
    fn execute_file(&self, script: &Utf8Path, database: &str) -> ClientResult<()>;
}

impl<C: SqlClient + ?Sized> SqlClient for Box<C> {
    fn initial_database(&self) -> &str {
        (**self).initial_database()
    }

    fn query(&self, sql: &str, database: Option<&str>) -> ClientResult<String> {
        (**self).query(sql, database)
    }

    fn execute_file(&self, script: &Utf8Path, database: &str) -> ClientResult<()> {
        (**self).execute_file(script, database)
    }
}

/// Identifies where to connect before the target database necessarily
/// exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    host: Option<String>,
    port: Option<u16>,
    initial_database: String,
}

impl ConnectionTarget {
    /// Creates a target; `initial_database` falls back to
    /// [`DEFAULT_INITIAL_DATABASE`] when absent.
    #[must_use]
    pub fn new(host: Option<String>, port: Option<u16>, initial_database: Option<String>) -> Self {
        Self {
            host,
            port,
            initial_database: initial_database
                .unwrap_or_else(|| DEFAULT_INITIAL_DATABASE.to_owned()),
        }
    }

    /// Returns the configured host or socket directory.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Returns the configured port.
    #[must_use]
    pub const fn port(&self) -> Option<u16> {
        self.port
    }

    /// Returns the bootstrap database name.
    #[must_use]
    pub fn initial_database(&self) -> &str {
        &self.initial_database
    }
}

impl Default for ConnectionTarget {
    fn default() -> Self {
        Self::new(None, None, None)
    }
}

/// Administrative credentials used to connect; absent values defer to the
/// ambient operating-system identity.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    admin_name: Option<String>,
    admin_password: Option<SecretString>,
}

impl Credentials {
    /// Creates credentials from optional parts.
    #[must_use]
    pub const fn new(admin_name: Option<String>, admin_password: Option<SecretString>) -> Self {
        Self {
            admin_name,
            admin_password,
        }
    }

    /// Returns the administrative account name.
    #[must_use]
    pub fn admin_name(&self) -> Option<&str> {
        self.admin_name.as_deref()
    }

    /// Returns the administrative password.
    #[must_use]
    pub const fn admin_password(&self) -> Option<&SecretString> {
        self.admin_password.as_ref()
    }
}

/// Operating-system account every client invocation is wrapped to run as.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrivilegeContext {
    run_as_account: Option<String>,
}

impl PrivilegeContext {
    /// Creates a context; `None` runs invocations as the calling identity.
    #[must_use]
    pub const fn new(run_as_account: Option<String>) -> Self {
        Self { run_as_account }
    }

    /// Returns the account invocations run as, if any.
    #[must_use]
    pub fn run_as_account(&self) -> Option<&str> {
        self.run_as_account.as_deref()
    }
}

/// Builds the libpq connection keys string from the available inputs.
///
/// Tokens appear in `user`, `password`, `host`, `port` order and are
/// space-joined. The password only contributes when an admin name is
/// present. Returns `None` when no token would be emitted, so callers never
/// pass a blank connection argument.
///
/// # Examples
/// ```
/// use pg_provision::{ConnectionTarget, Credentials, connection_keys};
/// use secrecy::{ExposeSecret, SecretString};
///
/// let target = ConnectionTarget::new(Some("db.local".into()), Some(5432), None);
/// let creds = Credentials::new(Some("alice".into()), Some(SecretString::from("secret")));
/// let keys = connection_keys(&target, &creds).map(|k| k.expose_secret().to_owned());
/// assert_eq!(
///     keys.as_deref(),
///     Some("user=alice password=secret host=db.local port=5432")
/// );
/// assert!(connection_keys(&ConnectionTarget::default(), &Credentials::default()).is_none());
/// ```
#[must_use]
pub fn connection_keys(target: &ConnectionTarget, credentials: &Credentials) -> Option<SecretString> {
    let mut tokens = Vec::with_capacity(4);
    if let Some(user) = credentials.admin_name().filter(|name| !name.is_empty()) {
        tokens.push(keyword("user", user));
        if let Some(password) = credentials
            .admin_password()
            .map(ExposeSecret::expose_secret)
            .filter(|password| !password.is_empty())
        {
            tokens.push(keyword("password", password));
        }
    }
    if let Some(host) = target.host().filter(|host| !host.is_empty()) {
        tokens.push(keyword("host", host));
    }
    if let Some(port) = target.port() {
        tokens.push(format!("port={port}"));
    }

    if tokens.is_empty() {
        None
    } else {
        Some(SecretString::from(tokens.join(" ")))
    }
}

/// Renders `key=value`, quoting the value the way libpq expects when it
/// contains whitespace, quotes or backslashes.
pub(crate) fn keyword(key: &str, value: &str) -> String {
    let needs_quotes = value
        .chars()
        .any(|ch| ch.is_whitespace() || ch == '\'' || ch == '\\');
    if !needs_quotes {
        return format!("{key}={value}");
    }
    let mut rendered = format!("{key}='");
    for ch in value.chars() {
        if ch == '\'' || ch == '\\' {
            rendered.push('\\');
        }
        rendered.push(ch);
    }
    rendered.push('\'');
    rendered
}

/// Replaces the password value of a conninfo string for logging.
///
/// Quoted values are walked to their closing quote, so a password containing
/// `key=` text is still masked in full.
pub(crate) fn redact_connection_keys(keys: &str) -> String {
    let mut rendered = String::with_capacity(keys.len());
    let mut rest = keys;
    while let Some((key, after)) = rest.split_once('=') {
        let (value, tail) = split_value(after);
        rendered.push_str(key);
        rendered.push('=');
        if key.trim() == "password" {
            rendered.push_str("***");
        } else {
            rendered.push_str(value);
        }
        rest = tail;
    }
    rendered.push_str(rest);
    rendered
}

/// Splits a conninfo value from the text following it.
fn split_value(input: &str) -> (&str, &str) {
    if !input.starts_with('\'') {
        let end = input.find(char::is_whitespace).unwrap_or(input.len());
        return input.split_at(end);
    }
    let mut escaped = false;
    for (index, ch) in input.char_indices().skip(1) {
        match ch {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '\'' => return input.split_at(index + 1),
            _ => {}
        }
    }
    (input, "")
}
