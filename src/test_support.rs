//! Internal helpers re-exported for integration tests.
//!
//! [`ScriptedServer`] simulates the role and database catalogs behind the
//! [`SqlClient`] contract. It understands exactly the statements the
//! provisioning pipeline issues, records every command, and can be told to
//! fail at a given kind of statement so error paths are observable without
//! a running server.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::{Result as IoResult, Write};
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::Level;
use tracing::subscriber::with_default;
use tracing_subscriber::fmt;

use crate::client::{DEFAULT_INITIAL_DATABASE, SqlClient};
use crate::error::{ClientError, ClientResult};
use crate::sql::CONNECTIVITY_CHECK;

const ROLE_PROBE: &str = "SELECT 1 FROM pg_roles WHERE rolname = ";
const DATABASE_PROBE: &str = "SELECT 1 FROM pg_database WHERE datname = ";
const CREATE_ROLE: &str = "CREATE ROLE ";
const ALTER_ROLE: &str = "ALTER ROLE ";
const DROP_DATABASE: &str = "DROP DATABASE ";
const CREATE_DATABASE: &str = "CREATE DATABASE ";

/// Classifies the statements the scripted server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// The trivial connectivity query.
    Connectivity,
    /// Role catalog probe.
    RoleProbe,
    /// Database catalog probe.
    DatabaseProbe,
    /// Role creation.
    CreateRole,
    /// Role password update.
    AlterRole,
    /// Database drop.
    DropDatabase,
    /// Database creation.
    CreateDatabase,
    /// Script file execution.
    ExecuteFile,
    /// Anything else.
    Other,
}

impl StatementKind {
    /// Reports whether statements of this kind change server state.
    #[must_use]
    pub const fn is_mutation(self) -> bool {
        matches!(
            self,
            Self::CreateRole
                | Self::AlterRole
                | Self::DropDatabase
                | Self::CreateDatabase
                | Self::ExecuteFile
                | Self::Other
        )
    }

    fn classify(sql: &str) -> Self {
        if sql == CONNECTIVITY_CHECK {
            Self::Connectivity
        } else if sql.starts_with(ROLE_PROBE) {
            Self::RoleProbe
        } else if sql.starts_with(DATABASE_PROBE) {
            Self::DatabaseProbe
        } else if sql.starts_with(CREATE_ROLE) {
            Self::CreateRole
        } else if sql.starts_with(ALTER_ROLE) {
            Self::AlterRole
        } else if sql.starts_with(DROP_DATABASE) {
            Self::DropDatabase
        } else if sql.starts_with(CREATE_DATABASE) {
            Self::CreateDatabase
        } else {
            Self::Other
        }
    }
}

/// A command received by the scripted server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCommand {
    /// A `-c` style query.
    Query {
        /// Database the query ran against.
        database: String,
        /// SQL text as received.
        sql: String,
    },
    /// A `-f` style script execution.
    File {
        /// Database the script ran against.
        database: String,
        /// Script path as received.
        script: Utf8PathBuf,
    },
}

impl RecordedCommand {
    /// Returns the database the command ran against.
    #[must_use]
    pub fn database(&self) -> &str {
        match self {
            Self::Query { database, .. } | Self::File { database, .. } => database,
        }
    }

    /// Returns the statement kind of the command.
    #[must_use]
    pub fn kind(&self) -> StatementKind {
        match self {
            Self::Query { sql, .. } => StatementKind::classify(sql),
            Self::File { .. } => StatementKind::ExecuteFile,
        }
    }

    /// Returns the SQL text for queries.
    #[must_use]
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Query { sql, .. } => Some(sql),
            Self::File { .. } => None,
        }
    }

    /// Returns the script path for file executions.
    #[must_use]
    pub fn script(&self) -> Option<&Utf8Path> {
        match self {
            Self::Query { .. } => None,
            Self::File { script, .. } => Some(script),
        }
    }
}

#[derive(Debug, Default)]
struct ServerState {
    roles: BTreeMap<String, String>,
    databases: BTreeMap<String, String>,
    commands: Vec<RecordedCommand>,
    failures: Vec<StatementKind>,
}

/// In-memory stand-in for a database server reached through a client.
#[derive(Debug)]
pub struct ScriptedServer {
    initial_database: String,
    state: RefCell<ServerState>,
}

impl Default for ScriptedServer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedServer {
    /// Creates an empty server whose initial database is `template1`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            initial_database: DEFAULT_INITIAL_DATABASE.to_owned(),
            state: RefCell::new(ServerState::default()),
        }
    }

    /// Uses `name` as the database queries fall back to.
    #[must_use]
    pub fn with_initial_database(mut self, name: &str) -> Self {
        name.clone_into(&mut self.initial_database);
        self
    }

    /// Seeds a role with `password`.
    #[must_use]
    pub fn with_role(self, name: &str, password: &str) -> Self {
        self.insert_role(name, password);
        self
    }

    /// Seeds a database owned by `owner`.
    #[must_use]
    pub fn with_database(self, name: &str, owner: &str) -> Self {
        self.insert_database(name, owner);
        self
    }

    /// Makes every statement of `kind` fail with exit code 1.
    #[must_use]
    pub fn failing_on(self, kind: StatementKind) -> Self {
        self.state.borrow_mut().failures.push(kind);
        self
    }

    /// Adds or replaces a role while the server is in use.
    pub fn insert_role(&self, name: &str, password: &str) {
        self.state
            .borrow_mut()
            .roles
            .insert(name.to_owned(), password.to_owned());
    }

    /// Adds or replaces a database while the server is in use.
    pub fn insert_database(&self, name: &str, owner: &str) {
        self.state
            .borrow_mut()
            .databases
            .insert(name.to_owned(), owner.to_owned());
    }

    /// Returns the stored password of role `name`.
    #[must_use]
    pub fn role_password(&self, name: &str) -> Option<String> {
        self.state.borrow().roles.get(name).cloned()
    }

    /// Returns the owner of database `name`.
    #[must_use]
    pub fn database_owner(&self, name: &str) -> Option<String> {
        self.state.borrow().databases.get(name).cloned()
    }

    /// Returns every command received so far.
    #[must_use]
    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.state.borrow().commands.clone()
    }

    /// Returns the kinds of every command received so far.
    #[must_use]
    pub fn command_kinds(&self) -> Vec<StatementKind> {
        self.state
            .borrow()
            .commands
            .iter()
            .map(RecordedCommand::kind)
            .collect()
    }

    /// Returns the kinds of the state-changing commands received so far.
    #[must_use]
    pub fn mutations(&self) -> Vec<StatementKind> {
        self.command_kinds()
            .into_iter()
            .filter(|kind| kind.is_mutation())
            .collect()
    }

    /// Forgets the recorded commands, keeping catalog state.
    pub fn clear_commands(&self) {
        self.state.borrow_mut().commands.clear();
    }

    fn record(&self, command: RecordedCommand) -> ClientResult<()> {
        let kind = command.kind();
        let database = command.database().to_owned();
        let mut state = self.state.borrow_mut();
        state.commands.push(command);
        if state.failures.contains(&kind) {
            return Err(ClientError::exited(
                format!("scripted {kind:?}"),
                Some(1),
                "ERROR:  injected failure",
            ));
        }
        if database != self.initial_database && !state.databases.contains_key(&database) {
            return Err(ClientError::exited(
                format!("connect to {database}"),
                Some(2),
                format!("FATAL:  database \"{database}\" does not exist"),
            ));
        }
        Ok(())
    }

    fn apply(&self, sql: &str) -> ClientResult<String> {
        let mut state = self.state.borrow_mut();
        match StatementKind::classify(sql) {
            StatementKind::Connectivity => Ok(String::new()),
            StatementKind::RoleProbe => {
                let name = literal_after(sql, ROLE_PROBE)?;
                Ok(presence(state.roles.contains_key(&name)))
            }
            StatementKind::DatabaseProbe => {
                let name = literal_after(sql, DATABASE_PROBE)?;
                Ok(presence(state.databases.contains_key(&name)))
            }
            StatementKind::CreateRole => {
                let (name, rest) = ident_after(sql, CREATE_ROLE)?;
                let password = literal_after(rest, " WITH LOGIN PASSWORD ")?;
                if state.roles.contains_key(&name) {
                    return Err(server_error(format!("role \"{name}\" already exists")));
                }
                state.roles.insert(name, password);
                Ok(String::new())
            }
            StatementKind::AlterRole => {
                let (name, rest) = ident_after(sql, ALTER_ROLE)?;
                let password = literal_after(rest, " WITH PASSWORD ")?;
                match state.roles.get_mut(&name) {
                    Some(stored) => {
                        *stored = password;
                        Ok(String::new())
                    }
                    None => Err(server_error(format!("role \"{name}\" does not exist"))),
                }
            }
            StatementKind::DropDatabase => {
                let (name, _) = ident_after(sql, DROP_DATABASE)?;
                match state.databases.remove(&name) {
                    Some(_) => Ok(String::new()),
                    None => Err(server_error(format!("database \"{name}\" does not exist"))),
                }
            }
            StatementKind::CreateDatabase => {
                let (name, rest) = ident_after(sql, CREATE_DATABASE)?;
                let (owner, _) = ident_after(rest, " OWNER ")?;
                if state.databases.contains_key(&name) {
                    return Err(server_error(format!("database \"{name}\" already exists")));
                }
                if !state.roles.contains_key(&owner) {
                    return Err(server_error(format!("role \"{owner}\" does not exist")));
                }
                state.databases.insert(name, owner);
                Ok(String::new())
            }
            StatementKind::ExecuteFile | StatementKind::Other => Ok(String::new()),
        }
    }
}

impl SqlClient for ScriptedServer {
    fn initial_database(&self) -> &str {
        &self.initial_database
    }

    fn query(&self, sql: &str, database: Option<&str>) -> ClientResult<String> {
        let database = database.unwrap_or(&self.initial_database).to_owned();
        self.record(RecordedCommand::Query {
            database,
            sql: sql.to_owned(),
        })?;
        self.apply(sql)
    }

    fn execute_file(&self, script: &Utf8Path, database: &str) -> ClientResult<()> {
        self.record(RecordedCommand::File {
            database: database.to_owned(),
            script: script.to_owned(),
        })
    }
}

fn presence(exists: bool) -> String {
    if exists { "1".to_owned() } else { String::new() }
}

fn server_error(message: String) -> ClientError {
    ClientError::exited("scripted statement", Some(1), format!("ERROR:  {message}"))
}

fn syntax_error(sql: &str) -> ClientError {
    ClientError::exited(
        "scripted statement",
        Some(1),
        format!("ERROR:  syntax error in {sql}"),
    )
}

fn literal_after(sql: &str, prefix: &str) -> ClientResult<String> {
    sql.strip_prefix(prefix)
        .and_then(parse_literal)
        .map(|(value, _)| value)
        .ok_or_else(|| syntax_error(sql))
}

fn ident_after<'a>(sql: &'a str, prefix: &str) -> ClientResult<(String, &'a str)> {
    sql.strip_prefix(prefix)
        .and_then(parse_ident)
        .ok_or_else(|| syntax_error(sql))
}

/// Parses a leading quoted literal, returning its value and the remainder.
fn parse_literal(input: &str) -> Option<(String, &str)> {
    let (escaped, body) = match input.strip_prefix("E'") {
        Some(rest) => (true, rest),
        None => (false, input.strip_prefix('\'')?),
    };
    let mut value = String::new();
    let mut chars = body.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        match ch {
            '\'' => {
                if chars.next_if(|&(_, next)| next == '\'').is_some() {
                    value.push('\'');
                } else {
                    return Some((value, body.get(idx + 1..)?));
                }
            }
            '\\' if escaped => {
                let (_, next) = chars.next()?;
                value.push(next);
            }
            other => value.push(other),
        }
    }
    None
}

/// Parses a leading quoted identifier, returning its name and the remainder.
fn parse_ident(input: &str) -> Option<(String, &str)> {
    let body = input.strip_prefix('"')?;
    let mut name = String::new();
    let mut chars = body.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        if ch == '"' {
            if chars.next_if(|&(_, next)| next == '"').is_some() {
                name.push('"');
            } else {
                return Some((name, body.get(idx + 1..)?));
            }
        } else {
            name.push(ch);
        }
    }
    None
}

struct BufferWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        let mut guard = self
            .buffer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> IoResult<()> {
        Ok(())
    }
}

/// Runs `action`, capturing debug-level logs and returning them alongside
/// the closure result.
///
/// # Examples
/// ```
/// use pg_provision::test_support::capture_debug_logs;
///
/// let (logs, value) = capture_debug_logs(|| {
///     tracing::info!("something happened");
///     41 + 1
/// });
/// assert!(logs.iter().any(|line| line.contains("something happened")));
/// assert_eq!(value, 42);
/// ```
#[must_use]
pub fn capture_debug_logs<F, R>(action: F) -> (Vec<String>, R)
where
    F: FnOnce() -> R,
{
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let writer_buffer = Arc::clone(&buffer);
    let subscriber = fmt()
        .with_max_level(Level::DEBUG)
        .without_time()
        .with_ansi(false)
        .with_writer(move || BufferWriter {
            buffer: Arc::clone(&writer_buffer),
        })
        .finish();

    let result = with_default(subscriber, action);

    let bytes = buffer
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .clone();
    let content = String::from_utf8_lossy(&bytes).into_owned();
    let logs = content.lines().map(str::to_owned).collect();
    (logs, result)
}
