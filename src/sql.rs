//! Builds the SQL statements issued during provisioning.
//!
//! Names and passwords are always quoted explicitly rather than
//! interpolated, because the command-line client offers no way to bind
//! parameters to a `-c` command.

use secrecy::{ExposeSecret, SecretString};

/// Trivial statement used to confirm the server accepts connections.
pub(crate) const CONNECTIVITY_CHECK: &str = "SELECT 1";

/// Quotes `name` as an SQL identifier, doubling embedded double quotes.
///
/// # Examples
/// ```
/// use pg_provision::sql::quote_ident;
///
/// assert_eq!(quote_ident("app_user"), "\"app_user\"");
/// assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
/// ```
#[must_use]
pub fn quote_ident(name: &str) -> String {
    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push('"');
    for ch in name.chars() {
        if ch == '"' {
            quoted.push('"');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

/// Quotes `value` as an SQL string literal.
///
/// Single quotes are doubled. Values containing a backslash use the escape
/// string form (`E'...'`) with backslashes doubled, so the result means the
/// same thing whatever `standard_conforming_strings` is set to.
///
/// # Examples
/// ```
/// use pg_provision::sql::quote_literal;
///
/// assert_eq!(quote_literal("it's"), "'it''s'");
/// assert_eq!(quote_literal(r"a\b"), r"E'a\\b'");
/// ```
#[must_use]
pub fn quote_literal(value: &str) -> String {
    let needs_escape_form = value.contains('\\');
    let mut quoted = String::with_capacity(value.len() + 3);
    if needs_escape_form {
        quoted.push('E');
    }
    quoted.push('\'');
    for ch in value.chars() {
        match ch {
            '\'' => quoted.push_str("''"),
            '\\' => quoted.push_str("\\\\"),
            other => quoted.push(other),
        }
    }
    quoted.push('\'');
    quoted
}

pub(crate) fn role_exists(name: &str) -> String {
    format!(
        "SELECT 1 FROM pg_roles WHERE rolname = {}",
        quote_literal(name)
    )
}

pub(crate) fn database_exists(name: &str) -> String {
    format!(
        "SELECT 1 FROM pg_database WHERE datname = {}",
        quote_literal(name)
    )
}

pub(crate) fn create_role(name: &str, password: &SecretString) -> String {
    format!(
        "CREATE ROLE {} WITH LOGIN PASSWORD {}",
        quote_ident(name),
        quote_literal(password.expose_secret())
    )
}

pub(crate) fn alter_role_password(name: &str, password: &SecretString) -> String {
    format!(
        "ALTER ROLE {} WITH PASSWORD {}",
        quote_ident(name),
        quote_literal(password.expose_secret())
    )
}

pub(crate) fn drop_database(name: &str) -> String {
    format!("DROP DATABASE {}", quote_ident(name))
}

pub(crate) fn create_database(name: &str, owner: &str) -> String {
    format!(
        "CREATE DATABASE {} OWNER {}",
        quote_ident(name),
        quote_ident(owner)
    )
}

/// Masks the password literal of a role statement for diagnostics.
///
/// Statements without a `PASSWORD` clause are returned unchanged.
#[must_use]
pub fn redact(sql: &str) -> String {
    match sql.split_once(" PASSWORD ") {
        Some((head, _)) => format!("{head} PASSWORD ***"),
        None => sql.to_owned(),
    }
}
