//! Read-only probes of the server catalogs.
//!
//! Probes never cache: callers re-probe after any mutation they care about.

use tracing::info;

use crate::client::SqlClient;
use crate::error::ClientResult;
use crate::observability::LOG_TARGET;
use crate::sql;

/// Reports whether a role called `name` exists on the server.
///
/// # Errors
/// Propagates the client failure when the probe query cannot run.
pub fn role_exists<C: SqlClient + ?Sized>(client: &C, name: &str) -> ClientResult<bool> {
    let exists = !client.query(&sql::role_exists(name), None)?.is_empty();
    info!(target: LOG_TARGET, role = name, exists, "probed role");
    Ok(exists)
}

/// Reports whether a database called `name` exists on the server.
///
/// # Errors
/// Propagates the client failure when the probe query cannot run.
pub fn database_exists<C: SqlClient + ?Sized>(client: &C, name: &str) -> ClientResult<bool> {
    let exists = !client.query(&sql::database_exists(name), None)?.is_empty();
    info!(target: LOG_TARGET, database = name, exists, "probed database");
    Ok(exists)
}
