//! Exercises the `psql` invoker and the full pipeline against a stub client.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::{Result, ensure, eyre};
use pg_provision::{
    ConnectionTarget, Credentials, PrivilegeContext, ProvisionCfg, ProvisionError, PsqlClient,
    SqlClient, provision,
};
use rstest::{fixture, rstest};
use secrecy::{ExposeSecret, SecretString};
use serial_test::serial;
use tempfile::TempDir;

/// Records each invocation's arguments and answers catalog probes from
/// marker files, mimicking `psql -t -A` output.
const RECORDING_CLIENT: &str = r#"#!/bin/sh
dir=$(dirname "$0")
printf '%s\n' "$*" >> "$dir/invocations.log"
case "$*" in
  *pg_roles*) [ -f "$dir/role.exists" ] && echo 1 ;;
  *pg_database*) [ -f "$dir/database.exists" ] && echo 1 ;;
  *"CREATE ROLE"*) touch "$dir/role.exists" ;;
  *"CREATE DATABASE"*) touch "$dir/database.exists" ;;
esac
exit 0
"#;

/// Prints each argument on its own line so argv boundaries are observable.
const ECHO_CLIENT: &str = r#"#!/bin/sh
for arg in "$@"; do printf '%s\n' "$arg"; done
"#;

const FAILING_CLIENT: &str = r#"#!/bin/sh
echo 'psql: error: connection to server on socket failed' >&2
exit 2
"#;

struct StubClient {
    _dir: TempDir,
    root: Utf8PathBuf,
    binary: Utf8PathBuf,
}

impl StubClient {
    fn install(script: &str) -> Result<Self> {
        let dir = TempDir::new()?;
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .map_err(|path| eyre!("non UTF-8 temp path: {}", path.display()))?;
        let binary = root.join("psql");
        fs::write(&binary, script)?;
        fs::set_permissions(&binary, fs::Permissions::from_mode(0o755))?;
        Ok(Self {
            _dir: dir,
            root,
            binary,
        })
    }

    fn invocations(&self) -> Result<Vec<String>> {
        let log = self.root.join("invocations.log");
        if !log.exists() {
            return Ok(Vec::new());
        }
        Ok(fs::read_to_string(log)?.lines().map(str::to_owned).collect())
    }

    fn mark(&self, name: &str) -> Result<()> {
        fs::write(self.root.join(name), "")?;
        Ok(())
    }

    fn client(&self, target: &ConnectionTarget, credentials: &Credentials) -> PsqlClient {
        PsqlClient::new(
            self.binary.as_str(),
            target,
            credentials,
            &PrivilegeContext::default(),
        )
    }

    fn cfg(&self) -> ProvisionCfg {
        ProvisionCfg {
            database: Some("app_db".into()),
            role_name: Some("app_user".into()),
            start_service_if_needed: Some(false),
            client_binary_path: Some(self.binary.to_string()),
            ..ProvisionCfg::default()
        }
    }
}

#[fixture]
fn recording() -> StubClient {
    StubClient::install(RECORDING_CLIENT)
        .unwrap_or_else(|err| panic!("stub client should install: {err}"))
}

#[test]
#[serial]
fn connection_keys_travel_inside_the_database_argument() -> Result<()> {
    let stub = StubClient::install(ECHO_CLIENT)?;
    let target = ConnectionTarget::new(Some("db.local".into()), Some(5432), None);
    let credentials = Credentials::new(Some("alice".into()), Some(SecretString::from("secret")));
    let argv = stub.client(&target, &credentials).query("SELECT 1", None)?;

    assert_eq!(
        argv.lines().collect::<Vec<_>>(),
        [
            "-d",
            "dbname=template1 user=alice password=secret host=db.local port=5432",
            "-t",
            "-A",
            "-c",
            "SELECT 1",
        ]
    );
    Ok(())
}

/// Locates a real `psql` on `PATH`, if one is installed.
fn installed_psql() -> Option<Utf8PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .filter_map(|dir| Utf8PathBuf::from_path_buf(dir.join("psql")).ok())
        .find(|candidate| candidate.is_file())
}

#[test]
#[serial]
fn real_client_connects_to_the_configured_host() -> Result<()> {
    let Some(binary) = installed_psql() else {
        return Ok(());
    };
    let target = ConnectionTarget::new(Some("127.0.0.1".into()), Some(1), None);
    let client = PsqlClient::new(
        binary.as_str(),
        &target,
        &Credentials::default(),
        &PrivilegeContext::default(),
    );
    let Err(err) = client.query("SELECT 1", None) else {
        return Err(eyre!("nothing should be listening on port 1"));
    };
    ensure!(
        err.stderr().contains("127.0.0.1"),
        "client ignored the configured host: {}",
        err.stderr()
    );
    Ok(())
}

#[rstest]
#[serial]
fn absent_connection_data_adds_no_keys(recording: StubClient) -> Result<()> {
    recording
        .client(&ConnectionTarget::default(), &Credentials::default())
        .query("SELECT 1", Some("app_db"))?;
    assert_eq!(recording.invocations()?, ["-d app_db -t -A -c SELECT 1"]);
    Ok(())
}

#[rstest]
#[serial]
fn probe_output_is_trimmed(recording: StubClient) -> Result<()> {
    recording.mark("role.exists")?;
    let client = recording.client(&ConnectionTarget::default(), &Credentials::default());
    assert!(pg_provision::role_exists(&client, "app_user")?);
    assert!(!pg_provision::database_exists(&client, "app_db")?);
    Ok(())
}

#[rstest]
#[serial]
fn script_execution_sets_on_error_stop(recording: StubClient) -> Result<()> {
    let client = recording.client(&ConnectionTarget::default(), &Credentials::default());
    client.execute_file(Utf8Path::new("/srv/app/update.sql"), "app_db")?;
    assert_eq!(
        recording.invocations()?,
        ["-d app_db -v ON_ERROR_STOP=1 -f /srv/app/update.sql"]
    );
    Ok(())
}

#[test]
#[serial]
fn failure_carries_exit_code_and_stderr() -> Result<()> {
    let stub = StubClient::install(FAILING_CLIENT)?;
    let client = stub.client(&ConnectionTarget::default(), &Credentials::default());
    let Err(err) = client.query("SELECT 1", None) else {
        return Err(eyre!("failing client should report an error"));
    };
    assert_eq!(err.exit_code(), Some(2));
    assert_eq!(
        err.stderr(),
        "psql: error: connection to server on socket failed"
    );
    Ok(())
}

#[test]
#[serial]
fn missing_binary_has_no_exit_code() {
    let client = PsqlClient::new(
        "/nonexistent/pg-provision/psql",
        &ConnectionTarget::default(),
        &Credentials::default(),
        &PrivilegeContext::default(),
    );
    let err = client
        .query("SELECT 1", None)
        .err()
        .unwrap_or_else(|| panic!("missing binary should fail"));
    assert_eq!(err.exit_code(), None);
}

#[rstest]
#[serial]
fn pipeline_provisions_through_the_client(recording: StubClient) -> Result<()> {
    let plan = recording.cfg().to_plan()?;
    let outcome = provision(&plan)?;

    let invocations = recording.invocations()?;
    let statements: Vec<&str> = invocations
        .iter()
        .filter_map(|line| line.split_once(" -c ").map(|(_, sql)| sql))
        .collect();
    ensure!(statements.len() == 5, "unexpected invocations: {invocations:?}");
    assert_eq!(statements.first().copied(), Some("SELECT 1"));
    assert!(
        statements
            .iter()
            .any(|sql| sql.starts_with("CREATE ROLE \"app_user\" WITH LOGIN PASSWORD '"))
    );
    assert_eq!(
        statements.last().copied(),
        Some("CREATE DATABASE \"app_db\" OWNER \"app_user\"")
    );
    assert!(outcome.database_was_freshly_created());
    assert_eq!(outcome.effective_password().expose_secret().len(), 12);

    let rerun = provision(&plan)?;
    assert!(rerun.mutations().is_empty());
    assert!(!rerun.database_was_freshly_created());
    Ok(())
}

#[test]
#[serial]
fn unreachable_server_is_reported_distinctly() -> Result<()> {
    let stub = StubClient::install(FAILING_CLIENT)?;
    let plan = stub.cfg().to_plan()?;
    let err = provision(&plan)
        .err()
        .ok_or_else(|| eyre!("failing client should abort provisioning"))?;
    ensure!(
        matches!(err, ProvisionError::ServerUnreachable(_)),
        "unexpected error: {err:?}"
    );
    Ok(())
}
