//! Validates loading provisioning settings from the environment and flags.

use camino::Utf8PathBuf;
use color_eyre::eyre::{Result, eyre};
use pg_provision::{
    Backend, ConfigError, OutputFormat, ProvisionCfg, ProvisionError, run_with_args,
};
use rstest::rstest;
use secrecy::ExposeSecret;
use serial_test::serial;
use temp_env::with_vars;

const FIELDS: &[&str] = &[
    "PGPROV_HOST",
    "PGPROV_PORT",
    "PGPROV_ADMIN_NAME",
    "PGPROV_ADMIN_PASSWORD",
    "PGPROV_DATABASE",
    "PGPROV_ROLE_NAME",
    "PGPROV_ROLE_PASSWORD",
    "PGPROV_ALWAYS_REPLACE_ROLE_PASSWORD",
    "PGPROV_START_SERVICE_IF_NEEDED",
    "PGPROV_SERVICE_START_COMMAND",
    "PGPROV_DROP_DB_IF_EXIST",
    "PGPROV_UPDATE_INPUT",
    "PGPROV_CREATION_INPUT",
    "PGPROV_CLIENT_BINARY_PATH",
    "PGPROV_SUDO_ACCOUNT",
    "PGPROV_INITIAL_CONNECTION_DATABASE",
    "PGPROV_PASSWORD_LENGTH",
    "PGPROV_OUTPUT_FORMAT",
    "PGPROV_BACKEND",
    "PGPROV_DEBUG",
];

/// Runs `action` with every provisioning variable cleared except `overrides`.
fn with_provision_env<R>(overrides: &[(&str, &str)], action: impl FnOnce() -> R) -> R {
    let vars: Vec<(&str, Option<&str>)> = FIELDS
        .iter()
        .map(|key| {
            let value = overrides
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| *value);
            (*key, value)
        })
        .collect();
    with_vars(vars, action)
}

#[rstest]
#[serial]
fn environment_populates_configuration() -> Result<()> {
    let cfg = with_provision_env(
        &[
            ("PGPROV_HOST", "db.local"),
            ("PGPROV_PORT", "5433"),
            ("PGPROV_ADMIN_NAME", "admin"),
            ("PGPROV_ADMIN_PASSWORD", "secret"),
            ("PGPROV_DATABASE", "app_db"),
            ("PGPROV_ROLE_NAME", "app_user"),
            ("PGPROV_ROLE_PASSWORD", "Xk92aLp0Qz7w"),
            ("PGPROV_DROP_DB_IF_EXIST", "true"),
            ("PGPROV_START_SERVICE_IF_NEEDED", "false"),
            ("PGPROV_OUTPUT_FORMAT", "json"),
        ],
        ProvisionCfg::load,
    )?;

    assert_eq!(cfg.host.as_deref(), Some("db.local"));
    assert_eq!(cfg.port, Some(5433));
    assert_eq!(cfg.drop_db_if_exist, Some(true));

    let plan = cfg.to_plan()?;
    let request = plan.request();
    assert_eq!(plan.target().host(), Some("db.local"));
    assert_eq!(plan.target().port(), Some(5433));
    assert_eq!(plan.credentials().admin_name(), Some("admin"));
    assert_eq!(
        plan.credentials()
            .admin_password()
            .map(|password| password.expose_secret().to_owned()),
        Some("secret".to_owned())
    );
    assert_eq!(request.database().name(), "app_db");
    assert_eq!(request.database().owner_role(), "app_user");
    assert!(request.database().drop_if_exists());
    assert!(!request.start_service());
    assert_eq!(request.role().password().expose_secret(), "Xk92aLp0Qz7w");
    assert_eq!(plan.output_format(), OutputFormat::Json);
    assert_eq!(plan.backend(), Backend::Cli);
    Ok(())
}

#[rstest]
#[serial]
fn flags_override_environment() -> Result<()> {
    let cfg = with_provision_env(
        &[("PGPROV_DATABASE", "env_db"), ("PGPROV_ROLE_NAME", "app_user")],
        || ProvisionCfg::load_from_args(["pg-provision", "--database", "cli_db"]),
    )?;
    assert_eq!(cfg.database.as_deref(), Some("cli_db"));
    assert_eq!(cfg.role_name.as_deref(), Some("app_user"));
    Ok(())
}

#[rstest]
#[serial]
fn unparsable_port_is_a_configuration_error() {
    let result = with_provision_env(&[("PGPROV_PORT", "not-a-port")], ProvisionCfg::load);
    assert!(result.is_err());
}

#[rstest]
#[serial]
fn empty_environment_lacks_required_names() -> Result<()> {
    let cfg = with_provision_env(&[], ProvisionCfg::load)?;
    let err: ConfigError = cfg
        .to_plan()
        .err()
        .ok_or_else(|| eyre!("database and role are required"))?;
    assert!(err.to_string().contains("database must be provided"));
    Ok(())
}

#[rstest]
#[serial]
fn script_paths_are_validated_from_environment() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let script = Utf8PathBuf::from_path_buf(dir.path().join("create.sql"))
        .map_err(|path| eyre!("non UTF-8 temp path: {}", path.display()))?;
    std::fs::write(&script, "CREATE TABLE t (id int);\n")?;

    let cfg = with_provision_env(
        &[
            ("PGPROV_DATABASE", "app_db"),
            ("PGPROV_ROLE_NAME", "app_user"),
            ("PGPROV_CREATION_INPUT", script.as_str()),
        ],
        ProvisionCfg::load,
    )?;
    let plan = cfg.to_plan()?;
    assert_eq!(
        plan.request().scripts().creation(),
        Some(script.as_path())
    );
    Ok(())
}

#[rstest]
#[serial]
fn run_rejects_configuration_before_invoking_the_client() {
    let result = with_provision_env(
        &[
            ("PGPROV_ROLE_NAME", "app_user"),
            ("PGPROV_CLIENT_BINARY_PATH", "/nonexistent/pg-provision/psql"),
        ],
        || run_with_args(["pg-provision"]),
    );
    assert!(matches!(result, Err(ProvisionError::Config(_))));
}
