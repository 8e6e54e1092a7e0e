//! Drives a server to the desired role and database end-state.
//!
//! The provisioner walks a strictly sequential pipeline: optional service
//! start, connectivity check, role resolution, database resolution, then
//! script application. Every client failure halts the run immediately and
//! nothing already applied is rolled back; re-running is the recovery path
//! because each step first probes the state it is about to change.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use secrecy::SecretString;
use tracing::{debug, error, info, info_span};

use crate::client::SqlClient;
use crate::error::{ClientResult, ProvisionError, Result};
use crate::observability::LOG_TARGET;
use crate::secret::generate_password;
use crate::service::ServiceStarter;
use crate::{probe, sql};

/// Individual actions performed while provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisionStep {
    /// Running the external service start action.
    StartService,
    /// Issuing a no-op query against the bootstrap database.
    ConnectivityCheck,
    /// Probing the role catalog.
    ProbeRole,
    /// Creating the role with its password.
    CreateRole,
    /// Replacing the password of an existing role.
    UpdateRolePassword,
    /// Probing the database catalog.
    ProbeDatabase,
    /// Dropping a pre-existing database.
    DropDatabase,
    /// Creating the database owned by the role.
    CreateDatabase,
    /// Executing the creation script against a new database.
    ApplyCreationScript,
    /// Executing the update script against an existing database.
    ApplyUpdateScript,
}

impl ProvisionStep {
    /// Returns a stable, human-readable name for the step.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StartService => "start service",
            Self::ConnectivityCheck => "connectivity check",
            Self::ProbeRole => "probe role",
            Self::CreateRole => "create role",
            Self::UpdateRolePassword => "update role password",
            Self::ProbeDatabase => "probe database",
            Self::DropDatabase => "drop database",
            Self::CreateDatabase => "create database",
            Self::ApplyCreationScript => "apply creation script",
            Self::ApplyUpdateScript => "apply update script",
        }
    }

    /// Reports whether the step changes server state.
    #[must_use]
    pub const fn is_mutation(self) -> bool {
        matches!(
            self,
            Self::CreateRole
                | Self::UpdateRolePassword
                | Self::DropDatabase
                | Self::CreateDatabase
                | Self::ApplyCreationScript
                | Self::ApplyUpdateScript
        )
    }
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phases of a provisioning run. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ProvisionState {
    /// Nothing has happened yet.
    Unstarted,
    /// The service was started if requested and the server answered.
    ServiceChecked,
    /// The role exists with the requested password policy applied.
    RoleResolved,
    /// The database exists and its freshness is known.
    DatabaseResolved,
    /// The applicable script, if any, has run.
    SqlApplied,
    /// The outcome is available.
    Done,
}

/// Desired state of the owning role.
#[derive(Debug, Clone)]
pub struct RoleSpec {
    name: String,
    password: SecretString,
    replace_password_if_exists: bool,
}

impl RoleSpec {
    /// Describes a role with a caller-supplied password.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        password: SecretString,
        replace_password_if_exists: bool,
    ) -> Self {
        Self {
            name: name.into(),
            password,
            replace_password_if_exists,
        }
    }

    /// Describes a role whose password is generated with `length`
    /// alphanumeric characters.
    #[must_use]
    pub fn with_generated_password(
        name: impl Into<String>,
        length: usize,
        replace_password_if_exists: bool,
    ) -> Self {
        Self::new(name, generate_password(length), replace_password_if_exists)
    }

    /// Returns the role name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the password the role should have.
    #[must_use]
    pub const fn password(&self) -> &SecretString {
        &self.password
    }

    /// Reports whether an existing role's password is overwritten.
    #[must_use]
    pub const fn replace_password_if_exists(&self) -> bool {
        self.replace_password_if_exists
    }
}

/// Desired state of the target database.
///
/// The owner is always taken from the [`RoleSpec`] the database is built
/// for, so the owning role is resolved before the database is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSpec {
    name: String,
    owner_role: String,
    drop_if_exists: bool,
}

impl DatabaseSpec {
    /// Describes a database owned by `owner`.
    #[must_use]
    pub fn new(name: impl Into<String>, owner: &RoleSpec, drop_if_exists: bool) -> Self {
        Self {
            name: name.into(),
            owner_role: owner.name().to_owned(),
            drop_if_exists,
        }
    }

    /// Returns the database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the owning role name.
    #[must_use]
    pub fn owner_role(&self) -> &str {
        &self.owner_role
    }

    /// Reports whether a pre-existing database is dropped and recreated.
    #[must_use]
    pub const fn drop_if_exists(&self) -> bool {
        self.drop_if_exists
    }
}

/// Which script ran after database resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    /// Script for a database created in this run.
    Creation,
    /// Script for a database that already existed.
    Update,
}

impl ScriptKind {
    /// Returns a stable, human-readable name for the script kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Creation => "creation",
            Self::Update => "update",
        }
    }

    const fn step(self) -> ProvisionStep {
        match self {
            Self::Creation => ProvisionStep::ApplyCreationScript,
            Self::Update => ProvisionStep::ApplyUpdateScript,
        }
    }
}

/// Optional SQL scripts applied after database resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlScripts {
    creation: Option<Utf8PathBuf>,
    update: Option<Utf8PathBuf>,
}

impl SqlScripts {
    /// Bundles the creation and update script paths.
    #[must_use]
    pub const fn new(creation: Option<Utf8PathBuf>, update: Option<Utf8PathBuf>) -> Self {
        Self { creation, update }
    }

    /// Returns the script run against a freshly created database.
    #[must_use]
    pub fn creation(&self) -> Option<&Utf8Path> {
        self.creation.as_deref()
    }

    /// Returns the script run against a pre-existing database.
    #[must_use]
    pub fn update(&self) -> Option<&Utf8Path> {
        self.update.as_deref()
    }

    fn select(&self, freshly_created: bool) -> (ScriptKind, Option<&Utf8Path>) {
        if freshly_created {
            (ScriptKind::Creation, self.creation())
        } else {
            (ScriptKind::Update, self.update())
        }
    }
}

/// Everything one provisioning run needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    role: RoleSpec,
    database: DatabaseSpec,
    scripts: SqlScripts,
    start_service: bool,
}

impl ProvisionRequest {
    /// Bundles the desired role and database state.
    #[must_use]
    pub const fn new(
        role: RoleSpec,
        database: DatabaseSpec,
        scripts: SqlScripts,
        start_service: bool,
    ) -> Self {
        Self {
            role,
            database,
            scripts,
            start_service,
        }
    }

    /// Returns the desired role.
    #[must_use]
    pub const fn role(&self) -> &RoleSpec {
        &self.role
    }

    /// Returns the desired database.
    #[must_use]
    pub const fn database(&self) -> &DatabaseSpec {
        &self.database
    }

    /// Returns the scripts to apply.
    #[must_use]
    pub const fn scripts(&self) -> &SqlScripts {
        &self.scripts
    }

    /// Reports whether the service start action runs first.
    #[must_use]
    pub const fn start_service(&self) -> bool {
        self.start_service
    }
}

/// Result of a successful provisioning run.
#[derive(Debug, Clone)]
pub struct ProvisioningOutcome {
    effective_password: SecretString,
    database_was_freshly_created: bool,
    applied_script: Option<ScriptKind>,
    mutations: Vec<ProvisionStep>,
}

impl ProvisioningOutcome {
    /// Returns the password the role is expected to have.
    ///
    /// When the role pre-existed and no replacement was requested this is
    /// the caller's value, unverified against the server.
    #[must_use]
    pub const fn effective_password(&self) -> &SecretString {
        &self.effective_password
    }

    /// Reports whether this run issued the create-database command.
    #[must_use]
    pub const fn database_was_freshly_created(&self) -> bool {
        self.database_was_freshly_created
    }

    /// Returns the script that ran, if any.
    #[must_use]
    pub const fn applied_script(&self) -> Option<ScriptKind> {
        self.applied_script
    }

    /// Returns the state-changing steps performed, in order.
    #[must_use]
    pub fn mutations(&self) -> &[ProvisionStep] {
        &self.mutations
    }
}

/// Sequential state machine applying a [`ProvisionRequest`].
///
/// # Examples
/// ```
/// use pg_provision::test_support::ScriptedServer;
/// use pg_provision::{
///     CommandServiceStarter, DatabaseSpec, ProvisionRequest, Provisioner, RoleSpec, SqlScripts,
/// };
///
/// # fn main() -> pg_provision::Result<()> {
/// let server = ScriptedServer::new();
/// let starter = CommandServiceStarter::default();
/// let role = RoleSpec::with_generated_password("app_user", 12, false);
/// let database = DatabaseSpec::new("app_db", &role, false);
/// let request = ProvisionRequest::new(role, database, SqlScripts::default(), false);
///
/// let outcome = Provisioner::new(&server, &starter).run(request)?;
/// assert!(outcome.database_was_freshly_created());
/// assert_eq!(server.database_owner("app_db").as_deref(), Some("app_user"));
/// # Ok(())
/// # }
/// ```
pub struct Provisioner<'a, C: SqlClient + ?Sized> {
    client: &'a C,
    starter: &'a dyn ServiceStarter,
    state: ProvisionState,
    mutations: Vec<ProvisionStep>,
}

impl<'a, C: SqlClient + ?Sized> Provisioner<'a, C> {
    /// Creates a provisioner issuing commands through `client`.
    #[must_use]
    pub fn new(client: &'a C, starter: &'a dyn ServiceStarter) -> Self {
        Self {
            client,
            starter,
            state: ProvisionState::Unstarted,
            mutations: Vec::new(),
        }
    }

    /// Applies `request`, returning the outcome once every step succeeded.
    ///
    /// # Errors
    /// Returns [`ProvisionError::ServiceStart`] when the requested service
    /// start fails, [`ProvisionError::ServerUnreachable`] when the
    /// connectivity check fails, and [`ProvisionError::Step`] naming the
    /// failing step for any later client failure.
    pub fn run(mut self, request: ProvisionRequest) -> Result<ProvisioningOutcome> {
        let ProvisionRequest {
            role,
            database,
            scripts,
            start_service,
        } = request;
        let span = info_span!(
            target: LOG_TARGET,
            "provision",
            role = role.name(),
            database = database.name()
        );
        let _entered = span.enter();

        if start_service {
            self.start_service()?;
        }
        self.check_connectivity()?;
        self.advance(ProvisionState::ServiceChecked);

        self.resolve_role(&role)?;
        self.advance(ProvisionState::RoleResolved);

        let freshly_created = self.resolve_database(&database)?;
        self.advance(ProvisionState::DatabaseResolved);

        let applied_script = self.apply_script(&scripts, database.name(), freshly_created)?;
        self.advance(ProvisionState::SqlApplied);

        self.advance(ProvisionState::Done);
        info!(
            target: LOG_TARGET,
            freshly_created,
            mutations = self.mutations.len(),
            "provisioning complete"
        );
        Ok(ProvisioningOutcome {
            effective_password: role.password,
            database_was_freshly_created: freshly_created,
            applied_script,
            mutations: self.mutations,
        })
    }

    fn start_service(&self) -> Result<()> {
        let _span = info_span!(
            target: LOG_TARGET,
            "provision_step",
            step = ProvisionStep::StartService.as_str()
        )
        .entered();
        self.starter.start().map_err(|err| {
            error!(target: LOG_TARGET, error = %err, "database service failed to start");
            ProvisionError::from(err)
        })
    }

    fn check_connectivity(&self) -> Result<()> {
        let _span = info_span!(
            target: LOG_TARGET,
            "provision_step",
            step = ProvisionStep::ConnectivityCheck.as_str()
        )
        .entered();
        match self.client.query(sql::CONNECTIVITY_CHECK, None) {
            Ok(_) => {
                info!(target: LOG_TARGET, "database server reachable");
                Ok(())
            }
            Err(err) => {
                error!(target: LOG_TARGET, error = %err, "database server unreachable");
                Err(ProvisionError::ServerUnreachable(err))
            }
        }
    }

    fn resolve_role(&mut self, role: &RoleSpec) -> Result<()> {
        let exists = self.perform(ProvisionStep::ProbeRole, |client| {
            probe::role_exists(client, role.name())
        })?;

        if !exists {
            return self.perform(ProvisionStep::CreateRole, |client| {
                client
                    .query(&sql::create_role(role.name(), role.password()), None)
                    .map(|_| ())
            });
        }

        if role.replace_password_if_exists() {
            self.perform(ProvisionStep::UpdateRolePassword, |client| {
                client
                    .query(&sql::alter_role_password(role.name(), role.password()), None)
                    .map(|_| ())
            })
        } else {
            info!(
                target: LOG_TARGET,
                role = role.name(),
                "role exists; keeping its current password"
            );
            Ok(())
        }
    }

    fn resolve_database(&mut self, database: &DatabaseSpec) -> Result<bool> {
        let mut exists = self.perform(ProvisionStep::ProbeDatabase, |client| {
            probe::database_exists(client, database.name())
        })?;

        if exists && database.drop_if_exists() {
            self.perform(ProvisionStep::DropDatabase, |client| {
                client
                    .query(&sql::drop_database(database.name()), None)
                    .map(|_| ())
            })?;
            exists = false;
        }

        if exists {
            return Ok(false);
        }

        self.perform(ProvisionStep::CreateDatabase, |client| {
            client
                .query(
                    &sql::create_database(database.name(), database.owner_role()),
                    None,
                )
                .map(|_| ())
        })?;
        Ok(true)
    }

    fn apply_script(
        &mut self,
        scripts: &SqlScripts,
        database: &str,
        freshly_created: bool,
    ) -> Result<Option<ScriptKind>> {
        let (kind, selected) = scripts.select(freshly_created);
        let Some(path) = selected else {
            debug!(
                target: LOG_TARGET,
                script = kind.as_str(),
                "no script configured; skipping"
            );
            return Ok(None);
        };

        info!(target: LOG_TARGET, script = kind.as_str(), path = %path, "applying script");
        self.perform(kind.step(), |client| client.execute_file(path, database))?;
        Ok(Some(kind))
    }

    fn perform<T>(
        &mut self,
        step: ProvisionStep,
        action: impl FnOnce(&C) -> ClientResult<T>,
    ) -> Result<T> {
        let _span =
            info_span!(target: LOG_TARGET, "provision_step", step = step.as_str()).entered();
        match action(self.client) {
            Ok(value) => {
                if step.is_mutation() {
                    info!(target: LOG_TARGET, step = step.as_str(), "applied");
                    self.mutations.push(step);
                }
                Ok(value)
            }
            Err(err) => {
                error!(
                    target: LOG_TARGET,
                    step = step.as_str(),
                    error = %err,
                    "provisioning step failed"
                );
                Err(ProvisionError::step(step, err))
            }
        }
    }

    fn advance(&mut self, next: ProvisionState) {
        debug_assert!(next > self.state, "provisioning never moves backwards");
        debug!(target: LOG_TARGET, from = ?self.state, to = ?next, "provisioning state advanced");
        self.state = next;
    }
}
