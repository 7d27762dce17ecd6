use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    BindingError, ConnectionConfig, ConnectionProvider, DatabaseEnsurer, Dialect, Error,
    ObjectReassigner, QueryActor, Result, Transaction, error::REDACTED,
};

/// Creates, verifies and destroys per-binding database users.
///
/// Every operation is idempotent: repeating a call after success, or after a
/// failure part-way through, converges on the same end state.
pub struct PrincipalManager<'d> {
    provider: ConnectionProvider<'d>,
    fallback_owner: String,
}

impl<'d> PrincipalManager<'d> {
    #[must_use]
    pub fn new(dialect: &'d dyn Dialect, config: ConnectionConfig) -> Self {
        Self {
            fallback_owner: dialect.default_fallback_owner().to_string(),
            provider: ConnectionProvider::new(dialect, config),
        }
    }

    /// Owner that receives a deleted user's schemas, objects and roles.
    #[must_use]
    pub fn with_fallback_owner(mut self, owner: impl Into<String>) -> Self {
        self.fallback_owner = owner.into();
        self
    }

    #[must_use]
    pub fn provider(&self) -> &ConnectionProvider<'d> {
        &self.provider
    }

    /// Ensures the database, then creates the user, adds it to every role in
    /// `roles` and grants it execute, all in one transaction. An existing
    /// user keeps its password.
    pub fn create_binding(
        &self,
        cancel: &CancellationToken,
        username: &str,
        password: &str,
        roles: &[String],
    ) -> Result<()> {
        DatabaseEnsurer::new(&self.provider).ensure_database(cancel, self.provider.database())?;

        let dialect = self.provider.dialect();
        self.provider
            .with_transaction(cancel, |tx| {
                create_user(dialect, tx, username, password)?;
                add_roles(dialect, tx, username, roles)?;
                grant_exec(dialect, tx, username)
            })
            .map_err(|error| {
                in_binding_context(error, |source| BindingError::CreateBinding {
                    username: username.to_string(),
                    source,
                })
            })?;

        info!(username, roles = roles.len(), "binding created");
        Ok(())
    }

    /// Reassigns the user's objects, then drops the user and any legacy login.
    /// Deleting a binding that does not exist succeeds.
    pub fn delete_binding(&self, cancel: &CancellationToken, username: &str) -> Result<()> {
        ObjectReassigner::new(&self.provider, &self.fallback_owner)
            .reassign_owned_objects(cancel, username)?;

        let dialect = self.provider.dialect();
        self.provider
            .with_transaction(cancel, |tx| {
                drop_user(dialect, tx, username)?;
                drop_login(dialect, tx, username);
                Ok(())
            })
            .map_err(|error| {
                in_binding_context(error, |source| BindingError::DeleteBinding {
                    username: username.to_string(),
                    source,
                })
            })?;

        info!(username, "binding deleted");
        Ok(())
    }

    /// Reports whether the binding user exists.
    pub fn read_binding(&self, cancel: &CancellationToken, username: &str) -> Result<bool> {
        let dialect = self.provider.dialect();
        self.provider
            .with_connection(cancel, |connection| check_user(dialect, connection, username))
            .map_err(|error| {
                in_binding_context(error, |source| BindingError::ReadBinding {
                    username: username.to_string(),
                    source,
                })
            })
    }
}

// Errors raised outside a named step (connect, BEGIN, COMMIT) get the
// operation's own context; step errors already name the user.
fn in_binding_context(error: Error, wrap: impl FnOnce(Box<Error>) -> BindingError) -> Error {
    match error {
        Error::Binding(_) => error,
        other => wrap(Box::new(other)).into(),
    }
}

fn check_user<Q>(dialect: &dyn Dialect, actor: &Q, username: &str) -> Result<bool>
where
    Q: QueryActor + ?Sized,
{
    actor
        .query_rows(dialect.user_exists_query(), &[username])
        .map(|rows| !rows.is_empty())
        .map_err(|source| {
            BindingError::CheckUser {
                username: username.to_string(),
                source: Box::new(source),
            }
            .into()
        })
}

fn create_user(
    dialect: &dyn Dialect,
    tx: &Transaction<'_>,
    username: &str,
    password: &str,
) -> Result<()> {
    if check_user(dialect, tx, username)? {
        debug!(username, "user already exists");
        return Ok(());
    }

    match tx.execute(&dialect.create_user(username, password)) {
        Ok(()) => Ok(()),
        Err(error) if error.is_already_exists() => {
            debug!(username, "user created concurrently");
            Ok(())
        }
        Err(error) => Err(BindingError::CreateUser {
            username: username.to_string(),
            source: Box::new(error.with_statement(dialect.create_user(username, REDACTED))),
        }
        .into()),
    }
}

fn add_roles(
    dialect: &dyn Dialect,
    tx: &Transaction<'_>,
    username: &str,
    roles: &[String],
) -> Result<()> {
    for role in roles {
        debug!(username, role = %role, "adding role member");
        tx.execute(&dialect.add_role_member(role, username))
            .map_err(|source| {
                Error::from(BindingError::AddRole {
                    username: username.to_string(),
                    role: role.clone(),
                    source: Box::new(source),
                })
            })?;
    }
    Ok(())
}

fn grant_exec(dialect: &dyn Dialect, tx: &Transaction<'_>, username: &str) -> Result<()> {
    tx.execute(&dialect.grant_execute(username)).map_err(|source| {
        BindingError::GrantExecute {
            username: username.to_string(),
            source: Box::new(source),
        }
        .into()
    })
}

fn drop_user(dialect: &dyn Dialect, tx: &Transaction<'_>, username: &str) -> Result<()> {
    tx.execute(&dialect.drop_user(username)).map_err(|source| {
        BindingError::DropUser {
            username: username.to_string(),
            source: Box::new(source),
        }
        .into()
    })
}

// Logins are server-level and not every server flavour lets a database
// connection see them, so existence cannot be probed reliably. Any failure
// here is dropped.
fn drop_login(dialect: &dyn Dialect, tx: &Transaction<'_>, username: &str) {
    if let Err(error) = tx.execute(&dialect.drop_login(username)) {
        debug!(username, %error, "ignoring legacy login drop failure");
    }
}
