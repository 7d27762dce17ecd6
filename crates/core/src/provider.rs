use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{ConnectionConfig, DatabaseAdapter, Dialect, Error, Result, Transaction};

/// Scoped access to the target server.
///
/// Every scope opens its own connection and closes it on exit, so callers on
/// different threads never share a connection.
pub struct ConnectionProvider<'a> {
    dialect: &'a dyn Dialect,
    config: ConnectionConfig,
}

impl<'a> ConnectionProvider<'a> {
    #[must_use]
    pub fn new(dialect: &'a dyn Dialect, config: ConnectionConfig) -> Self {
        Self { dialect, config }
    }

    #[must_use]
    pub fn dialect(&self) -> &'a dyn Dialect {
        self.dialect
    }

    #[must_use]
    pub fn database(&self) -> &str {
        &self.config.database
    }

    /// Runs `work` against a connection to the binding database.
    pub fn with_connection<T, F>(&self, cancel: &CancellationToken, work: F) -> Result<T>
    where
        F: FnOnce(&dyn DatabaseAdapter) -> Result<T>,
    {
        self.with_connection_to(cancel, &self.config.database, work)
    }

    /// Runs `work` against a connection to the server-level database.
    pub fn with_server_connection<T, F>(&self, cancel: &CancellationToken, work: F) -> Result<T>
    where
        F: FnOnce(&dyn DatabaseAdapter) -> Result<T>,
    {
        self.with_connection_to(cancel, self.dialect.server_database(), work)
    }

    /// Runs `work` inside a transaction on the binding database.
    ///
    /// Commits when `work` succeeds and the token is still live; rolls back
    /// otherwise. A failed rollback is logged and the error from `work` is
    /// returned.
    pub fn with_transaction<T, F>(&self, cancel: &CancellationToken, work: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut connection = self.connect(cancel, &self.config.database)?;
        let tx = connection.begin()?;

        let outcome = work(&tx).and_then(|value| {
            ensure_live(cancel)?;
            Ok(value)
        });

        match outcome {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback_error) = tx.rollback() {
                    warn!(
                        %error,
                        %rollback_error,
                        database = %self.config.database,
                        "rollback failed after unit of work error"
                    );
                }
                Err(error)
            }
        }
    }

    fn with_connection_to<T, F>(
        &self,
        cancel: &CancellationToken,
        database: &str,
        work: F,
    ) -> Result<T>
    where
        F: FnOnce(&dyn DatabaseAdapter) -> Result<T>,
    {
        let connection = self.connect(cancel, database)?;
        work(connection.as_ref())
    }

    fn connect(
        &self,
        cancel: &CancellationToken,
        database: &str,
    ) -> Result<Box<dyn DatabaseAdapter>> {
        ensure_live(cancel)?;
        debug!(dialect = self.dialect.name(), database, "opening connection");
        self.dialect.connect(&self.config, database, cancel)
    }
}

pub(crate) fn ensure_live(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}
