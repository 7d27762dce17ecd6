use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{BindingError, ConnectionProvider, Result};

/// Creates the binding database on first use. Never drops it.
pub struct DatabaseEnsurer<'p, 'd> {
    provider: &'p ConnectionProvider<'d>,
}

impl<'p, 'd> DatabaseEnsurer<'p, 'd> {
    #[must_use]
    pub fn new(provider: &'p ConnectionProvider<'d>) -> Self {
        Self { provider }
    }

    /// Checks for `name` and creates it when absent. A concurrent caller
    /// winning the create race counts as success.
    pub fn ensure_database(&self, cancel: &CancellationToken, name: &str) -> Result<()> {
        self.ensure(cancel, name).map_err(|source| {
            BindingError::EnsureDatabase {
                database: name.to_string(),
                source: Box::new(source),
            }
            .into()
        })
    }

    fn ensure(&self, cancel: &CancellationToken, name: &str) -> Result<()> {
        let dialect = self.provider.dialect();

        self.provider.with_server_connection(cancel, |connection| {
            let rows = connection.query_rows(dialect.database_exists_query(), &[name])?;
            if !rows.is_empty() {
                debug!(database = name, "database already exists");
                return Ok(());
            }

            match connection.execute(&dialect.create_database(name)) {
                Ok(()) => {
                    info!(database = name, "created database");
                    Ok(())
                }
                Err(error) if error.is_already_exists() => {
                    debug!(database = name, "database created concurrently");
                    Ok(())
                }
                Err(error) => Err(error),
            }
        })
    }
}
