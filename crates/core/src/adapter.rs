use tracing::warn;

use crate::Result;

pub const COMMIT_SQL: &str = "COMMIT";
pub const ROLLBACK_SQL: &str = "ROLLBACK";

pub type Rows = Vec<Vec<String>>;

/// A live connection to one database on the target server.
///
/// Adapters check the caller's cancellation token before every statement
/// except [`ROLLBACK_SQL`], which must still reach the server after a
/// cancelled unit of work.
pub trait DatabaseAdapter {
    fn execute(&self, sql: &str) -> Result<()>;

    /// Runs a parameterized read. Values come back stringified; NULL becomes
    /// an empty string.
    fn query_rows(&self, sql: &str, params: &[&str]) -> Result<Rows>;

    fn begin(&mut self) -> Result<Transaction<'_>>;
}

/// Anything able to run a parameterized read query: plain connections and
/// open transactions alike.
pub trait QueryActor {
    fn query_rows(&self, sql: &str, params: &[&str]) -> Result<Rows>;
}

impl QueryActor for dyn DatabaseAdapter + '_ {
    fn query_rows(&self, sql: &str, params: &[&str]) -> Result<Rows> {
        DatabaseAdapter::query_rows(self, sql, params)
    }
}

/// An open transaction. Rolls back on drop unless committed.
pub struct Transaction<'a> {
    adapter: &'a dyn DatabaseAdapter,
    open: bool,
}

impl<'a> Transaction<'a> {
    /// Wraps an adapter that has already issued its dialect's `BEGIN`.
    #[must_use]
    pub fn new(adapter: &'a dyn DatabaseAdapter) -> Self {
        Self {
            adapter,
            open: true,
        }
    }

    pub fn execute(&self, sql: &str) -> Result<()> {
        self.adapter.execute(sql)
    }

    pub fn commit(mut self) -> Result<()> {
        self.open = false;
        self.adapter.execute(COMMIT_SQL)
    }

    pub fn rollback(mut self) -> Result<()> {
        self.open = false;
        self.adapter.execute(ROLLBACK_SQL)
    }
}

impl QueryActor for Transaction<'_> {
    fn query_rows(&self, sql: &str, params: &[&str]) -> Result<Rows> {
        self.adapter.query_rows(sql, params)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        if let Err(error) = self.adapter.execute(ROLLBACK_SQL) {
            warn!(%error, "rollback of abandoned transaction failed");
        }
    }
}
