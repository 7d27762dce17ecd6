use std::error::Error as StdError;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

pub type BoxError = Box<dyn StdError + Send + Sync>;

pub(crate) const REDACTED: &str = "***";

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Execute(#[from] ExecutionError),
    #[error(transparent)]
    Binding(#[from] BindingError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Reports whether cancellation caused this error, looking through
    /// binding context wrappers.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Binding(binding) => binding.cause().is_cancelled(),
            Self::Execute(_) | Self::Config(_) => false,
        }
    }

    /// Reports whether the server refused a statement because its target
    /// already exists.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            Self::Execute(ExecutionError::StatementFailed {
                kind: StatementErrorKind::AlreadyExists,
                ..
            })
        )
    }

    /// Swaps the statement text of a failed statement, for statements that
    /// carry secrets.
    pub(crate) fn with_statement(self, sql: String) -> Self {
        match self {
            Self::Execute(ExecutionError::StatementFailed { kind, source, .. }) => {
                Self::Execute(ExecutionError::StatementFailed { sql, kind, source })
            }
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementErrorKind {
    AlreadyExists,
    Other,
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("connect to database `{database}` failed")]
    Connect {
        database: String,
        #[source]
        source: BoxError,
    },
    #[error("statement `{sql}` failed")]
    StatementFailed {
        sql: String,
        kind: StatementErrorKind,
        #[source]
        source: BoxError,
    },
}

impl ExecutionError {
    pub fn connect<E>(database: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Connect {
            database: database.into(),
            source: Box::new(source),
        }
    }

    pub fn statement_failed<E>(sql: impl Into<String>, kind: StatementErrorKind, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::StatementFailed {
            sql: sql.into(),
            kind,
            source: Box::new(source),
        }
    }
}

/// Failure of one binding step, naming the step and its subject.
#[derive(Debug, Error)]
pub enum BindingError {
    #[error("error ensuring database {database:?}")]
    EnsureDatabase {
        database: String,
        #[source]
        source: Box<Error>,
    },
    #[error("error querying existence of user {username:?}")]
    CheckUser {
        username: String,
        #[source]
        source: Box<Error>,
    },
    #[error("error creating user {username:?}")]
    CreateUser {
        username: String,
        #[source]
        source: Box<Error>,
    },
    #[error("error adding user {username:?} to role {role:?}")]
    AddRole {
        username: String,
        role: String,
        #[source]
        source: Box<Error>,
    },
    #[error("error granting exec to user {username:?}")]
    GrantExecute {
        username: String,
        #[source]
        source: Box<Error>,
    },
    #[error("error reassigning objects owned by {username:?}")]
    ReassignObjects {
        username: String,
        #[source]
        source: Box<Error>,
    },
    #[error("error deleting user {username:?}")]
    DropUser {
        username: String,
        #[source]
        source: Box<Error>,
    },
    #[error("error creating binding for user {username:?}")]
    CreateBinding {
        username: String,
        #[source]
        source: Box<Error>,
    },
    #[error("error deleting binding for user {username:?}")]
    DeleteBinding {
        username: String,
        #[source]
        source: Box<Error>,
    },
    #[error("error reading binding for user {username:?}")]
    ReadBinding {
        username: String,
        #[source]
        source: Box<Error>,
    },
}

impl BindingError {
    #[must_use]
    pub fn cause(&self) -> &Error {
        match self {
            Self::EnsureDatabase { source, .. }
            | Self::CheckUser { source, .. }
            | Self::CreateUser { source, .. }
            | Self::AddRole { source, .. }
            | Self::GrantExecute { source, .. }
            | Self::ReassignObjects { source, .. }
            | Self::DropUser { source, .. }
            | Self::CreateBinding { source, .. }
            | Self::DeleteBinding { source, .. }
            | Self::ReadBinding { source, .. } => source,
        }
    }
}
