//! Binding lifecycle for relational database principals.
//!
//! A binding is one database user created for one consumer. [`PrincipalManager`]
//! creates, reads and deletes bindings against a server described by a
//! [`Dialect`], tolerating partial earlier failures and repeated calls.

mod adapter;
mod config;
mod database;
mod dialect;
mod error;
mod principal;
mod provider;
mod reassign;

pub use adapter::{COMMIT_SQL, DatabaseAdapter, QueryActor, ROLLBACK_SQL, Rows, Transaction};
pub use config::{ConnectionConfig, EncryptMode};
pub use database::DatabaseEnsurer;
pub use dialect::{Dialect, OwnedObject, OwnedObjectKind};
pub use error::{BindingError, BoxError, Error, ExecutionError, Result, StatementErrorKind};
pub use principal::PrincipalManager;
pub use provider::ConnectionProvider;
pub use reassign::ObjectReassigner;
pub use tokio_util::sync::CancellationToken;
