use tokio_util::sync::CancellationToken;

use crate::{ConnectionConfig, DatabaseAdapter, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnedObjectKind {
    Schema,
    /// A schema-scoped object (table, view, procedure) with an explicit owner.
    Object,
    Role,
}

impl OwnedObjectKind {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SCHEMA" => Some(Self::Schema),
            "OBJECT" => Some(Self::Object),
            "ROLE" => Some(Self::Role),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedObject {
    pub kind: OwnedObjectKind,
    pub schema: Option<String>,
    pub name: String,
}

/// Server flavour: how to connect, and the SQL text of every principal
/// operation.
///
/// Queries returned by `*_query` methods take the subject name as their only
/// parameter.
pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    fn connect(
        &self,
        config: &ConnectionConfig,
        database: &str,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn DatabaseAdapter>>;

    /// Database to connect to for server-level work such as creating the
    /// binding database.
    fn server_database(&self) -> &'static str;

    fn default_fallback_owner(&self) -> &'static str;

    fn database_exists_query(&self) -> &'static str;
    fn create_database(&self, database: &str) -> String;

    fn user_exists_query(&self) -> &'static str;
    fn create_user(&self, username: &str, password: &str) -> String;
    fn add_role_member(&self, role: &str, username: &str) -> String;
    fn grant_execute(&self, username: &str) -> String;
    fn drop_user(&self, username: &str) -> String;
    fn drop_login(&self, username: &str) -> String;

    /// Rows of `(kind, schema, name)` for everything the user owns.
    fn owned_objects_query(&self) -> &'static str;
    fn reassign_owner(&self, object: &OwnedObject, fallback_owner: &str) -> String;
}
