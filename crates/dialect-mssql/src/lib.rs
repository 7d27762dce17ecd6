//! SQL Server dialect for sqlbind: T-SQL for every principal operation and a
//! live TDS adapter.

mod adapter;
mod queries;

use sqlbind_core::{
    CancellationToken, ConnectionConfig, DatabaseAdapter, Dialect, OwnedObject, OwnedObjectKind,
    Result,
};

pub use adapter::TRUST_SERVER_CERTIFICATE_KEY;

const MASTER_DATABASE: &str = "master";
const DATABASE_OWNER: &str = "dbo";

#[derive(Debug, Default, Clone, Copy)]
pub struct MssqlDialect;

impl Dialect for MssqlDialect {
    fn name(&self) -> &'static str {
        "mssql"
    }

    fn connect(
        &self,
        config: &ConnectionConfig,
        database: &str,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn DatabaseAdapter>> {
        adapter::connect(config, database, cancel)
    }

    fn server_database(&self) -> &'static str {
        MASTER_DATABASE
    }

    fn default_fallback_owner(&self) -> &'static str {
        DATABASE_OWNER
    }

    fn database_exists_query(&self) -> &'static str {
        queries::DATABASE_EXISTS_QUERY
    }

    fn create_database(&self, database: &str) -> String {
        format!("CREATE DATABASE {}", quote_ident(database))
    }

    fn user_exists_query(&self) -> &'static str {
        queries::USER_EXISTS_QUERY
    }

    fn create_user(&self, username: &str, password: &str) -> String {
        format!(
            "CREATE USER {} WITH PASSWORD = {}",
            quote_ident(username),
            quote_literal(password)
        )
    }

    fn add_role_member(&self, role: &str, username: &str) -> String {
        format!(
            "ALTER ROLE {} ADD MEMBER {}",
            quote_ident(role),
            quote_ident(username)
        )
    }

    // There is no built-in database role for EXECUTE the way db_datareader
    // and db_datawriter cover table access, so it is granted database-wide.
    fn grant_execute(&self, username: &str) -> String {
        format!("GRANT EXECUTE TO {}", quote_ident(username))
    }

    fn drop_user(&self, username: &str) -> String {
        format!("DROP USER IF EXISTS {}", quote_ident(username))
    }

    // No DROP LOGIN IF EXISTS, and sys.sql_logins is not visible from a
    // contained database on every deployment.
    fn drop_login(&self, username: &str) -> String {
        format!("DROP LOGIN {}", quote_ident(username))
    }

    fn owned_objects_query(&self) -> &'static str {
        queries::OWNED_OBJECTS_QUERY
    }

    fn reassign_owner(&self, object: &OwnedObject, fallback_owner: &str) -> String {
        match (object.kind, object.schema.as_deref()) {
            (OwnedObjectKind::Schema, _) => format!(
                "ALTER AUTHORIZATION ON SCHEMA::{} TO {}",
                quote_ident(&object.name),
                quote_ident(fallback_owner)
            ),
            // Objects go back to their schema's owner rather than to a named
            // principal.
            (OwnedObjectKind::Object, Some(schema)) => format!(
                "ALTER AUTHORIZATION ON OBJECT::{}.{} TO SCHEMA OWNER",
                quote_ident(schema),
                quote_ident(&object.name)
            ),
            (OwnedObjectKind::Object, None) => format!(
                "ALTER AUTHORIZATION ON OBJECT::{} TO SCHEMA OWNER",
                quote_ident(&object.name)
            ),
            (OwnedObjectKind::Role, _) => format!(
                "ALTER AUTHORIZATION ON ROLE::{} TO {}",
                quote_ident(&object.name),
                quote_ident(fallback_owner)
            ),
        }
    }
}

pub(crate) fn quote_ident(identifier: &str) -> String {
    format!("[{}]", identifier.replace(']', "]]"))
}

pub(crate) fn quote_literal(value: &str) -> String {
    format!("N'{}'", value.replace('\'', "''"))
}
