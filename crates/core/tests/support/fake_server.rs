#![allow(dead_code)]

use std::{
    collections::{BTreeMap, BTreeSet},
    error::Error as StdError,
    fmt,
    sync::{Arc, Condvar, Mutex, MutexGuard},
};

use sqlbind_core::{
    COMMIT_SQL, CancellationToken, ConnectionConfig, DatabaseAdapter, Dialect, Error,
    ExecutionError, OwnedObject, OwnedObjectKind, ROLLBACK_SQL, Result, Rows, StatementErrorKind,
    Transaction,
};

pub const BEGIN_SQL: &str = "BEGIN";
pub const SERVER_DATABASE: &str = "server";
pub const FALLBACK_OWNER: &str = "owner";

const DATABASE_EXISTS_QUERY: &str = "SELECT DATABASE";
const USER_EXISTS_QUERY: &str = "SELECT USER";
const OWNED_OBJECTS_QUERY: &str = "SELECT OWNED";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeUser {
    pub password: String,
    pub roles: BTreeSet<String>,
    pub can_execute: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct FakeDatabase {
    users: BTreeMap<String, FakeUser>,
    roles: BTreeSet<String>,
    schema_owners: BTreeMap<String, String>,
    object_owners: BTreeMap<(String, String), String>,
}

#[derive(Debug)]
struct FailureRule {
    sql: String,
    kind: StatementErrorKind,
    message: String,
}

#[derive(Debug)]
struct OpenTransaction {
    connection_id: u64,
    snapshot: BTreeMap<String, FakeDatabase>,
}

#[derive(Debug, Default)]
struct ServerState {
    databases: BTreeMap<String, FakeDatabase>,
    logins: BTreeSet<String>,
    executed_sql: Vec<String>,
    attempted_sql: Vec<String>,
    create_database_count: usize,
    failures: Vec<FailureRule>,
    cancel_triggers: Vec<(String, CancellationToken)>,
    stale_database_probe: bool,
    stale_user_probe: bool,
    refuse_connections: bool,
    transaction: Option<OpenTransaction>,
    next_connection_id: u64,
    connections_opened: usize,
    open_connections: usize,
}

/// In-memory stand-in for a database server that also acts as its own
/// dialect. Statements use a tiny word-based syntax.
#[derive(Clone, Default)]
pub struct FakeServer {
    shared: Arc<(Mutex<ServerState>, Condvar)>,
}

impl FakeServer {
    pub fn with_database(self, name: &str) -> Self {
        self.state()
            .databases
            .entry(name.to_string())
            .or_default();
        self
    }

    pub fn add_role(&self, database: &str, role: &str) {
        self.state()
            .databases
            .entry(database.to_string())
            .or_default()
            .roles
            .insert(role.to_string());
    }

    pub fn add_login(&self, name: &str) {
        self.state().logins.insert(name.to_string());
    }

    pub fn set_schema_owner(&self, database: &str, schema: &str, owner: &str) {
        self.state()
            .databases
            .entry(database.to_string())
            .or_default()
            .schema_owners
            .insert(schema.to_string(), owner.to_string());
    }

    pub fn set_object_owner(&self, database: &str, schema: &str, name: &str, owner: &str) {
        self.state()
            .databases
            .entry(database.to_string())
            .or_default()
            .object_owners
            .insert((schema.to_string(), name.to_string()), owner.to_string());
    }

    pub fn fail_on_sql(&self, sql: impl Into<String>, message: impl Into<String>) {
        self.fail_on_sql_with_kind(sql, StatementErrorKind::Other, message);
    }

    pub fn fail_on_sql_with_kind(
        &self,
        sql: impl Into<String>,
        kind: StatementErrorKind,
        message: impl Into<String>,
    ) {
        self.state().failures.push(FailureRule {
            sql: sql.into(),
            kind,
            message: message.into(),
        });
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Cancels `token` right after `sql` has been applied.
    pub fn cancel_after_sql(&self, sql: impl Into<String>, token: CancellationToken) {
        self.state().cancel_triggers.push((sql.into(), token));
    }

    /// Makes the database existence probe always report "absent".
    pub fn set_stale_database_probe(&self, stale: bool) {
        self.state().stale_database_probe = stale;
    }

    /// Makes the user existence probe always report "absent", as seen by a
    /// caller racing another creator.
    pub fn set_stale_user_probe(&self, stale: bool) {
        self.state().stale_user_probe = stale;
    }

    pub fn set_refuse_connections(&self, refuse: bool) {
        self.state().refuse_connections = refuse;
    }

    pub fn database_exists(&self, name: &str) -> bool {
        self.state().databases.contains_key(name)
    }

    pub fn create_database_count(&self) -> usize {
        self.state().create_database_count
    }

    pub fn user(&self, database: &str, name: &str) -> Option<FakeUser> {
        self.state()
            .databases
            .get(database)
            .and_then(|db| db.users.get(name).cloned())
    }

    pub fn user_count(&self, database: &str) -> usize {
        self.state()
            .databases
            .get(database)
            .map_or(0, |db| db.users.len())
    }

    pub fn has_login(&self, name: &str) -> bool {
        self.state().logins.contains(name)
    }

    pub fn schema_owner(&self, database: &str, schema: &str) -> Option<String> {
        self.state()
            .databases
            .get(database)
            .and_then(|db| db.schema_owners.get(schema).cloned())
    }

    pub fn object_owner(&self, database: &str, schema: &str, name: &str) -> Option<String> {
        self.state().databases.get(database).and_then(|db| {
            db.object_owners
                .get(&(schema.to_string(), name.to_string()))
                .cloned()
        })
    }

    pub fn executed_sql(&self) -> Vec<String> {
        self.state().executed_sql.clone()
    }

    pub fn clear_executed_sql(&self) {
        self.state().executed_sql.clear();
    }

    pub fn count_sql(&self, sql: &str) -> usize {
        self.state()
            .executed_sql
            .iter()
            .filter(|executed| *executed == sql)
            .count()
    }

    /// Counts every time `sql` reached the server, failed or not.
    pub fn attempted_count(&self, sql: &str) -> usize {
        self.state()
            .attempted_sql
            .iter()
            .filter(|attempted| *attempted == sql)
            .count()
    }

    pub fn connections_opened(&self) -> usize {
        self.state().connections_opened
    }

    pub fn open_connections(&self) -> usize {
        self.state().open_connections
    }

    pub fn transaction_open(&self) -> bool {
        self.state().transaction.is_some()
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.shared
            .0
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Dialect for FakeServer {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn connect(
        &self,
        _config: &ConnectionConfig,
        database: &str,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn DatabaseAdapter>> {
        let mut state = self.state();
        if state.refuse_connections {
            return Err(
                ExecutionError::connect(database, FakeSourceError::new("login failed")).into(),
            );
        }
        if database != SERVER_DATABASE && !state.databases.contains_key(database) {
            return Err(ExecutionError::connect(
                database,
                FakeSourceError::new(format!("cannot open database `{database}`")),
            )
            .into());
        }

        state.next_connection_id += 1;
        state.connections_opened += 1;
        state.open_connections += 1;

        Ok(Box::new(FakeConnection {
            server: self.clone(),
            id: state.next_connection_id,
            database: database.to_string(),
            cancel: cancel.clone(),
        }))
    }

    fn server_database(&self) -> &'static str {
        SERVER_DATABASE
    }

    fn default_fallback_owner(&self) -> &'static str {
        FALLBACK_OWNER
    }

    fn database_exists_query(&self) -> &'static str {
        DATABASE_EXISTS_QUERY
    }

    fn create_database(&self, database: &str) -> String {
        format!("CREATE DATABASE {database}")
    }

    fn user_exists_query(&self) -> &'static str {
        USER_EXISTS_QUERY
    }

    fn create_user(&self, username: &str, password: &str) -> String {
        format!("CREATE USER {username} PASSWORD {password}")
    }

    fn add_role_member(&self, role: &str, username: &str) -> String {
        format!("ADD ROLE {role} MEMBER {username}")
    }

    fn grant_execute(&self, username: &str) -> String {
        format!("GRANT EXECUTE {username}")
    }

    fn drop_user(&self, username: &str) -> String {
        format!("DROP USER IF EXISTS {username}")
    }

    fn drop_login(&self, username: &str) -> String {
        format!("DROP LOGIN {username}")
    }

    fn owned_objects_query(&self) -> &'static str {
        OWNED_OBJECTS_QUERY
    }

    fn reassign_owner(&self, object: &OwnedObject, fallback_owner: &str) -> String {
        match (object.kind, &object.schema) {
            (OwnedObjectKind::Schema, _) => {
                format!("REASSIGN SCHEMA {} TO {fallback_owner}", object.name)
            }
            (OwnedObjectKind::Object, Some(schema)) => {
                format!("REASSIGN OBJECT {schema}.{} TO {fallback_owner}", object.name)
            }
            (OwnedObjectKind::Object, None) => {
                format!("REASSIGN OBJECT {} TO {fallback_owner}", object.name)
            }
            (OwnedObjectKind::Role, _) => {
                format!("REASSIGN ROLE {} TO {fallback_owner}", object.name)
            }
        }
    }
}

struct FakeConnection {
    server: FakeServer,
    id: u64,
    database: String,
    cancel: CancellationToken,
}

impl FakeConnection {
    fn run(&self, text: &str, apply: impl FnOnce(&mut ServerState) -> Outcome) -> Result<Rows> {
        if text != ROLLBACK_SQL && self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut state = self.server.state();
        state.attempted_sql.push(text.to_string());
        if let Some(rule) = state.failures.iter().find(|rule| rule.sql == text) {
            let error = ExecutionError::statement_failed(
                text,
                rule.kind,
                FakeSourceError::new(rule.message.clone()),
            );
            if text == ROLLBACK_SQL {
                release_transaction(&mut *state, self.id, true);
                self.server.shared.1.notify_all();
            }
            return Err(error.into());
        }

        let outcome = apply(&mut *state);
        match outcome {
            Outcome::Rows(rows) => {
                state.executed_sql.push(text.to_string());
                fire_cancel_triggers(&*state, text);
                Ok(rows)
            }
            Outcome::Failed(kind, message) => Err(ExecutionError::statement_failed(
                text,
                kind,
                FakeSourceError::new(message),
            )
            .into()),
        }
    }

    fn begin_transaction(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let (lock, condvar) = &*self.server.shared;
        let mut state = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        while state.transaction.is_some() {
            state = condvar
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        state.transaction = Some(OpenTransaction {
            connection_id: self.id,
            snapshot: state.databases.clone(),
        });
        state.executed_sql.push(BEGIN_SQL.to_string());
        Ok(())
    }
}

impl DatabaseAdapter for FakeConnection {
    fn execute(&self, sql: &str) -> Result<()> {
        let id = self.id;
        let database = self.database.clone();
        let result = self.run(sql, |state| apply_statement(state, id, &database, sql));
        if matches!(sql, COMMIT_SQL | ROLLBACK_SQL) {
            self.server.shared.1.notify_all();
        }
        result.map(|_| ())
    }

    fn query_rows(&self, sql: &str, params: &[&str]) -> Result<Rows> {
        let text = if params.is_empty() {
            sql.to_string()
        } else {
            format!("{sql} {}", params.join(" "))
        };
        let subject = params.first().copied().unwrap_or_default().to_string();
        let database = self.database.clone();
        self.run(&text, |state| apply_query(state, &database, sql, &subject))
    }

    fn begin(&mut self) -> Result<Transaction<'_>> {
        self.begin_transaction()?;
        Ok(Transaction::new(self))
    }
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        let mut state = self.server.state();
        state.open_connections -= 1;
        release_transaction(&mut *state, self.id, true);
        drop(state);
        self.server.shared.1.notify_all();
    }
}

enum Outcome {
    Rows(Rows),
    Failed(StatementErrorKind, String),
}

fn ok() -> Outcome {
    Outcome::Rows(Vec::new())
}

fn failed(message: impl Into<String>) -> Outcome {
    Outcome::Failed(StatementErrorKind::Other, message.into())
}

fn already_exists(message: impl Into<String>) -> Outcome {
    Outcome::Failed(StatementErrorKind::AlreadyExists, message.into())
}

fn release_transaction(state: &mut ServerState, connection_id: u64, restore: bool) {
    let Some(open) = state.transaction.take() else {
        return;
    };
    if open.connection_id != connection_id {
        state.transaction = Some(open);
        return;
    }
    if restore {
        state.databases = open.snapshot;
    }
}

fn fire_cancel_triggers(state: &ServerState, text: &str) {
    for (sql, token) in &state.cancel_triggers {
        if sql == text {
            token.cancel();
        }
    }
}

fn apply_query(state: &mut ServerState, database: &str, sql: &str, subject: &str) -> Outcome {
    match sql {
        DATABASE_EXISTS_QUERY => {
            if !state.stale_database_probe && state.databases.contains_key(subject) {
                Outcome::Rows(vec![vec![subject.to_string()]])
            } else {
                ok()
            }
        }
        USER_EXISTS_QUERY => match state.databases.get(database) {
            Some(db) if !state.stale_user_probe && db.users.contains_key(subject) => {
                Outcome::Rows(vec![vec![subject.to_string()]])
            }
            _ => ok(),
        },
        OWNED_OBJECTS_QUERY => {
            let Some(db) = state.databases.get(database) else {
                return ok();
            };
            let mut rows = Vec::new();
            for (schema, owner) in &db.schema_owners {
                if owner == subject {
                    rows.push(vec!["SCHEMA".to_string(), String::new(), schema.clone()]);
                }
            }
            for ((schema, name), owner) in &db.object_owners {
                if owner == subject {
                    rows.push(vec!["OBJECT".to_string(), schema.clone(), name.clone()]);
                }
            }
            Outcome::Rows(rows)
        }
        other => failed(format!("unknown query `{other}`")),
    }
}

fn apply_statement(
    state: &mut ServerState,
    connection_id: u64,
    database: &str,
    sql: &str,
) -> Outcome {
    match sql {
        COMMIT_SQL => {
            return match state.transaction.as_ref() {
                Some(open) if open.connection_id == connection_id => {
                    release_transaction(state, connection_id, false);
                    ok()
                }
                _ => failed("COMMIT without BEGIN"),
            };
        }
        ROLLBACK_SQL => {
            return match state.transaction.as_ref() {
                Some(open) if open.connection_id == connection_id => {
                    release_transaction(state, connection_id, true);
                    ok()
                }
                _ => failed("ROLLBACK without BEGIN"),
            };
        }
        _ => {}
    }

    let words = sql.split_whitespace().collect::<Vec<_>>();
    match words.as_slice() {
        ["CREATE", "DATABASE", name] => {
            if state.databases.contains_key(*name) {
                return already_exists(format!("database `{name}` already exists"));
            }
            state.databases.insert((*name).to_string(), FakeDatabase::default());
            state.create_database_count += 1;
            ok()
        }
        ["DROP", "LOGIN", name] => {
            if state.logins.remove(*name) {
                ok()
            } else {
                failed(format!("cannot drop the login `{name}`, it does not exist"))
            }
        }
        _ => {
            let Some(db) = state.databases.get_mut(database) else {
                return failed(format!("database `{database}` does not exist"));
            };
            apply_database_statement(db, &words)
        }
    }
}

fn apply_database_statement(db: &mut FakeDatabase, words: &[&str]) -> Outcome {
    match words {
        ["CREATE", "USER", name, "PASSWORD", password] => {
            if db.users.contains_key(*name) {
                return already_exists(format!("user `{name}` already exists"));
            }
            db.users.insert(
                (*name).to_string(),
                FakeUser {
                    password: (*password).to_string(),
                    ..FakeUser::default()
                },
            );
            ok()
        }
        ["ADD", "ROLE", role, "MEMBER", name] => {
            if !db.roles.contains(*role) {
                return failed(format!("role `{role}` does not exist"));
            }
            match db.users.get_mut(*name) {
                Some(user) => {
                    user.roles.insert((*role).to_string());
                    ok()
                }
                None => failed(format!("user `{name}` does not exist")),
            }
        }
        ["GRANT", "EXECUTE", name] => match db.users.get_mut(*name) {
            Some(user) => {
                user.can_execute = true;
                ok()
            }
            None => failed(format!("user `{name}` does not exist")),
        },
        ["DROP", "USER", "IF", "EXISTS", name] => {
            let owns_schema = db.schema_owners.values().any(|owner| owner == *name);
            let owns_object = db.object_owners.values().any(|owner| owner == *name);
            if owns_schema || owns_object {
                return failed(format!("the user `{name}` owns objects and cannot be dropped"));
            }
            db.users.remove(*name);
            ok()
        }
        ["REASSIGN", "SCHEMA", schema, "TO", owner] => match db.schema_owners.get_mut(*schema) {
            Some(current) => {
                *current = (*owner).to_string();
                ok()
            }
            None => failed(format!("schema `{schema}` does not exist")),
        },
        ["REASSIGN", "OBJECT", qualified, "TO", owner] => {
            let Some((schema, name)) = qualified.split_once('.') else {
                return failed(format!("object `{qualified}` must be schema-qualified"));
            };
            match db
                .object_owners
                .get_mut(&(schema.to_string(), name.to_string()))
            {
                Some(current) => {
                    *current = (*owner).to_string();
                    ok()
                }
                None => failed(format!("object `{qualified}` does not exist")),
            }
        }
        _ => failed(format!("unsupported statement `{}`", words.join(" "))),
    }
}

#[derive(Debug)]
struct FakeSourceError(String);

impl FakeSourceError {
    fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl fmt::Display for FakeSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for FakeSourceError {}
