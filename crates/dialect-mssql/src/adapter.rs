use std::{
    error::Error as StdError,
    future::Future,
    io,
    sync::{Mutex, MutexGuard},
};

use futures_util::TryStreamExt;
use sqlbind_core::{
    CancellationToken, ConnectionConfig, DatabaseAdapter, EncryptMode, Error, ExecutionError,
    ROLLBACK_SQL, Result, Rows, StatementErrorKind, Transaction,
};
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, QueryItem, ToSql};
use tokio::{
    net::TcpStream,
    runtime::{Builder, Runtime},
};
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, warn};

type TdsClient = Client<Compat<TcpStream>>;

pub const TRUST_SERVER_CERTIFICATE_KEY: &str = "mssql.trust_server_certificate";

const BEGIN_SQL: &str = "BEGIN TRANSACTION";
const DEFAULT_MSSQL_HOST: &str = "127.0.0.1";
const DEFAULT_MSSQL_PORT: u16 = 1433;
const POISONED_CONNECTION_MESSAGE: &str = "mssql connection state was poisoned";
const ABANDONED_CONNECTION_MESSAGE: &str =
    "mssql connection was abandoned by a cancelled statement";

// Server error numbers meaning "the thing you are creating is already there".
const DATABASE_ALREADY_EXISTS: u32 = 1801;
const PRINCIPAL_ALREADY_EXISTS: u32 = 15023;
const LOGIN_ALREADY_EXISTS: u32 = 15025;

pub(crate) struct MssqlAdapter {
    state: Mutex<LiveState>,
    cancel: CancellationToken,
}

struct LiveState {
    runtime: Runtime,
    client: TdsClient,
    abandoned: bool,
}

pub(crate) fn connect(
    config: &ConnectionConfig,
    database: &str,
    cancel: &CancellationToken,
) -> Result<Box<dyn DatabaseAdapter>> {
    let tds_config = build_tiberius_config(config, database)?;
    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|source| connect_error(database, source))?;

    let connecting = async {
        let tcp = TcpStream::connect(tds_config.get_addr())
            .await
            .map_err(|source| connect_error(database, source))?;
        tcp.set_nodelay(true)
            .map_err(|source| connect_error(database, source))?;

        Client::connect(tds_config, tcp.compat_write())
            .await
            .map_err(|source| connect_error(database, source))
    };
    ensure_live(cancel)?;
    let client = runtime.block_on(cancellable(cancel, connecting))?;
    debug!(database, "mssql connection established");

    Ok(Box::new(MssqlAdapter {
        state: Mutex::new(LiveState {
            runtime,
            client,
            abandoned: false,
        }),
        cancel: cancel.clone(),
    }))
}

impl DatabaseAdapter for MssqlAdapter {
    fn execute(&self, sql: &str) -> Result<()> {
        let cancel = self.statement_token(sql);
        ensure_live(&cancel)?;
        let mut state = self.lock_live_state(sql)?;
        execute_live_sql(&mut state, &cancel, sql)
    }

    fn query_rows(&self, sql: &str, params: &[&str]) -> Result<Rows> {
        ensure_live(&self.cancel)?;
        let mut state = self.lock_live_state(sql)?;
        query_live_rows(&mut state, &self.cancel, sql, params)
    }

    fn begin(&mut self) -> Result<Transaction<'_>> {
        self.execute(BEGIN_SQL)?;
        Ok(Transaction::new(self))
    }
}

impl MssqlAdapter {
    fn lock_live_state(&self, sql: &str) -> Result<MutexGuard<'_, LiveState>> {
        let state = self.state.lock().map_err(|_| {
            execution_error(sql, io::Error::other(POISONED_CONNECTION_MESSAGE))
        })?;
        if state.abandoned {
            return Err(execution_error(
                sql,
                io::Error::other(ABANDONED_CONNECTION_MESSAGE),
            ));
        }
        Ok(state)
    }

    // ROLLBACK has to reach the server even after the caller gave up.
    fn statement_token(&self, sql: &str) -> CancellationToken {
        if sql == ROLLBACK_SQL {
            CancellationToken::new()
        } else {
            self.cancel.clone()
        }
    }
}

fn build_tiberius_config(config: &ConnectionConfig, database: &str) -> Result<Config> {
    let host = config
        .host
        .as_deref()
        .unwrap_or(DEFAULT_MSSQL_HOST)
        .to_string();
    let port = config.port.unwrap_or(DEFAULT_MSSQL_PORT);
    let user = config
        .user
        .clone()
        .ok_or_else(|| Error::Config("mssql user is required".to_string()))?;
    let password = config.password.clone().unwrap_or_default();

    let mut tds_config = Config::new();
    tds_config.host(host.as_str());
    tds_config.port(port);
    tds_config.database(database);
    tds_config.authentication(AuthMethod::sql_server(user, password));
    tds_config.encryption(encryption_level(config.encrypt));
    if config.extra_flag(TRUST_SERVER_CERTIFICATE_KEY)?.unwrap_or(false) {
        tds_config.trust_cert();
    }

    Ok(tds_config)
}

pub(crate) fn encryption_level(mode: EncryptMode) -> EncryptionLevel {
    match mode {
        EncryptMode::Disable => EncryptionLevel::NotSupported,
        EncryptMode::Off => EncryptionLevel::Off,
        EncryptMode::On | EncryptMode::Strict => EncryptionLevel::Required,
    }
}

fn execute_live_sql(state: &mut LiveState, cancel: &CancellationToken, sql: &str) -> Result<()> {
    let LiveState {
        runtime, client, ..
    } = &mut *state;

    let running = async {
        let mut stream = client
            .simple_query(sql)
            .await
            .map_err(|source| tiberius_error(sql, source))?;
        while stream
            .try_next()
            .await
            .map_err(|source| tiberius_error(sql, source))?
            .is_some()
        {}
        Ok::<_, Error>(())
    };
    let outcome = runtime.block_on(cancellable(cancel, running));
    abandon_if_cancelled(state, outcome)
}

fn query_live_rows(
    state: &mut LiveState,
    cancel: &CancellationToken,
    sql: &str,
    params: &[&str],
) -> Result<Rows> {
    let LiveState {
        runtime, client, ..
    } = &mut *state;
    let params = params
        .iter()
        .map(|param| param as &dyn ToSql)
        .collect::<Vec<_>>();

    let running = async {
        let mut stream = client
            .query(sql, &params)
            .await
            .map_err(|source| tiberius_error(sql, source))?;
        let mut rows = Vec::new();

        while let Some(item) = stream
            .try_next()
            .await
            .map_err(|source| tiberius_error(sql, source))?
        {
            if let QueryItem::Row(row) = item {
                let mut values = Vec::with_capacity(row.columns().len());
                for index in 0..row.columns().len() {
                    values.push(
                        row.get::<&str, usize>(index)
                            .unwrap_or_default()
                            .to_string(),
                    );
                }
                rows.push(values);
            }
        }

        Ok::<_, Error>(rows)
    };
    let outcome = runtime.block_on(cancellable(cancel, running));
    abandon_if_cancelled(state, outcome)
}

fn ensure_live(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}

async fn cancellable<T, F>(cancel: &CancellationToken, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled),
        outcome = work => outcome,
    }
}

// A round-trip dropped half-way leaves the TDS stream out of sync; the
// connection is unusable and the server discards its open transaction when
// the socket closes.
fn abandon_if_cancelled<T>(state: &mut LiveState, outcome: Result<T>) -> Result<T> {
    if matches!(outcome, Err(Error::Cancelled)) {
        warn!("statement cancelled in flight; abandoning connection");
        state.abandoned = true;
    }
    outcome
}

fn connect_error<E>(database: &str, source: E) -> Error
where
    E: StdError + Send + Sync + 'static,
{
    ExecutionError::connect(database, source).into()
}

fn execution_error<E>(sql: &str, source: E) -> Error
where
    E: StdError + Send + Sync + 'static,
{
    ExecutionError::statement_failed(sql, StatementErrorKind::Other, source).into()
}

fn tiberius_error(sql: &str, source: tiberius::error::Error) -> Error {
    let kind = statement_error_kind(&source);
    ExecutionError::statement_failed(sql, kind, source).into()
}

pub(crate) fn statement_error_kind(error: &tiberius::error::Error) -> StatementErrorKind {
    match error {
        tiberius::error::Error::Server(token)
            if matches!(
                token.code(),
                DATABASE_ALREADY_EXISTS | PRINCIPAL_ALREADY_EXISTS | LOGIN_ALREADY_EXISTS
            ) =>
        {
            StatementErrorKind::AlreadyExists
        }
        _ => StatementErrorKind::Other,
    }
}
