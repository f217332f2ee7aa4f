use async_trait::async_trait;
use dtx_core::{
    with_deadline, ResourceConfig, ResourceDriver, ResourceError, ResourceHandle,
    ResourceProvider,
};
use sqlx::mysql::{MySql, MySqlConnectOptions, MySqlConnection, MySqlPoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPoolOptions, Postgres};
use sqlx::{Connection, Executor, MySqlPool, PgPool};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Connection behaviour for [`SqlxProvider`].
#[derive(Debug, Clone)]
pub struct SqlxProviderConfig {
    /// Reuse one pool per connection target instead of opening a dedicated connection
    /// per acquisition.
    pub pooled: bool,
    pub max_connections: u32,
    /// Deadline applied to every statement executed through a handle.
    pub statement_timeout: Option<Duration>,
}

impl Default for SqlxProviderConfig {
    fn default() -> Self {
        Self {
            pooled: false,
            max_connections: 10,
            statement_timeout: None,
        }
    }
}

#[derive(Debug, Clone)]
enum SqlxPool {
    Postgres(PgPool),
    MySql(MySqlPool),
}

/// MySQL / PostgreSQL resource provider backed by sqlx.
///
/// Standalone mode (the default) opens a dedicated connection per acquisition and
/// closes it on release, so a branch that ended without PREPARE never leaks its session
/// state into a pool. Pooled mode keeps one pool per connection target.
pub struct SqlxProvider {
    config: SqlxProviderConfig,
    pools: RwLock<HashMap<String, SqlxPool>>,
}

impl SqlxProvider {
    pub fn new(config: SqlxProviderConfig) -> Self {
        Self {
            config,
            pools: RwLock::new(HashMap::new()),
        }
    }

    pub fn standalone() -> Self {
        Self::new(SqlxProviderConfig::default())
    }

    pub fn pooled(max_connections: u32) -> Self {
        Self::new(SqlxProviderConfig {
            pooled: true,
            max_connections,
            ..SqlxProviderConfig::default()
        })
    }

    pub fn config(&self) -> &SqlxProviderConfig {
        &self.config
    }

    pub async fn pool_count(&self) -> usize {
        self.pools.read().await.len()
    }

    async fn pool_for(&self, resource: &ResourceConfig) -> Result<SqlxPool, ResourceError> {
        let key = dsn(resource);
        if let Some(pool) = self.pools.read().await.get(&key) {
            return Ok(pool.clone());
        }

        let mut pools = self.pools.write().await;
        if let Some(pool) = pools.get(&key) {
            return Ok(pool.clone());
        }

        info!(
            driver = %resource.driver,
            dsn = %masked_dsn(resource),
            "opening pooled resource"
        );
        let max_connections = self.config.max_connections.max(1);
        let pool = match resource.driver {
            ResourceDriver::Postgres => SqlxPool::Postgres(
                PgPoolOptions::new()
                    .max_connections(max_connections)
                    .connect_with(pg_options(resource))
                    .await
                    .map_err(|e| connect_error(resource, e))?,
            ),
            ResourceDriver::Mysql => SqlxPool::MySql(
                MySqlPoolOptions::new()
                    .max_connections(max_connections)
                    .connect_with(mysql_options(resource))
                    .await
                    .map_err(|e| connect_error(resource, e))?,
            ),
        };
        pools.insert(key, pool.clone());
        Ok(pool)
    }

    async fn open_session(&self, resource: &ResourceConfig) -> Result<Session, ResourceError> {
        if self.config.pooled {
            return match self.pool_for(resource).await? {
                SqlxPool::Postgres(pool) => pool
                    .acquire()
                    .await
                    .map(Session::PgPooled)
                    .map_err(|e| connect_error(resource, e)),
                SqlxPool::MySql(pool) => pool
                    .acquire()
                    .await
                    .map(Session::MySqlPooled)
                    .map_err(|e| connect_error(resource, e)),
            };
        }

        info!(
            driver = %resource.driver,
            dsn = %masked_dsn(resource),
            "opening standalone resource"
        );
        match resource.driver {
            ResourceDriver::Postgres => PgConnection::connect_with(&pg_options(resource))
                .await
                .map(Session::PgOwned)
                .map_err(|e| connect_error(resource, e)),
            ResourceDriver::Mysql => MySqlConnection::connect_with(&mysql_options(resource))
                .await
                .map(Session::MySqlOwned)
                .map_err(|e| connect_error(resource, e)),
        }
    }
}

#[async_trait]
impl ResourceProvider for SqlxProvider {
    type Handle = SqlxHandle;

    async fn acquire(&self, config: &ResourceConfig) -> Result<SqlxHandle, ResourceError> {
        Ok(SqlxHandle {
            session: Some(self.open_session(config).await?),
            statement_timeout: self.config.statement_timeout,
            health: SessionHealth::default(),
        })
    }
}

enum Session {
    PgPooled(PoolConnection<Postgres>),
    PgOwned(PgConnection),
    MySqlPooled(PoolConnection<MySql>),
    MySqlOwned(MySqlConnection),
}

/// Whether a session may go back to its pool once released.
///
/// A session is unfit while it still carries an XA branch (started but not yet prepared,
/// committed or rolled back) or after a statement timed out with its reply outstanding.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct SessionHealth {
    branch_open: bool,
    broken: bool,
}

impl SessionHealth {
    fn before(&mut self, statement: &str) {
        if opens_branch(statement) {
            self.branch_open = true;
        }
    }

    fn after(&mut self, statement: &str, result: &Result<u64, ResourceError>) {
        match result {
            Ok(_) if closes_branch(statement) => self.branch_open = false,
            Err(ResourceError::Timeout { .. }) => self.broken = true,
            _ => {}
        }
    }

    fn reusable(&self) -> bool {
        !self.branch_open && !self.broken
    }
}

fn opens_branch(statement: &str) -> bool {
    let statement = statement.trim_start().to_ascii_lowercase();
    ["xa start", "xa begin", "begin", "start transaction"]
        .iter()
        .any(|prefix| statement.starts_with(prefix))
}

fn closes_branch(statement: &str) -> bool {
    let statement = statement.trim_start().to_ascii_lowercase();
    [
        "xa prepare",
        "xa commit",
        "xa rollback",
        "prepare transaction",
        "commit",
        "rollback",
    ]
    .iter()
    .any(|prefix| statement.starts_with(prefix))
}

/// One sqlx session. Business code reaches the underlying connection through
/// [`SqlxHandle::as_postgres`] / [`SqlxHandle::as_mysql`] so its statements run inside
/// the same XA branch.
///
/// A pooled session released with a branch still open, or after a timeout, is detached
/// from its pool and closed rather than handed to the next caller.
pub struct SqlxHandle {
    session: Option<Session>,
    statement_timeout: Option<Duration>,
    health: SessionHealth,
}

impl SqlxHandle {
    pub fn as_postgres(&mut self) -> Option<&mut PgConnection> {
        match self.session.as_mut()? {
            Session::PgPooled(conn) => Some(&mut **conn),
            Session::PgOwned(conn) => Some(conn),
            _ => None,
        }
    }

    pub fn as_mysql(&mut self) -> Option<&mut MySqlConnection> {
        match self.session.as_mut()? {
            Session::MySqlPooled(conn) => Some(&mut **conn),
            Session::MySqlOwned(conn) => Some(conn),
            _ => None,
        }
    }

    // Raw protocol: MySQL refuses XA statements as prepared statements.
    async fn run(&mut self, statement: &str) -> Result<u64, ResourceError> {
        let result = if let Some(conn) = self.as_postgres() {
            conn.execute(sqlx::raw_sql(statement))
                .await
                .map(|done| done.rows_affected())
        } else if let Some(conn) = self.as_mysql() {
            conn.execute(sqlx::raw_sql(statement))
                .await
                .map(|done| done.rows_affected())
        } else {
            Err(sqlx::Error::PoolClosed)
        };
        result.map_err(|e| ResourceError::statement(statement, e))
    }
}

#[async_trait]
impl ResourceHandle for SqlxHandle {
    async fn execute_raw(&mut self, statement: &str) -> Result<u64, ResourceError> {
        self.health.before(statement);
        let limit = self.statement_timeout;
        let result = with_deadline(limit, statement, self.run(statement)).await;
        self.health.after(statement, &result);
        result
    }
}

impl Drop for SqlxHandle {
    fn drop(&mut self) {
        if self.health.reusable() {
            return;
        }
        let detached = match self.session.take() {
            Some(Session::PgPooled(conn)) => {
                drop(conn.detach());
                true
            }
            Some(Session::MySqlPooled(conn)) => {
                drop(conn.detach());
                true
            }
            _ => false,
        };
        if detached {
            warn!(
                branch_open = self.health.branch_open,
                broken = self.health.broken,
                "discarding pooled session instead of returning it"
            );
        }
    }
}

fn pg_options(resource: &ResourceConfig) -> PgConnectOptions {
    let options = PgConnectOptions::new()
        .host(&resolve_host(&resource.host))
        .port(resource.port)
        .username(&resource.user)
        .password(&resource.password);
    if resource.database.is_empty() {
        options
    } else {
        options.database(&resource.database)
    }
}

fn mysql_options(resource: &ResourceConfig) -> MySqlConnectOptions {
    let options = MySqlConnectOptions::new()
        .host(&resolve_host(&resource.host))
        .port(resource.port)
        .username(&resource.user)
        .password(&resource.password);
    if resource.database.is_empty() {
        options
    } else {
        options.database(&resource.database)
    }
}

fn connect_error(resource: &ResourceConfig, err: sqlx::Error) -> ResourceError {
    ResourceError::Connect {
        target: masked_dsn(resource),
        message: err.to_string(),
    }
}

/// Pool cache key for a resource.
fn dsn(resource: &ResourceConfig) -> String {
    format!(
        "{}://{}:{}@{}:{}/{}",
        resource.driver,
        resource.user,
        resource.password,
        resolve_host(&resource.host),
        resource.port,
        resource.database
    )
}

fn masked_dsn(resource: &ResourceConfig) -> String {
    format!(
        "{}://{}:****@{}:{}/{}",
        resource.driver,
        resource.user,
        resolve_host(&resource.host),
        resource.port,
        resource.database
    )
}

fn resolve_host(host: &str) -> String {
    let in_docker = std::env::var("IS_DOCKER")
        .map(|value| !value.is_empty())
        .unwrap_or(false);
    docker_host(host, in_docker)
}

/// Inside docker compose the host network is reached through `host.docker.internal`.
fn docker_host(host: &str, in_docker: bool) -> String {
    if in_docker {
        host.replacen("localhost", "host.docker.internal", 1)
            .replacen("127.0.0.1", "host.docker.internal", 1)
    } else {
        host.to_string()
    }
}
