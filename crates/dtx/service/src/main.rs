use clap::Parser;
use dtx_adapters::SqlxProviderConfig;
use dtx_core::{ResourceConfig, ResourceDriver};
use dtx_service::{build_router, ServiceState};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "dtxd", version, about = "XA branch callback service")]
struct Cli {
    /// Socket address to bind, e.g. 0.0.0.0:8081
    #[arg(long, default_value = "127.0.0.1:8081", env = "DTX_LISTEN")]
    listen: SocketAddr,
    /// Resource engine: mysql or postgres.
    #[arg(long, default_value = "mysql", env = "DTX_DRIVER")]
    driver: ResourceDriver,
    #[arg(long, default_value = "localhost", env = "DTX_DB_HOST")]
    db_host: String,
    #[arg(long, default_value_t = 3306, env = "DTX_DB_PORT")]
    db_port: u16,
    #[arg(long, default_value = "root", env = "DTX_DB_USER")]
    db_user: String,
    #[arg(long, default_value = "", env = "DTX_DB_PASSWORD", hide_env_values = true)]
    db_password: String,
    #[arg(long, default_value = "", env = "DTX_DB_NAME")]
    db_name: String,
    /// Share one connection pool per resource instead of a connection per callback.
    #[arg(long, default_value_t = false, env = "DTX_POOLED")]
    pooled: bool,
    /// Max pool connections when --pooled is set.
    #[arg(long, default_value_t = 10, env = "DTX_MAX_CONNECTIONS")]
    max_connections: u32,
    /// Deadline for each XA statement.
    #[arg(long, env = "DTX_STATEMENT_TIMEOUT_MS")]
    statement_timeout_ms: Option<u64>,
}

impl Cli {
    fn resource(&self) -> ResourceConfig {
        ResourceConfig {
            driver: self.driver,
            host: self.db_host.clone(),
            port: self.db_port,
            user: self.db_user.clone(),
            password: self.db_password.clone(),
            database: self.db_name.clone(),
        }
    }

    fn provider(&self) -> SqlxProviderConfig {
        SqlxProviderConfig {
            pooled: self.pooled,
            max_connections: self.max_connections,
            statement_timeout: self.statement_timeout_ms.map(Duration::from_millis),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "dtx_service=info,dtx_core=info,info".to_string()),
        )
        .init();

    let cli = Cli::parse();
    let resource = cli.resource();
    info!(resource = ?resource, pooled = cli.pooled, "configured resource");

    let app = build_router(ServiceState::sqlx(resource, cli.provider()));
    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!("dtx-service listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
