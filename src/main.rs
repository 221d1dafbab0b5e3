use clap::Parser;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

use snapgram::backend::{BackendClient, DiskFileStorage, SqliteBackend};
use snapgram::config::{Cli, Config};
use snapgram::db;
use snapgram::gateway::Gateway;
use snapgram::routes;
use snapgram::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli)?;
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;

    // Ensure uploads directory exists
    std::fs::create_dir_all(config.uploads_path())?;

    // Initialize database
    let pool = db::create_pool(&config.db_path())?;
    db::run_migrations(&pool)?;

    // Self-hosted backend: documents and accounts in SQLite, files on disk
    let backend = BackendClient::self_hosted(
        SqliteBackend::new(pool.clone(), config.auth.session_hours),
        DiskFileStorage::new(pool, config.uploads_path(), config.storage.public_url.clone()),
    );
    let gateway = Gateway::new(backend, config.feed.clone());
    let state = AppState::new(config.clone(), gateway);

    let app = routes::app(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
