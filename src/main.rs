use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tower::make::Shared;
use tracing_subscriber::EnvFilter;

use workplace_backend::auth::jwt::JwtService;
use workplace_backend::config::AppConfig;
use workplace_backend::state::AppState;
use workplace_backend::storage::LocalFileStorage;
use workplace_backend::{db, error, mailer, push, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "server",
        app_env = %config.app_env,
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        server_host = %config.server_host,
        server_port = config.server_port,
        upload_dir = %config.upload_dir.display(),
        push_enabled = config.fcm_server_key.is_some(),
        mail_enabled = config.mail_api_url.is_some(),
        "loaded backend configuration"
    );
    error::expose_internal_details(!config.is_production());

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let applied = db::run_migrations(&pool)?;
    tracing::info!(applied, "database migrations up to date");

    let storage = Arc::new(LocalFileStorage::new(config.upload_dir.clone()).await?);
    let jwt = JwtService::from_config(&config)?;
    let mailer = mailer::from_config(&config);
    let push = push::from_config(&config);

    let state = AppState::new(pool, config, storage, jwt, mailer, push);
    let listen_addr: SocketAddr = {
        let config = state.config.clone();
        format!("{}:{}", config.server_host, config.server_port).parse()?
    };
    let router = routes::create_router(state);

    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!("listening on {}", listen_addr);

    axum::serve(listener, Shared::new(router))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("server received shutdown signal");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
