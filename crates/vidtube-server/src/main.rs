mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use argon2::Params;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use vidtube_api::{AppState, AppStateInner, TokenService};
use vidtube_db::Database;
use vidtube_media::{CloudinaryUploader, StagingArea};

use crate::config::Config;

/// How often orphaned staged uploads are swept.
const STAGING_SWEEP_SECS: u64 = 3600;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vidtube_server=debug,vidtube_api=debug,vidtube_media=debug,tower_http=debug".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {:#}", e);
            eprintln!("       Set it in your .env file and restart.");
            std::process::exit(1);
        }
    };

    // Init database, staging dir, media host
    let db = Database::open(&config.db_path)?;
    let staging = Arc::new(StagingArea::new(config.upload_dir.clone()).await?);
    let media = Arc::new(CloudinaryUploader::new(config.cloudinary.clone())?);

    tokio::spawn(vidtube_media::staging::run_sweep_loop(
        staging.clone(),
        config.staging_max_age,
        STAGING_SWEEP_SECS,
    ));

    let state: AppState = Arc::new(AppStateInner {
        db,
        tokens: TokenService::new(config.tokens.clone()),
        media,
        staging,
        password_params: Params::default(),
        cookie_secure: config.cookie_secure,
    });

    let app = vidtube_api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("vidtube listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
