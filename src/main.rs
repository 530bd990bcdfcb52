use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

mod auth;
mod capture;
mod codec;
mod config;
mod device;
mod discovery;
mod errors;
mod handlers;
mod health;
mod registry;
mod stream;

use config::ServerConfig;
use device::NokhwaBackend;
use registry::CameraRegistry;

#[derive(Parser, Debug)]
#[command(name = "rpicam-server", about = "Multi-camera MJPEG streaming server")]
struct Args {
    /// Path to the camera configuration document
    #[arg(short, long, default_value = "cameras.json")]
    config: PathBuf,

    /// Address the API server binds to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port of the API server
    #[arg(short, long, default_value_t = 8000)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rpicam_server=debug,info".into()),
        )
        .init();

    let args = Args::parse();
    let config = ServerConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    info!(
        "Starting camera server on {}:{} with {} configured cameras",
        args.host,
        args.port,
        config.cameras.len()
    );

    let registry = Arc::new(CameraRegistry::new(
        Arc::new(NokhwaBackend),
        args.config.clone(),
        config,
        true,
    ));
    registry
        .start()
        .await
        .with_context(|| format!("starting cameras from {}", args.config.display()))?;

    let app = handlers::api_router(registry.clone()).layer(CorsLayer::permissive());
    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("API listening on http://{}", addr);

    let shutdown_registry = registry.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Could not install signal handler: {}", e);
            }
            info!("Shutdown signal received");
            shutdown_registry.shutdown().await;
        })
        .await?;

    Ok(())
}
