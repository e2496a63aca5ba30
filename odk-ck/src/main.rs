//! Check-in Kiosk (odk-ck) - Main entry point
//!
//! This is the event check-in microservice for OrgDesk, fusing optical-code
//! scanning and face matching into race-free check-in decisions for
//! unattended kiosk terminals.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use odk_ck::api;
use odk_ck::clients::{HttpAttendanceService, HttpMatchResolver};
use odk_ck::config::Config;
use odk_ck::db;
use odk_ck::engine::camera::TestPatternDevice;
use odk_ck::engine::presence::CenterWeightedDetector;
use odk_ck::engine::CheckinEngine;
use odk_ck::state::SharedState;

/// Command-line arguments for odk-ck
#[derive(Parser, Debug)]
#[command(name = "odk-ck")]
#[command(about = "Check-in Kiosk microservice for OrgDesk")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5810", env = "ODK_CK_PORT")]
    port: u16,

    /// Data folder for the kiosk database
    #[arg(short, long, env = "ODK_DATA_FOLDER")]
    data_folder: Option<PathBuf>,

    /// Path to the TOML configuration file
    #[arg(short, long, env = "ODK_CK_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "odk_ck=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse command-line arguments
    let args = Args::parse();

    info!("Starting OrgDesk Check-in Kiosk on port {}", args.port);

    // Resolve data folder and configuration
    let data_folder = match args.data_folder {
        Some(folder) => folder,
        None => odk_common::config::resolve_data_folder(None, "ODK_DATA_FOLDER")
            .context("Failed to resolve data folder")?,
    };
    std::fs::create_dir_all(&data_folder)
        .with_context(|| format!("Failed to create data folder {}", data_folder.display()))?;
    info!("Data folder: {}", data_folder.display());

    let config_path = args
        .config
        .or_else(|| odk_common::config::config_file_path().ok());
    let mut config = Config::load(data_folder, config_path.as_deref())
        .context("Failed to load configuration")?;

    // Open the database and apply stored tuning overrides
    let options = SqliteConnectOptions::new()
        .filename(config.db_path())
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .context("Failed to open kiosk database")?;

    db::init::init_database(&pool)
        .await
        .context("Failed to initialize database")?;
    db::init::init_settings_defaults(&pool, &config.tuning)
        .await
        .context("Failed to initialize settings")?;
    db::settings::apply_tuning_overrides(&pool, &mut config.tuning)
        .await
        .context("Failed to apply tuning overrides")?;

    // External collaborators
    let matcher = Arc::new(
        HttpMatchResolver::new(config.matcher_base_url.clone(), config.tenant.clone())
            .context("Failed to build match resolver client")?,
    );
    let attendance = Arc::new(
        HttpAttendanceService::new(config.attendance_base_url.clone())
            .context("Failed to build attendance client")?,
    );

    // Capture backend: platform integrations implement CaptureDevice; the
    // built-in test pattern keeps dev profiles working without hardware
    let device = Arc::new(TestPatternDevice::new());
    let presence = Arc::new(CenterWeightedDetector::default());

    // Initialize check-in engine
    let state = Arc::new(SharedState::new());
    let engine = Arc::new(CheckinEngine::new(
        pool,
        Arc::clone(&state),
        &config,
        device,
        presence,
        matcher,
        attendance,
    ));
    info!("Check-in engine initialized");

    // Build the application router
    let app_state = api::AppState {
        engine: Arc::clone(&engine),
        port: args.port,
    };
    let app = api::create_router(app_state);

    // Create socket address
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));

    info!("Starting HTTP server on {}", addr);

    // Create and run the server
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    engine.teardown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
