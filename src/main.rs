//! # Whisper ASR Server - Main Application Entry Point
//!
//! HTTP speech-to-text service built on actix-web and candle's Whisper.
//!
//! ## Application Architecture:
//! - **config**: Configuration (defaults, config.toml, environment variables)
//! - **state**: Shared application state: engine handle, services, metrics
//! - **transcription**: Engine handle, Whisper backends, transcription and detection services
//! - **audio**: Temporary upload files, decoding/resampling, mel filters
//! - **device**: CPU/CUDA/Metal selection
//! - **health**: Liveness, readiness and metrics endpoints
//! - **middleware**: Request logging and metrics collection
//! - **handlers**: `/asr` and `/detect-language`
//! - **error**: Error types and their HTTP responses

mod audio;
mod config;
mod device;
mod error;
mod handlers;
mod health;
mod middleware;
mod state;
mod transcription;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use device::DeviceManager;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::WhisperLoader;

/// Set once SIGTERM or SIGINT has been received.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting whisper-asr-server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        model = %config.asr.model,
        engine = %config.asr.engine,
        device = %config.asr.device,
        model_path = %config.asr.model_path,
        "ASR configuration loaded"
    );

    let scratch_dir = config.scratch_dir();
    std::fs::create_dir_all(&scratch_dir)?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app_state = AppState::new(config.clone(), Arc::new(WhisperLoader))?;

    // Preload failures abort startup
    if config.asr.preload {
        info!("Preloading ASR engine");
        app_state.engine.acquire().await?;
    }

    // Liveness checks only read the cached GPU availability
    let (cuda_available, metal_available) = DeviceManager::warm_up();
    info!(cuda_available, metal_available, "GPU availability checked");

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .route("/", web::get().to(health::health_check))
            .route("/health", web::get().to(health::health_check))
            .route("/ready", web::get().to(health::readiness))
            .route("/metrics", web::get().to(health::detailed_metrics))
            .route("/asr", web::post().to(handlers::transcribe))
            .route("/detect-language", web::post().to(handlers::detect_language))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` controls the filter; defaults to `whisper_asr_server=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "whisper_asr_server=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
