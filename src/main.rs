//! # Health Voice Backend - Main Application Entry Point
//!
//! Local service that runs a real-time duplex voice conversation between the
//! user's microphone/speaker and a remote conversational AI endpoint, primed
//! with a summary of the user's health history from a memory store.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: the HTTP server, the session driver and the network
//!   tasks all run on one async runtime
//! - **traits as seams**: the session core only sees `RealtimeConnector`,
//!   `ContextProvider`, `CaptureDevice` and `OutputDevice`
//! - **Result<T, E>**: startup errors bubble up with `?` and end the process
//!
//! ## Application Architecture:
//! - **config**: layered configuration (defaults, TOML file, environment)
//! - **audio**: PCM codec, capture framing, playback scheduling, hardware
//! - **session**: the voice session state machine and its transport
//! - **memory**: memory store client (context prefetch, message saving)
//! - **state / health / middleware / handlers**: the HTTP control surface
//! - **error**: core and HTTP error types

mod audio;       // PCM codec, capture, playback, hardware (audio/ directory)
mod config;      // Configuration management (config.rs)
mod error;       // Error handling types (error.rs)
mod handlers;    // HTTP request handlers (handlers/ directory)
mod health;      // Health check endpoints (health.rs)
mod memory;      // Memory store client (memory.rs)
mod middleware;  // Custom middleware (middleware/ directory)
mod session;     // Voice session core (session/ directory)
mod state;       // Application state management (state.rs)

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use crate::config::AppConfig;
use crate::state::AppState;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging**
/// 3. **Creates shared application state**, including the voice session manager
/// 4. **Serves the control API** until SIGINT/SIGTERM
/// 5. **Stops any live call** (microphone released, socket closed) before exiting
#[actix_web::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting health-voice-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    if config.voice.api_key.is_none() {
        warn!("No streaming endpoint key configured (GEMINI_API_KEY); calls will fail to connect");
    }

    let app_state = AppState::new(config.clone());
    if !app_state.memory.is_configured() {
        info!("Memory store not configured (MEMOS_API_KEY); calls start without history");
    }
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    info!("Starting HTTP server on {}", bind_addr);

    let server_state = app_state.clone();
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(server_state.clone()))
            // Middleware runs in reverse order for responses
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/call/start", web::post().to(handlers::start_call))
                    .route("/call/stop", web::post().to(handlers::stop_call))
                    .route("/call/status", web::get().to(handlers::call_status))
                    .route("/memory/messages", web::post().to(handlers::save_message)),
            )
            .route("/health", web::get().to(health::health_check))
            .default_service(web::route().to(handlers::not_found))
    })
    .bind(&bind_addr)?
    // Shutdown is driven below so the live call is ended first
    .disable_signals()
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
        _ = shutdown_signal() => {
            info!("Shutdown signal received, ending any live call...");
            let final_state = app_state.voice.stop().await;
            info!(state = final_state.as_str(), "Voice session stopped");

            info!("Stopping HTTP server...");
            server_handle.stop(true).await;
        }
    }

    // No-op when the call already ended above
    app_state.voice.stop().await;

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// ## Environment Variables:
/// - `RUST_LOG`: filter directives, e.g. `health_voice_backend=trace` to see
///   every scheduled fragment
/// - If not set, defaults to `health_voice_backend=debug,actix_web=info`
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "health_voice_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM.
///
/// If the SIGTERM handler cannot be installed we still honour Ctrl+C.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received SIGINT"),
        Err(e) => {
            // Without any signal source the server runs until killed
            error!(error = %e, "Failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    }
}
