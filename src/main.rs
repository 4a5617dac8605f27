//! # Speech Relay - Main Application Entry Point
//!
//! An Actix-web server relaying speech between clients and an external speech
//! service:
//!
//! - **`GET /stt`**: WebSocket, raw PCM in, one JSON recognition result out
//! - **`GET /tts`**: WebSocket, JSON text requests in, synthesized audio out
//! - **`POST /rest/stt`**: multipart WAV upload, JSON recognition result
//! - **`GET /health`**, **`GET /api/v1/health`**, **`GET /api/v1/metrics`**
//!
//! ## Application Architecture:
//! - **config**: layered configuration (defaults, `config.toml`, environment)
//! - **state**: shared backend client, metrics and session slots
//! - **audio**: push streams, WAV container handling, resampling, uploads
//! - **speech**: backend trait, Azure client, recognition/synthesis sessions
//! - **websocket**: `/stt` and `/tts` connection actors
//! - **handlers**: the upload endpoint
//! - **middleware**: per-route request metrics (request logging comes from
//!   `tracing-actix-web`)
//! - **error**: handler error type and its HTTP mapping

mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod speech;
mod state;
mod websocket;

#[cfg(test)]
mod testing;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGINT or SIGTERM arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// Application entry point.
///
/// ## Startup sequence:
/// 1. Load `.env` and initialize tracing
/// 2. Load and validate configuration
/// 3. Build the speech backend and shared state
/// 4. Serve until the server fails or a shutdown signal arrives
///
/// ## Rust Concepts:
/// - **`#[actix_web::main]`**: starts the actix system and its tokio runtime
/// - **`move` closure**: `HttpServer::new` calls it once per worker thread, so
///   each worker gets its own clone of `AppState` (cheap, it is all `Arc`s)
/// - **`anyhow::Result`**: any startup error ends the process with its message
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting speech-relay v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    info!(speech = ?config.speech, "Speech service settings");
    if !config.has_credentials() {
        warn!("No speech subscription key configured (set SPEECH_KEY); speech requests will fail");
    }

    let backend = speech::create_backend(&config)?;
    info!(backend = backend.name(), "Speech backend ready");

    let app_state = AppState::new(config.clone(), backend);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

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
            .wrap(middleware::MetricsMiddleware)
            .wrap(TracingLogger::default())
            .configure(configure_routes)
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

/// Mount every endpoint of the relay.
///
/// ## Routes:
/// - `GET /stt`, `GET /tts`: WebSocket upgrades, one speech session each
/// - `POST /rest/stt`: multipart WAV recognition
/// - `GET /health`, `GET /api/v1/health`, `GET /api/v1/metrics`
fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/stt", web::get().to(websocket::stt_websocket))
        .route("/tts", web::get().to(websocket::tts_websocket))
        .route("/rest/stt", web::post().to(handlers::recognize_upload))
        .service(
            web::scope("/api/v1")
                .route("/health", web::get().to(health::health_check))
                .route("/metrics", web::get().to(health::detailed_metrics)),
        )
        .route("/health", web::get().to(health::health_check));
}

/// `RUST_LOG` controls the filter; defaults to `speech_relay=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "speech_relay=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Flip [`SHUTDOWN_SIGNAL`] on SIGINT or SIGTERM.
///
/// The server keeps running if the handlers cannot be installed.
fn setup_signal_handlers() {
    tokio::spawn(async {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll [`SHUTDOWN_SIGNAL`] until it is set.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecognitionScript, ScriptedBackend};
    use actix_web::http::StatusCode;
    use actix_web::{test as actix_test, App};
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_routes_are_counted_once_per_request() {
        let state = AppState::new(
            AppConfig::default(),
            Arc::new(ScriptedBackend::new(RecognitionScript::Fail)),
        );
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .wrap(middleware::MetricsMiddleware)
                .wrap(TracingLogger::default())
                .configure(configure_routes),
        )
        .await;

        for uri in ["/health", "/api/v1/health", "/api/v1/metrics"] {
            let req = actix_test::TestRequest::get().uri(uri).to_request();
            let response = actix_test::call_service(&app, req).await;
            assert_eq!(response.status(), StatusCode::OK, "{}", uri);
        }

        // A plain GET without upgrade headers is refused by the WebSocket handshake.
        let req = actix_test::TestRequest::get().uri("/stt").to_request();
        let response = actix_test::call_service(&app, req).await;
        assert!(response.status().is_client_error());

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.request_count, 4);
        assert_eq!(metrics.endpoint_metrics["GET /health"].request_count, 1);
        assert_eq!(metrics.endpoint_metrics["GET /api/v1/health"].request_count, 1);
        assert_eq!(metrics.endpoint_metrics["GET /stt"].error_count, 1);
    }
}
