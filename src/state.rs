//! # Application State Management
//!
//! Shared state handed to every handler through `web::Data<AppState>`.
//!
//! ## What is shared:
//! - **Configuration**: read-only after startup, so a plain `Arc<AppConfig>`
//! - **Speech backend**: one client (and one connection pool) for all sessions
//! - **Metrics**: counters updated by the middleware and the speech handlers,
//!   behind an `Arc<RwLock<_>>`
//! - **Session slots**: a semaphore bounding concurrently open speech sessions
//!
//! Sessions themselves share nothing: each one owns its push stream and
//! recognizer, and only touches the state to take a slot and bump counters.

use crate::config::AppConfig;
use crate::speech::recognition::RecognitionOutcome;
use crate::speech::SpeechBackend;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;

/// State shared by every handler and WebSocket actor.
///
/// ## Thread Safety Pattern:
/// Cloning an `AppState` clones the `Arc`s inside it, so every worker thread
/// sees the same backend, counters and session slots.
///
/// ## Rust Concepts:
/// - **`Arc<dyn SpeechBackend>`**: a shared trait object; tests swap in a
///   scripted backend without touching the handlers
/// - **`Arc<Semaphore>`**: permits are the session slots, handed out with
///   `try_acquire_owned` so they can live inside an actor
/// - **Manual `Debug`**: the backend trait object has no `Debug`, so only its
///   name is printed
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub backend: Arc<dyn SpeechBackend>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    sessions: Arc<Semaphore>,
    pub start_time: Instant,
}

/// Counters collected across all requests and sessions.
///
/// ## Why these metrics matter:
/// - **rejected_sessions**: how often the session cap was hit
/// - **recognition**: how sessions ended, including clients that left early
/// - **endpoint_metrics**: latency and error rate per route
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    /// Sessions refused because every slot was taken.
    pub rejected_sessions: u64,
    /// Sessions admitted, keyed by [`SessionKind::as_str`].
    pub sessions_opened: HashMap<&'static str, u64>,
    pub recognition: RecognitionMetrics,
    pub synthesis: SynthesisMetrics,
    /// Key: endpoint pattern, e.g. `"POST /rest/stt"`.
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Terminal outcomes of recognition sessions, across WebSocket and upload.
#[derive(Debug, Default, Clone)]
pub struct RecognitionMetrics {
    pub success: u64,
    pub no_match: u64,
    pub internal_error: u64,
    /// Sessions whose client left before an outcome was delivered.
    pub abandoned: u64,
}

impl RecognitionMetrics {
    pub fn total(&self) -> u64 {
        self.success + self.no_match + self.internal_error + self.abandoned
    }
}

#[derive(Debug, Default, Clone)]
pub struct SynthesisMetrics {
    pub requests: u64,
    pub failures: u64,
    pub bytes_streamed: u64,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

/// Which kind of session holds a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    WebSocketStt,
    WebSocketTts,
    UploadStt,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::WebSocketStt => "ws_stt",
            SessionKind::WebSocketTts => "ws_tts",
            SessionKind::UploadStt => "upload_stt",
        }
    }
}

/// A held session slot.
///
/// ## Rust Concepts:
/// - **RAII**: the slot is released when the permit is dropped, however the
///   session ends
#[derive(Debug)]
pub struct SessionPermit {
    _permit: OwnedSemaphorePermit,
}

impl AppState {
    pub fn new(config: AppConfig, backend: Arc<dyn SpeechBackend>) -> Self {
        let max_sessions = config.performance.max_concurrent_sessions;
        Self {
            config: Arc::new(config),
            backend,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            sessions: Arc::new(Semaphore::new(max_sessions)),
            start_time: Instant::now(),
        }
    }

    // A panic while holding the lock cannot leave counters half-updated,
    // so a poisoned lock is still usable.
    fn metrics_read(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn metrics_write(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a session slot, or `None` when all `max_concurrent_sessions` are in use.
    ///
    /// Never waits; callers answer 503 when this returns `None`.
    pub fn try_acquire_session(&self, kind: SessionKind) -> Option<SessionPermit> {
        match Arc::clone(&self.sessions).try_acquire_owned() {
            Ok(permit) => {
                *self.metrics_write().sessions_opened.entry(kind.as_str()).or_default() += 1;
                Some(SessionPermit { _permit: permit })
            }
            Err(_) => {
                self.metrics_write().rejected_sessions += 1;
                warn!(kind = kind.as_str(), "No session slot available");
                None
            }
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.config
            .performance
            .max_concurrent_sessions
            .saturating_sub(self.sessions.available_permits())
    }

    pub fn increment_request_count(&self) {
        self.metrics_write().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics_write().error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_write();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn record_recognition(&self, outcome: &RecognitionOutcome) {
        let mut metrics = self.metrics_write();
        match outcome {
            RecognitionOutcome::Success { .. } => metrics.recognition.success += 1,
            RecognitionOutcome::NoMatch => metrics.recognition.no_match += 1,
            RecognitionOutcome::InternalError => metrics.recognition.internal_error += 1,
        }
    }

    pub fn record_abandoned_recognition(&self) {
        self.metrics_write().recognition.abandoned += 1;
    }

    pub fn record_synthesis(&self, bytes_streamed: u64, failed: bool) {
        let mut metrics = self.metrics_write();
        metrics.synthesis.requests += 1;
        metrics.synthesis.bytes_streamed += bytes_streamed;
        if failed {
            metrics.synthesis.failures += 1;
        }
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_read().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("backend", &self.backend.name())
            .field("active_sessions", &self.active_sessions())
            .field("start_time", &self.start_time)
            .finish()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
