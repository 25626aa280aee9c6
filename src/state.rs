//! # Application State Management
//!
//! Shared state handed to every HTTP handler through `web::Data`.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: many handlers, running on many worker threads, share one copy
//! - **Memory safety**: the data is freed when the last reference goes away
//!
//! ### RwLock (Reader-Writer Lock)
//! - **Purpose**: many readers OR one writer at a time
//! - **Used for**: configuration (read on every call start, written by PUT /config)
//!   and HTTP metrics
//!
//! ### What is *not* behind a lock here
//! The voice session manager guards its own state internally (a `tokio` mutex
//! and a `watch` channel), so `AppState` only needs an `Arc` to it.
//!
//! ## Lock poisoning:
//! A poisoned lock only means another thread panicked while holding it. The
//! data inside (counters, plain config values) is still usable, so we recover
//! the guard with `into_inner()` instead of panicking the handler.

use crate::audio::device::default_devices;
use crate::config::AppConfig;
use crate::memory::MemoryClient;
use crate::session::stats::VoiceStats;
use crate::session::transport::WebSocketConnector;
use crate::session::{SessionDeps, VoiceSessionManager};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// The main application state shared across all HTTP request handlers.
///
/// `Clone` is cheap: every field is an `Arc` or `Copy`.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// HTTP performance metrics, updated by the metrics middleware
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Owner of the one live voice session
    pub voice: Arc<VoiceSessionManager>,

    /// Memory store client (context prefetch and message saving)
    pub memory: Arc<MemoryClient>,

    /// When the server started
    pub start_time: Instant,
}

/// HTTP metrics collected across all requests.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of errors encountered since server start
    pub error_count: u64,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Build the state with the production collaborators: the memory store
    /// client, the WebSocket connector and the host's audio devices.
    ///
    /// Nothing is connected or acquired here; that happens on call start.
    pub fn new(config: AppConfig) -> Self {
        let memory = Arc::new(MemoryClient::new(&config.memory));
        let (capture, output) = default_devices();
        let deps = SessionDeps {
            context: memory.clone(),
            connector: Arc::new(WebSocketConnector::new(
                config.voice.endpoint_url.clone(),
                config.voice.api_key.clone(),
            )),
            capture,
            output,
        };
        Self::with_session_deps(config, memory, deps)
    }

    /// Build the state around explicit session collaborators.
    pub fn with_session_deps(config: AppConfig, memory: Arc<MemoryClient>, deps: SessionDeps) -> Self {
        let voice = VoiceSessionManager::new(deps, Arc::new(VoiceStats::default()));
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            voice: Arc::new(voice),
            memory,
            start_time: Instant::now(),
        }
    }

    fn read_config(&self) -> RwLockReadGuard<'_, AppConfig> {
        self.config.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_metrics(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the read lock immediately so writers are not held up
    /// while a handler works with the values.
    pub fn get_config(&self) -> AppConfig {
        self.read_config().clone()
    }

    /// Replace the configuration after validating it.
    ///
    /// Takes effect for calls started afterwards; a live session keeps the
    /// settings it started with.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;
        *self.config.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = new_config;
        Ok(())
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        self.write_metrics().request_count += 1;
    }

    /// Increment the total error counter (4xx and 5xx responses).
    pub fn increment_error_count(&self) {
        self.write_metrics().error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    ///
    /// The first request to an endpoint creates its entry with `or_default()`.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.write_metrics();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Copy of the current HTTP metrics, so no lock is held while serializing.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time in milliseconds, 0.0 before the first request.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that failed (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_metrics_accumulate() {
        let state = AppState::new(AppConfig::default());
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["GET /health"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.average_duration_ms(), 20.0);
        assert_eq!(metric.error_rate(), 0.5);
    }

    #[test]
    fn test_update_config_rejects_invalid() {
        let state = AppState::new(AppConfig::default());
        let mut config = state.get_config();
        config.server.port = 0;
        assert!(state.update_config(config).is_err());
        assert_eq!(state.get_config().server.port, 8080);
    }
}
