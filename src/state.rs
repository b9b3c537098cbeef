//! # Application State Management
//!
//! This module manages shared state that needs to be accessed by multiple
//! HTTP request handlers and WebSocket connection actors simultaneously.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc<RwLock<T>> Pattern
//! - **Arc**: Multiple ownership (many handlers and actors hold a reference)
//! - **RwLock**: Multiple readers OR one writer at a time (thread-safe)
//! - **T**: The actual data type being protected
//!
//! Multiple requests can read the config simultaneously; only one can
//! update it. The relay counters are updated by every connection actor, so
//! each update is a short exclusive write.

use crate::config::AppConfig;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state shared across HTTP handlers and relay actors.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Process-wide metrics (updated by middleware and relay actors)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started (never changes, Instant is Copy)
    pub start_time: Instant,
}

/// Metrics collected across all HTTP requests and relay connections.
///
/// ## Why these metrics matter:
/// - **request_count / error_count**: HTTP load and reliability
/// - **active_legs**: currently connected WebSocket legs (capacity planning)
/// - **frames_forwarded / frames_dropped**: relay throughput and how often
///   audio arrived before the counterpart leg did
/// - **calls_completed**: terminal calls observed since process start
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of HTTP errors since server start
    pub error_count: u64,

    /// Currently connected WebSocket legs (both roles)
    pub active_legs: u32,

    /// Audio frames copied from one leg to the other
    pub frames_forwarded: u64,

    /// Audio frames dropped because no counterpart was attached
    pub frames_dropped: u64,

    /// Calls marked completed (end-call or teardown)
    pub calls_completed: u64,

    /// Detailed metrics per API endpoint
    /// Key: endpoint name (e.g., "GET /health")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    /// Number of requests to this specific endpoint
    pub request_count: u64,

    /// Total time spent processing all requests to this endpoint (milliseconds)
    pub total_duration_ms: u64,

    /// Number of errors that occurred for this endpoint
    pub error_count: u64,
}

impl AppState {
    /// Create a new AppState with the given configuration.
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// ## Why clone:
    /// Cloning releases the read lock immediately, so other threads aren't
    /// blocked while the caller works with the config.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    /// Increment the total error counter (called when any request fails).
    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();

        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// A WebSocket leg registered with the relay.
    pub fn increment_active_legs(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.active_legs += 1;
    }

    /// A WebSocket leg disconnected.
    ///
    /// ## Safety check:
    /// Guards against underflow - u32 would panic if we decremented below
    /// zero, which could otherwise happen if teardown paths overlap.
    pub fn decrement_active_legs(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_legs > 0 {
            metrics.active_legs -= 1;
        }
    }

    /// An audio frame was copied to the counterpart leg.
    pub fn record_frame_forwarded(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.frames_forwarded += 1;
    }

    /// An audio frame arrived with no counterpart attached and was dropped.
    pub fn record_frame_dropped(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.frames_dropped += 1;
    }

    /// A call reached a terminal state for the first time.
    pub fn record_call_completed(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.calls_completed += 1;
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    ///
    /// Takes a read lock and clones so metrics don't change while being
    /// serialized to JSON, and the lock isn't held during response writing.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_legs: metrics.active_legs,
            frames_forwarded: metrics.frames_forwarded,
            frames_dropped: metrics.frames_dropped,
            calls_completed: metrics.calls_completed,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time for this endpoint in milliseconds.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate for this endpoint as a fraction (0.0 to 1.0).
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
    fn test_relay_counters() {
        let state = AppState::new(AppConfig::default());

        state.increment_active_legs();
        state.increment_active_legs();
        state.record_frame_forwarded();
        state.record_frame_dropped();
        state.record_call_completed();
        state.decrement_active_legs();

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.active_legs, 1);
        assert_eq!(snapshot.frames_forwarded, 1);
        assert_eq!(snapshot.frames_dropped, 1);
        assert_eq!(snapshot.calls_completed, 1);
    }

    #[test]
    fn test_active_legs_never_underflows() {
        let state = AppState::new(AppConfig::default());
        // Overlapping teardown paths may decrement more than they increment
        state.decrement_active_legs();
        assert_eq!(state.get_metrics_snapshot().active_legs, 0);
    }

    #[test]
    fn test_endpoint_metrics() {
        let state = AppState::new(AppConfig::default());
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["GET /health"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.error_count, 1);
        assert_eq!(metric.average_duration_ms(), 20.0);
        assert_eq!(metric.error_rate(), 0.5);
    }
}
