//! # Application State
//!
//! Shared state handed to every request handler through `web::Data<AppState>`.
//!
//! ## What lives here:
//! - **config**: the configuration the process started with (immutable)
//! - **engine**: the process-wide `EngineHandle`
//! - **transcription / detection**: the two services built on that engine
//! - **inference_slots**: semaphore bounding concurrent inference jobs
//! - **metrics**: request counters updated by the metrics middleware
//!
//! ## Sharing pattern:
//! Everything is behind `Arc`, so cloning `AppState` for each actix worker is
//! cheap and all workers see the same engine. Only the metrics are mutable
//! after startup; they sit behind an `RwLock` that is held for a few
//! arithmetic operations at most.

use crate::config::AppConfig;
use crate::transcription::engine::{EngineHandle, EngineLoader};
use crate::transcription::{LanguageDetectionService, TranscriptionService};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tokio::sync::Semaphore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: Arc<EngineHandle>,
    pub transcription: TranscriptionService,
    pub detection: LanguageDetectionService,
    pub inference_slots: Arc<Semaphore>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub start_time: Instant,
}

/// Counters collected across all HTTP requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    /// Key: endpoint such as "POST /asr"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Per-endpoint request statistics.
///
/// - Average response time: `total_duration_ms / request_count`
/// - Error rate: `error_count / request_count`
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Build the engine handle and both services from a validated configuration.
    ///
    /// The engine is not loaded here; see `EngineHandle::acquire`.
    pub fn new(config: AppConfig, loader: Arc<dyn EngineLoader>) -> anyhow::Result<Self> {
        let engine = Arc::new(EngineHandle::new(config.engine_config()?, loader));
        let inference_slots = Arc::new(Semaphore::new(
            config.performance.max_concurrent_inferences,
        ));
        let scratch_dir = config.scratch_dir();

        Ok(Self {
            transcription: TranscriptionService::new(
                Arc::clone(&engine),
                scratch_dir.clone(),
                Arc::clone(&inference_slots),
            ),
            detection: LanguageDetectionService::new(
                Arc::clone(&engine),
                scratch_dir,
                Arc::clone(&inference_slots),
            ),
            config: Arc::new(config),
            engine,
            inference_slots,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        })
    }

    // Metrics stay usable after a panicking writer
    fn metrics_read(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn metrics_write(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Called by the metrics middleware for every request.
    pub fn increment_request_count(&self) {
        self.metrics_write().request_count += 1;
    }

    /// Called for every 4xx/5xx response.
    pub fn increment_error_count(&self) {
        self.metrics_write().error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_write();
        let metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        metric.request_count += 1;
        metric.total_duration_ms += duration_ms;
        if is_error {
            metric.error_count += 1;
        }
    }

    /// Copy of the current counters, taken without holding the lock afterwards.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_read().clone()
    }

    /// Inference jobs currently holding a slot.
    pub fn inferences_in_flight(&self) -> usize {
        self.config
            .performance
            .max_concurrent_inferences
            .saturating_sub(self.inference_slots.available_permits())
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl AppMetrics {
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
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
