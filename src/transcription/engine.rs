//! # Engine Handle
//!
//! Owns the process-wide inference engine: which family is active, where it
//! runs, and its one-time initialization.
//!
//! ## Lifecycle:
//! - Absent at process start (or loaded during startup when preload is on)
//! - Loaded exactly once, on the first `acquire()`; concurrent first callers
//!   wait on the same load instead of starting their own
//! - The load finishes even if the caller that started it is dropped
//! - Never reloaded or torn down while the process runs
//! - A failed load leaves the handle empty; the next top-level call retries

use crate::device::DevicePreference;
use crate::error::{AppError, AppResult};
use crate::transcription::backend::{FastBackend, StandardBackend};
use anyhow::anyhow;
use async_trait::async_trait;
use candle_core::Device;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Instant;
use tracing::{error, info};

/// Which engine family serves requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// Full-precision engine returning one aggregate record (`openai_whisper`)
    Standard,
    /// Reduced-precision engine returning lazy segments (`faster_whisper`)
    Fast,
}

impl EngineKind {
    /// Name used in configuration and status responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Standard => "openai_whisper",
            EngineKind::Fast => "faster_whisper",
        }
    }
}

impl FromStr for EngineKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai_whisper" | "openai-whisper" | "standard" => Ok(EngineKind::Standard),
            "faster_whisper" | "faster-whisper" | "fast" => Ok(EngineKind::Fast),
            other => Err(anyhow!(
                "Unknown ASR engine '{}', expected 'openai_whisper' or 'faster_whisper'",
                other
            )),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric precision the model weights are loaded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeType {
    Float32,
    Float16,
    /// Q8_0 GGUF weights
    Int8,
}

impl ComputeType {
    /// The standard engine always runs in full precision. The fast engine
    /// uses half precision on a GPU and 8-bit quantized weights on the CPU.
    pub fn select(kind: EngineKind, device: &Device) -> Self {
        match (kind, device) {
            (EngineKind::Standard, _) => ComputeType::Float32,
            (EngineKind::Fast, Device::Cpu) => ComputeType::Int8,
            (EngineKind::Fast, _) => ComputeType::Float16,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComputeType::Float32 => "float32",
            ComputeType::Float16 => "float16",
            ComputeType::Int8 => "int8",
        }
    }
}

/// Immutable engine settings, read once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub kind: EngineKind,
    pub model_id: String,
    /// Directory model files are downloaded into and loaded from.
    pub cache_dir: PathBuf,
    pub device: DevicePreference,
    /// Beam width of the fast engine; the standard engine always decodes greedily.
    pub beam_size: usize,
}

/// A loaded engine of either family.
pub enum Engine {
    Standard(Box<dyn StandardBackend>),
    Fast(Box<dyn FastBackend>),
}

impl Engine {
    pub fn kind(&self) -> EngineKind {
        match self {
            Engine::Standard(_) => EngineKind::Standard,
            Engine::Fast(_) => EngineKind::Fast,
        }
    }
}

/// Loads the model described by an [`EngineConfig`].
///
/// Implementations may download files and must resolve the device themselves.
/// A returned error leaves the handle empty.
#[async_trait]
pub trait EngineLoader: Send + Sync {
    async fn load(&self, config: &EngineConfig) -> anyhow::Result<Engine>;
}

/// Observable load state, used by the readiness probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum EngineStatus {
    Absent,
    Loading,
    Loaded,
    Failed(String),
}

impl EngineStatus {
    pub fn is_loaded(&self) -> bool {
        matches!(self, EngineStatus::Loaded)
    }
}

type LoadResult = Result<Arc<Engine>, String>;
type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

/// Process-wide owner of the inference engine.
///
/// The load runs in its own task. Callers only await a shared handle to it,
/// so a caller that goes away mid-load neither cancels the load nor loses
/// its outcome for the callers still waiting.
pub struct EngineHandle {
    config: EngineConfig,
    loader: Arc<dyn EngineLoader>,
    slot: Arc<Mutex<Option<SharedLoad>>>,
    status: Arc<RwLock<EngineStatus>>,
}

impl EngineHandle {
    pub fn new(config: EngineConfig, loader: Arc<dyn EngineLoader>) -> Self {
        Self {
            config,
            loader,
            slot: Arc::new(Mutex::new(None)),
            status: Arc::new(RwLock::new(EngineStatus::Absent)),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Return the loaded engine, loading it first if this is the first use.
    ///
    /// Callers arriving while a load is in progress wait for it and share
    /// its outcome. A load failure surfaces as `AppError::Initialization`.
    pub async fn acquire(&self) -> AppResult<Arc<Engine>> {
        let load = {
            let mut slot = lock_slot(&self.slot);
            match slot.as_ref() {
                Some(load) => load.clone(),
                None => {
                    let load = self.start_load();
                    *slot = Some(load.clone());
                    load
                }
            }
        };

        load.await.map_err(AppError::Initialization)
    }

    /// Current load state (read-only).
    pub fn status(&self) -> EngineStatus {
        match self.status.read() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Spawn the loader. Must be called with the slot lock held.
    fn start_load(&self) -> SharedLoad {
        set_status(&self.status, EngineStatus::Loading);
        info!(
            engine = self.config.kind.as_str(),
            model = %self.config.model_id,
            device = %self.config.device,
            cache_dir = %self.config.cache_dir.display(),
            "Loading inference engine"
        );

        let config = self.config.clone();
        let loader = Arc::clone(&self.loader);
        let task = {
            let slot = Arc::clone(&self.slot);
            let status = Arc::clone(&self.status);
            tokio::spawn(async move {
                let start = Instant::now();
                match loader.load(&config).await {
                    Ok(engine) => {
                        set_status(&status, EngineStatus::Loaded);
                        info!(
                            engine = config.kind.as_str(),
                            model = %config.model_id,
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            "Inference engine loaded"
                        );
                        Ok(Arc::new(engine))
                    }
                    Err(e) => {
                        let message = format!("{:#}", e);
                        error!(model = %config.model_id, error = %message, "Failed to load inference engine");
                        fail_load(&slot, &status, message.clone());
                        Err(message)
                    }
                }
            })
        };

        let slot = Arc::clone(&self.slot);
        let status = Arc::clone(&self.status);
        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    let message = format!("Engine load task failed: {}", e);
                    error!(error = %message, "Failed to load inference engine");
                    fail_load(&slot, &status, message.clone());
                    Err(message)
                }
            }
        }
        .boxed()
        .shared()
    }
}

// The slot only holds a cloneable future, so a poisoned lock is still consistent
fn lock_slot(slot: &Mutex<Option<SharedLoad>>) -> MutexGuard<'_, Option<SharedLoad>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn set_status(status: &RwLock<EngineStatus>, value: EngineStatus) {
    match status.write() {
        Ok(mut guard) => *guard = value,
        Err(poisoned) => *poisoned.into_inner() = value,
    }
}

/// Record a failed load and empty the slot so the next call retries.
fn fail_load(slot: &Mutex<Option<SharedLoad>>, status: &RwLock<EngineStatus>, message: String) {
    set_status(status, EngineStatus::Failed(message));
    lock_slot(slot).take();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::backend::{DecodeOptions, StandardTranscript};
    use candle_core::Tensor;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct NullBackend;

    impl StandardBackend for NullBackend {
        fn transcribe(&self, _audio: &Path, _options: &DecodeOptions) -> anyhow::Result<StandardTranscript> {
            Ok(StandardTranscript::default())
        }

        fn log_mel_spectrogram(&self, _samples: &[f32]) -> anyhow::Result<Tensor> {
            Err(anyhow!("not used"))
        }

        fn detect_language(&self, _mel: &Tensor) -> anyhow::Result<HashMap<String, f32>> {
            Err(anyhow!("not used"))
        }

        fn is_multilingual(&self) -> bool {
            true
        }
    }

    /// Counts load invocations; fails the first `failures` of them.
    struct CountingLoader {
        loads: AtomicUsize,
        failures: usize,
    }

    impl CountingLoader {
        fn new(failures: usize) -> Self {
            Self {
                loads: AtomicUsize::new(0),
                failures,
            }
        }
    }

    #[async_trait]
    impl EngineLoader for CountingLoader {
        async fn load(&self, _config: &EngineConfig) -> anyhow::Result<Engine> {
            let attempt = self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if attempt < self.failures {
                return Err(anyhow!("model weights not found"));
            }
            Ok(Engine::Standard(Box::new(NullBackend)))
        }
    }

    fn test_config(kind: EngineKind) -> EngineConfig {
        EngineConfig {
            kind,
            model_id: "tiny".to_string(),
            cache_dir: std::env::temp_dir(),
            device: DevicePreference::Cpu,
            beam_size: 1,
        }
    }

    #[test]
    fn test_engine_kind_parsing() {
        assert_eq!("openai_whisper".parse::<EngineKind>().unwrap(), EngineKind::Standard);
        assert_eq!("FASTER_WHISPER".parse::<EngineKind>().unwrap(), EngineKind::Fast);
        assert!("whisper_cpp".parse::<EngineKind>().is_err());
        assert_eq!(EngineKind::Fast.to_string(), "faster_whisper");
    }

    #[test]
    fn test_compute_type_selection() {
        assert_eq!(ComputeType::select(EngineKind::Standard, &Device::Cpu), ComputeType::Float32);
        assert_eq!(ComputeType::select(EngineKind::Fast, &Device::Cpu), ComputeType::Int8);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_loads_once() {
        let loader = Arc::new(CountingLoader::new(0));
        let handle = Arc::new(EngineHandle::new(test_config(EngineKind::Standard), loader.clone()));
        assert_eq!(handle.status(), EngineStatus::Absent);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let handle = Arc::clone(&handle);
                tokio::spawn(async move { handle.acquire().await })
            })
            .collect();

        let mut engines = Vec::new();
        for task in tasks {
            engines.push(task.await.unwrap().unwrap());
        }

        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(engines.iter().all(|e| Arc::ptr_eq(e, &engines[0])));
        assert_eq!(handle.status(), EngineStatus::Loaded);

        // Later calls reuse the cached engine
        let again = handle.acquire().await.unwrap();
        assert!(Arc::ptr_eq(&again, &engines[0]));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_load_is_retried_by_next_call() {
        let loader = Arc::new(CountingLoader::new(1));
        let handle = EngineHandle::new(test_config(EngineKind::Standard), loader.clone());

        let err = handle.acquire().await.err().unwrap();
        assert!(matches!(err, AppError::Initialization(ref msg) if msg == "model weights not found"));
        assert!(matches!(handle.status(), EngineStatus::Failed(_)));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);

        let engine = handle.acquire().await.unwrap();
        assert_eq!(engine.kind(), EngineKind::Standard);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
        assert!(handle.status().is_loaded());
    }

    #[tokio::test]
    async fn test_dropped_first_caller_does_not_restart_load() {
        let loader = Arc::new(CountingLoader::new(0));
        let handle = Arc::new(EngineHandle::new(test_config(EngineKind::Standard), loader.clone()));

        let first = {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move { handle.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let waiter = {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move { handle.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        first.abort();

        let engine = waiter.await.unwrap().unwrap();
        assert_eq!(engine.kind(), EngineKind::Standard);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(handle.status(), EngineStatus::Loaded);
    }

    #[tokio::test]
    async fn test_load_completes_without_any_caller() {
        let loader = Arc::new(CountingLoader::new(0));
        let handle = Arc::new(EngineHandle::new(test_config(EngineKind::Standard), loader.clone()));

        let only = {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move { handle.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        only.abort();
        assert_eq!(handle.status(), EngineStatus::Loading);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(handle.status(), EngineStatus::Loaded);

        handle.acquire().await.unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }
}
