//! Fake backends and loaders shared by the service and handler tests.

use crate::transcription::backend::{
    DecodeOptions, FastBackend, Segment, SegmentIter, StandardBackend, StandardTranscript,
    TranscriptionInfo,
};
use crate::transcription::engine::{Engine, EngineConfig, EngineHandle, EngineKind, EngineLoader};
use crate::device::DevicePreference;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Paths a fake backend was called with, and whether each existed at the time.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<(PathBuf, bool)>>>);

impl CallLog {
    fn record(&self, path: &Path) {
        self.0.lock().unwrap().push((path.to_path_buf(), path.exists()));
    }

    pub fn calls(&self) -> Vec<(PathBuf, bool)> {
        self.0.lock().unwrap().clone()
    }
}

pub struct FakeStandard {
    pub text: String,
    pub language: Option<String>,
    pub failure: Option<String>,
    pub probabilities: HashMap<String, f32>,
    pub multilingual: bool,
    pub log: CallLog,
}

impl FakeStandard {
    pub fn returning(text: &str, language: Option<&str>) -> Self {
        Self {
            text: text.to_string(),
            language: language.map(str::to_string),
            failure: None,
            probabilities: HashMap::new(),
            multilingual: true,
            log: CallLog::default(),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::returning("", None)
        }
    }
}

impl StandardBackend for FakeStandard {
    fn transcribe(&self, audio: &Path, _options: &DecodeOptions) -> Result<StandardTranscript> {
        self.log.record(audio);
        if let Some(message) = &self.failure {
            return Err(anyhow!("{}", message));
        }
        Ok(StandardTranscript {
            text: self.text.clone(),
            language: self.language.clone(),
        })
    }

    fn log_mel_spectrogram(&self, samples: &[f32]) -> Result<Tensor> {
        Ok(Tensor::zeros((1, 80, samples.len() / 160), DType::F32, &Device::Cpu)?)
    }

    fn detect_language(&self, _mel: &Tensor) -> Result<HashMap<String, f32>> {
        if let Some(message) = &self.failure {
            return Err(anyhow!("{}", message));
        }
        Ok(self.probabilities.clone())
    }

    fn is_multilingual(&self) -> bool {
        self.multilingual
    }
}

pub struct FakeFast {
    pub segments: Vec<String>,
    pub language: String,
    pub language_probability: f32,
    pub failure: Option<String>,
    pub log: CallLog,
    /// Number of segments handed out so far.
    pub pulled: Arc<AtomicUsize>,
}

impl FakeFast {
    pub fn returning(segments: &[&str], language: &str) -> Self {
        Self {
            segments: segments.iter().map(|s| s.to_string()).collect(),
            language: language.to_string(),
            language_probability: 0.93,
            failure: None,
            log: CallLog::default(),
            pulled: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl FastBackend for FakeFast {
    fn transcribe<'a>(
        &'a self,
        audio: &Path,
        _options: &DecodeOptions,
    ) -> Result<(SegmentIter<'a>, TranscriptionInfo)> {
        self.log.record(audio);
        if let Some(message) = &self.failure {
            return Err(anyhow!("{}", message));
        }

        let pulled = Arc::clone(&self.pulled);
        let segments = self.segments.iter().enumerate().map(move |(i, text)| {
            pulled.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(Segment {
                id: i as u32,
                start_secs: i as f64,
                end_secs: i as f64 + 1.0,
                text: text.clone(),
            })
        });

        let info = TranscriptionInfo {
            language: self.language.clone(),
            language_probability: self.language_probability,
            duration_secs: self.segments.len() as f64,
        };
        Ok((Box::new(segments), info))
    }
}

/// Hands out one pre-built engine.
pub struct FixedLoader(pub Mutex<Option<Engine>>);

#[async_trait]
impl EngineLoader for FixedLoader {
    async fn load(&self, _config: &EngineConfig) -> Result<Engine> {
        self.0
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| anyhow!("engine already handed out"))
    }
}

pub struct FailingLoader(pub String);

#[async_trait]
impl EngineLoader for FailingLoader {
    async fn load(&self, _config: &EngineConfig) -> Result<Engine> {
        Err(anyhow!("{}", self.0))
    }
}

fn config(kind: EngineKind) -> EngineConfig {
    EngineConfig {
        kind,
        model_id: "base".to_string(),
        cache_dir: std::env::temp_dir(),
        device: DevicePreference::Cpu,
        beam_size: 1,
    }
}

pub fn handle_with(engine: Engine) -> Arc<EngineHandle> {
    let kind = engine.kind();
    Arc::new(EngineHandle::new(
        config(kind),
        Arc::new(FixedLoader(Mutex::new(Some(engine)))),
    ))
}

pub fn failing_handle(message: &str) -> Arc<EngineHandle> {
    Arc::new(EngineHandle::new(
        config(EngineKind::Standard),
        Arc::new(FailingLoader(message.to_string())),
    ))
}

/// Fresh, empty scratch directory.
pub fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("asr-test-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn is_empty_dir(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

/// A short 16 kHz mono WAV file.
pub fn wav_bytes(samples: usize) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..samples {
            writer
                .write_sample(((i as f32 * 0.03).sin() * 6000.0) as i16)
                .unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}
