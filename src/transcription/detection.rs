//! Language detection without a transcript.
//!
//! - Fast engine: the metadata record of a default transcription pass already
//!   carries language and probability; the segment sequence is never drained.
//! - Standard engine: decode, pad or trim to the 30 s window, compute log-mel
//!   features and run the detection-only inference.
//!
//! English-only standard models report `en` with probability 1.0.

use crate::audio::{self, TemporaryAudio};
use crate::error::AppResult;
use crate::transcription::backend::DecodeOptions;
use crate::transcription::engine::{Engine, EngineHandle};
use crate::transcription::service::run_inference;
use anyhow::anyhow;
use candle_transformers::models::whisper::N_SAMPLES;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LanguageDetectionResult {
    pub detected_language: String,
    pub language_probability: f32,
}

#[derive(Clone)]
pub struct LanguageDetectionService {
    engine: Arc<EngineHandle>,
    scratch_dir: PathBuf,
    permits: Arc<Semaphore>,
}

impl LanguageDetectionService {
    pub fn new(engine: Arc<EngineHandle>, scratch_dir: PathBuf, permits: Arc<Semaphore>) -> Self {
        Self {
            engine,
            scratch_dir,
            permits,
        }
    }

    pub async fn detect(&self, audio: &[u8], filename: Option<&str>) -> AppResult<LanguageDetectionResult> {
        let audio = TemporaryAudio::create(&self.scratch_dir, audio, filename).await?;
        let engine = self.engine.acquire().await?;

        let (detected_language, language_probability) = run_inference(&self.permits, move || {
            let result = detect_blocking(&engine, audio.path());
            drop(audio);
            result
        })
        .await?;

        info!(language = %detected_language, probability = language_probability, "Language detected");
        Ok(LanguageDetectionResult {
            detected_language,
            language_probability,
        })
    }
}

fn detect_blocking(engine: &Engine, path: &Path) -> anyhow::Result<(String, f32)> {
    match engine {
        Engine::Fast(backend) => {
            let (_, info) = backend.transcribe(path, &DecodeOptions::default())?;
            Ok((info.language, info.language_probability))
        }
        Engine::Standard(backend) => {
            if !backend.is_multilingual() {
                return Ok(("en".to_string(), 1.0));
            }

            let samples = audio::load_audio(path)?;
            let samples = audio::pad_or_trim(&samples, N_SAMPLES);
            let mel = backend.log_mel_spectrogram(&samples)?;

            // Ties resolve to whichever entry the map yields last
            backend
                .detect_language(&mel)?
                .into_iter()
                .max_by(|(_, a), (_, b)| a.total_cmp(b))
                .ok_or_else(|| anyhow!("language detection returned no probabilities"))
        }
    }
}
