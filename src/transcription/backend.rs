//! Capability contracts of the two engine families and the values they exchange.
//!
//! - [`StandardBackend`]: one call returns the whole transcript as a single
//!   record; language detection is a separate, detection-only inference.
//! - [`FastBackend`]: one call returns a lazy sequence of segments plus a
//!   metadata record that already carries the detected language.

use anyhow::Result;
use candle_core::Tensor;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Whisper task: transcribe in the spoken language or translate to English.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    #[default]
    Transcribe,
    Translate,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Transcribe => "transcribe",
            Task::Translate => "translate",
        }
    }
}

impl FromStr for Task {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "transcribe" => Ok(Task::Transcribe),
            "translate" => Ok(Task::Translate),
            other => Err(format!(
                "Unsupported task '{}', expected 'transcribe' or 'translate'",
                other
            )),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the transcription response is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Text,
}

impl OutputFormat {
    /// `txt`/`text` select plain text; every other value falls back to JSON.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "txt" | "text" => OutputFormat::Text,
            _ => OutputFormat::Json,
        }
    }
}

/// Per-request decoding parameters handed to a backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodeOptions {
    pub task: Task,
    /// ISO 639-1 code; `None` lets the model detect the language.
    pub language: Option<String>,
}

/// One decoded span of the fast engine's output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    pub id: u32,
    pub start_secs: f64,
    pub end_secs: f64,
    pub text: String,
}

/// Metadata the fast engine computes before any segment is decoded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptionInfo {
    pub language: String,
    pub language_probability: f32,
    pub duration_secs: f64,
}

/// The standard engine's aggregate result.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StandardTranscript {
    pub text: String,
    pub language: Option<String>,
}

/// Lazy, finite, single-pass segment sequence.
pub type SegmentIter<'a> = Box<dyn Iterator<Item = Result<Segment>> + 'a>;

/// Full-precision engine returning one aggregate record per call.
pub trait StandardBackend: Send + Sync {
    fn transcribe(&self, audio: &Path, options: &DecodeOptions) -> Result<StandardTranscript>;

    /// Log-mel features of a 16 kHz waveform, placed on the engine's device.
    fn log_mel_spectrogram(&self, samples: &[f32]) -> Result<Tensor>;

    /// Probability of each supported language code for the given features.
    fn detect_language(&self, mel: &Tensor) -> Result<HashMap<String, f32>>;

    /// English-only checkpoints cannot detect a language.
    fn is_multilingual(&self) -> bool;
}

/// Reduced-precision engine returning segments lazily.
pub trait FastBackend: Send + Sync {
    /// Segments are decoded only as the iterator is advanced; dropping it
    /// early skips the remaining work.
    fn transcribe<'a>(
        &'a self,
        audio: &Path,
        options: &DecodeOptions,
    ) -> Result<(SegmentIter<'a>, TranscriptionInfo)>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_parsing() {
        assert_eq!("transcribe".parse::<Task>().unwrap(), Task::Transcribe);
        assert_eq!(" Translate ".parse::<Task>().unwrap(), Task::Translate);
        assert!("summarize".parse::<Task>().is_err());
        assert_eq!(Task::default().as_str(), "transcribe");
    }

    #[test]
    fn test_output_format_fallback() {
        assert_eq!(OutputFormat::parse_lenient("txt"), OutputFormat::Text);
        assert_eq!(OutputFormat::parse_lenient("TEXT"), OutputFormat::Text);
        assert_eq!(OutputFormat::parse_lenient("json"), OutputFormat::Json);
        assert_eq!(OutputFormat::parse_lenient("srt"), OutputFormat::Json);
    }
}
