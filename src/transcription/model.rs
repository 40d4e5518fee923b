//! # Whisper Model Identifiers
//!
//! Maps the configured model name onto Hugging Face repositories.
//!
//! ## Accepted identifiers:
//! - Short names of the published checkpoints: `tiny`, `base.en`, `large-v3`, ...
//! - Any `org/repo` id, loaded from its `main` revision
//!
//! ## Weight sources:
//! - Full/half precision: `model.safetensors` from the checkpoint repository
//! - 8-bit quantized: `model-<name>-q80.gguf` from `lmz/candle-whisper`,
//!   published for `tiny` and `tiny.en` only. Every other model is fetched as
//!   safetensors and quantized to Q8_0 while loading.

use anyhow::{anyhow, Result};
use std::fmt;
use std::str::FromStr;

/// Repository holding the Q8_0 GGUF conversions.
pub const QUANTIZED_REPO: &str = "lmz/candle-whisper";

/// Published Whisper checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelSize {
    Tiny,
    TinyEn,
    Base,
    BaseEn,
    Small,
    SmallEn,
    Medium,
    MediumEn,
    Large,
    LargeV2,
    LargeV3,
    LargeV3Turbo,
    DistilMediumEn,
    DistilLargeV2,
    DistilLargeV3,
}

impl ModelSize {
    pub const ALL: [ModelSize; 15] = [
        ModelSize::Tiny,
        ModelSize::TinyEn,
        ModelSize::Base,
        ModelSize::BaseEn,
        ModelSize::Small,
        ModelSize::SmallEn,
        ModelSize::Medium,
        ModelSize::MediumEn,
        ModelSize::Large,
        ModelSize::LargeV2,
        ModelSize::LargeV3,
        ModelSize::LargeV3Turbo,
        ModelSize::DistilMediumEn,
        ModelSize::DistilLargeV2,
        ModelSize::DistilLargeV3,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "tiny",
            ModelSize::TinyEn => "tiny.en",
            ModelSize::Base => "base",
            ModelSize::BaseEn => "base.en",
            ModelSize::Small => "small",
            ModelSize::SmallEn => "small.en",
            ModelSize::Medium => "medium",
            ModelSize::MediumEn => "medium.en",
            ModelSize::Large => "large",
            ModelSize::LargeV2 => "large-v2",
            ModelSize::LargeV3 => "large-v3",
            ModelSize::LargeV3Turbo => "large-v3-turbo",
            ModelSize::DistilMediumEn => "distil-medium.en",
            ModelSize::DistilLargeV2 => "distil-large-v2",
            ModelSize::DistilLargeV3 => "distil-large-v3",
        }
    }

    /// Hugging Face repository and the revision carrying safetensors weights.
    pub fn repo_and_revision(&self) -> (&'static str, &'static str) {
        match self {
            ModelSize::Tiny => ("openai/whisper-tiny", "main"),
            ModelSize::TinyEn => ("openai/whisper-tiny.en", "refs/pr/15"),
            ModelSize::Base => ("openai/whisper-base", "refs/pr/22"),
            ModelSize::BaseEn => ("openai/whisper-base.en", "refs/pr/13"),
            ModelSize::Small => ("openai/whisper-small", "main"),
            ModelSize::SmallEn => ("openai/whisper-small.en", "refs/pr/10"),
            ModelSize::Medium => ("openai/whisper-medium", "main"),
            ModelSize::MediumEn => ("openai/whisper-medium.en", "main"),
            ModelSize::Large => ("openai/whisper-large", "refs/pr/36"),
            ModelSize::LargeV2 => ("openai/whisper-large-v2", "refs/pr/57"),
            ModelSize::LargeV3 => ("openai/whisper-large-v3", "main"),
            ModelSize::LargeV3Turbo => ("openai/whisper-large-v3-turbo", "main"),
            ModelSize::DistilMediumEn => ("distil-whisper/distil-medium.en", "main"),
            ModelSize::DistilLargeV2 => ("distil-whisper/distil-large-v2", "main"),
            ModelSize::DistilLargeV3 => ("distil-whisper/distil-large-v3", "main"),
        }
    }

    /// File-name stem of the quantized conversion, when one is published.
    pub fn quantized_stem(&self) -> Option<&'static str> {
        match self {
            ModelSize::Tiny => Some("tiny"),
            ModelSize::TinyEn => Some("tiny-en"),
            _ => None,
        }
    }
}

impl FromStr for ModelSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_lowercase();
        ModelSize::ALL
            .into_iter()
            .find(|size| size.as_str() == name)
            .ok_or_else(|| anyhow!("Unknown Whisper model: {}", s))
    }
}

impl fmt::Display for ModelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured model: a known checkpoint or an arbitrary hub repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelId {
    Known(ModelSize),
    Hub(String),
}

impl ModelId {
    pub fn repo_and_revision(&self) -> (String, String) {
        match self {
            ModelId::Known(size) => {
                let (repo, revision) = size.repo_and_revision();
                (repo.to_string(), revision.to_string())
            }
            ModelId::Hub(repo) => (repo.clone(), "main".to_string()),
        }
    }

    /// File names of the published quantized config, tokenizer and weights.
    pub fn quantized_files(&self) -> Option<(String, String, String)> {
        let stem = match self {
            ModelId::Known(size) => size.quantized_stem()?,
            ModelId::Hub(_) => return None,
        };

        Some((
            format!("config-{}.json", stem),
            format!("tokenizer-{}.json", stem),
            format!("model-{}-q80.gguf", stem),
        ))
    }

    /// Pick the files to download for full-precision or 8-bit weights.
    pub fn weight_source(&self, quantized: bool) -> WeightSource {
        if quantized {
            if let Some((config, tokenizer, weights)) = self.quantized_files() {
                return WeightSource::PublishedGguf {
                    config,
                    tokenizer,
                    weights,
                };
            }
        }

        let (repo, revision) = self.repo_and_revision();
        WeightSource::Safetensors {
            repo,
            revision,
            quantize: quantized,
        }
    }
}

/// Where a model's config, tokenizer and weights are fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightSource {
    /// Q8_0 GGUF conversion in [`QUANTIZED_REPO`].
    PublishedGguf {
        config: String,
        tokenizer: String,
        weights: String,
    },
    /// `config.json`, `tokenizer.json` and `model.safetensors` from the
    /// checkpoint repository; `quantize` converts the weights to Q8_0 on load.
    Safetensors {
        repo: String,
        revision: String,
        quantize: bool,
    },
}

impl FromStr for ModelId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.contains('/') {
            let valid = s.split('/').count() == 2 && s.split('/').all(|part| !part.is_empty());
            if !valid {
                return Err(anyhow!("Invalid model repository id: {}", s));
            }
            return Ok(ModelId::Hub(s.to_string()));
        }
        Ok(ModelId::Known(s.parse()?))
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelId::Known(size) => write!(f, "{}", size),
            ModelId::Hub(repo) => f.write_str(repo),
        }
    }
}
