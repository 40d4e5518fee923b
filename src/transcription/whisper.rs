//! # Candle Whisper Backends
//!
//! Implements both engine contracts on top of `candle-transformers`' Whisper:
//! - [`StandardWhisper`]: full-precision weights, whole transcript in one call
//! - [`FastWhisper`]: half-precision (GPU) or Q8_0 quantized (CPU) weights,
//!   segments decoded lazily, one 30 s window per segment. Models without a
//!   published GGUF conversion are quantized from safetensors while loading.
//!
//! ## Loading Process:
//! 1. Resolve the device and compute type
//! 2. Fetch config, tokenizer and weights into the model cache directory
//!    (files already in the cache are not downloaded again)
//! 3. Build the model on the blocking pool
//!
//! ## Decoding:
//! No timestamps. The audio is cut into 30 s mel windows; each window is
//! encoded once and decoded with a fresh cross-attention cache. The standard
//! engine decodes greedily; the fast engine runs a beam search of
//! `asr.beam_size` hypotheses.
//! Windows that look like silence (high no-speech probability and low average
//! log-probability) produce no text.

use crate::audio::{self, mel};
use crate::device::DeviceManager;
use crate::transcription::backend::{
    DecodeOptions, FastBackend, Segment, SegmentIter, StandardBackend, StandardTranscript, Task,
    TranscriptionInfo,
};
use crate::transcription::engine::{ComputeType, Engine, EngineConfig, EngineKind, EngineLoader};
use crate::transcription::model::{ModelId, WeightSource, QUANTIZED_REPO};
use anyhow::{anyhow, Error as E, Result};
use async_trait::async_trait;
use candle_core::quantized::{gguf_file, GgmlDType, QTensor};
use candle_core::{DType, Device, IndexOp, Tensor, D};
use candle_nn::ops::{log_softmax, softmax};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, Config};
use candle_transformers::quantized_var_builder;
use hf_hub::api::tokio::{ApiBuilder, ApiRepo};
use hf_hub::{Repo, RepoType};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use tokenizers::Tokenizer;
use tracing::{debug, info};

/// Language codes in the order of their tokens in the Whisper vocabulary.
pub const LANGUAGES: &[&str] = &[
    "en", "zh", "de", "es", "ru", "ko", "fr", "ja", "pt", "tr", "pl", "ca", "nl", "ar", "sv", "it",
    "id", "hi", "fi", "vi", "he", "uk", "el", "ms", "cs", "ro", "da", "hu", "ta", "no", "th", "ur",
    "hr", "bg", "lt", "la", "mi", "ml", "cy", "sk", "te", "fa", "lv", "bn", "sr", "az", "sl", "kn",
    "et", "mk", "br", "eu", "is", "hy", "ne", "mn", "bs", "kk", "sq", "sw", "gl", "mr", "pa", "si",
    "km", "sn", "yo", "so", "af", "oc", "ka", "be", "tg", "sd", "gu", "am", "yi", "lo", "uz", "fo",
    "ht", "ps", "tk", "nn", "mt", "sa", "lb", "my", "bo", "tl", "mg", "as", "tt", "haw", "ln",
    "ha", "ba", "jw", "su", "yue",
];

/// Production loader: downloads from the Hugging Face hub and builds the model.
pub struct WhisperLoader;

#[async_trait]
impl EngineLoader for WhisperLoader {
    async fn load(&self, config: &EngineConfig) -> Result<Engine> {
        let model_id: ModelId = config.model_id.parse()?;
        let device = DeviceManager::resolve(config.device);
        let compute = ComputeType::select(config.kind, &device);
        info!(
            model = %model_id,
            device = DeviceManager::describe(&device),
            compute_type = compute.as_str(),
            "Resolved Whisper model"
        );

        let files = fetch_model_files(&model_id, compute, &config.cache_dir).await?;
        let whisper =
            tokio::task::spawn_blocking(move || Whisper::load(&files, compute, device)).await??;

        Ok(match config.kind {
            EngineKind::Standard => Engine::Standard(Box::new(StandardWhisper(whisper))),
            EngineKind::Fast => Engine::Fast(Box::new(FastWhisper {
                whisper,
                beam_size: config.beam_size.max(1),
            })),
        })
    }
}

struct ModelFiles {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: Weights,
}

enum Weights {
    Gguf(PathBuf),
    Safetensors { path: PathBuf, quantize: bool },
}

async fn fetch_model_files(model: &ModelId, compute: ComputeType, cache_dir: &Path) -> Result<ModelFiles> {
    tokio::fs::create_dir_all(cache_dir).await.map_err(|e| {
        anyhow!("Failed to create model cache directory {}: {}", cache_dir.display(), e)
    })?;

    let mut builder = ApiBuilder::new()
        .with_cache_dir(cache_dir.to_path_buf())
        .with_progress(false);
    if let Ok(token) = std::env::var("HF_TOKEN") {
        builder = builder.with_token(Some(token));
    }
    let api = builder.build()?;

    match model.weight_source(compute == ComputeType::Int8) {
        WeightSource::PublishedGguf {
            config,
            tokenizer,
            weights,
        } => {
            let repo = api.repo(Repo::with_revision(
                QUANTIZED_REPO.to_string(),
                RepoType::Model,
                "main".to_string(),
            ));
            Ok(ModelFiles {
                config: download(&repo, QUANTIZED_REPO, &config).await?,
                tokenizer: download(&repo, QUANTIZED_REPO, &tokenizer).await?,
                weights: Weights::Gguf(download(&repo, QUANTIZED_REPO, &weights).await?),
            })
        }
        WeightSource::Safetensors {
            repo: repo_id,
            revision,
            quantize,
        } => {
            let repo = api.repo(Repo::with_revision(repo_id.clone(), RepoType::Model, revision));
            Ok(ModelFiles {
                config: download(&repo, &repo_id, "config.json").await?,
                tokenizer: download(&repo, &repo_id, "tokenizer.json").await?,
                weights: Weights::Safetensors {
                    path: download(&repo, &repo_id, "model.safetensors").await?,
                    quantize,
                },
            })
        }
    }
}

async fn download(repo: &ApiRepo, repo_id: &str, file: &str) -> Result<PathBuf> {
    debug!(repo = repo_id, file, "Fetching model file");
    repo.get(file)
        .await
        .map_err(|e| anyhow!("Failed to download {} from {}: {}", file, repo_id, e))
}

enum Model {
    Normal(m::model::Whisper),
    Quantized(m::quantized_model::Whisper),
}

impl Model {
    fn encoder_forward(&mut self, mel: &Tensor, flush: bool) -> candle_core::Result<Tensor> {
        match self {
            Self::Normal(model) => model.encoder.forward(mel, flush),
            Self::Quantized(model) => model.encoder.forward(mel, flush),
        }
    }

    fn decoder_forward(&mut self, tokens: &Tensor, audio_features: &Tensor, flush: bool) -> candle_core::Result<Tensor> {
        match self {
            Self::Normal(model) => model.decoder.forward(tokens, audio_features, flush),
            Self::Quantized(model) => model.decoder.forward(tokens, audio_features, flush),
        }
    }

    fn decoder_final_linear(&mut self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Self::Normal(model) => model.decoder.final_linear(xs),
            Self::Quantized(model) => model.decoder.final_linear(xs),
        }
    }
}

struct SpecialTokens {
    sot: u32,
    eot: u32,
    transcribe: u32,
    translate: u32,
    no_timestamps: u32,
    no_speech: Option<u32>,
}

/// Convert full-precision safetensors weights into an in-memory Q8_0 GGUF image.
fn quantize_safetensors(path: &Path) -> Result<Vec<u8>> {
    let start = Instant::now();
    let tensors = candle_core::safetensors::load(path, &Device::Cpu)?;
    let mut names: Vec<&String> = tensors.keys().collect();
    names.sort();

    let mut quantized = Vec::with_capacity(names.len());
    for name in names {
        let tensor = &tensors[name];
        let qtensor = QTensor::quantize(tensor, quantized_dtype(name, tensor.dims()))?;
        quantized.push((name.as_str(), qtensor));
    }

    let entries: Vec<(&str, &QTensor)> = quantized.iter().map(|(name, t)| (*name, t)).collect();
    let mut buffer = Cursor::new(Vec::new());
    gguf_file::write(&mut buffer, &[], &entries)?;

    info!(
        tensors = entries.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Quantized safetensors weights to Q8_0"
    );
    Ok(buffer.into_inner())
}

/// Q8_0 for weight matrices whose rows split into whole blocks; F32 for
/// convolution kernels, biases and norms.
fn quantized_dtype(name: &str, dims: &[usize]) -> GgmlDType {
    match dims {
        [_, cols] if name.ends_with(".weight") && cols % GgmlDType::Q8_0.block_size() == 0 => {
            GgmlDType::Q8_0
        }
        _ => GgmlDType::F32,
    }
}

fn token_id(tokenizer: &Tokenizer, token: &str) -> Result<u32> {
    tokenizer
        .token_to_id(token)
        .ok_or_else(|| anyhow!("no token-id for {}", token))
}

/// A loaded checkpoint shared by both engine families.
///
/// The model itself sits behind a mutex: its attention caches need `&mut`
/// access, so inference on one model is serialized.
struct Whisper {
    model: Mutex<Model>,
    config: Config,
    tokenizer: Tokenizer,
    device: Device,
    dtype: DType,
    mel_filters: Vec<f32>,
    tokens: SpecialTokens,
    languages: Vec<(&'static str, u32)>,
    /// Additive logit mask: `-inf` for suppressed and timestamp tokens.
    suppress: Tensor,
    multilingual: bool,
}

impl Whisper {
    fn load(files: &ModelFiles, compute: ComputeType, device: Device) -> Result<Self> {
        let start = Instant::now();
        let config: Config = serde_json::from_str(&std::fs::read_to_string(&files.config)?)?;
        let tokenizer = Tokenizer::from_file(&files.tokenizer).map_err(E::msg)?;

        let (model, dtype) = match &files.weights {
            Weights::Gguf(path) => {
                let vb = quantized_var_builder::VarBuilder::from_gguf(path, &device)?;
                let model = m::quantized_model::Whisper::load(&vb, config.clone())?;
                (Model::Quantized(model), DType::F32)
            }
            Weights::Safetensors { path, quantize: true } => {
                let gguf = quantize_safetensors(path)?;
                let vb = quantized_var_builder::VarBuilder::from_gguf_buffer(&gguf, &device)?;
                let model = m::quantized_model::Whisper::load(&vb, config.clone())?;
                (Model::Quantized(model), DType::F32)
            }
            Weights::Safetensors { path, quantize: false } => {
                let dtype = if compute == ComputeType::Float16 { DType::F16 } else { m::DTYPE };
                // Safety: the weights file is not modified while mapped
                let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path], dtype, &device)? };
                let model = m::model::Whisper::load(&vb, config.clone())?;
                (Model::Normal(model), dtype)
            }
        };

        let no_speech = m::NO_SPEECH_TOKENS
            .iter()
            .find_map(|token| tokenizer.token_to_id(token));
        let tokens = SpecialTokens {
            sot: token_id(&tokenizer, m::SOT_TOKEN)?,
            eot: token_id(&tokenizer, m::EOT_TOKEN)?,
            transcribe: token_id(&tokenizer, m::TRANSCRIBE_TOKEN)?,
            translate: token_id(&tokenizer, m::TRANSLATE_TOKEN)?,
            no_timestamps: token_id(&tokenizer, m::NO_TIMESTAMPS_TOKEN)?,
            no_speech,
        };

        let languages: Vec<(&'static str, u32)> = LANGUAGES
            .iter()
            .filter_map(|code| {
                tokenizer
                    .token_to_id(&format!("<|{}|>", code))
                    .map(|id| (*code, id))
            })
            .collect();

        let suppress: Vec<f32> = (0..config.vocab_size as u32)
            .map(|i| {
                if config.suppress_tokens.contains(&i) || i > tokens.no_timestamps {
                    f32::NEG_INFINITY
                } else {
                    0f32
                }
            })
            .collect();
        let suppress = Tensor::new(suppress.as_slice(), &device)?;

        let multilingual = config.vocab_size >= 51865;
        let mel_filters = mel::mel_filters(config.num_mel_bins);

        info!(
            mel_bins = config.num_mel_bins,
            multilingual,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Whisper model built"
        );

        Ok(Self {
            model: Mutex::new(model),
            config,
            tokenizer,
            device,
            dtype,
            mel_filters,
            tokens,
            languages,
            suppress,
            multilingual,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Model>> {
        self.model
            .lock()
            .map_err(|_| anyhow!("Whisper model lock poisoned by an earlier panic"))
    }

    fn log_mel(&self, samples: &[f32]) -> Result<Tensor> {
        let mel = m::audio::pcm_to_mel(&self.config, samples, &self.mel_filters);
        let n_mels = self.config.num_mel_bins;
        let frames = mel.len() / n_mels;
        Ok(Tensor::from_vec(mel, (1, n_mels, frames), &self.device)?.to_dtype(self.dtype)?)
    }

    /// Softmax over the language tokens after one decoder step from SOT,
    /// computed on the first 30 s window.
    fn language_probabilities(&self, model: &mut Model, mel: &Tensor) -> Result<Vec<(&'static str, f32)>> {
        if self.languages.is_empty() {
            return Err(anyhow!("tokenizer has no language tokens"));
        }

        let (_, _, frames) = mel.dims3()?;
        let mel = mel.narrow(2, 0, frames.min(m::N_FRAMES))?;
        let audio_features = model.encoder_forward(&mel, true)?;

        let tokens = Tensor::new(&[[self.tokens.sot]], &self.device)?;
        let ys = model.decoder_forward(&tokens, &audio_features, true)?;
        let logits = model.decoder_final_linear(&ys.i(..1)?)?.i(0)?.i(0)?;

        let ids: Vec<u32> = self.languages.iter().map(|(_, id)| *id).collect();
        let ids = Tensor::new(ids.as_slice(), &self.device)?;
        let logits = logits.index_select(&ids, 0)?.to_dtype(DType::F32)?;
        let probs = softmax(&logits, D::Minus1)?.to_vec1::<f32>()?;

        Ok(self
            .languages
            .iter()
            .map(|(code, _)| *code)
            .zip(probs)
            .collect())
    }

    /// Decoder prompt: SOT, then language and task for multilingual models,
    /// then no-timestamps.
    fn prompt(&self, language: Option<&str>, task: Task) -> Result<Vec<u32>> {
        let mut tokens = vec![self.tokens.sot];
        if self.multilingual {
            if let Some(language) = language {
                let id = self
                    .languages
                    .iter()
                    .find(|(code, _)| *code == language)
                    .map(|(_, id)| *id)
                    .ok_or_else(|| anyhow!("Unsupported language: {}", language))?;
                tokens.push(id);
            }
            tokens.push(match task {
                Task::Transcribe => self.tokens.transcribe,
                Task::Translate => self.tokens.translate,
            });
        }
        tokens.push(self.tokens.no_timestamps);
        Ok(tokens)
    }

    /// Decode one mel window. `None` when the window is judged silent.
    ///
    /// `beam_size` of 1 decodes greedily.
    fn decode_window(
        &self,
        model: &mut Model,
        mel: &Tensor,
        prompt: &[u32],
        beam_size: usize,
    ) -> Result<Option<String>> {
        let audio_features = model.encoder_forward(mel, true)?;
        let decoded = if beam_size > 1 {
            self.beam_search(model, &audio_features, prompt, beam_size)?
        } else {
            self.greedy(model, &audio_features, prompt)?
        };

        if decoded.no_speech_prob > m::NO_SPEECH_THRESHOLD && decoded.avg_logprob < m::LOGPROB_THRESHOLD {
            debug!(
                no_speech_prob = decoded.no_speech_prob,
                avg_logprob = decoded.avg_logprob,
                "Skipping silent window"
            );
            return Ok(None);
        }

        let text = self.tokenizer.decode(&decoded.tokens, true).map_err(E::msg)?;
        Ok(Some(text))
    }

    /// Probability of the no-speech token at the first decoder position.
    fn no_speech_probability(&self, model: &mut Model, ys: &Tensor) -> Result<f64> {
        let Some(no_speech) = self.tokens.no_speech else {
            return Ok(0.0);
        };
        let logits = model
            .decoder_final_linear(&ys.i(..1)?)?
            .i(0)?
            .i(0)?
            .to_dtype(DType::F32)?;
        Ok(softmax(&logits, 0)?
            .i(no_speech as usize)?
            .to_scalar::<f32>()? as f64)
    }

    fn greedy(&self, model: &mut Model, audio_features: &Tensor, prompt: &[u32]) -> Result<Decoded> {
        let sample_len = self.config.max_target_positions / 2;

        let mut tokens = prompt.to_vec();
        let mut sum_logprob = 0f64;
        let mut no_speech_prob = 0f64;

        for i in 0..sample_len {
            let tokens_t = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
            let ys = model.decoder_forward(&tokens_t, audio_features, i == 0)?;

            if i == 0 {
                no_speech_prob = self.no_speech_probability(model, &ys)?;
            }

            let (_, seq_len, _) = ys.dims3()?;
            let logits = model
                .decoder_final_linear(&ys.i((..1, seq_len - 1..))?)?
                .i(0)?
                .i(0)?
                .to_dtype(DType::F32)?
                .broadcast_add(&self.suppress)?;

            let next_token = logits
                .to_vec1::<f32>()?
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.total_cmp(b))
                .map(|(i, _)| i as u32)
                .ok_or_else(|| anyhow!("empty logits vector in decoder"))?;

            if next_token == self.tokens.eot || tokens.len() > self.config.max_target_positions {
                break;
            }

            let prob = softmax(&logits, D::Minus1)?
                .i(next_token as usize)?
                .to_scalar::<f32>()? as f64;
            sum_logprob += prob.ln();
            tokens.push(next_token);
        }

        let generated = tokens.split_off(prompt.len());
        Ok(Decoded {
            avg_logprob: sum_logprob / generated.len().max(1) as f64,
            tokens: generated,
            no_speech_prob,
        })
    }

    /// Beam search over one window. All live hypotheses are decoded as one
    /// batch; the best finished hypothesis by average log-probability wins.
    fn beam_search(
        &self,
        model: &mut Model,
        audio_features: &Tensor,
        prompt: &[u32],
        beam_size: usize,
    ) -> Result<Decoded> {
        let sample_len = self.config.max_target_positions / 2;

        let mut beams = vec![Hypothesis::default()];
        let mut finished = Vec::new();
        let mut no_speech_prob = 0f64;
        let mut cached_batch = 0;

        for i in 0..sample_len {
            let seq_len = prompt.len() + beams[0].tokens.len();
            if seq_len >= self.config.max_target_positions {
                break;
            }

            let batch = beams.len();
            let flat: Vec<u32> = beams
                .iter()
                .flat_map(|beam| prompt.iter().chain(beam.tokens.iter()).copied())
                .collect();
            let tokens_t = Tensor::from_vec(flat, (batch, seq_len), &self.device)?;
            let features = audio_features.repeat((batch, 1, 1))?;

            // The cross-attention cache holds one entry per batch row
            let ys = model.decoder_forward(&tokens_t, &features, i == 0 || batch != cached_batch)?;
            cached_batch = batch;

            if i == 0 {
                no_speech_prob = self.no_speech_probability(model, &ys)?;
            }

            let logits = model
                .decoder_final_linear(&ys.i((.., seq_len - 1..))?)?
                .squeeze(1)?
                .to_dtype(DType::F32)?
                .broadcast_add(&self.suppress)?;
            let logprobs = log_softmax(&logits, D::Minus1)?.to_vec2::<f32>()?;

            let (live, done) = advance_beams(&beams, &logprobs, beam_size, self.tokens.eot);
            finished.extend(done);
            beams = live;
            if finished.len() >= beam_size || beams.is_empty() {
                break;
            }
        }

        if finished.is_empty() {
            finished = beams;
        }
        let best = finished
            .into_iter()
            .max_by(|a, b| a.score().total_cmp(&b.score()))
            .ok_or_else(|| anyhow!("beam search produced no hypothesis"))?;

        Ok(Decoded {
            avg_logprob: best.score(),
            tokens: best.tokens,
            no_speech_prob,
        })
    }

    /// Decode audio, build the mel and settle the language before any window is decoded.
    fn prepare(&self, model: &mut Model, audio: &Path, requested: Option<&str>) -> Result<Prepared> {
        let samples = audio::load_audio(audio)?;
        let mel = self.log_mel(&samples)?;

        let (language, probability) = match requested {
            Some(language) => (language.to_lowercase(), 1.0),
            None if self.multilingual => most_likely(self.language_probabilities(model, &mel)?)?,
            None => ("en".to_string(), 1.0),
        };

        let (_, _, mel_frames) = mel.dims3()?;
        Ok(Prepared {
            windows: Windows::new((samples.len() / m::HOP_LENGTH).min(mel_frames)),
            duration_secs: samples.len() as f64 / m::SAMPLE_RATE as f64,
            mel,
            language,
            probability,
        })
    }
}

/// Generated tokens of one window (prompt excluded) and their scores.
struct Decoded {
    tokens: Vec<u32>,
    avg_logprob: f64,
    no_speech_prob: f64,
}

/// A beam-search hypothesis: generated tokens and their summed log-probability.
#[derive(Debug, Clone, Default, PartialEq)]
struct Hypothesis {
    tokens: Vec<u32>,
    logprob: f64,
}

impl Hypothesis {
    fn score(&self) -> f64 {
        self.logprob / self.tokens.len().max(1) as f64
    }
}

/// One beam-search step. Each live hypothesis proposes its best next tokens;
/// the `beam_size` best extensions survive, and extensions ending in `eot`
/// are returned separately as finished.
fn advance_beams(
    beams: &[Hypothesis],
    logprobs: &[Vec<f32>],
    beam_size: usize,
    eot: u32,
) -> (Vec<Hypothesis>, Vec<Hypothesis>) {
    let mut candidates: Vec<(usize, u32, f64)> = beams
        .iter()
        .zip(logprobs)
        .enumerate()
        .flat_map(|(index, (beam, row))| {
            top_k(row, beam_size + 1)
                .into_iter()
                .map(move |(token, logprob)| (index, token, beam.logprob + logprob as f64))
        })
        .collect();
    candidates.sort_by(|a, b| b.2.total_cmp(&a.2));

    let mut live = Vec::with_capacity(beam_size);
    let mut finished = Vec::new();
    for (index, token, logprob) in candidates {
        if live.len() == beam_size {
            break;
        }
        let mut tokens = beams[index].tokens.clone();
        if token == eot {
            finished.push(Hypothesis { tokens, logprob });
        } else {
            tokens.push(token);
            live.push(Hypothesis { tokens, logprob });
        }
    }
    (live, finished)
}

/// The `k` largest finite entries of `row` as `(index, value)`, best first.
fn top_k(row: &[f32], k: usize) -> Vec<(u32, f32)> {
    if k == 0 {
        return Vec::new();
    }
    let mut entries: Vec<(u32, f32)> = row
        .iter()
        .enumerate()
        .filter(|(_, value)| value.is_finite())
        .map(|(i, value)| (i as u32, *value))
        .collect();
    if entries.len() > k {
        entries.select_nth_unstable_by(k - 1, |a, b| b.1.total_cmp(&a.1));
        entries.truncate(k);
    }
    entries.sort_by(|a, b| b.1.total_cmp(&a.1));
    entries
}

struct Prepared {
    mel: Tensor,
    windows: Windows,
    duration_secs: f64,
    language: String,
    probability: f32,
}

/// Walks the content frames of a mel spectrogram in 30 s steps.
#[derive(Debug)]
struct Windows {
    seek: usize,
    content_frames: usize,
}

impl Windows {
    fn new(content_frames: usize) -> Self {
        Self { seek: 0, content_frames }
    }

    fn finish(&mut self) {
        self.seek = self.content_frames;
    }
}

impl Iterator for Windows {
    /// `(first frame, frame count)`
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.seek >= self.content_frames {
            return None;
        }
        let size = (self.content_frames - self.seek).min(m::N_FRAMES);
        let window = (self.seek, size);
        self.seek += size;
        Some(window)
    }
}

fn frames_to_secs(frames: usize) -> f64 {
    (frames * m::HOP_LENGTH) as f64 / m::SAMPLE_RATE as f64
}

fn most_likely(probabilities: Vec<(&'static str, f32)>) -> Result<(String, f32)> {
    probabilities
        .into_iter()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(code, p)| (code.to_string(), p))
        .ok_or_else(|| anyhow!("no language probabilities"))
}

/// Full-precision engine.
pub struct StandardWhisper(Whisper);

impl StandardBackend for StandardWhisper {
    fn transcribe(&self, audio: &Path, options: &DecodeOptions) -> Result<StandardTranscript> {
        let whisper = &self.0;
        let start = Instant::now();
        let mut model = whisper.lock()?;

        let prepared = whisper.prepare(&mut model, audio, options.language.as_deref())?;
        let prompt = whisper.prompt(Some(&prepared.language), options.task)?;

        let mut text = String::new();
        for (seek, size) in prepared.windows {
            let window = prepared.mel.narrow(2, seek, size)?;
            if let Some(chunk) = whisper.decode_window(&mut model, &window, &prompt, 1)? {
                text.push_str(&chunk);
            }
        }

        debug!(
            audio_secs = prepared.duration_secs,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Standard transcription finished"
        );
        Ok(StandardTranscript {
            text,
            language: Some(prepared.language),
        })
    }

    fn log_mel_spectrogram(&self, samples: &[f32]) -> Result<Tensor> {
        self.0.log_mel(samples)
    }

    fn detect_language(&self, mel: &Tensor) -> Result<HashMap<String, f32>> {
        let mut model = self.0.lock()?;
        Ok(self
            .0
            .language_probabilities(&mut model, mel)?
            .into_iter()
            .map(|(code, p)| (code.to_string(), p))
            .collect())
    }

    fn is_multilingual(&self) -> bool {
        self.0.multilingual
    }
}

/// Reduced-precision engine with lazily decoded, beam-searched segments.
pub struct FastWhisper {
    whisper: Whisper,
    beam_size: usize,
}

impl FastBackend for FastWhisper {
    fn transcribe<'a>(
        &'a self,
        audio: &Path,
        options: &DecodeOptions,
    ) -> Result<(SegmentIter<'a>, TranscriptionInfo)> {
        let whisper = &self.whisper;
        let mut model = whisper.lock()?;

        let prepared = whisper.prepare(&mut model, audio, options.language.as_deref())?;
        let prompt = whisper.prompt(Some(&prepared.language), options.task)?;

        let info = TranscriptionInfo {
            language: prepared.language,
            language_probability: prepared.probability,
            duration_secs: prepared.duration_secs,
        };
        debug!(language = %info.language, probability = info.language_probability, "Fast transcription prepared");

        let segments = FastSegments {
            whisper,
            model,
            mel: prepared.mel,
            windows: prepared.windows,
            prompt,
            beam_size: self.beam_size,
            next_id: 0,
        };
        Ok((Box::new(segments), info))
    }
}

/// Holds the model lock until the last window is decoded or the iterator is dropped.
struct FastSegments<'a> {
    whisper: &'a Whisper,
    model: MutexGuard<'a, Model>,
    mel: Tensor,
    windows: Windows,
    prompt: Vec<u32>,
    beam_size: usize,
    next_id: u32,
}

impl FastSegments<'_> {
    fn decode(&mut self, seek: usize, size: usize) -> Result<Option<Segment>> {
        let window = self.mel.narrow(2, seek, size)?;
        let text = match self
            .whisper
            .decode_window(&mut self.model, &window, &self.prompt, self.beam_size)? {
            Some(text) => text.trim().to_string(),
            None => return Ok(None),
        };
        if text.is_empty() {
            return Ok(None);
        }

        let segment = Segment {
            id: self.next_id,
            start_secs: frames_to_secs(seek),
            end_secs: frames_to_secs(seek + size),
            text,
        };
        self.next_id += 1;
        Ok(Some(segment))
    }
}

impl Iterator for FastSegments<'_> {
    type Item = Result<Segment>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((seek, size)) = self.windows.next() {
            match self.decode(seek, size) {
                Ok(Some(segment)) => return Some(Ok(segment)),
                Ok(None) => continue,
                Err(e) => {
                    self.windows.finish();
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
