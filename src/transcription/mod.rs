//! # Transcription Module
//!
//! The request/engine abstraction layer between the HTTP handlers and Whisper.
//!
//! ## Key Components:
//! - **engine**: `EngineHandle`, the lazily loaded process-wide engine
//! - **backend**: capability contracts of the standard and fast engine families
//! - **whisper**: candle implementations of both contracts
//! - **model**: model identifiers and their Hugging Face repositories
//! - **service**: `TranscriptionService`, result normalization
//! - **detection**: `LanguageDetectionService`
//!
//! ## Engine families:
//! - **openai_whisper** (standard): full precision, one aggregate result
//! - **faster_whisper** (fast): float16 on GPU / int8 on CPU, lazy segments

pub mod backend;
pub mod detection;
pub mod engine;
pub mod model;
pub mod service;
pub mod whisper;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{DecodeOptions, OutputFormat, Task};
pub use detection::LanguageDetectionService;
pub use service::{TranscriptionOutcome, TranscriptionRequest, TranscriptionService};
pub use whisper::WhisperLoader;
