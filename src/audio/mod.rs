//! # Audio Module
//!
//! Everything between an uploaded file and the model input:
//! - **temp**: the uploaded bytes as a scoped file on disk
//! - **decode**: container/codec decoding, downmix and resampling to 16 kHz mono
//! - **mel**: the mel filter bank used to build log-mel spectrograms

pub mod decode;
pub mod mel;
pub mod temp;

pub use decode::{load_audio, pad_or_trim};
pub use temp::TemporaryAudio;
