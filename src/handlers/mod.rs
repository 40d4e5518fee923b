pub mod asr;
pub mod upload;

pub use asr::*;
