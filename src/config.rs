//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - Default values (built into the code)
//! - TOML configuration file (config.toml, optional)
//! - Environment variables with the `APP_` prefix (`APP_SERVER__PORT`, `APP_ASR__MODEL_PATH`)
//! - The well-known deployment variables `HOST`, `PORT`, `ASR_MODEL`, `ASR_ENGINE`,
//!   `ASR_MODEL_PATH` and `ASR_DEVICE`
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Well-known deployment variables
//! 2. `APP_`-prefixed environment variables
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! The engine part of the configuration is read once at startup to build the
//! [`EngineConfig`]; it is never changed while the process runs.

use crate::device::DevicePreference;
use crate::transcription::engine::{EngineConfig, EngineKind};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub asr: AsrConfig,
    pub performance: PerformanceConfig,
}

/// Where the HTTP server listens.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (containers)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Speech recognition engine settings.
///
/// ## Fields:
/// - `model`: Whisper model identifier ("tiny", "base", "small.en", "large-v3", or an `org/repo` id)
/// - `engine`: `openai_whisper` (standard engine) or `faster_whisper` (fast engine)
/// - `model_path`: Cache directory the model files are downloaded into
/// - `device`: `auto`, `cpu`, `cuda` or `metal`
/// - `preload`: Load the model during startup instead of on the first request
/// - `beam_size`: Beam width of the `faster_whisper` engine; 1 decodes greedily
/// - `scratch_dir`: Directory for uploaded audio files; empty means the OS temp dir
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrConfig {
    pub model: String,
    pub engine: String,
    pub model_path: String,
    pub device: String,
    pub preload: bool,
    pub beam_size: usize,
    pub scratch_dir: String,
}

/// Limits that protect the server from overload.
///
/// ## Fields:
/// - `max_upload_bytes`: Largest accepted audio upload
/// - `max_concurrent_inferences`: Inference jobs allowed on the blocking pool at once;
///   further requests wait for a free slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_upload_bytes: usize,
    pub max_concurrent_inferences: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 9000,
            },
            asr: AsrConfig {
                model: "base".to_string(),
                engine: "openai_whisper".to_string(),
                model_path: "/data/whisper".to_string(),
                device: "auto".to_string(),
                preload: true,
                beam_size: 5,
                scratch_dir: String::new(),
            },
            performance: PerformanceConfig {
                max_upload_bytes: 100 * 1024 * 1024,
                max_concurrent_inferences: 2,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_ASR__PRELOAD=false`: Load the model lazily on the first request
    /// - `ASR_MODEL=small`: Override the Whisper model
    /// - `ASR_ENGINE=faster_whisper`: Select the fast engine
    /// - `ASR_MODEL_PATH=/models`: Override the model cache directory
    /// - `HOST=0.0.0.0` / `PORT=9000`: Deployment platform conventions
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        let overrides = [
            ("HOST", "server.host"),
            ("PORT", "server.port"),
            ("ASR_MODEL", "asr.model"),
            ("ASR_ENGINE", "asr.engine"),
            ("ASR_MODEL_PATH", "asr.model_path"),
            ("ASR_DEVICE", "asr.device"),
        ];
        for (var, key) in overrides {
            if let Ok(value) = env::var(var) {
                settings = settings.set_override(key, value)?;
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Engine kind and device preference are parsed here so that a typo in
    /// `ASR_ENGINE` stops the server at startup instead of on the first request.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.asr.model.trim().is_empty() {
            return Err(anyhow::anyhow!("ASR model identifier cannot be empty"));
        }

        self.asr.engine.parse::<EngineKind>()?;
        self.asr
            .device
            .parse::<DevicePreference>()
            .map_err(|e| anyhow::anyhow!(e))?;

        if self.asr.beam_size == 0 {
            return Err(anyhow::anyhow!("Beam size must be at least 1"));
        }

        if self.performance.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }

        if self.performance.max_concurrent_inferences == 0 {
            return Err(anyhow::anyhow!(
                "Max concurrent inferences must be greater than 0"
            ));
        }

        Ok(())
    }

    /// Build the immutable engine configuration the `EngineHandle` is created from.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        Ok(EngineConfig {
            kind: self.asr.engine.parse()?,
            model_id: self.asr.model.trim().to_string(),
            cache_dir: PathBuf::from(&self.asr.model_path),
            beam_size: self.asr.beam_size,
            device: self
                .asr
                .device
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?,
        })
    }

    /// Directory uploaded audio is written to while a request is processed.
    pub fn scratch_dir(&self) -> PathBuf {
        if self.asr.scratch_dir.trim().is_empty() {
            env::temp_dir()
        } else {
            PathBuf::from(&self.asr.scratch_dir)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.asr.model, "base");
        assert_eq!(config.asr.model_path, "/data/whisper");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.asr.engine = "whisper_cpp".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.asr.device = "tpu".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.performance.max_concurrent_inferences = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.asr.beam_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_engine_config() {
        let mut config = AppConfig::default();
        config.asr.engine = "faster_whisper".to_string();
        config.asr.model = " small.en ".to_string();
        config.asr.device = "cpu".to_string();

        let engine = config.engine_config().unwrap();
        assert_eq!(engine.kind, EngineKind::Fast);
        assert_eq!(engine.model_id, "small.en");
        assert_eq!(engine.cache_dir, PathBuf::from("/data/whisper"));
        assert_eq!(engine.device, DevicePreference::Cpu);
        assert_eq!(engine.beam_size, 5);
    }

    #[test]
    fn test_scratch_dir_defaults_to_temp_dir() {
        let mut config = AppConfig::default();
        assert_eq!(config.scratch_dir(), env::temp_dir());

        config.asr.scratch_dir = "/var/tmp/asr".to_string();
        assert_eq!(config.scratch_dir(), PathBuf::from("/var/tmp/asr"));
    }
}
