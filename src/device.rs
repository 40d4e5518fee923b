//! # Compute Device Selection
//!
//! Resolves the configured device preference into a candle [`Device`] when the
//! engine loads, and answers the "is a GPU present" question for the liveness
//! probe. Probing results are cached; a GPU that is requested but missing falls
//! back to the CPU with a warning.

use candle_core::Device;
use std::fmt;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

static CUDA_AVAILABLE: OnceLock<bool> = OnceLock::new();
static METAL_AVAILABLE: OnceLock<bool> = OnceLock::new();

/// Where model inference should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// Use a GPU when one is present, otherwise the CPU
    #[default]
    Auto,
    Cpu,
    /// NVIDIA GPU (falls back to CPU if not available)
    Cuda,
    /// Apple Silicon GPU (falls back to CPU if not available)
    Metal,
}

impl std::str::FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" | "automatic" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "metal" | "mps" => Ok(DevicePreference::Metal),
            _ => Err(format!("Unknown device preference: {}", s)),
        }
    }
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DevicePreference::Auto => "auto",
            DevicePreference::Cpu => "cpu",
            DevicePreference::Cuda => "cuda",
            DevicePreference::Metal => "metal",
        };
        f.write_str(name)
    }
}

/// Device detection and selection utilities
pub struct DeviceManager;

impl DeviceManager {
    /// Resolve a preference into a concrete device, falling back to CPU.
    pub fn resolve(preference: DevicePreference) -> Device {
        match preference {
            DevicePreference::Cpu => Device::Cpu,
            DevicePreference::Cuda => Self::cuda_device().unwrap_or_else(|| {
                warn!("CUDA requested but not available, falling back to CPU");
                Device::Cpu
            }),
            DevicePreference::Metal => Self::metal_device().unwrap_or_else(|| {
                warn!("Metal requested but not available, falling back to CPU");
                Device::Cpu
            }),
            DevicePreference::Auto => {
                if let Some(device) = Self::cuda_device() {
                    info!("Selected CUDA GPU for inference");
                    device
                } else if let Some(device) = Self::metal_device() {
                    info!("Selected Metal GPU for inference");
                    device
                } else {
                    info!("Using CPU for inference (no GPU acceleration available)");
                    Device::Cpu
                }
            }
        }
    }

    fn cuda_device() -> Option<Device> {
        match Device::new_cuda(0) {
            Ok(device) => {
                debug!("CUDA device 0 available");
                Some(device)
            }
            Err(e) => {
                debug!("CUDA not available: {}", e);
                None
            }
        }
    }

    fn metal_device() -> Option<Device> {
        match Device::new_metal(0) {
            Ok(device) => {
                debug!("Metal device 0 available");
                Some(device)
            }
            Err(e) => {
                debug!("Metal not available: {}", e);
                None
            }
        }
    }

    /// Whether a CUDA device can be opened (probed once per process).
    pub fn is_cuda_available() -> bool {
        *CUDA_AVAILABLE.get_or_init(|| Self::cuda_device().is_some())
    }

    pub fn is_metal_available() -> bool {
        *METAL_AVAILABLE.get_or_init(|| Self::metal_device().is_some())
    }

    /// Check both backends now, so later checks only read cached results.
    pub fn warm_up() -> (bool, bool) {
        (Self::is_cuda_available(), Self::is_metal_available())
    }

    pub fn is_gpu_available() -> bool {
        Self::is_cuda_available() || Self::is_metal_available()
    }

    /// Short device label for logs and status responses.
    pub fn describe(device: &Device) -> &'static str {
        match device {
            Device::Cpu => "cpu",
            Device::Cuda(_) => "cuda",
            Device::Metal(_) => "metal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_preference_parsing() {
        assert_eq!("auto".parse::<DevicePreference>().unwrap(), DevicePreference::Auto);
        assert_eq!("CPU".parse::<DevicePreference>().unwrap(), DevicePreference::Cpu);
        assert_eq!("gpu".parse::<DevicePreference>().unwrap(), DevicePreference::Cuda);
        assert_eq!("metal".parse::<DevicePreference>().unwrap(), DevicePreference::Metal);
        assert!("tpu".parse::<DevicePreference>().is_err());
    }

    #[test]
    fn test_cpu_resolution() {
        let device = DeviceManager::resolve(DevicePreference::Cpu);
        assert!(device.is_cpu());
        assert_eq!(DeviceManager::describe(&device), "cpu");
    }

    #[test]
    fn test_warm_up_caches_both_backends() {
        let (cuda, metal) = DeviceManager::warm_up();
        assert_eq!(CUDA_AVAILABLE.get(), Some(&cuda));
        assert_eq!(METAL_AVAILABLE.get(), Some(&metal));
        assert_eq!(DeviceManager::is_gpu_available(), cuda || metal);
    }

    #[test]
    fn test_display_round_trips() {
        for pref in [
            DevicePreference::Auto,
            DevicePreference::Cpu,
            DevicePreference::Cuda,
            DevicePreference::Metal,
        ] {
            assert_eq!(pref.to_string().parse::<DevicePreference>().unwrap(), pref);
        }
    }
}
