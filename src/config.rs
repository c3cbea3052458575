//! Run configuration: which seam algorithm, which energy backend, and
//! where the accelerated backend finds its shaders.

use crate::energy::{CpuEnergy, EnergyBackend};
use crate::errors::CarveError;
use crate::seamcarver::SeamCarver;
use crate::seamfinder::Algorithm;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_VERTEX_SHADER: &str = "shaders/energy_vertex.wgsl";
pub const DEFAULT_FRAGMENT_SHADER: &str = "shaders/energy_fragment.wgsl";

/// Where the energy map gets computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Cpu,
    Gpu,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Cpu => write!(f, "cpu"),
            BackendKind::Gpu => write!(f, "gpu"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(BackendKind::Cpu),
            "gpu" => Ok(BackendKind::Gpu),
            other => Err(format!("unknown energy backend '{}'", other)),
        }
    }
}

/// The two shader stages of the accelerated backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderPaths {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl ShaderPaths {
    pub fn new<V: Into<PathBuf>, F: Into<PathBuf>>(vertex: V, fragment: F) -> Self {
        ShaderPaths {
            vertex: vertex.into(),
            fragment: fragment.into(),
        }
    }

    /// True when these are the stock paths, which may fall back to the
    /// copies built into the crate.
    pub fn is_default(&self) -> bool {
        *self == ShaderPaths::default()
    }
}

impl Default for ShaderPaths {
    fn default() -> Self {
        ShaderPaths::new(DEFAULT_VERTEX_SHADER, DEFAULT_FRAGMENT_SHADER)
    }
}

/// Everything a reduction run needs decided up front.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CarveConfig {
    pub algorithm: Algorithm,
    pub backend: BackendKind,
    pub shaders: ShaderPaths,
}

impl CarveConfig {
    /// Build (and for the GPU, initialize) the configured backend.
    /// A GPU that can't be brought up is an error; there is no quiet
    /// fallback to the CPU.
    pub fn build_backend(&self) -> Result<Box<dyn EnergyBackend>, CarveError> {
        match self.backend {
            BackendKind::Cpu => Ok(Box::new(CpuEnergy)),
            BackendKind::Gpu => self.build_gpu(),
        }
    }

    #[cfg(feature = "gpu")]
    fn build_gpu(&self) -> Result<Box<dyn EnergyBackend>, CarveError> {
        let mut gpu = crate::gpu::GpuEnergy::new();
        gpu.initialize_with_shaders(&self.shaders)?;
        Ok(Box::new(gpu))
    }

    #[cfg(not(feature = "gpu"))]
    fn build_gpu(&self) -> Result<Box<dyn EnergyBackend>, CarveError> {
        log::error!("rgbseam was built without the `gpu` feature");
        Err(CarveError::BackendNotReady)
    }

    /// A carver wired up with this configuration.
    pub fn carver(&self) -> Result<SeamCarver<Box<dyn EnergyBackend>>, CarveError> {
        Ok(SeamCarver::new(self.build_backend()?).with_algorithm(self.algorithm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CarveConfig::default();
        assert_eq!(config.algorithm, Algorithm::Greedy);
        assert_eq!(config.backend, BackendKind::Cpu);
        assert!(config.shaders.is_default());
        assert!(!ShaderPaths::new("a.wgsl", "b.wgsl").is_default());
    }

    #[test]
    fn backend_names() {
        assert_eq!("GPU".parse::<BackendKind>(), Ok(BackendKind::Gpu));
        assert_eq!(BackendKind::Cpu.to_string(), "cpu");
        assert!("tpu".parse::<BackendKind>().is_err());
    }

    #[test]
    fn cpu_carver_from_config() {
        let config = CarveConfig {
            algorithm: Algorithm::Dynamic,
            ..CarveConfig::default()
        };
        let carver = config.carver().unwrap();
        assert_eq!(carver.algorithm(), Algorithm::Dynamic);
        assert_eq!(carver.backend().name(), "cpu");
    }

    #[cfg(not(feature = "gpu"))]
    #[test]
    fn gpu_without_the_feature_is_not_ready() {
        let config = CarveConfig {
            backend: BackendKind::Gpu,
            ..CarveConfig::default()
        };
        assert_eq!(config.build_backend().err(), Some(CarveError::BackendNotReady));
    }
}
