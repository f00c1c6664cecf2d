use anyhow::Context;
use candle_core::{DType, Device};
use serde::Deserialize;

/// Which compute target the user asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    Cuda,
}

/// The compute target resolved once per run and shared by both models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceConfig {
    Cpu,
    Cuda { ordinal: usize },
}

impl DeviceConfig {
    pub fn detect(preference: DevicePreference) -> anyhow::Result<Self> {
        match preference {
            DevicePreference::Cpu => Ok(Self::Cpu),
            DevicePreference::Cuda => {
                Device::new_cuda(0).context("CUDA was requested but no CUDA device is usable")?;
                Ok(Self::Cuda { ordinal: 0 })
            }
            DevicePreference::Auto => {
                if candle_core::utils::cuda_is_available() && Device::new_cuda(0).is_ok() {
                    Ok(Self::Cuda { ordinal: 0 })
                } else {
                    Ok(Self::Cpu)
                }
            }
        }
    }

    pub fn is_cuda(&self) -> bool {
        matches!(self, Self::Cuda { .. })
    }

    pub fn device(&self) -> anyhow::Result<Device> {
        match self {
            Self::Cpu => Ok(Device::Cpu),
            Self::Cuda { ordinal } => Ok(Device::new_cuda(*ordinal)?),
        }
    }

    /// Half precision on the GPU, full precision on the CPU.
    pub fn dtype(&self) -> DType {
        if self.is_cuda() { DType::F16 } else { DType::F32 }
    }
}

impl std::fmt::Display for DeviceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda { ordinal } => write!(f, "cuda:{ordinal}"),
        }
    }
}
