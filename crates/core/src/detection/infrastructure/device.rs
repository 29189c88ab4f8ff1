use std::fmt;
use std::str::FromStr;

use candle_core::Device;

use crate::error::DetectorError;

/// Identifier of the compute device a detector's weights live on.
///
/// Parsed from `cpu`, `cuda`, `cuda:N`, `metal` or `metal:N`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ComputeDevice {
    #[default]
    Cpu,
    Cuda(usize),
    Metal(usize),
}

impl ComputeDevice {
    /// Pick the best accelerator compiled in, falling back to CPU.
    pub fn best_available() -> Self {
        #[cfg(feature = "cuda")]
        {
            if Device::new_cuda(0).is_ok() {
                log::info!("Using CUDA device for inference");
                return Self::Cuda(0);
            }
        }

        #[cfg(feature = "metal")]
        {
            if Device::new_metal(0).is_ok() {
                log::info!("Using Metal device for inference");
                return Self::Metal(0);
            }
        }

        log::info!("Using CPU for inference");
        Self::Cpu
    }

    /// Open the candle device. Fails if the backend is not compiled in or
    /// the ordinal does not exist.
    pub fn to_candle(self) -> Result<Device, DetectorError> {
        let device = match self {
            Self::Cpu => Device::Cpu,
            Self::Cuda(ordinal) => Device::new_cuda(ordinal)?,
            Self::Metal(ordinal) => Device::new_metal(ordinal)?,
        };
        Ok(device)
    }
}

impl FromStr for ComputeDevice {
    type Err = DetectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let (kind, ordinal) = match lower.split_once(':') {
            Some((kind, n)) => {
                let n = n
                    .parse::<usize>()
                    .map_err(|_| DetectorError::UnknownDevice(s.to_string()))?;
                (kind, n)
            }
            None => (lower.as_str(), 0),
        };
        match kind {
            "cpu" if ordinal == 0 => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda(ordinal)),
            "metal" | "mps" => Ok(Self::Metal(ordinal)),
            _ => Err(DetectorError::UnknownDevice(s.to_string())),
        }
    }
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(n) => write!(f, "cuda:{n}"),
            Self::Metal(n) => write!(f, "metal:{n}"),
        }
    }
}
