use std::path::PathBuf;

use thiserror::Error;

use crate::detection::infrastructure::model_resolver::ModelResolveError;

/// Failures surfaced by detector construction and inference.
///
/// Library errors are wrapped transparently so their messages reach the
/// caller unchanged; the remaining variants are input validation.
#[derive(Error, Debug)]
pub enum DetectorError {
    #[error(transparent)]
    Resolve(#[from] ModelResolveError),
    #[error(transparent)]
    Tensor(#[from] candle_core::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error("anchor table must have shape [{expected_rows}, 4], got {shape:?}")]
    AnchorShape {
        expected_rows: usize,
        shape: Vec<usize>,
    },
    #[error("network input must have shape [N, 3, {size}, {size}], got {shape:?}")]
    InputShape { size: usize, shape: Vec<usize> },
    #[error("batch must have shape [N, 3, H, W], got {0:?}")]
    BatchShape(Vec<usize>),
    #[error("failed to read weights {path}: {source}")]
    ReadWeights {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "{0} is a legacy (non-zip) PyTorch checkpoint; re-save it with torch.save from PyTorch 1.6+ or convert it to .safetensors"
    )]
    LegacyCheckpoint(PathBuf),
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("unknown compute device '{0}', expected cpu, cuda[:N] or metal[:N]")]
    UnknownDevice(String),
}
