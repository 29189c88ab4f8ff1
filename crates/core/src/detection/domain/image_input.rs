use std::path::{Path, PathBuf};

use image::DynamicImage;

use crate::error::DetectorError;
use crate::shared::frame::Frame;

/// Anything a detector accepts as a single image.
#[derive(Clone, Debug)]
pub enum ImageInput {
    Path(PathBuf),
    Frame(Frame),
    Image(DynamicImage),
}

impl ImageInput {
    /// Normalize to an RGB frame, decoding from disk when given a path.
    pub fn to_frame(&self) -> Result<Frame, DetectorError> {
        let frame = match self {
            Self::Path(path) => Frame::from_rgb_image(image::open(path)?.to_rgb8()),
            Self::Frame(frame) if frame.channels() == 3 => frame.clone(),
            Self::Frame(frame) => Frame::from_rgb_image(frame.to_rgb_image()),
            Self::Image(image) => Frame::from_dynamic_image(image),
        };
        if frame.is_empty() {
            return Err(DetectorError::InvalidImage(format!(
                "image has zero extent ({}x{})",
                frame.width(),
                frame.height()
            )));
        }
        Ok(frame)
    }
}

impl From<PathBuf> for ImageInput {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for ImageInput {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<Frame> for ImageInput {
    fn from(frame: Frame) -> Self {
        Self::Frame(frame)
    }
}

impl From<DynamicImage> for ImageInput {
    fn from(image: DynamicImage) -> Self {
        Self::Image(image)
    }
}
