use image::{DynamicImage, RgbImage};
use ndarray::{Array3, ArrayView3};

use crate::error::DetectorError;

/// An image held as contiguous interleaved bytes in row-major (HWC) order.
///
/// Supports 1 (gray), 3 (RGB) and 4 (RGBA) channels. Detection always works
/// on the RGB rendition from [`Frame::to_rgb_image`].
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8) -> Result<Self, DetectorError> {
        if !matches!(channels, 1 | 3 | 4) {
            return Err(DetectorError::InvalidImage(format!(
                "unsupported channel count {channels}, expected 1, 3 or 4"
            )));
        }
        let expected = (width as usize) * (height as usize) * (channels as usize);
        if data.len() != expected {
            return Err(DetectorError::InvalidImage(format!(
                "data length {} does not match {width}x{height}x{channels}",
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            channels,
        })
    }

    /// Wrap an `(H, W, C)` array, e.g. one produced by another imaging library.
    pub fn from_ndarray(array: ArrayView3<'_, u8>) -> Result<Self, DetectorError> {
        let (h, w, c) = array.dim();
        let channels = u8::try_from(c).map_err(|_| {
            DetectorError::InvalidImage(format!("unsupported channel count {c}"))
        })?;
        let data: Vec<u8> = array.iter().copied().collect();
        Self::new(data, w as u32, h as u32, channels)
    }

    pub fn from_rgb_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            channels: 3,
        }
    }

    pub fn from_dynamic_image(image: &DynamicImage) -> Self {
        Self::from_rgb_image(image.to_rgb8())
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape(self.shape(), &self.data)
            .expect("Frame data length must match dimensions")
    }

    /// Planar `(C, H, W)` copy, the layout batch input uses.
    pub fn to_chw(&self) -> Array3<u8> {
        self.as_ndarray().permuted_axes([2, 0, 1]).to_owned()
    }

    /// RGB rendition: gray is replicated, alpha is dropped.
    pub fn to_rgb_image(&self) -> RgbImage {
        let rgb: Vec<u8> = match self.channels {
            3 => self.data.clone(),
            1 => self.data.iter().flat_map(|&v| [v, v, v]).collect(),
            _ => self
                .data
                .chunks_exact(self.channels as usize)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect(),
        };
        RgbImage::from_raw(self.width, self.height, rgb)
            .expect("RGB buffer length must match dimensions")
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        )
    }
}
