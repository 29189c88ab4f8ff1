use candle_core::{Device, Tensor};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::{ArrayView4, Axis};

use crate::detection::domain::face_box::FaceBox;
use crate::detection::infrastructure::blazeface_net::BlazeFaceNet;
use crate::detection::infrastructure::decoding::RawDetection;
use crate::error::DetectorError;
use crate::shared::frame::Frame;

/// Offset of the square crop inside the original image, in original pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CropShift {
    pub x: u32,
    pub y: u32,
}

/// Resize so the shorter side is `dim`, then take the centered `dim x dim`
/// square.
pub fn resize_and_crop(image: &RgbImage, dim: u32) -> (RgbImage, CropShift) {
    let (w, h) = image.dimensions();
    if h > w {
        let new_h = ((h as f64) * (dim as f64) / (w as f64)) as u32;
        let resized = imageops::resize(image, dim, new_h.max(dim), FilterType::Triangle);
        let y_start = (resized.height() - dim) / 2;
        let crop = imageops::crop_imm(&resized, 0, y_start, dim, dim).to_image();
        (crop, CropShift { x: 0, y: (h - w) / 2 })
    } else {
        let new_w = ((w as f64) * (dim as f64) / (h as f64)) as u32;
        let resized = imageops::resize(image, new_w.max(dim), dim, FilterType::Triangle);
        let x_start = (resized.width() - dim) / 2;
        let crop = imageops::crop_imm(&resized, x_start, 0, dim, dim).to_image();
        (crop, CropShift { x: (w - h) / 2, y: 0 })
    }
}

/// Stack square crops into an `(N, 3, S, S)` tensor of raw pixel values.
fn crops_to_tensor(crops: &[RgbImage], dim: usize, device: &Device) -> Result<Tensor, DetectorError> {
    let mut data = Vec::with_capacity(crops.len() * 3 * dim * dim);
    for crop in crops {
        for c in 0..3 {
            data.extend(crop.pixels().map(|p| p[c] as f32));
        }
    }
    Ok(Tensor::from_vec(data, (crops.len(), 3, dim, dim), device)?)
}

fn to_face_boxes(detections: &[RawDetection], orig_size: f32, shift: CropShift) -> Vec<FaceBox> {
    let sx = shift.x as f32;
    let sy = shift.y as f32;
    detections
        .iter()
        .map(|d| {
            let [ymin, xmin, ymax, xmax] = d.bbox();
            let mut keypoints = [[0.0f32; 2]; 6];
            for (k, kp) in keypoints.iter_mut().enumerate() {
                let [x, y] = d.keypoint(k);
                *kp = [x * orig_size + sx, y * orig_size + sy];
            }
            FaceBox {
                x1: xmin * orig_size + sx,
                y1: ymin * orig_size + sy,
                x2: xmax * orig_size + sx,
                y2: ymax * orig_size + sy,
                score: d.score,
                keypoints,
            }
        })
        .collect()
}

fn detect_images(
    net: &BlazeFaceNet,
    images: &[RgbImage],
    target_size: usize,
) -> Result<Vec<Vec<FaceBox>>, DetectorError> {
    if images.is_empty() {
        return Ok(Vec::new());
    }

    let mut crops = Vec::with_capacity(images.len());
    let mut geometry = Vec::with_capacity(images.len());
    for image in images {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Err(DetectorError::InvalidImage(format!(
                "image has zero extent ({w}x{h})"
            )));
        }
        let (crop, shift) = resize_and_crop(image, target_size as u32);
        crops.push(crop);
        geometry.push((w.min(h) as f32, shift));
    }

    let input = crops_to_tensor(&crops, target_size, net.device())?;
    let predictions = net.predict_on_batch(&input)?;

    Ok(predictions
        .iter()
        .zip(geometry)
        .map(|(dets, (orig_size, shift))| to_face_boxes(dets, orig_size, shift))
        .collect())
}

/// Detect faces in a single frame.
///
/// Returns a one-element list holding that frame's boxes, matching the
/// shape of [`batch_detect`].
pub fn detect(
    net: &BlazeFaceNet,
    frame: &Frame,
    target_size: usize,
) -> Result<Vec<Vec<FaceBox>>, DetectorError> {
    detect_images(net, &[frame.to_rgb_image()], target_size)
}

/// Detect faces in every image of an `(N, 3, H, W)` batch.
pub fn batch_detect(
    net: &BlazeFaceNet,
    batch: ArrayView4<'_, u8>,
    target_size: usize,
) -> Result<Vec<Vec<FaceBox>>, DetectorError> {
    let (_, channels, h, w) = batch.dim();
    if channels != 3 || (batch.len_of(Axis(0)) > 0 && (h == 0 || w == 0)) {
        return Err(DetectorError::BatchShape(batch.shape().to_vec()));
    }

    let images: Vec<RgbImage> = batch
        .axis_iter(Axis(0))
        .map(|chw| {
            RgbImage::from_fn(w as u32, h as u32, |x, y| {
                let (x, y) = (x as usize, y as usize);
                Rgb([chw[[0, y, x]], chw[[1, y, x]], chw[[2, y, x]]])
            })
        })
        .collect();

    detect_images(net, &images, target_size)
}
