use ndarray::ArrayView4;

use crate::detection::domain::face_box::FaceBox;
use crate::detection::domain::image_input::ImageInput;
use crate::detection::infrastructure::device::ComputeDevice;
use crate::error::DetectorError;

/// Domain interface for face detectors.
///
/// Detection is stateless given the loaded model, hence `&self`.
pub trait FaceDetector: Send {
    /// Compute device the model runs on.
    fn device(&self) -> ComputeDevice;

    fn verbose(&self) -> bool;

    /// Detect faces in one image. Boxes are in that image's pixel space.
    fn detect_from_image(&self, input: &ImageInput) -> Result<Vec<FaceBox>, DetectorError>;

    /// Detect faces in an `(N, 3, H, W)` batch; returns one list per image.
    fn detect_from_batch(&self, batch: ArrayView4<'_, u8>)
        -> Result<Vec<Vec<FaceBox>>, DetectorError>;

    /// Face size the detector's boxes are normalized against downstream.
    fn reference_scale(&self) -> f64;

    fn reference_x_shift(&self) -> f64;

    fn reference_y_shift(&self) -> f64;
}
