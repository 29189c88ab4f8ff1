pub mod detection;
pub mod error;
pub mod shared;

pub use detection::domain::face_box::FaceBox;
pub use detection::domain::face_detector::FaceDetector;
pub use detection::domain::image_input::ImageInput;
pub use detection::domain::model_variant::ModelVariant;
pub use detection::infrastructure::blazeface_detector::{
    BlazeFaceConfig, BlazeFaceDetector, ModelSource,
};
pub use detection::infrastructure::device::ComputeDevice;
pub use error::DetectorError;
pub use shared::frame::Frame;

#[cfg(test)]
mod test_support;
