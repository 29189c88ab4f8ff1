pub mod face_box;
pub mod face_detector;
pub mod image_input;
pub mod model_variant;
