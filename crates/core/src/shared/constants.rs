pub const FRONT_WEIGHTS_NAME: &str = "blazeface.pth";
pub const FRONT_WEIGHTS_URL: &str =
    "https://github.com/hollance/BlazeFace-PyTorch/blob/master/blazeface.pth?raw=true";

pub const FRONT_ANCHORS_NAME: &str = "anchors.npy";
pub const FRONT_ANCHORS_URL: &str =
    "https://github.com/hollance/BlazeFace-PyTorch/blob/master/anchors.npy?raw=true";

pub const BACK_WEIGHTS_NAME: &str = "blazefaceback.pth";
pub const BACK_WEIGHTS_URL: &str =
    "https://github.com/hollance/BlazeFace-PyTorch/blob/master/blazefaceback.pth?raw=true";

pub const BACK_ANCHORS_NAME: &str = "anchorsback.npy";
pub const BACK_ANCHORS_URL: &str =
    "https://github.com/hollance/BlazeFace-PyTorch/blob/master/anchorsback.npy?raw=true";

/// Number of anchors shared by both model variants (16x16x2 + 8x8x6).
pub const NUM_ANCHORS: usize = 896;

/// Values per anchor row: x_center, y_center, w, h.
pub const ANCHOR_WIDTH: usize = 4;

/// Regressor outputs per anchor: box (4) + six keypoints (12).
pub const NUM_COORDS: usize = 16;

pub const DEFAULT_MIN_SCORE_THRESH: f32 = 0.5;
pub const DEFAULT_MIN_SUPPRESSION_THRESHOLD: f32 = 0.3;

/// Face size, in pixels, that downstream alignment normalizes boxes against.
pub const REFERENCE_SCALE: f64 = 195.0;
pub const REFERENCE_X_SHIFT: f64 = 0.0;
pub const REFERENCE_Y_SHIFT: f64 = 0.0;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];
