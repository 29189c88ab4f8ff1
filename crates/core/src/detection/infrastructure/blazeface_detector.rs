use std::path::PathBuf;

use log::Level;
use ndarray::ArrayView4;

use crate::detection::domain::face_box::FaceBox;
use crate::detection::domain::face_detector::FaceDetector;
use crate::detection::domain::image_input::ImageInput;
use crate::detection::domain::model_variant::ModelVariant;
use crate::detection::infrastructure::blazeface_net::BlazeFaceNet;
use crate::detection::infrastructure::detect::{batch_detect, detect};
use crate::detection::infrastructure::device::ComputeDevice;
use crate::detection::infrastructure::model_resolver::{self, ProgressFn};
use crate::error::DetectorError;
use crate::shared::constants::{
    DEFAULT_MIN_SCORE_THRESH, DEFAULT_MIN_SUPPRESSION_THRESHOLD, REFERENCE_SCALE,
    REFERENCE_X_SHIFT, REFERENCE_Y_SHIFT,
};

/// Where the weights and anchor table come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelSource {
    /// Download the variant's published files, caching them in `cache_dir`
    /// or the platform cache when `None`.
    Remote { cache_dir: Option<PathBuf> },
    /// Load both files from disk; nothing is fetched.
    Local { weights: PathBuf, anchors: PathBuf },
}

impl Default for ModelSource {
    fn default() -> Self {
        Self::Remote { cache_dir: None }
    }
}

/// Construction parameters for [`BlazeFaceDetector`].
#[derive(Clone, Debug)]
pub struct BlazeFaceConfig {
    pub device: ComputeDevice,
    pub variant: ModelVariant,
    pub source: ModelSource,
    pub verbose: bool,
    pub min_score_thresh: f32,
    pub min_suppression_threshold: f32,
}

impl Default for BlazeFaceConfig {
    fn default() -> Self {
        Self {
            device: ComputeDevice::Cpu,
            variant: ModelVariant::Front,
            source: ModelSource::default(),
            verbose: false,
            min_score_thresh: DEFAULT_MIN_SCORE_THRESH,
            min_suppression_threshold: DEFAULT_MIN_SUPPRESSION_THRESHOLD,
        }
    }
}

impl BlazeFaceConfig {
    pub fn with_device(mut self, device: ComputeDevice) -> Self {
        self.device = device;
        self
    }

    pub fn back_model(mut self, back_model: bool) -> Self {
        self.variant = ModelVariant::from_back_model(back_model);
        self
    }

    pub fn with_local_model(mut self, weights: impl Into<PathBuf>, anchors: impl Into<PathBuf>) -> Self {
        self.source = ModelSource::Local {
            weights: weights.into(),
            anchors: anchors.into(),
        };
        self
    }

    /// Download into `cache_dir` instead of the platform cache. Replaces a
    /// local source if one was set.
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.source = ModelSource::Remote {
            cache_dir: Some(cache_dir.into()),
        };
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_min_score_thresh(mut self, thresh: f32) -> Self {
        self.min_score_thresh = thresh;
        self
    }

    pub fn with_min_suppression_threshold(mut self, thresh: f32) -> Self {
        self.min_suppression_threshold = thresh;
        self
    }
}

/// BlazeFace face detector.
///
/// Owns its network exclusively; detection borrows it immutably.
pub struct BlazeFaceDetector {
    net: BlazeFaceNet,
    device: ComputeDevice,
    verbose: bool,
}

impl BlazeFaceDetector {
    pub fn new(config: BlazeFaceConfig) -> Result<Self, DetectorError> {
        Self::with_progress(config, None)
    }

    /// Like [`Self::new`], reporting download progress through `progress`.
    pub fn with_progress(
        config: BlazeFaceConfig,
        progress: Option<ProgressFn>,
    ) -> Result<Self, DetectorError> {
        let level = if config.verbose {
            Level::Info
        } else {
            Level::Debug
        };
        let variant = config.variant;

        let (weights, anchors) = resolve_files(variant, &config.source, progress.as_ref())?;
        log::log!(
            level,
            "Loading BlazeFace {variant:?} model from {} on {}",
            weights.display(),
            config.device
        );

        let device = config.device.to_candle()?;
        let vb = BlazeFaceNet::load_weights(&weights, &device)?;
        let mut net = BlazeFaceNet::new(variant, vb)?;
        net.load_anchors_from_npy(&anchors)?;
        net.set_min_score_thresh(config.min_score_thresh);
        net.set_min_suppression_threshold(config.min_suppression_threshold);

        log::log!(
            level,
            "BlazeFace ready: min_score_thresh={}, min_suppression_threshold={}",
            net.min_score_thresh(),
            net.min_suppression_threshold()
        );

        Ok(Self {
            net,
            device: config.device,
            verbose: config.verbose,
        })
    }

    pub fn net(&self) -> &BlazeFaceNet {
        &self.net
    }

    pub fn variant(&self) -> ModelVariant {
        self.net.variant()
    }
}

/// Locate the weights and anchors for `variant`, downloading if needed.
fn resolve_files(
    variant: ModelVariant,
    source: &ModelSource,
    progress: Option<&ProgressFn>,
) -> Result<(PathBuf, PathBuf), DetectorError> {
    match source {
        ModelSource::Local { weights, anchors } => Ok((weights.clone(), anchors.clone())),
        ModelSource::Remote { cache_dir } => {
            let cache_dir = match cache_dir {
                Some(dir) => dir.clone(),
                None => model_resolver::default_cache_dir()?,
            };
            let weights = model_resolver::resolve(&variant.weights_asset(), &cache_dir, progress)?;
            let anchors = model_resolver::resolve(&variant.anchors_asset(), &cache_dir, progress)?;
            Ok((weights, anchors))
        }
    }
}

impl FaceDetector for BlazeFaceDetector {
    fn device(&self) -> ComputeDevice {
        self.device
    }

    fn verbose(&self) -> bool {
        self.verbose
    }

    fn detect_from_image(&self, input: &ImageInput) -> Result<Vec<FaceBox>, DetectorError> {
        let frame = input.to_frame()?;
        let target_size = self.net.variant().input_size();
        Ok(detect(&self.net, &frame, target_size)?
            .into_iter()
            .next()
            .unwrap_or_default())
    }

    fn detect_from_batch(
        &self,
        batch: ArrayView4<'_, u8>,
    ) -> Result<Vec<Vec<FaceBox>>, DetectorError> {
        batch_detect(&self.net, batch, self.net.variant().input_size())
    }

    fn reference_scale(&self) -> f64 {
        REFERENCE_SCALE
    }

    fn reference_x_shift(&self) -> f64 {
        REFERENCE_X_SHIFT
    }

    fn reference_y_shift(&self) -> f64 {
        REFERENCE_Y_SHIFT
    }
}
