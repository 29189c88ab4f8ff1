use std::fs::File;
use std::io::Read;
use std::path::Path;

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{conv2d, Conv2d, Conv2dConfig, VarBuilder};

use crate::detection::domain::model_variant::ModelVariant;
use crate::detection::infrastructure::decoding::{
    tensors_to_detections, weighted_non_max_suppression, DecodeParams, RawDetection,
};
use crate::error::DetectorError;
use crate::shared::constants::{ANCHOR_WIDTH, NUM_ANCHORS, NUM_COORDS};

/// Raw scores are clipped to `[-x, x]` before the sigmoid.
const SCORE_CLIPPING_THRESH: f32 = 100.0;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Default suppression IoU shared by both variants.
const MIN_SUPPRESSION_THRESHOLD: f32 = 0.3;

/// Depthwise-separable residual block.
struct BlazeBlock {
    depthwise: Conv2d,
    pointwise: Conv2d,
    channel_pad: usize,
    stride: usize,
}

impl BlazeBlock {
    fn new(
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let kernel_size = 3;
        // stride-2 blocks pad manually (0, 2, 0, 2) in forward
        let padding = if stride == 2 { 0 } else { (kernel_size - 1) / 2 };

        let depthwise = conv2d(
            in_channels,
            in_channels,
            kernel_size,
            Conv2dConfig {
                stride,
                padding,
                groups: in_channels,
                ..Conv2dConfig::default()
            },
            vb.pp("convs.0"),
        )?;
        let pointwise = conv2d(
            in_channels,
            out_channels,
            1,
            Conv2dConfig::default(),
            vb.pp("convs.1"),
        )?;

        Ok(Self {
            depthwise,
            pointwise,
            channel_pad: out_channels.saturating_sub(in_channels),
            stride,
        })
    }
}

impl Module for BlazeBlock {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let (h, residual) = if self.stride == 2 {
            let h = x.pad_with_zeros(2, 0, 2)?.pad_with_zeros(3, 0, 2)?;
            (h, x.max_pool2d(2)?)
        } else {
            (x.clone(), x.clone())
        };

        let residual = if self.channel_pad > 0 {
            residual.pad_with_zeros(1, 0, self.channel_pad)?
        } else {
            residual
        };

        let h = self.depthwise.forward(&h)?;
        let h = self.pointwise.forward(&h)?;
        (h + residual)?.relu()
    }
}

/// Stride-2 block without residual that closes the back model's backbone.
struct FinalBlazeBlock {
    depthwise: Conv2d,
    pointwise: Conv2d,
}

impl FinalBlazeBlock {
    fn new(channels: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        let depthwise = conv2d(
            channels,
            channels,
            3,
            Conv2dConfig {
                stride: 2,
                groups: channels,
                ..Conv2dConfig::default()
            },
            vb.pp("convs.0"),
        )?;
        let pointwise = conv2d(channels, channels, 1, Conv2dConfig::default(), vb.pp("convs.1"))?;
        Ok(Self {
            depthwise,
            pointwise,
        })
    }
}

impl Module for FinalBlazeBlock {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let h = x.pad_with_zeros(2, 0, 2)?.pad_with_zeros(3, 0, 2)?;
        let h = self.depthwise.forward(&h)?;
        self.pointwise.forward(&h)?.relu()
    }
}

enum Body {
    /// 16x16 features from `backbone1`, 8x8 from `backbone2`.
    Front {
        backbone1: Vec<BlazeBlock>,
        backbone2: Vec<BlazeBlock>,
    },
    /// 16x16 features from `backbone`, 8x8 from `final`.
    Back {
        backbone: Vec<BlazeBlock>,
        final_block: FinalBlazeBlock,
    },
}

// (in, out, stride); Sequential index = position + 2 (conv and ReLU come first)
const FRONT_BACKBONE1: [(usize, usize, usize); 11] = [
    (24, 24, 1),
    (24, 28, 1),
    (28, 32, 2),
    (32, 36, 1),
    (36, 42, 1),
    (42, 48, 2),
    (48, 56, 1),
    (56, 64, 1),
    (64, 72, 1),
    (72, 80, 1),
    (80, 88, 1),
];

const FRONT_BACKBONE2: [(usize, usize, usize); 5] = [
    (88, 96, 2),
    (96, 96, 1),
    (96, 96, 1),
    (96, 96, 1),
    (96, 96, 1),
];

/// Back backbone: four stages of seven same-width blocks, joined by
/// stride-2 transitions 24->24, 24->48, 48->96.
fn back_backbone_layout() -> Vec<(usize, usize, usize)> {
    let mut layout = vec![(24, 24, 1); 7];
    for (from, to) in [(24, 24), (24, 48), (48, 96)] {
        layout.push((from, to, 2));
        layout.extend(std::iter::repeat((to, to, 1)).take(7));
    }
    layout
}

fn build_blocks(
    layout: &[(usize, usize, usize)],
    vb: &VarBuilder,
    index_offset: usize,
) -> candle_core::Result<Vec<BlazeBlock>> {
    layout
        .iter()
        .enumerate()
        .map(|(i, &(in_c, out_c, stride))| {
            BlazeBlock::new(in_c, out_c, stride, vb.pp((i + index_offset).to_string()))
        })
        .collect()
}

fn run_blocks(blocks: &[BlazeBlock], x: Tensor) -> candle_core::Result<Tensor> {
    blocks.iter().try_fold(x, |h, block| block.forward(&h))
}

/// Apply a 1x1 head and flatten to `(batch, anchors, width)`.
fn head(conv: &Conv2d, x: &Tensor, width: usize) -> candle_core::Result<Tensor> {
    let out = conv.forward(x)?.permute((0, 2, 3, 1))?.contiguous()?;
    let batch = out.dim(0)?;
    let anchors = out.elem_count() / (batch * width).max(1);
    out.reshape((batch, anchors, width))
}

/// Zip-format checkpoints start with a local file header.
fn is_zip_archive(path: &Path) -> Result<bool, DetectorError> {
    let read_error = |source| DetectorError::ReadWeights {
        path: path.to_path_buf(),
        source,
    };
    let mut magic = Vec::with_capacity(4);
    File::open(path)
        .map_err(read_error)?
        .take(4)
        .read_to_end(&mut magic)
        .map_err(read_error)?;
    Ok(magic == ZIP_MAGIC)
}

/// BlazeFace detector network with its anchor table and thresholds.
///
/// Parameter names match the hollance BlazeFace-PyTorch state dicts.
/// BatchNorm is already folded into the conv biases there.
pub struct BlazeFaceNet {
    variant: ModelVariant,
    conv0: Conv2d,
    body: Body,
    classifier_8: Conv2d,
    classifier_16: Conv2d,
    regressor_8: Conv2d,
    regressor_16: Conv2d,
    anchors: Vec<[f32; ANCHOR_WIDTH]>,
    min_score_thresh: f32,
    min_suppression_threshold: f32,
    device: Device,
}

impl BlazeFaceNet {
    /// Build the network for `variant`, pulling every parameter from `vb`.
    ///
    /// Anchors must be loaded separately before inference.
    pub fn new(variant: ModelVariant, vb: VarBuilder) -> Result<Self, DetectorError> {
        let device = vb.device().clone();
        let conv0_cfg = || Conv2dConfig {
            stride: 2,
            ..Conv2dConfig::default()
        };

        let (conv0, body, feature_8_channels) = match variant {
            ModelVariant::Front => {
                let b1 = vb.pp("backbone1");
                let conv0 = conv2d(3, 24, 5, conv0_cfg(), b1.pp("0"))?;
                let backbone1 = build_blocks(&FRONT_BACKBONE1, &b1, 2)?;
                let backbone2 = build_blocks(&FRONT_BACKBONE2, &vb.pp("backbone2"), 0)?;
                let body = Body::Front {
                    backbone1,
                    backbone2,
                };
                (conv0, body, 88)
            }
            ModelVariant::Back => {
                let bb = vb.pp("backbone");
                let conv0 = conv2d(3, 24, 5, conv0_cfg(), bb.pp("0"))?;
                let backbone = build_blocks(&back_backbone_layout(), &bb, 2)?;
                let final_block = FinalBlazeBlock::new(96, vb.pp("final"))?;
                let body = Body::Back {
                    backbone,
                    final_block,
                };
                (conv0, body, 96)
            }
        };

        let head_cfg = Conv2dConfig::default;
        let classifier_8 = conv2d(feature_8_channels, 2, 1, head_cfg(), vb.pp("classifier_8"))?;
        let classifier_16 = conv2d(96, 6, 1, head_cfg(), vb.pp("classifier_16"))?;
        let regressor_8 = conv2d(feature_8_channels, 32, 1, head_cfg(), vb.pp("regressor_8"))?;
        let regressor_16 = conv2d(96, 96, 1, head_cfg(), vb.pp("regressor_16"))?;

        Ok(Self {
            variant,
            conv0,
            body,
            classifier_8,
            classifier_16,
            regressor_8,
            regressor_16,
            anchors: Vec::new(),
            min_score_thresh: variant.default_min_score_thresh(),
            min_suppression_threshold: MIN_SUPPRESSION_THRESHOLD,
            device,
        })
    }

    /// Open a weights file as a `VarBuilder`.
    ///
    /// `.safetensors` files are read as such; anything else is treated as a
    /// zip-format PyTorch checkpoint (`torch.save` from PyTorch 1.6 on).
    /// Legacy non-zip checkpoints are rejected with [`DetectorError::LegacyCheckpoint`].
    pub fn load_weights(path: &Path, device: &Device) -> Result<VarBuilder<'static>, DetectorError> {
        let is_safetensors = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("safetensors"));

        let vb = if is_safetensors {
            let tensors = candle_core::safetensors::load(path, device)?;
            VarBuilder::from_tensors(tensors, DType::F32, device)
        } else {
            if !is_zip_archive(path)? {
                return Err(DetectorError::LegacyCheckpoint(path.to_path_buf()));
            }
            VarBuilder::from_pth(path, DType::F32, device)?
        };
        Ok(vb)
    }

    /// Install the `(896, 4)` anchor table.
    pub fn load_anchors(&mut self, table: &Tensor) -> Result<(), DetectorError> {
        if table.dims() != [NUM_ANCHORS, ANCHOR_WIDTH] {
            return Err(DetectorError::AnchorShape {
                expected_rows: NUM_ANCHORS,
                shape: table.dims().to_vec(),
            });
        }
        self.anchors = table
            .to_dtype(DType::F32)?
            .to_vec2::<f32>()?
            .into_iter()
            .map(|row| [row[0], row[1], row[2], row[3]])
            .collect();
        Ok(())
    }

    pub fn load_anchors_from_npy(&mut self, path: &Path) -> Result<(), DetectorError> {
        let table = Tensor::read_npy(path)?;
        self.load_anchors(&table)
    }

    pub fn variant(&self) -> ModelVariant {
        self.variant
    }

    pub fn input_size(&self) -> usize {
        self.variant.input_size()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn anchors(&self) -> &[[f32; ANCHOR_WIDTH]] {
        &self.anchors
    }

    pub fn min_score_thresh(&self) -> f32 {
        self.min_score_thresh
    }

    pub fn set_min_score_thresh(&mut self, thresh: f32) {
        self.min_score_thresh = thresh;
    }

    pub fn min_suppression_threshold(&self) -> f32 {
        self.min_suppression_threshold
    }

    pub fn set_min_suppression_threshold(&mut self, thresh: f32) {
        self.min_suppression_threshold = thresh;
    }

    /// Raw network output for normalized input `(N, 3, S, S)`:
    /// boxes `(N, 896, 16)` and scores `(N, 896, 1)`.
    pub fn forward(&self, x: &Tensor) -> candle_core::Result<(Tensor, Tensor)> {
        // TFLite pads the first conv asymmetrically
        let x = x.pad_with_zeros(2, 1, 2)?.pad_with_zeros(3, 1, 2)?;
        let x = self.conv0.forward(&x)?.relu()?;

        let (feature_16, feature_8) = match &self.body {
            Body::Front {
                backbone1,
                backbone2,
            } => {
                let f16 = run_blocks(backbone1, x)?;
                let f8 = run_blocks(backbone2, f16.clone())?;
                (f16, f8)
            }
            Body::Back {
                backbone,
                final_block,
            } => {
                let f16 = run_blocks(backbone, x)?;
                let f8 = final_block.forward(&f16)?;
                (f16, f8)
            }
        };

        let c1 = head(&self.classifier_8, &feature_16, 1)?; // (N, 512, 1)
        let c2 = head(&self.classifier_16, &feature_8, 1)?; // (N, 384, 1)
        let r1 = head(&self.regressor_8, &feature_16, NUM_COORDS)?; // (N, 512, 16)
        let r2 = head(&self.regressor_16, &feature_8, NUM_COORDS)?; // (N, 384, 16)

        Ok((Tensor::cat(&[r1, r2], 1)?, Tensor::cat(&[c1, c2], 1)?))
    }

    /// Run detection on pixel data `(N, 3, S, S)` in `[0, 255]`.
    ///
    /// Returns one list of raw detections per image, coordinates normalized
    /// to the input square.
    pub fn predict_on_batch(&self, images: &Tensor) -> Result<Vec<Vec<RawDetection>>, DetectorError> {
        let size = self.input_size();
        if images.dims() != [images.dims().first().copied().unwrap_or(0), 3, size, size] {
            return Err(DetectorError::InputShape {
                size,
                shape: images.dims().to_vec(),
            });
        }
        if self.anchors.len() != NUM_ANCHORS {
            return Err(DetectorError::AnchorShape {
                expected_rows: NUM_ANCHORS,
                shape: vec![self.anchors.len(), ANCHOR_WIDTH],
            });
        }

        let x = images
            .to_device(&self.device)?
            .to_dtype(DType::F32)?
            .affine(1.0 / 127.5, -1.0)?;
        let (raw_boxes, raw_scores) = self.forward(&x)?;

        let raw_boxes = raw_boxes.to_vec3::<f32>()?;
        let raw_scores = raw_scores.to_vec3::<f32>()?;

        let params = DecodeParams {
            scale: size as f32,
            score_clipping_thresh: SCORE_CLIPPING_THRESH,
            min_score_thresh: self.min_score_thresh,
        };

        Ok(raw_boxes
            .iter()
            .zip(raw_scores.iter())
            .map(|(boxes, scores)| {
                let detections = tensors_to_detections(boxes, scores, &self.anchors, &params);
                weighted_non_max_suppression(detections, self.min_suppression_threshold)
            })
            .collect())
    }

    /// Single-image convenience over [`Self::predict_on_batch`].
    pub fn predict_on_image(&self, image: &Tensor) -> Result<Vec<RawDetection>, DetectorError> {
        let batch = image.unsqueeze(0)?;
        Ok(self
            .predict_on_batch(&batch)?
            .into_iter()
            .next()
            .unwrap_or_default())
    }
}
