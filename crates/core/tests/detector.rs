// Every conv weight in these models is zero, so the backbone emits zeros and
// each head returns its bias regardless of the image.

use std::path::{Path, PathBuf};

use approx::assert_relative_eq;
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use image::{Rgb, RgbImage};
use ndarray::{Array4, Axis};
use tempfile::TempDir;

use blazeface_core::detection::infrastructure::blazeface_net::BlazeFaceNet;
use blazeface_core::{BlazeFaceConfig, BlazeFaceDetector, FaceDetector, Frame, ImageInput, ModelVariant};

/// Box side produced by the regressor bias, as a fraction of the input.
const BOX_SIZE: f32 = 0.1;

fn anchor_table() -> Vec<f32> {
    let mut anchors = Vec::with_capacity(896 * 4);
    for (grid, per_cell) in [(16usize, 2usize), (8, 6)] {
        for y in 0..grid {
            for x in 0..grid {
                let cx = (x as f32 + 0.5) / grid as f32;
                let cy = (y as f32 + 0.5) / grid as f32;
                for _ in 0..per_cell {
                    anchors.extend([cx, cy, 1.0, 1.0]);
                }
            }
        }
    }
    anchors
}

/// Head biases that make exactly one anchor per cell fire with a
/// `BOX_SIZE` square box.
///
/// The front model fires on the first anchor of every 16x16 cell, the back
/// model on the first anchor of every 8x8 cell, so the back case runs
/// through the final block and the 8x8 heads.
fn head_biases(variant: ModelVariant) -> Vec<(&'static str, Vec<f32>)> {
    let side = BOX_SIZE * variant.input_size() as f32;
    let box_bias = |anchors: usize| {
        let mut bias = vec![0.0f32; anchors * 16];
        bias[2] = side;
        bias[3] = side;
        bias
    };
    match variant {
        ModelVariant::Front => vec![
            ("classifier_8.bias", vec![10.0, -10.0]),
            ("regressor_8.bias", box_bias(2)),
        ],
        ModelVariant::Back => vec![
            ("classifier_8.bias", vec![-10.0; 2]),
            ("classifier_16.bias", vec![10.0, -10.0, -10.0, -10.0, -10.0, -10.0]),
            ("regressor_16.bias", box_bias(6)),
        ],
    }
}

fn write_biased_model(dir: &Path, variant: ModelVariant) -> (PathBuf, PathBuf) {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    BlazeFaceNet::new(variant, vb).unwrap();
    for var in varmap.all_vars() {
        var.set(&var.zeros_like().unwrap()).unwrap();
    }
    {
        let vars = varmap.data().lock().unwrap();
        for (name, bias) in head_biases(variant) {
            vars[name]
                .set(&Tensor::new(bias.as_slice(), &device).unwrap())
                .unwrap();
        }
    }

    let weights = dir.join("blazeface.safetensors");
    let anchors = dir.join("anchors.npy");
    varmap.save(&weights).unwrap();
    Tensor::from_vec(anchor_table(), (896, 4), &device)
        .unwrap()
        .write_npy(&anchors)
        .unwrap();
    (weights, anchors)
}

fn detector(dir: &Path, config: BlazeFaceConfig) -> BlazeFaceDetector {
    let (weights, anchors) = write_biased_model(dir, config.variant);
    BlazeFaceDetector::new(config.with_local_model(weights, anchors)).unwrap()
}

fn test_image(w: u32, h: u32) -> RgbImage {
    RgbImage::from_fn(w, h, |x, y| Rgb([(x * 3) as u8, (y * 5) as u8, 90]))
}

#[test]
fn detects_one_face_per_firing_anchor() {
    let tmp = TempDir::new().unwrap();
    let detector = detector(tmp.path(), BlazeFaceConfig::default().with_min_score_thresh(0.6));
    let frame = Frame::from_rgb_image(test_image(128, 128));

    let faces = detector.detect_from_image(&ImageInput::Frame(frame)).unwrap();

    assert_eq!(faces.len(), 256);
    let first = &faces[0];
    // cell (0, 0): centre (4, 4), side 12.8
    assert_relative_eq!(first.x1, -2.4, epsilon = 1e-3);
    assert_relative_eq!(first.y1, -2.4, epsilon = 1e-3);
    assert_relative_eq!(first.x2, 10.4, epsilon = 1e-3);
    assert_relative_eq!(first.y2, 10.4, epsilon = 1e-3);
    assert_relative_eq!(first.keypoints[2][0], 4.0, epsilon = 1e-3);
    assert!(first.score > 0.9999);
}

#[test]
fn back_model_detects_on_the_coarse_grid() {
    let tmp = TempDir::new().unwrap();
    let config = BlazeFaceConfig::default()
        .back_model(true)
        .with_min_score_thresh(0.6);
    let detector = detector(tmp.path(), config);
    let frame = Frame::from_rgb_image(test_image(512, 256));

    let faces = detector.detect_from_image(&ImageInput::Frame(frame)).unwrap();

    assert_eq!(faces.len(), 64);
    // 8x8 cell (0, 0): centre (1/16, 1/16) of a 256 crop shifted right by 128
    let first = &faces[0];
    assert_relative_eq!(first.center().0, 16.0 + 128.0, epsilon = 1e-3);
    assert_relative_eq!(first.center().1, 16.0, epsilon = 1e-3);
    assert_relative_eq!(first.width(), 25.6, epsilon = 1e-3);
    assert_relative_eq!(first.height(), 25.6, epsilon = 1e-3);
    assert_relative_eq!(first.x1, 144.0 - 12.8, epsilon = 1e-3);
    // last cell (7, 7)
    let last = &faces[63];
    assert_relative_eq!(last.center().0, 15.0 / 16.0 * 256.0 + 128.0, epsilon = 1e-3);
    assert_relative_eq!(last.center().1, 15.0 / 16.0 * 256.0, epsilon = 1e-3);
}

#[test]
fn lower_suppression_threshold_merges_neighbours() {
    let tmp = TempDir::new().unwrap();
    let config = BlazeFaceConfig::default()
        .with_min_score_thresh(0.6)
        .with_min_suppression_threshold(0.2);
    let detector = detector(tmp.path(), config);
    let frame = Frame::from_rgb_image(test_image(128, 128));

    let faces = detector.detect_from_image(&ImageInput::Frame(frame)).unwrap();

    // horizontal and vertical neighbours overlap with IoU ~0.23
    assert!(!faces.is_empty());
    assert!(faces.len() < 256);
}

#[test]
fn boxes_are_offset_into_landscape_images() {
    let tmp = TempDir::new().unwrap();
    let detector = detector(tmp.path(), BlazeFaceConfig::default().with_min_score_thresh(0.6));
    let frame = Frame::from_rgb_image(test_image(400, 200));

    let faces = detector.detect_from_image(&ImageInput::Frame(frame)).unwrap();

    // scale 200, horizontal shift 100
    let first = &faces[0];
    assert_relative_eq!(first.center().0, 0.03125 * 200.0 + 100.0, epsilon = 1e-3);
    assert_relative_eq!(first.center().1, 0.03125 * 200.0, epsilon = 1e-3);
    assert_relative_eq!(first.width(), BOX_SIZE * 200.0, epsilon = 1e-3);
}

#[test]
fn image_file_and_frame_give_the_same_faces() {
    let tmp = TempDir::new().unwrap();
    let detector = detector(tmp.path(), BlazeFaceConfig::default().with_min_score_thresh(0.6));
    let image = test_image(150, 100);
    let path = tmp.path().join("face.png");
    image.save(&path).unwrap();

    let from_file = detector.detect_from_image(&ImageInput::from(path)).unwrap();
    let from_frame = detector
        .detect_from_image(&ImageInput::Frame(Frame::from_rgb_image(image)))
        .unwrap();

    assert_eq!(from_file, from_frame);
}

#[test]
fn batch_results_match_single_image_results() {
    let tmp = TempDir::new().unwrap();
    let detector = detector(tmp.path(), BlazeFaceConfig::default().with_min_score_thresh(0.6));
    let frame = Frame::from_rgb_image(test_image(96, 160));
    let chw = frame.to_chw();
    let batch: Array4<u8> = ndarray::stack(Axis(0), &[chw.view(), chw.view()]).unwrap();

    let single = detector
        .detect_from_image(&ImageInput::Frame(frame.clone()))
        .unwrap();
    let batched = detector.detect_from_batch(batch.view()).unwrap();

    assert_eq!(batched.len(), 2);
    assert_eq!(batched[0], single);
    assert_eq!(batched[1], single);
}

#[test]
fn local_model_never_touches_the_cache() {
    let tmp = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let (weights, anchors) = write_biased_model(tmp.path(), ModelVariant::Front);

    // a cache dir followed by a local source: the local source wins
    let config = BlazeFaceConfig::default()
        .with_cache_dir(cache.path())
        .with_local_model(weights, anchors);
    BlazeFaceDetector::new(config).unwrap();

    assert_eq!(std::fs::read_dir(cache.path()).unwrap().count(), 0);
}
