use crate::detection::infrastructure::math::{bbox_iou, sigmoid};
use crate::shared::constants::{ANCHOR_WIDTH, NUM_COORDS};

/// A detection in network space, normalized to the input square.
///
/// `coords` holds `ymin, xmin, ymax, xmax` followed by six `(x, y)`
/// keypoints.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub coords: [f32; NUM_COORDS],
    pub score: f32,
}

impl RawDetection {
    pub fn bbox(&self) -> [f32; 4] {
        [self.coords[0], self.coords[1], self.coords[2], self.coords[3]]
    }

    pub fn keypoint(&self, k: usize) -> [f32; 2] {
        [self.coords[4 + k * 2], self.coords[4 + k * 2 + 1]]
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DecodeParams {
    /// Input resolution the regressor offsets are expressed in.
    pub scale: f32,
    pub score_clipping_thresh: f32,
    pub min_score_thresh: f32,
}

/// Decode one regressor row against its anchor `(x, y, w, h)`.
pub fn decode_box(raw: &[f32], anchor: &[f32; ANCHOR_WIDTH], scale: f32) -> [f32; NUM_COORDS] {
    let [ax, ay, aw, ah] = *anchor;
    let x_center = raw[0] / scale * aw + ax;
    let y_center = raw[1] / scale * ah + ay;
    let w = raw[2] / scale * aw;
    let h = raw[3] / scale * ah;

    let mut out = [0.0f32; NUM_COORDS];
    out[0] = y_center - h / 2.0;
    out[1] = x_center - w / 2.0;
    out[2] = y_center + h / 2.0;
    out[3] = x_center + w / 2.0;

    for k in 0..6 {
        let offset = 4 + k * 2;
        out[offset] = raw[offset] / scale * aw + ax;
        out[offset + 1] = raw[offset + 1] / scale * ah + ay;
    }
    out
}

/// Score, threshold and decode one image's anchors.
///
/// `raw_boxes` is `896 x 16`, `raw_scores` is `896 x 1`. Anchors scoring
/// at least `min_score_thresh` are kept, in anchor order.
pub fn tensors_to_detections(
    raw_boxes: &[Vec<f32>],
    raw_scores: &[Vec<f32>],
    anchors: &[[f32; ANCHOR_WIDTH]],
    params: &DecodeParams,
) -> Vec<RawDetection> {
    let clip = params.score_clipping_thresh;
    raw_boxes
        .iter()
        .zip(raw_scores.iter())
        .zip(anchors.iter())
        .filter_map(|((raw, score), anchor)| {
            let raw_score = score.first().copied().unwrap_or(f32::NEG_INFINITY);
            let score = sigmoid(raw_score.clamp(-clip, clip));
            if score < params.min_score_thresh {
                return None;
            }
            Some(RawDetection {
                coords: decode_box(raw, anchor, params.scale),
                score,
            })
        })
        .collect()
}

/// Blending non-max suppression.
///
/// Takes the best remaining detection, gathers every remaining detection
/// overlapping it by more than `iou_thresh`, and emits their score-weighted
/// mean with the mean score. Clusters of one are emitted unchanged.
pub fn weighted_non_max_suppression(
    mut detections: Vec<RawDetection>,
    iou_thresh: f32,
) -> Vec<RawDetection> {
    detections.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut output = Vec::new();
    let mut remaining = detections;

    while !remaining.is_empty() {
        let first = remaining.remove(0);
        let first_box = first.bbox();

        let (overlapping, rest): (Vec<_>, Vec<_>) = remaining
            .into_iter()
            .partition(|other| bbox_iou(&first_box, &other.bbox()) > iou_thresh);
        remaining = rest;

        if overlapping.is_empty() {
            output.push(first);
            continue;
        }

        let cluster: Vec<&RawDetection> = std::iter::once(&first).chain(overlapping.iter()).collect();
        let total_score: f32 = cluster.iter().map(|d| d.score).sum();
        let mut coords = [0.0f32; NUM_COORDS];
        for d in &cluster {
            for (acc, c) in coords.iter_mut().zip(d.coords.iter()) {
                *acc += c * d.score;
            }
        }
        if total_score > 0.0 {
            for c in &mut coords {
                *c /= total_score;
            }
        } else {
            coords = first.coords;
        }

        output.push(RawDetection {
            coords,
            score: total_score / cluster.len() as f32,
        });
    }

    output
}
