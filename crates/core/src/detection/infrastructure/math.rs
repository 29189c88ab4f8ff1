/// Logistic function. Inputs are not clamped here; `tensors_to_detections`
/// clips raw scores before calling it.
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// IoU between two boxes given as `[min_a, min_b, max_a, max_b]`.
///
/// Axis order does not matter as long as both boxes use the same one.
/// Degenerate boxes (zero union) have IoU 0.
pub fn bbox_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let lo0 = a[0].max(b[0]);
    let lo1 = a[1].max(b[1]);
    let hi0 = a[2].min(b[2]);
    let hi1 = a[3].min(b[3]);

    let inter = (hi0 - lo0).max(0.0) * (hi1 - lo1).max(0.0);
    if inter == 0.0 {
        return 0.0;
    }

    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let union = area_a + area_b - inter;
    if union <= 0.0 {
        return 0.0;
    }
    inter / union
}
