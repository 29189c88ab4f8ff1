use serde::Serialize;

/// A detected face in pixel coordinates of the original image.
///
/// Keypoints are, in order: right eye, left eye, nose, mouth, right ear,
/// left ear (subject's left/right), each as `[x, y]`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
    pub keypoints: [[f32; 2]; 6],
}

impl FaceBox {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// `[x1, y1, x2, y2, score]`, the row layout alignment code consumes.
    pub fn to_array(&self) -> [f32; 5] {
        [self.x1, self.y1, self.x2, self.y2, self.score]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn face(x1: f32, y1: f32, x2: f32, y2: f32) -> FaceBox {
        FaceBox {
            x1,
            y1,
            x2,
            y2,
            score: 0.9,
            keypoints: [[0.0; 2]; 6],
        }
    }

    #[test]
    fn test_dimensions() {
        let f = face(10.0, 20.0, 60.0, 100.0);
        assert_relative_eq!(f.width(), 50.0);
        assert_relative_eq!(f.height(), 80.0);
        assert_eq!(f.center(), (35.0, 60.0));
    }

    #[test]
    fn test_to_array_puts_score_last() {
        let f = face(1.0, 2.0, 3.0, 4.0);
        assert_eq!(f.to_array(), [1.0, 2.0, 3.0, 4.0, 0.9]);
    }
}
