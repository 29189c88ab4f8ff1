use crate::shared::constants::{
    BACK_ANCHORS_NAME, BACK_ANCHORS_URL, BACK_WEIGHTS_NAME, BACK_WEIGHTS_URL, FRONT_ANCHORS_NAME,
    FRONT_ANCHORS_URL, FRONT_WEIGHTS_NAME, FRONT_WEIGHTS_URL,
};

/// A downloadable model file: cache file name plus source URL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelAsset {
    pub name: &'static str,
    pub url: &'static str,
}

/// The two published BlazeFace configurations.
///
/// The front model targets selfie-distance faces at 128x128; the back model
/// targets smaller, farther faces at 256x256.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ModelVariant {
    #[default]
    Front,
    Back,
}

impl ModelVariant {
    pub fn from_back_model(back_model: bool) -> Self {
        if back_model {
            Self::Back
        } else {
            Self::Front
        }
    }

    pub fn is_back(self) -> bool {
        self == Self::Back
    }

    /// Square input resolution the network expects.
    pub fn input_size(self) -> usize {
        match self {
            Self::Front => 128,
            Self::Back => 256,
        }
    }

    /// Score threshold the network ships with, before any override.
    pub fn default_min_score_thresh(self) -> f32 {
        match self {
            Self::Front => 0.75,
            Self::Back => 0.65,
        }
    }

    pub fn weights_asset(self) -> ModelAsset {
        match self {
            Self::Front => ModelAsset {
                name: FRONT_WEIGHTS_NAME,
                url: FRONT_WEIGHTS_URL,
            },
            Self::Back => ModelAsset {
                name: BACK_WEIGHTS_NAME,
                url: BACK_WEIGHTS_URL,
            },
        }
    }

    pub fn anchors_asset(self) -> ModelAsset {
        match self {
            Self::Front => ModelAsset {
                name: FRONT_ANCHORS_NAME,
                url: FRONT_ANCHORS_URL,
            },
            Self::Back => ModelAsset {
                name: BACK_ANCHORS_NAME,
                url: BACK_ANCHORS_URL,
            },
        }
    }
}
