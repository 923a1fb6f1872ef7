use std::fmt;

pub type Result<T> = std::result::Result<T, StitchError>;

/// Failure of one stitching stage.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StitchError {
    #[error("need at least 2 images to stitch, got {found}")]
    TooFewImages { found: usize },

    #[error("image {image} yields {found} keypoints, need at least {required}")]
    InsufficientFeatures {
        image: usize,
        found: usize,
        required: usize,
    },

    #[error("{found} matches, need at least {required} to attempt geometric fitting")]
    InsufficientMatches { found: usize, required: usize },

    #[error("homography estimation failed: {0}")]
    HomographyEstimationFailed(String),

    #[error("image graph is disconnected: {components} components")]
    GraphDisconnected { components: usize },

    #[error("camera parameters adjustment failed: {0}")]
    CameraParamsAdjustmentFailed(String),

    #[error("unexpected stitching failure: {0}")]
    Unknown(String),
}

/// Pipeline stage a [`StitchError`] originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Input,
    Extraction,
    Matching,
    Verification,
    Alignment,
    Composition,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Input => "input",
            Stage::Extraction => "feature extraction",
            Stage::Matching => "descriptor matching",
            Stage::Verification => "geometric verification",
            Stage::Alignment => "global alignment",
            Stage::Composition => "composition",
        };
        f.write_str(name)
    }
}

impl StitchError {
    pub fn stage(&self) -> Stage {
        match self {
            StitchError::TooFewImages { .. } => Stage::Input,
            StitchError::InsufficientFeatures { .. } => Stage::Extraction,
            StitchError::InsufficientMatches { .. } => Stage::Matching,
            StitchError::HomographyEstimationFailed(_) => Stage::Verification,
            StitchError::GraphDisconnected { .. }
            | StitchError::CameraParamsAdjustmentFailed(_) => Stage::Alignment,
            StitchError::Unknown(_) => Stage::Composition,
        }
    }

    /// Coarse status code of the classic stitcher API: 1 need more images,
    /// 2 homography estimation failed, 3 camera parameter adjustment failed,
    /// -1 anything else.
    pub fn status_code(&self) -> i32 {
        match self {
            StitchError::TooFewImages { .. }
            | StitchError::InsufficientFeatures { .. }
            | StitchError::InsufficientMatches { .. }
            | StitchError::GraphDisconnected { .. } => 1,
            StitchError::HomographyEstimationFailed(_) => 2,
            StitchError::CameraParamsAdjustmentFailed(_) => 3,
            StitchError::Unknown(_) => -1,
        }
    }
}
