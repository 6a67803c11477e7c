use std::path::PathBuf;

use crate::config::ConfigError;
use crate::toolkit::ToolkitError;

/// Fatal and reportable failures of a calibration run.
///
/// Per-image problems are not here; they are [`crate::collector::DetectionFailure`]
/// values recorded in the collection report and never abort a run.
#[derive(thiserror::Error, Debug)]
pub enum CalibError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("image directory {} not found: {reason}", path.display())]
    DirectoryNotFound { path: PathBuf, reason: String },

    #[error(
        "not enough usable images: pattern found in {detected} of {scanned} \
         (need at least {required}); check that the board's inner corner count \
         in the config matches the physical target"
    )]
    Insufficient {
        detected: usize,
        scanned: usize,
        required: usize,
    },

    #[error("calibration solve failed over {views} views: {source}")]
    CalibrationFailed {
        views: usize,
        #[source]
        source: ToolkitError,
    },

    #[error("cannot write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot serialize calibration record: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl CalibError {
    /// Whether the run must stop. A failed save leaves the result usable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CalibError::Io { .. } | CalibError::Serialize(_))
    }
}
