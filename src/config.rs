//! Run configuration.
//!
//! A [`CalibrationConfig`] is loaded once, validated, and then passed by
//! reference into every stage. Nothing reads configuration from globals.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::board::BoardGeometry;

/// Successful detections required before the solver runs.
pub const DEFAULT_MIN_IMAGES: usize = 5;
/// Standard five-coefficient model.
pub const DEFAULT_DISTORTION_COEFFS: usize = 5;
pub const DEFAULT_RESULT_DIR: &str = "result";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse config file {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraSection {
    /// Physical lens focal length. Informational only; echoed into results.
    #[serde(default)]
    pub focal_length_mm: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSection {
    #[serde(default = "default_min_images")]
    pub min_images: usize,
    /// Reprojection error (pixels) above which a result is flagged.
    pub error_threshold_px: f64,
    /// Requested coefficient count; one of 5, 8, 12, 14.
    #[serde(default = "default_distortion_coeffs")]
    pub distortion_coeffs: usize,
    /// Solve even when fewer than `min_images` views were detected.
    #[serde(default)]
    pub allow_insufficient: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSection {
    #[serde(default = "default_true")]
    pub save_full_matrix: bool,
    #[serde(default = "default_true")]
    pub save_full_distortion: bool,
    #[serde(default = "default_result_dir")]
    pub result_dir: PathBuf,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            save_full_matrix: true,
            save_full_distortion: true,
            result_dir: default_result_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    #[serde(default)]
    pub camera: CameraSection,
    pub board: BoardGeometry,
    pub calibration: CalibrationSection,
    #[serde(default)]
    pub output: OutputSection,
}

fn default_min_images() -> usize {
    DEFAULT_MIN_IMAGES
}

fn default_distortion_coeffs() -> usize {
    DEFAULT_DISTORTION_COEFFS
}

fn default_true() -> bool {
    true
}

fn default_result_dir() -> PathBuf {
    PathBuf::from(DEFAULT_RESULT_DIR)
}

impl CalibrationConfig {
    /// Build a config with defaults for everything but the required values.
    pub fn new(board: BoardGeometry, error_threshold_px: f64) -> Self {
        Self {
            camera: CameraSection::default(),
            board,
            calibration: CalibrationSection {
                min_images: DEFAULT_MIN_IMAGES,
                error_threshold_px,
                distortion_coeffs: DEFAULT_DISTORTION_COEFFS,
                allow_insufficient: false,
            },
            output: OutputSection::default(),
        }
    }

    /// Load and validate a config file. `.json` files are read as JSON,
    /// everything else as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let config = if is_json {
            Self::from_json_str(&raw)
        } else {
            Self::from_toml_str(&raw)
        }
        .map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })?;
        config.validate()?;
        log::info!("loaded config {}", path.display());
        Ok(config)
    }

    fn from_toml_str(raw: &str) -> Result<Self, String> {
        toml::from_str(raw).map_err(|e| e.to_string())
    }

    fn from_json_str(raw: &str) -> Result<Self, String> {
        serde_json::from_str(raw).map_err(|e| e.to_string())
    }

    /// Check every invariant that must hold before image work starts.
    ///
    /// An unsupported distortion coefficient count is not an error here; the
    /// model selector falls back to the standard model with a warning.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.board.validate()?;
        let cal = &self.calibration;
        if cal.min_images == 0 {
            return Err(ConfigError::Invalid(
                "min_images must be at least 1".to_string(),
            ));
        }
        if !(cal.error_threshold_px.is_finite() && cal.error_threshold_px > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "error_threshold_px must be a positive pixel value, got {}",
                cal.error_threshold_px
            )));
        }
        if let Some(f) = self.camera.focal_length_mm {
            if !(f.is_finite() && f > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "focal_length_mm must be positive when set, got {f}"
                )));
            }
        }
        Ok(())
    }

    pub fn error_threshold_px(&self) -> f64 {
        self.calibration.error_threshold_px
    }

    pub fn min_images(&self) -> usize {
        self.calibration.min_images
    }

    /// Commented TOML starter file.
    pub fn template() -> String {
        format!(
            r#"# Camera intrinsic calibration settings.

[camera]
# Physical lens focal length in mm (optional, recorded in the result only).
# focal_length_mm = 50.0

[board]
# Inner corners, not squares: a 10x7-square board has 9x6 inner corners.
corners_x = 9
corners_y = 6
# Edge length of one square in mm. Measure it; the scale of every
# extrinsic result depends on it.
square_size_mm = 25.0

[calibration]
# Successful detections needed before solving.
min_images = {min_images}
# RMS reprojection error (px) above which the result is flagged.
error_threshold_px = 1.0
# Distortion coefficients: 5, 8, 12 or 14.
#   5  k1 k2 p1 p2 k3                 general purpose, 15-25 images
#   8  + k4 k5 k6 (rational)           wide angle, 25-35 images
#   12 + s1..s4 (thin prism)           high precision, 30-40 images
#   14 + tau_x tau_y (tilted sensor)   special optics, 40-60 images
# Higher orders overfit easily; if RMS grows, step back down.
distortion_coeffs = {coeffs}
# Solve anyway when fewer than min_images views were detected.
allow_insufficient = false

[output]
save_full_matrix = true
save_full_distortion = true
result_dir = "{result_dir}"
"#,
            min_images = DEFAULT_MIN_IMAGES,
            coeffs = DEFAULT_DISTORTION_COEFFS,
            result_dir = DEFAULT_RESULT_DIR,
        )
    }
}
