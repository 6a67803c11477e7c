//! Calibration solve over a collected correspondence set.

use nalgebra::Matrix3;

use crate::camera::{DistortionModel, PinholeIntrinsics};
use crate::collector::CorrespondenceSet;
use crate::error::CalibError;
use crate::global_types::{ImageSize, Timestamp};
use crate::toolkit::{ToolkitError, ViewPose, VisionToolkit};

/// Intrinsics, distortion and quality metric from one solve. Immutable.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationResult {
    pub rms_reprojection_error: f64,
    pub intrinsic_matrix: Matrix3<f64>,
    /// May be shorter than the model's count if the solver returned fewer.
    pub distortion_coefficients: Vec<f64>,
    pub image_count: usize,
    pub model: DistortionModel,
    pub timestamp: Timestamp,
    pub image_size: ImageSize,
    /// Board pose per view, index-aligned with the correspondence set.
    pub poses: Vec<ViewPose>,
}

impl CalibrationResult {
    pub fn intrinsics(&self) -> PinholeIntrinsics {
        PinholeIntrinsics::from_matrix(&self.intrinsic_matrix)
    }

    pub fn fx(&self) -> f64 {
        self.intrinsic_matrix[(0, 0)]
    }

    pub fn fy(&self) -> f64 {
        self.intrinsic_matrix[(1, 1)]
    }

    pub fn cx(&self) -> f64 {
        self.intrinsic_matrix[(0, 2)]
    }

    pub fn cy(&self) -> f64 {
        self.intrinsic_matrix[(1, 2)]
    }
}

pub struct CalibrationSolver;

impl CalibrationSolver {
    /// Run the toolkit solve with the flags of `model`.
    ///
    /// The image size is taken from the set, which records the first detected
    /// image. Solver failures are returned as `CalibrationFailed`; nothing is
    /// retried.
    pub fn solve<T: VisionToolkit>(
        toolkit: &T,
        set: &CorrespondenceSet,
        model: DistortionModel,
    ) -> Result<CalibrationResult, CalibError> {
        let views = set.len();
        let image_size = match set.image_size() {
            Some(size) if !set.is_empty() => size,
            _ => {
                return Err(CalibError::CalibrationFailed {
                    views,
                    source: ToolkitError::InvalidInput("no detected views".to_string()),
                })
            }
        };

        log::info!("solving {model} over {views} views at {image_size}");
        let output = toolkit
            .solve_calibration(
                set.object_points(),
                set.image_points(),
                image_size,
                model.solve_flags(),
            )
            .map_err(|source| CalibError::CalibrationFailed { views, source })?;

        let non_finite = if !output.rms_error.is_finite() {
            Some(format!("non-finite RMS error {}", output.rms_error))
        } else if output.camera_matrix.iter().any(|v| !v.is_finite()) {
            Some("non-finite entry in the intrinsic matrix".to_string())
        } else if output.distortion.iter().any(|v| !v.is_finite()) {
            Some("non-finite distortion coefficient".to_string())
        } else {
            None
        };
        if let Some(message) = non_finite {
            return Err(CalibError::CalibrationFailed {
                views,
                source: ToolkitError::Solve(message),
            });
        }
        if output.distortion.len() < model.coeff_count() {
            log::warn!(
                "solver returned {} of {} distortion coefficients",
                output.distortion.len(),
                model.coeff_count()
            );
        }
        log::info!("solve finished, RMS {:.4} px", output.rms_error);

        Ok(CalibrationResult {
            rms_reprojection_error: output.rms_error,
            intrinsic_matrix: output.camera_matrix,
            distortion_coefficients: output.distortion,
            image_count: views,
            model,
            timestamp: Timestamp::now(),
            image_size,
            poses: output.poses,
        })
    }
}
