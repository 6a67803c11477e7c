//! Boundary to the vision toolkit.
//!
//! Corner detection, sub-pixel refinement, image decoding and the nonlinear
//! calibration solve are not implemented here. The pipeline only shapes the
//! inputs for a [`VisionToolkit`] and interprets its outputs.

#[cfg(feature = "opencv")]
pub mod opencv;
pub mod synthetic;

use std::ops::{BitOr, BitOrAssign};
use std::path::Path;

use nalgebra::{Matrix3, Point2, Point3, Vector3};

use crate::board::PatternSize;
use crate::global_types::ImageSize;

/// Model-selection bits for the calibration solve.
///
/// Bit values match OpenCV's `CALIB_*_MODEL` constants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SolveFlags(u32);

impl SolveFlags {
    pub const RATIONAL_MODEL: SolveFlags = SolveFlags(1 << 14);
    pub const THIN_PRISM_MODEL: SolveFlags = SolveFlags(1 << 15);
    pub const TILTED_MODEL: SolveFlags = SolveFlags(1 << 18);

    pub const fn empty() -> Self {
        SolveFlags(0)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn contains(&self, other: SolveFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for SolveFlags {
    type Output = SolveFlags;

    fn bitor(self, rhs: SolveFlags) -> SolveFlags {
        SolveFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for SolveFlags {
    fn bitor_assign(&mut self, rhs: SolveFlags) {
        self.0 |= rhs.0;
    }
}

/// Board pose for one view: Rodrigues rotation vector and translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewPose {
    pub rotation: Vector3<f64>,
    pub translation: Vector3<f64>,
}

/// Raw output of a calibration solve.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveOutput {
    pub rms_error: f64,
    pub camera_matrix: Matrix3<f64>,
    pub distortion: Vec<f64>,
    pub poses: Vec<ViewPose>,
}

#[derive(thiserror::Error, Debug)]
pub enum ToolkitError {
    #[error("cannot decode image: {0}")]
    Decode(String),
    #[error("sub-pixel refinement failed: {0}")]
    Refine(String),
    #[error("solver rejected input: {0}")]
    InvalidInput(String),
    #[error("solver failed: {0}")]
    Solve(String),
    #[error("toolkit backend error: {0}")]
    Backend(String),
}

/// Capabilities the pipeline consumes from a vision toolkit.
///
/// Toolkits are shared by reference across detection workers, hence `Sync`.
pub trait VisionToolkit: Sync {
    /// Decoded grayscale image.
    type Image;

    fn load_image(&self, path: &Path) -> Result<Self::Image, ToolkitError>;

    fn image_size(&self, image: &Self::Image) -> ImageSize;

    /// Locate the inner corners of a checkerboard. `Ok(None)` means the
    /// pattern is not visible; corners come back row-major.
    fn detect_pattern(
        &self,
        image: &Self::Image,
        pattern: PatternSize,
    ) -> Result<Option<Vec<Point2<f64>>>, ToolkitError>;

    fn refine_subpixel(
        &self,
        image: &Self::Image,
        corners: Vec<Point2<f64>>,
    ) -> Result<Vec<Point2<f64>>, ToolkitError>;

    /// Jointly estimate intrinsics, distortion and per-view poses.
    fn solve_calibration(
        &self,
        object_points: &[Vec<Point3<f64>>],
        image_points: &[Vec<Point2<f64>>],
        image_size: ImageSize,
        flags: SolveFlags,
    ) -> Result<SolveOutput, ToolkitError>;
}

impl<T: VisionToolkit + ?Sized> VisionToolkit for &T {
    type Image = T::Image;

    fn load_image(&self, path: &Path) -> Result<Self::Image, ToolkitError> {
        (**self).load_image(path)
    }

    fn image_size(&self, image: &Self::Image) -> ImageSize {
        (**self).image_size(image)
    }

    fn detect_pattern(
        &self,
        image: &Self::Image,
        pattern: PatternSize,
    ) -> Result<Option<Vec<Point2<f64>>>, ToolkitError> {
        (**self).detect_pattern(image, pattern)
    }

    fn refine_subpixel(
        &self,
        image: &Self::Image,
        corners: Vec<Point2<f64>>,
    ) -> Result<Vec<Point2<f64>>, ToolkitError> {
        (**self).refine_subpixel(image, corners)
    }

    fn solve_calibration(
        &self,
        object_points: &[Vec<Point3<f64>>],
        image_points: &[Vec<Point2<f64>>],
        image_size: ImageSize,
        flags: SolveFlags,
    ) -> Result<SolveOutput, ToolkitError> {
        (**self).solve_calibration(object_points, image_points, image_size, flags)
    }
}
