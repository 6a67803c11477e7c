//! Deterministic in-memory toolkit.
//!
//! Views are registered by file name. Boards are rendered by projecting the
//! corner grid through a fixed pinhole camera, and the solve returns a
//! configured RMS instead of optimizing anything. Useful for dry runs of the
//! pipeline and for tests that must not depend on native libraries.

use std::collections::HashMap;
use std::path::Path;

use nalgebra::{Point2, Point3, Vector3};

use super::{SolveFlags, SolveOutput, ToolkitError, ViewPose, VisionToolkit};
use crate::board::PatternSize;
use crate::camera::{DistortionModel, PinholeIntrinsics};
use crate::global_types::ImageSize;

/// Spacing between rendered corners, in board units.
const RENDER_SQUARE_MM: f64 = 20.0;

/// What a registered file decodes to.
#[derive(Debug, Clone, PartialEq)]
pub enum SyntheticView {
    /// A fronto-parallel board at `depth_mm`. `pattern: None` matches any
    /// requested pattern size; `Some` only matches that size.
    Board {
        pattern: Option<PatternSize>,
        depth_mm: f64,
        mirrored: bool,
        size: Option<ImageSize>,
    },
    /// Decodes fine, no board visible.
    Blank,
    /// Fails to decode.
    Corrupt,
}

impl SyntheticView {
    pub fn board() -> Self {
        SyntheticView::Board {
            pattern: None,
            depth_mm: 600.0,
            mirrored: false,
            size: None,
        }
    }

    pub fn mirrored_board() -> Self {
        SyntheticView::Board {
            pattern: None,
            depth_mm: 600.0,
            mirrored: true,
            size: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticImage {
    pub name: String,
    pub view: SyntheticView,
    pub size: ImageSize,
}

#[derive(Debug, Clone)]
pub struct SyntheticToolkit {
    views: HashMap<String, SyntheticView>,
    intrinsics: PinholeIntrinsics,
    image_size: ImageSize,
    rms_error: f64,
    returned_coeffs: Option<usize>,
    distortion: Option<Vec<f64>>,
    solve_failure: Option<String>,
}

impl SyntheticToolkit {
    pub fn new(image_size: ImageSize) -> Self {
        let f = image_size.width as f64;
        Self {
            views: HashMap::new(),
            intrinsics: PinholeIntrinsics::new(
                f,
                f,
                image_size.width as f64 / 2.0,
                image_size.height as f64 / 2.0,
            ),
            image_size,
            rms_error: 0.3,
            returned_coeffs: None,
            distortion: None,
            solve_failure: None,
        }
    }

    pub fn with_view(mut self, file_name: impl Into<String>, view: SyntheticView) -> Self {
        self.views.insert(file_name.into(), view);
        self
    }

    pub fn with_intrinsics(mut self, intrinsics: PinholeIntrinsics) -> Self {
        self.intrinsics = intrinsics;
        self
    }

    /// RMS error the solve will report.
    pub fn with_rms(mut self, rms_error: f64) -> Self {
        self.rms_error = rms_error;
        self
    }

    /// Return at most `count` distortion coefficients from the solve.
    pub fn with_returned_coeffs(mut self, count: usize) -> Self {
        self.returned_coeffs = Some(count);
        self
    }

    /// Return exactly these distortion coefficients from the solve.
    pub fn with_distortion(mut self, coefficients: Vec<f64>) -> Self {
        self.distortion = Some(coefficients);
        self
    }

    pub fn with_solve_failure(mut self, message: impl Into<String>) -> Self {
        self.solve_failure = Some(message.into());
        self
    }

    pub fn intrinsics(&self) -> PinholeIntrinsics {
        self.intrinsics
    }

    fn render(
        &self,
        pattern: PatternSize,
        depth_mm: f64,
        mirrored: bool,
        size: ImageSize,
    ) -> Option<Vec<Point2<f64>>> {
        let cols = pattern.columns as usize;
        let half_w = (pattern.columns - 1) as f64 * RENDER_SQUARE_MM / 2.0;
        let half_h = (pattern.rows - 1) as f64 * RENDER_SQUARE_MM / 2.0;
        (0..pattern.corner_count())
            .map(|i| {
                let p = Point3::new(
                    (i % cols) as f64 * RENDER_SQUARE_MM - half_w,
                    (i / cols) as f64 * RENDER_SQUARE_MM - half_h,
                    depth_mm,
                );
                let px = self.intrinsics.project(&p)?;
                if mirrored {
                    Some(Point2::new(size.width as f64 - px.x, px.y))
                } else {
                    Some(px)
                }
            })
            .collect()
    }

    fn coefficient_count(flags: SolveFlags) -> usize {
        DistortionModel::ALL
            .into_iter()
            .find(|m| m.solve_flags() == flags)
            .unwrap_or(DistortionModel::Standard)
            .coeff_count()
    }
}

impl VisionToolkit for SyntheticToolkit {
    type Image = SyntheticImage;

    fn load_image(&self, path: &Path) -> Result<SyntheticImage, ToolkitError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ToolkitError::Decode(format!("no file name in {}", path.display())))?;
        let view = self
            .views
            .get(name)
            .ok_or_else(|| ToolkitError::Decode(format!("{name} is not a registered view")))?;
        if *view == SyntheticView::Corrupt {
            return Err(ToolkitError::Decode(format!("{name} is corrupt")));
        }
        let size = match view {
            SyntheticView::Board {
                size: Some(size), ..
            } => *size,
            _ => self.image_size,
        };
        Ok(SyntheticImage {
            name: name.to_string(),
            view: view.clone(),
            size,
        })
    }

    fn image_size(&self, image: &SyntheticImage) -> ImageSize {
        image.size
    }

    fn detect_pattern(
        &self,
        image: &SyntheticImage,
        pattern: PatternSize,
    ) -> Result<Option<Vec<Point2<f64>>>, ToolkitError> {
        match &image.view {
            SyntheticView::Board {
                pattern: expected,
                depth_mm,
                mirrored,
                ..
            } => {
                if expected.is_some_and(|e| e != pattern) {
                    return Ok(None);
                }
                Ok(self.render(pattern, *depth_mm, *mirrored, image.size))
            }
            SyntheticView::Blank | SyntheticView::Corrupt => Ok(None),
        }
    }

    fn refine_subpixel(
        &self,
        _image: &SyntheticImage,
        corners: Vec<Point2<f64>>,
    ) -> Result<Vec<Point2<f64>>, ToolkitError> {
        Ok(corners)
    }

    fn solve_calibration(
        &self,
        object_points: &[Vec<Point3<f64>>],
        image_points: &[Vec<Point2<f64>>],
        _image_size: ImageSize,
        flags: SolveFlags,
    ) -> Result<SolveOutput, ToolkitError> {
        if object_points.is_empty() {
            return Err(ToolkitError::InvalidInput("no views".to_string()));
        }
        if object_points.len() != image_points.len() {
            return Err(ToolkitError::InvalidInput(format!(
                "{} object point sets vs {} image point sets",
                object_points.len(),
                image_points.len()
            )));
        }
        if let Some((i, _)) = object_points
            .iter()
            .zip(image_points)
            .enumerate()
            .find(|(_, (o, p))| o.len() != p.len())
        {
            return Err(ToolkitError::InvalidInput(format!(
                "view {i} has mismatched point counts"
            )));
        }
        if let Some(message) = &self.solve_failure {
            return Err(ToolkitError::Solve(message.clone()));
        }

        let mut count = Self::coefficient_count(flags);
        if let Some(limit) = self.returned_coeffs {
            count = count.min(limit);
        }
        let distortion = match &self.distortion {
            Some(coefficients) => coefficients.clone(),
            None => (0..count).map(|i| -0.05 / (i as f64 + 1.0)).collect(),
        };
        let poses = object_points
            .iter()
            .map(|_| ViewPose {
                rotation: Vector3::zeros(),
                translation: Vector3::new(0.0, 0.0, 600.0),
            })
            .collect();

        Ok(SolveOutput {
            rms_error: self.rms_error,
            camera_matrix: self.intrinsics.to_matrix(),
            distortion,
            poses,
        })
    }
}
