//! OpenCV-backed toolkit.

use std::path::Path;

use nalgebra::{Matrix3, Point2, Point3, Vector3};
use opencv::calib3d;
use opencv::core::{Mat, Point2f, Point3f, Size, TermCriteria, Vector};
use opencv::imgcodecs;
use opencv::imgproc;
use opencv::prelude::*;

use super::{SolveFlags, SolveOutput, ToolkitError, ViewPose, VisionToolkit};
use crate::board::PatternSize;
use crate::global_types::ImageSize;

/// Calls into `calib3d` / `imgproc` with the settings the pipeline expects.
#[derive(Debug, Clone)]
pub struct OpenCvToolkit {
    /// Half-size of the sub-pixel search window is `(subpix_window - 1) / 2`.
    pub subpix_window: i32,
    pub subpix_max_iter: i32,
    pub subpix_epsilon: f64,
}

impl Default for OpenCvToolkit {
    fn default() -> Self {
        Self {
            subpix_window: 11,
            subpix_max_iter: 30,
            subpix_epsilon: 0.001,
        }
    }
}

impl From<opencv::Error> for ToolkitError {
    fn from(e: opencv::Error) -> Self {
        ToolkitError::Backend(e.to_string())
    }
}

impl OpenCvToolkit {
    pub fn new() -> Self {
        Self::default()
    }

    fn cv_flags(flags: SolveFlags) -> i32 {
        let mut cv = 0;
        if flags.contains(SolveFlags::RATIONAL_MODEL) {
            cv |= calib3d::CALIB_RATIONAL_MODEL;
        }
        if flags.contains(SolveFlags::THIN_PRISM_MODEL) {
            cv |= calib3d::CALIB_THIN_PRISM_MODEL;
        }
        if flags.contains(SolveFlags::TILTED_MODEL) {
            cv |= calib3d::CALIB_TILTED_MODEL;
        }
        cv
    }

    fn to_cv_points(points: &[Point2<f64>]) -> Vector<Point2f> {
        points
            .iter()
            .map(|p| Point2f::new(p.x as f32, p.y as f32))
            .collect()
    }

    fn from_cv_points(points: &Vector<Point2f>) -> Vec<Point2<f64>> {
        points
            .iter()
            .map(|p| Point2::new(p.x as f64, p.y as f64))
            .collect()
    }

    fn read_vec3(m: &Mat) -> Result<Vector3<f64>, ToolkitError> {
        Ok(Vector3::new(
            *m.at::<f64>(0)?,
            *m.at::<f64>(1)?,
            *m.at::<f64>(2)?,
        ))
    }
}

impl VisionToolkit for OpenCvToolkit {
    type Image = Mat;

    fn load_image(&self, path: &Path) -> Result<Mat, ToolkitError> {
        let path_str = path
            .to_str()
            .ok_or_else(|| ToolkitError::Decode(format!("non UTF-8 path {}", path.display())))?;
        let img = imgcodecs::imread(path_str, imgcodecs::IMREAD_GRAYSCALE)?;
        if img.empty() {
            return Err(ToolkitError::Decode(format!(
                "{} is not a readable image",
                path.display()
            )));
        }
        Ok(img)
    }

    fn image_size(&self, image: &Mat) -> ImageSize {
        ImageSize::new(image.cols().max(0) as u32, image.rows().max(0) as u32)
    }

    fn detect_pattern(
        &self,
        image: &Mat,
        pattern: PatternSize,
    ) -> Result<Option<Vec<Point2<f64>>>, ToolkitError> {
        let mut corners = Vector::<Point2f>::new();
        let found = calib3d::find_chessboard_corners(
            image,
            Size::new(pattern.columns as i32, pattern.rows as i32),
            &mut corners,
            calib3d::CALIB_CB_ADAPTIVE_THRESH
                + calib3d::CALIB_CB_NORMALIZE_IMAGE
                + calib3d::CALIB_CB_FILTER_QUADS,
        )?;
        if !found || corners.len() != pattern.corner_count() {
            return Ok(None);
        }
        Ok(Some(Self::from_cv_points(&corners)))
    }

    fn refine_subpixel(
        &self,
        image: &Mat,
        corners: Vec<Point2<f64>>,
    ) -> Result<Vec<Point2<f64>>, ToolkitError> {
        let mut cv_corners = Self::to_cv_points(&corners);
        let criteria = TermCriteria::new(
            opencv::core::TermCriteria_EPS + opencv::core::TermCriteria_COUNT,
            self.subpix_max_iter,
            self.subpix_epsilon,
        )?;
        imgproc::corner_sub_pix(
            image,
            &mut cv_corners,
            Size::new(self.subpix_window, self.subpix_window),
            Size::new(-1, -1),
            criteria,
        )
        .map_err(|e| ToolkitError::Refine(e.to_string()))?;
        Ok(Self::from_cv_points(&cv_corners))
    }

    fn solve_calibration(
        &self,
        object_points: &[Vec<Point3<f64>>],
        image_points: &[Vec<Point2<f64>>],
        image_size: ImageSize,
        flags: SolveFlags,
    ) -> Result<SolveOutput, ToolkitError> {
        if object_points.is_empty() || object_points.len() != image_points.len() {
            return Err(ToolkitError::InvalidInput(format!(
                "{} object point sets vs {} image point sets",
                object_points.len(),
                image_points.len()
            )));
        }

        let cv_object: Vector<Vector<Point3f>> = object_points
            .iter()
            .map(|view| {
                view.iter()
                    .map(|p| Point3f::new(p.x as f32, p.y as f32, p.z as f32))
                    .collect()
            })
            .collect();
        let cv_image: Vector<Vector<Point2f>> = image_points
            .iter()
            .map(|view| Self::to_cv_points(view))
            .collect();

        let mut camera_matrix = Mat::default();
        let mut dist_coeffs = Mat::default();
        let mut rvecs = Vector::<Mat>::new();
        let mut tvecs = Vector::<Mat>::new();
        let criteria = TermCriteria::new(
            opencv::core::TermCriteria_COUNT + opencv::core::TermCriteria_EPS,
            30,
            f64::EPSILON,
        )?;

        let rms = calib3d::calibrate_camera(
            &cv_object,
            &cv_image,
            Size::new(image_size.width as i32, image_size.height as i32),
            &mut camera_matrix,
            &mut dist_coeffs,
            &mut rvecs,
            &mut tvecs,
            Self::cv_flags(flags),
            criteria,
        )
        .map_err(|e| ToolkitError::Solve(e.to_string()))?;

        let mut k = Matrix3::zeros();
        for r in 0..3 {
            for c in 0..3 {
                k[(r, c)] = *camera_matrix.at_2d::<f64>(r as i32, c as i32)?;
            }
        }

        let distortion = (0..dist_coeffs.total())
            .map(|i| dist_coeffs.at::<f64>(i as i32).copied())
            .collect::<Result<Vec<_>, _>>()?;

        let poses = rvecs
            .iter()
            .zip(tvecs.iter())
            .map(|(r, t)| {
                Ok(ViewPose {
                    rotation: Self::read_vec3(&r)?,
                    translation: Self::read_vec3(&t)?,
                })
            })
            .collect::<Result<Vec<_>, ToolkitError>>()?;

        Ok(SolveOutput {
            rms_error: rms,
            camera_matrix: k,
            distortion,
            poses,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_to_calib3d_constants() {
        assert_eq!(OpenCvToolkit::cv_flags(SolveFlags::empty()), 0);
        assert_eq!(
            OpenCvToolkit::cv_flags(SolveFlags::RATIONAL_MODEL | SolveFlags::TILTED_MODEL),
            calib3d::CALIB_RATIONAL_MODEL | calib3d::CALIB_TILTED_MODEL
        );
        assert_eq!(
            SolveFlags::THIN_PRISM_MODEL.bits() as i32,
            calib3d::CALIB_THIN_PRISM_MODEL
        );
    }

    #[test]
    fn missing_file_is_decode_error() {
        let toolkit = OpenCvToolkit::new();
        let err = toolkit
            .load_image(Path::new("/definitely/not/here.png"))
            .unwrap_err();
        assert!(matches!(err, ToolkitError::Decode(_)), "{err}");
    }
}
