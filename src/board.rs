//! Calibration board geometry and the canonical 3D corner template.
//!
//! The template is laid out row-major over a `corners_x`-wide grid: index `i`
//! maps to `(i % corners_x, i / corners_x, 0) * square_size_mm`. Detected
//! corners must come back from the toolkit in the same order, otherwise every
//! correspondence is silently wrong.

use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Smallest inner-corner count accepted along either board axis.
pub const MIN_CORNERS_PER_AXIS: u32 = 3;

/// Physical layout of a checkerboard: inner corner counts and square size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoardGeometry {
    pub corners_x: u32,
    pub corners_y: u32,
    pub square_size_mm: f64,
}

impl BoardGeometry {
    /// Build a geometry, checking the corner-count and square-size invariants.
    pub fn new(corners_x: u32, corners_y: u32, square_size_mm: f64) -> Result<Self, ConfigError> {
        let geometry = Self {
            corners_x,
            corners_y,
            square_size_mm,
        };
        geometry.validate()?;
        Ok(geometry)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.corners_x < MIN_CORNERS_PER_AXIS || self.corners_y < MIN_CORNERS_PER_AXIS {
            return Err(ConfigError::Invalid(format!(
                "board inner corners must be at least {min}x{min}, got {}x{} \
                 (count inner corners, not squares)",
                self.corners_x,
                self.corners_y,
                min = MIN_CORNERS_PER_AXIS
            )));
        }
        if !(self.square_size_mm.is_finite() && self.square_size_mm > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "board square size must be a positive length in mm, got {}",
                self.square_size_mm
            )));
        }
        Ok(())
    }

    /// Number of inner corners on the board.
    pub fn corner_count(&self) -> usize {
        self.corners_x as usize * self.corners_y as usize
    }

    /// Pattern size as the toolkit expects it.
    pub fn pattern_size(&self) -> PatternSize {
        PatternSize {
            columns: self.corners_x,
            rows: self.corners_y,
        }
    }
}

/// Inner-corner grid dimensions handed to pattern detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternSize {
    pub columns: u32,
    pub rows: u32,
}

impl PatternSize {
    pub fn corner_count(&self) -> usize {
        self.columns as usize * self.rows as usize
    }
}

/// Ordered board-frame corner coordinates (z = 0), one per inner corner.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectTemplate {
    points: Vec<Point3<f64>>,
}

impl ObjectTemplate {
    /// Lay out the corners of `geometry` in row-major order.
    ///
    /// The geometry is assumed validated; this never fails.
    pub fn build(geometry: &BoardGeometry) -> Self {
        let cols = geometry.corners_x as usize;
        let s = geometry.square_size_mm;
        let points = (0..geometry.corner_count())
            .map(|i| Point3::new((i % cols) as f64 * s, (i / cols) as f64 * s, 0.0))
            .collect();
        Self { points }
    }

    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn to_vec(&self) -> Vec<Point3<f64>> {
        self.points.clone()
    }
}

/// Handedness of a detected corner grid in the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winding {
    Clockwise,
    CounterClockwise,
}

/// Handedness of the grid spanned by the first row step and the first column
/// step of `corners` (row-major, `corners_x` per row).
///
/// Returns `None` when the grid is too small or the two steps are collinear.
/// Image y points down, so a board seen front-on with rows left-to-right and
/// columns top-to-bottom is `Clockwise`.
pub fn grid_winding(corners: &[Point2<f64>], corners_x: usize) -> Option<Winding> {
    if corners_x < 2 || corners.len() <= corners_x {
        return None;
    }
    let origin = corners[0];
    let along_row = corners[1] - origin;
    let along_col = corners[corners_x] - origin;
    let cross = along_row.x * along_col.y - along_row.y * along_col.x;
    if cross.abs() <= f64::EPSILON {
        None
    } else if cross > 0.0 {
        Some(Winding::Clockwise)
    } else {
        Some(Winding::CounterClockwise)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(x: u32, y: u32, s: f64) -> BoardGeometry {
        BoardGeometry::new(x, y, s).unwrap()
    }

    #[test]
    fn template_has_one_planar_point_per_corner() {
        let g = geometry(9, 6, 25.0);
        let template = ObjectTemplate::build(&g);
        assert_eq!(template.len(), 54);
        assert!(template.points().iter().all(|p| p.z == 0.0));
    }

    #[test]
    fn template_is_row_major_and_scaled() {
        let g = geometry(9, 6, 25.0);
        let template = ObjectTemplate::build(&g);
        for (i, p) in template.points().iter().enumerate() {
            assert_eq!(p.x, (i % 9) as f64 * 25.0);
            assert_eq!(p.y, (i / 9) as f64 * 25.0);
        }
        // second row starts back at x = 0
        assert_eq!(template.points()[9], Point3::new(0.0, 25.0, 0.0));
        assert_eq!(template.points()[53], Point3::new(200.0, 125.0, 0.0));
    }

    #[test]
    fn template_is_deterministic() {
        let g = geometry(7, 5, 12.5);
        let a = ObjectTemplate::build(&g);
        let b = ObjectTemplate::build(&g);
        let bits = |t: &ObjectTemplate| {
            t.points()
                .iter()
                .flat_map(|p| [p.x.to_bits(), p.y.to_bits(), p.z.to_bits()])
                .collect::<Vec<_>>()
        };
        assert_eq!(bits(&a), bits(&b));
    }

    #[test]
    fn geometry_rejects_small_boards_and_bad_squares() {
        assert!(BoardGeometry::new(2, 6, 25.0).is_err());
        assert!(BoardGeometry::new(9, 2, 25.0).is_err());
        assert!(BoardGeometry::new(9, 6, 0.0).is_err());
        assert!(BoardGeometry::new(9, 6, -1.0).is_err());
        assert!(BoardGeometry::new(9, 6, f64::NAN).is_err());
        assert!(BoardGeometry::new(3, 3, 0.1).is_ok());
    }

    #[test]
    fn winding_flips_for_mirrored_grid() {
        let g = geometry(4, 3, 1.0);
        let template = ObjectTemplate::build(&g);
        let front: Vec<_> = template
            .points()
            .iter()
            .map(|p| Point2::new(100.0 + 10.0 * p.x, 50.0 + 10.0 * p.y))
            .collect();
        let mirrored: Vec<_> = front.iter().map(|p| Point2::new(-p.x, p.y)).collect();
        // rotating by 180 degrees keeps handedness
        let rotated: Vec<_> = front.iter().map(|p| Point2::new(-p.x, -p.y)).collect();

        assert_eq!(grid_winding(&front, 4), Some(Winding::Clockwise));
        assert_eq!(grid_winding(&mirrored, 4), Some(Winding::CounterClockwise));
        assert_eq!(grid_winding(&rotated, 4), Some(Winding::Clockwise));
    }

    #[test]
    fn winding_needs_two_rows() {
        let pts = vec![Point2::new(0.0, 0.0), Point2::new(1.0, 0.0)];
        assert_eq!(grid_winding(&pts, 2), None);
    }
}
