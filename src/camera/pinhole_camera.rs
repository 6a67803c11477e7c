use nalgebra::{Matrix3, Point2, Point3};
use serde::{Deserialize, Serialize};

/// Named view over a 3x3 intrinsic matrix.
///
/// fx, fy are focal lengths in pixels (not the lens focal length in mm);
/// cx, cy is the principal point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PinholeIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl PinholeIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    pub fn from_matrix(k: &Matrix3<f64>) -> Self {
        Self {
            fx: k[(0, 0)],
            fy: k[(1, 1)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
        }
    }

    pub fn to_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Project a camera-frame point without distortion.
    ///
    /// Returns `None` for points on or behind the image plane.
    pub fn project(&self, p: &Point3<f64>) -> Option<Point2<f64>> {
        if p.z <= 0.0 {
            return None;
        }
        Some(Point2::new(
            self.fx * p.x / p.z + self.cx,
            self.fy * p.y / p.z + self.cy,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_round_trip() {
        let k = PinholeIntrinsics::new(800.0, 810.0, 320.0, 240.0);
        let m = k.to_matrix();
        assert_eq!(m[(0, 1)], 0.0);
        assert_eq!(m[(2, 2)], 1.0);
        assert_eq!(PinholeIntrinsics::from_matrix(&m), k);
    }

    #[test]
    fn project_principal_ray() {
        let k = PinholeIntrinsics::new(800.0, 800.0, 320.0, 240.0);
        let p = k.project(&Point3::new(0.0, 0.0, 2.0)).unwrap();
        assert_eq!(p, Point2::new(320.0, 240.0));
        let q = k.project(&Point3::new(1.0, -1.0, 4.0)).unwrap();
        assert_eq!(q, Point2::new(520.0, 40.0));
        assert!(k.project(&Point3::new(0.0, 0.0, -1.0)).is_none());
    }
}
