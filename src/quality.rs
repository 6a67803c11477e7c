//! Quality verdict and human-readable summary of a calibration result.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::solver::CalibrationResult;

/// RMS below which a result is excellent regardless of the threshold.
pub const EXCELLENT_RMS_PX: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityClass {
    Excellent,
    Acceptable,
    Warning,
}

impl QualityClass {
    /// Classify an RMS reprojection error against the configured threshold.
    ///
    /// Exceeding the threshold always wins, so a threshold below 0.5 px can
    /// turn a sub-0.5 px result into a warning.
    pub fn assess(rms_px: f64, threshold_px: f64) -> Self {
        if rms_px > threshold_px {
            QualityClass::Warning
        } else if rms_px < EXCELLENT_RMS_PX {
            QualityClass::Excellent
        } else {
            QualityClass::Acceptable
        }
    }

    pub fn advice(&self) -> &'static str {
        match self {
            QualityClass::Excellent => "reprojection error is very small, calibration looks good",
            QualityClass::Acceptable => "reprojection error is within the acceptable range",
            QualityClass::Warning => {
                "reprojection error is large; check the board print quality or add more images"
            }
        }
    }
}

impl fmt::Display for QualityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QualityClass::Excellent => "excellent",
            QualityClass::Acceptable => "acceptable",
            QualityClass::Warning => "warning",
        };
        f.write_str(s)
    }
}

/// Console rendering of a result: counts, RMS and verdict, intrinsics, the
/// full matrix, named coefficients and the raw coefficient array.
pub struct CalibrationSummary<'a> {
    pub result: &'a CalibrationResult,
    pub quality: QualityClass,
}

impl<'a> CalibrationSummary<'a> {
    pub fn new(result: &'a CalibrationResult, threshold_px: f64) -> Self {
        Self {
            result,
            quality: QualityClass::assess(result.rms_reprojection_error, threshold_px),
        }
    }
}

impl fmt::Display for CalibrationSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = self.result;
        let rule = "=".repeat(60);
        writeln!(f, "{rule}")?;
        writeln!(f, "Camera intrinsic calibration")?;
        writeln!(f, "{rule}")?;
        writeln!(f, "images used:        {}", r.image_count)?;
        writeln!(f, "image size:         {}", r.image_size)?;
        writeln!(f, "distortion model:   {}", r.model)?;
        writeln!(f, "RMS reprojection:   {:.4} px", r.rms_reprojection_error)?;
        writeln!(f, "quality:            {} ({})", self.quality, self.quality.advice())?;

        writeln!(f)?;
        writeln!(f, "intrinsics:")?;
        writeln!(f, "  fx (focal length x, px): {:.2}", r.fx())?;
        writeln!(f, "  fy (focal length y, px): {:.2}", r.fy())?;
        writeln!(f, "  cx (principal point x):  {:.2}", r.cx())?;
        writeln!(f, "  cy (principal point y):  {:.2}", r.cy())?;

        writeln!(f)?;
        writeln!(f, "intrinsic matrix:")?;
        for row in r.intrinsic_matrix.row_iter() {
            writeln!(f, "  [{:>12.4} {:>12.4} {:>12.4}]", row[0], row[1], row[2])?;
        }

        writeln!(f)?;
        writeln!(
            f,
            "distortion coefficients ({} of {}):",
            r.distortion_coefficients.len().min(r.model.coeff_count()),
            r.model.coeff_count()
        )?;
        for (name, value) in r.model.name_coefficients(&r.distortion_coefficients) {
            writeln!(f, "  {:<6} {:<22} {value:>12.6}", name.symbol, name.meaning)?;
        }

        writeln!(f)?;
        let raw: Vec<String> = r
            .distortion_coefficients
            .iter()
            .map(|v| format!("{v:.6}"))
            .collect();
        write!(f, "raw coefficients: [{}]", raw.join(", "))
    }
}
