use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::board::BoardGeometry;
use crate::camera::DistortionModel;
use crate::config::CalibrationConfig;
use crate::error::CalibError;
use crate::global_types::{ImageSize, Timestamp};
use crate::quality::QualityClass;
use crate::solver::CalibrationResult;

/// Bumped when a field changes meaning or disappears.
pub const REPORT_SCHEMA_VERSION: u32 = 1;

const PIXEL_FOCAL_NOTE: &str = "fx and fy are focal lengths in pixels, not the lens focal length";

/// Coefficient key to value, in solver output order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedCoefficients(pub Vec<(String, f64)>);

impl NamedCoefficients {
    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for NamedCoefficients {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for NamedCoefficients {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = NamedCoefficients;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of coefficient names to numbers")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, f64>()? {
                    entries.push((key, value));
                }
                Ok(NamedCoefficients(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraRecord {
    pub focal_length_mm: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardRecord {
    pub corners_x: u32,
    pub corners_y: u32,
    pub square_size_mm: f64,
}

impl From<BoardGeometry> for BoardRecord {
    fn from(g: BoardGeometry) -> Self {
        Self {
            corners_x: g.corners_x,
            corners_y: g.corners_y,
            square_size_mm: g.square_size_mm,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntrinsicsRecord {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    #[serde(default)]
    pub note: String,
    /// Row-major 3x3.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<[[f64; 3]; 3]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistortionRecord {
    pub model: DistortionModel,
    pub coefficients: NamedCoefficients,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_array: Option<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub rms_reprojection_error_px: f64,
    pub distortion_coeff_count: usize,
    pub quality: QualityClass,
    pub image_size: ImageSize,
    pub intrinsics: IntrinsicsRecord,
    pub distortion: DistortionRecord,
}

/// The JSON document written after a successful solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub schema_version: u32,
    pub timestamp: Timestamp,
    pub camera: CameraRecord,
    pub board: BoardRecord,
    pub result: ResultRecord,
    pub image_count: usize,
}

impl CalibrationReport {
    pub fn assemble(result: &CalibrationResult, config: &CalibrationConfig) -> Self {
        let k = &result.intrinsic_matrix;
        let matrix = config.output.save_full_matrix.then(|| {
            [
                [k[(0, 0)], k[(0, 1)], k[(0, 2)]],
                [k[(1, 0)], k[(1, 1)], k[(1, 2)]],
                [k[(2, 0)], k[(2, 1)], k[(2, 2)]],
            ]
        });
        let coefficients = NamedCoefficients(
            result
                .model
                .name_coefficients(&result.distortion_coefficients)
                .map(|(name, value)| (name.key.to_string(), value))
                .collect(),
        );

        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            timestamp: result.timestamp,
            camera: CameraRecord {
                focal_length_mm: config.camera.focal_length_mm,
            },
            board: config.board.into(),
            result: ResultRecord {
                rms_reprojection_error_px: result.rms_reprojection_error,
                distortion_coeff_count: result.model.coeff_count(),
                quality: QualityClass::assess(
                    result.rms_reprojection_error,
                    config.error_threshold_px(),
                ),
                image_size: result.image_size,
                intrinsics: IntrinsicsRecord {
                    fx: result.fx(),
                    fy: result.fy(),
                    cx: result.cx(),
                    cy: result.cy(),
                    note: PIXEL_FOCAL_NOTE.to_string(),
                    matrix,
                },
                distortion: DistortionRecord {
                    model: result.model,
                    coefficients,
                    full_array: config
                        .output
                        .save_full_distortion
                        .then(|| result.distortion_coefficients.clone()),
                },
            },
            image_count: result.image_count,
        }
    }

    /// Write pretty JSON to a new file at `path`, creating parent
    /// directories. An existing file is never overwritten; that case is an
    /// `Io` error of kind `AlreadyExists`.
    pub fn persist(&self, path: &Path) -> Result<(), CalibError> {
        let io_err = |source| CalibError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(io_err)?;
        file.write_all(json.as_bytes()).map_err(io_err)?;
        log::info!("calibration record saved to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, CalibError> {
        let raw = fs::read_to_string(path).map_err(|source| CalibError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}
