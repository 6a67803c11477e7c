//! Persisted calibration records.
mod report;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub use report::{
    BoardRecord, CalibrationReport, CameraRecord, DistortionRecord, IntrinsicsRecord,
    NamedCoefficients, ResultRecord, REPORT_SCHEMA_VERSION,
};

use crate::error::CalibError;
use crate::global_types::Timestamp;

/// Suffixes tried after the plain name is taken.
const MAX_NAME_ATTEMPTS: usize = 100;

/// `<dir>/camera_calibration_<unix seconds>.json`, with `_<attempt>` before
/// the extension for every attempt after the first.
pub fn output_path(result_dir: &Path, timestamp: Timestamp, attempt: usize) -> PathBuf {
    let name = match attempt {
        0 => format!("camera_calibration_{}.json", timestamp.as_secs()),
        n => format!("camera_calibration_{}_{n}.json", timestamp.as_secs()),
    };
    result_dir.join(name)
}

/// Save `report` under a name in `result_dir` that no earlier run used.
///
/// Runs finishing in the same second get numbered names instead of
/// overwriting each other.
pub fn persist_new(
    report: &CalibrationReport,
    result_dir: &Path,
    timestamp: Timestamp,
) -> Result<PathBuf, CalibError> {
    // a file in place of the directory also reports AlreadyExists
    fs::create_dir_all(result_dir).map_err(|source| CalibError::Io {
        path: result_dir.to_path_buf(),
        source,
    })?;
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let path = output_path(result_dir, timestamp, attempt);
        match report.persist(&path) {
            Ok(()) => return Ok(path),
            Err(CalibError::Io { source, .. }) if source.kind() == io::ErrorKind::AlreadyExists => {
                log::debug!("{} exists, trying the next name", path.display());
            }
            Err(e) => return Err(e),
        }
    }
    Err(CalibError::Io {
        path: output_path(result_dir, timestamp, MAX_NAME_ATTEMPTS),
        source: io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{MAX_NAME_ATTEMPTS} records already exist for this second"),
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path() {
        let t = Timestamp::from_secs(1700000000);
        let p = output_path(Path::new("result"), t, 0);
        assert_eq!(p, Path::new("result/camera_calibration_1700000000.json"));
        let p = output_path(Path::new("result"), t, 2);
        assert_eq!(p, Path::new("result/camera_calibration_1700000000_2.json"));
    }
}
