use std::fs;
use std::path::Path;

use approx::assert_abs_diff_eq;
use camera_calib::global_types::ImageSize;
use camera_calib::toolkit::synthetic::{SyntheticToolkit, SyntheticView};
use camera_calib::{
    BoardGeometry, CalibError, CalibrationConfig, CalibrationPipeline, CalibrationReport,
    PipelineEvent, PipelineStage, QualityClass,
};

const BOARDS: usize = 10;

/// 9x6 board, 25 mm squares, floor of 5, threshold 1 px.
fn config(result_dir: &Path) -> CalibrationConfig {
    let mut cfg = CalibrationConfig::new(BoardGeometry::new(9, 6, 25.0).unwrap(), 1.0);
    cfg.calibration.min_images = 5;
    cfg.output.result_dir = result_dir.to_path_buf();
    cfg
}

/// Twelve files on disk: ten boards, one blank frame, one unreadable file.
fn twelve_images(dir: &Path, rms: f64) -> SyntheticToolkit {
    let mut tk = SyntheticToolkit::new(ImageSize::new(1280, 720)).with_rms(rms);
    for i in 0..BOARDS {
        let name = format!("board_{i:02}.jpg");
        fs::write(dir.join(&name), b"").unwrap();
        tk = tk.with_view(name, SyntheticView::board());
    }
    fs::write(dir.join("blank.png"), b"").unwrap();
    fs::write(dir.join("broken.PNG"), b"").unwrap();
    fs::write(dir.join("notes.txt"), b"").unwrap();
    tk.with_view("blank.png", SyntheticView::Blank)
        .with_view("broken.PNG", SyntheticView::Corrupt)
}

#[test]
fn twelve_images_ten_boards() {
    for (rms, quality) in [
        (0.42, QualityClass::Excellent),
        (0.8, QualityClass::Acceptable),
        (1.5, QualityClass::Warning),
    ] {
        let images = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let tk = twelve_images(images.path(), rms);

        let mut stages = Vec::new();
        let outcome = CalibrationPipeline::new(config(out.path()), tk)
            .run(images.path(), &mut |e: PipelineEvent| {
                if let PipelineEvent::StageChanged(s) = e {
                    stages.push(s);
                }
            })
            .unwrap();

        assert!(stages.contains(&PipelineStage::Solved));
        assert_eq!(outcome.stage, PipelineStage::Persisted);
        assert_eq!(outcome.collection.scanned(), 12);
        assert_eq!(outcome.collection.detected(), BOARDS);
        assert_eq!(outcome.result.image_count, BOARDS);
        assert_eq!(outcome.quality, quality, "rms {rms}");

        let saved = outcome.saved_to.unwrap();
        let name = saved.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("camera_calibration_") && name.ends_with(".json"));

        let report = CalibrationReport::load(&saved).unwrap();
        assert_eq!(report.image_count, BOARDS);
        assert_eq!(report.result.quality, quality);
        assert_abs_diff_eq!(report.result.intrinsics.fx, outcome.result.fx(), epsilon = 1e-6);
        assert_abs_diff_eq!(report.result.intrinsics.fy, outcome.result.fy(), epsilon = 1e-6);
        assert_abs_diff_eq!(report.result.intrinsics.cx, outcome.result.cx(), epsilon = 1e-6);
        assert_abs_diff_eq!(report.result.intrinsics.cy, outcome.result.cy(), epsilon = 1e-6);
        assert_eq!(report.result.distortion.coefficients.len(), 5);
    }
}

#[test]
fn empty_directory_is_insufficient() {
    let images = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let tk = SyntheticToolkit::new(ImageSize::new(640, 480));

    let mut last = None;
    let err = CalibrationPipeline::new(config(out.path()), tk)
        .run(images.path(), &mut |e: PipelineEvent| {
            if let PipelineEvent::StageChanged(s) = e {
                last = Some(s);
            }
        })
        .unwrap_err();
    assert!(matches!(
        err,
        CalibError::Insufficient {
            detected: 0,
            scanned: 0,
            required: 5
        }
    ));
    assert_eq!(last, Some(PipelineStage::Insufficient));
    assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
}

#[test]
fn solver_failure_is_reported() {
    let images = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let tk = twelve_images(images.path(), 0.3).with_solve_failure("ill-conditioned views");

    let mut last = None;
    let err = CalibrationPipeline::new(config(out.path()), tk)
        .run(images.path(), &mut |e: PipelineEvent| {
            if let PipelineEvent::StageChanged(s) = e {
                last = Some(s);
            }
        })
        .unwrap_err();
    assert!(matches!(err, CalibError::CalibrationFailed { views: BOARDS, .. }));
    assert!(err.to_string().contains("ill-conditioned views"));
    assert_eq!(last, Some(PipelineStage::Failed));
}

#[test]
fn config_file_drives_the_run() {
    let images = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let cfg_path = out.path().join("calibration.toml");
    let result_dir = out.path().join("result");
    fs::write(
        &cfg_path,
        format!(
            r#"
[camera]
focal_length_mm = 6.0

[board]
corners_x = 9
corners_y = 6
square_size_mm = 25.0

[calibration]
error_threshold_px = 1.0
distortion_coeffs = 8

[output]
save_full_matrix = false
result_dir = "{}"
"#,
            result_dir.display()
        ),
    )
    .unwrap();

    let cfg = CalibrationConfig::load(&cfg_path).unwrap();
    let tk = twelve_images(images.path(), 0.42);
    let outcome = CalibrationPipeline::new(cfg, tk)
        .run(images.path(), &mut |_: PipelineEvent| {})
        .unwrap();

    let saved = outcome.saved_to.unwrap();
    assert!(saved.starts_with(&result_dir));
    let report = CalibrationReport::load(&saved).unwrap();
    assert_eq!(report.camera.focal_length_mm, Some(6.0));
    assert_eq!(report.result.distortion_coeff_count, 8);
    assert!(report.result.intrinsics.matrix.is_none());
    assert_eq!(report.result.distortion.full_array.map(|a| a.len()), Some(8));
}
