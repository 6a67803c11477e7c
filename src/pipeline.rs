//! End-to-end calibration run.
//!
//! `Idle -> Scanning -> Collecting -> (Insufficient | Ready) -> Solving ->
//! (Failed | Solved) -> Persisted`. Progress is reported as [`PipelineEvent`]s;
//! the pipeline itself never prints.

use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};

use crate::camera::DistortionModel;
use crate::collector::{
    CalibrationImage, CollectionReport, CollectionStatus, CorrespondenceCollector,
    DetectionFailure,
};
use crate::config::CalibrationConfig;
use crate::dataset::{ImageDirectory, ImageSource};
use crate::error::CalibError;
use crate::quality::QualityClass;
use crate::save::{output_path, persist_new, CalibrationReport};
use crate::solver::{CalibrationResult, CalibrationSolver};
use crate::toolkit::VisionToolkit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Idle,
    Scanning,
    Collecting,
    Insufficient,
    Ready,
    Solving,
    Failed,
    Solved,
    Persisted,
}

impl PipelineStage {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineStage::Insufficient | PipelineStage::Failed | PipelineStage::Persisted
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StageChanged(PipelineStage),
    ImagesFound {
        directory: PathBuf,
        count: usize,
    },
    ImageProcessed {
        index: usize,
        total: usize,
        path: PathBuf,
        failure: Option<DetectionFailure>,
    },
    DistortionFallback {
        requested: usize,
        used: DistortionModel,
    },
    Solved {
        rms_error: f64,
        quality: QualityClass,
        image_count: usize,
    },
    Persisted {
        path: PathBuf,
    },
    PersistFailed {
        path: PathBuf,
        message: String,
    },
}

/// Receives pipeline events in order. Any `FnMut(PipelineEvent)` works.
pub trait PipelineObserver {
    fn on_event(&mut self, event: PipelineEvent);
}

impl<F: FnMut(PipelineEvent)> PipelineObserver for F {
    fn on_event(&mut self, event: PipelineEvent) {
        self(event)
    }
}

/// A solved run. A failed save is reported here, not as an error, so the
/// result is never lost.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub result: CalibrationResult,
    pub quality: QualityClass,
    pub collection: CollectionReport,
    pub saved_to: Option<PathBuf>,
    pub persist_error: Option<CalibError>,
    pub stage: PipelineStage,
}

pub struct CalibrationPipeline<T: VisionToolkit> {
    config: CalibrationConfig,
    toolkit: T,
}

impl<T: VisionToolkit> CalibrationPipeline<T> {
    pub fn new(config: CalibrationConfig, toolkit: T) -> Self {
        Self { config, toolkit }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Calibrate from every image in `image_dir`.
    pub fn run<O: PipelineObserver + ?Sized>(
        &self,
        image_dir: &Path,
        observer: &mut O,
    ) -> Result<PipelineOutcome, CalibError> {
        let mut stage = Stage::new(observer);
        stage.enter(PipelineStage::Idle);
        self.config.validate().inspect_err(|_| {
            stage.enter(PipelineStage::Failed);
        })?;

        stage.enter(PipelineStage::Scanning);
        let directory = ImageDirectory::scan(image_dir).inspect_err(|_| {
            stage.enter(PipelineStage::Failed);
        })?;
        stage.emit(PipelineEvent::ImagesFound {
            directory: image_dir.to_path_buf(),
            count: directory.len(),
        });
        if directory.len() < self.config.min_images() {
            log::warn!(
                "only {} candidate images, at least {} detections are needed",
                directory.len(),
                self.config.min_images()
            );
        }

        self.calibrate(directory.image_paths(), stage)
    }

    fn calibrate<O: PipelineObserver + ?Sized>(
        &self,
        paths: &[PathBuf],
        mut stage: Stage<'_, O>,
    ) -> Result<PipelineOutcome, CalibError> {
        stage.enter(PipelineStage::Collecting);
        let collector =
            CorrespondenceCollector::new(&self.toolkit, self.config.board, self.config.min_images());
        let total = paths.len();
        let (set, collection) = collector.collect(paths, |index, image: &CalibrationImage| {
            stage.emit(PipelineEvent::ImageProcessed {
                index,
                total,
                path: image.path.clone(),
                failure: image.failure().cloned(),
            });
        });

        if let CollectionStatus::Insufficient { detected, required } = collection.status() {
            if !self.config.calibration.allow_insufficient || set.is_empty() {
                stage.enter(PipelineStage::Insufficient);
                return Err(CalibError::Insufficient {
                    detected,
                    scanned: collection.scanned(),
                    required,
                });
            }
            log::warn!("solving with {detected} views, below the floor of {required}");
        }
        stage.enter(PipelineStage::Ready);

        let requested = self.config.calibration.distortion_coeffs;
        let model = DistortionModel::select(requested);
        if model.coeff_count() != requested {
            stage.emit(PipelineEvent::DistortionFallback {
                requested,
                used: model,
            });
        }

        stage.enter(PipelineStage::Solving);
        let result = CalibrationSolver::solve(&self.toolkit, &set, model).inspect_err(|_| {
            stage.enter(PipelineStage::Failed);
        })?;
        let quality = QualityClass::assess(
            result.rms_reprojection_error,
            self.config.error_threshold_px(),
        );
        stage.enter(PipelineStage::Solved);
        stage.emit(PipelineEvent::Solved {
            rms_error: result.rms_reprojection_error,
            quality,
            image_count: result.image_count,
        });
        log::info!(
            "calibrated from {} views: RMS {:.4} px, {quality}",
            result.image_count,
            result.rms_reprojection_error
        );

        let result_dir = &self.config.output.result_dir;
        let report = CalibrationReport::assemble(&result, &self.config);
        let (saved_to, persist_error) = match persist_new(&report, result_dir, result.timestamp) {
            Ok(path) => {
                stage.emit(PipelineEvent::Persisted { path: path.clone() });
                stage.enter(PipelineStage::Persisted);
                (Some(path), None)
            }
            Err(e) => {
                log::error!("{e}");
                stage.emit(PipelineEvent::PersistFailed {
                    path: output_path(result_dir, result.timestamp, 0),
                    message: e.to_string(),
                });
                (None, Some(e))
            }
        };

        Ok(PipelineOutcome {
            result,
            quality,
            collection,
            saved_to,
            persist_error,
            stage: stage.current,
        })
    }
}

impl<T: VisionToolkit + Send + 'static> CalibrationPipeline<T> {
    /// Run on a worker thread, forwarding events to `events`.
    ///
    /// There is no cancellation; drop the handle and receiver to abandon the
    /// run.
    pub fn spawn(
        self,
        image_dir: PathBuf,
        events: Sender<PipelineEvent>,
    ) -> JoinHandle<Result<PipelineOutcome, CalibError>> {
        thread::spawn(move || {
            let mut forward = move |event: PipelineEvent| {
                // receiver gone means nobody is listening any more
                let _ = events.send(event);
            };
            self.run(&image_dir, &mut forward)
        })
    }
}

/// Current stage plus the observer it is announced to.
struct Stage<'o, O: PipelineObserver + ?Sized> {
    current: PipelineStage,
    observer: &'o mut O,
}

impl<'o, O: PipelineObserver + ?Sized> Stage<'o, O> {
    fn new(observer: &'o mut O) -> Self {
        Self {
            current: PipelineStage::Idle,
            observer,
        }
    }

    fn enter(&mut self, next: PipelineStage) {
        log::debug!("pipeline {:?} -> {:?}", self.current, next);
        self.current = next;
        self.observer.on_event(PipelineEvent::StageChanged(next));
    }

    fn emit(&mut self, event: PipelineEvent) {
        self.observer.on_event(event);
    }
}
