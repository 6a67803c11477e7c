//! Camera intrinsic calibration from photographs of a planar checkerboard.
//!
//! The crate orchestrates the run: find images, detect the board in each,
//! pick a distortion model, hand the correspondences to a [`VisionToolkit`]
//! for the solve, then judge and persist the result. Detection and the solve
//! itself live behind the toolkit trait; [`toolkit::opencv`] (feature
//! `opencv`) is the production backend.
//!
//! opencv
//! https://docs.rs/opencv/latest/opencv/all.html
//!
//! nalgebra
//! https://docs.rs/nalgebra/latest/nalgebra/

pub mod board;
pub mod camera;
pub mod collector;
pub mod config;
pub mod dataset;
pub mod error;
pub mod global_types;
pub mod pipeline;
pub mod quality;
pub mod save;
pub mod solver;
pub mod toolkit;

pub use board::{BoardGeometry, ObjectTemplate};
pub use camera::{DistortionModel, PinholeIntrinsics};
pub use collector::{CollectionReport, CollectionStatus, CorrespondenceCollector, CorrespondenceSet};
pub use config::CalibrationConfig;
pub use error::CalibError;
pub use pipeline::{CalibrationPipeline, PipelineEvent, PipelineObserver, PipelineOutcome, PipelineStage};
pub use quality::{CalibrationSummary, QualityClass};
pub use save::CalibrationReport;
pub use solver::{CalibrationResult, CalibrationSolver};
pub use toolkit::VisionToolkit;
