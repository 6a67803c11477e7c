//! Per-image pattern detection and correspondence bookkeeping.

#[cfg(feature = "rayon")]
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
#[cfg(feature = "rayon")]
use std::sync::mpsc;
#[cfg(feature = "rayon")]
use std::thread;

use nalgebra::{Point2, Point3};
#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::board::{grid_winding, BoardGeometry, ObjectTemplate, Winding};
use crate::global_types::ImageSize;
use crate::toolkit::VisionToolkit;

/// Why one image did not contribute a view. Never fatal to the run.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DetectionFailure {
    #[error("decode failed: {0}")]
    DecodeFailed(String),
    #[error("pattern not found")]
    PatternNotFound,
    #[error("pattern detection failed: {0}")]
    DetectorError(String),
    #[error("sub-pixel refinement failed: {0}")]
    RefineFailed(String),
    #[error("expected {expected} corners, detector returned {found}")]
    CornerCountMismatch { expected: usize, found: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    /// Refined corners, row-major, one per template point.
    Detected(Vec<Point2<f64>>),
    NotDetected(DetectionFailure),
}

/// Outcome of inspecting one discovered file.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationImage {
    pub path: PathBuf,
    /// `None` when the file could not be decoded.
    pub pixel_dimensions: Option<ImageSize>,
    pub detection: Detection,
}

impl CalibrationImage {
    pub fn is_detected(&self) -> bool {
        matches!(self.detection, Detection::Detected(_))
    }

    pub fn failure(&self) -> Option<&DetectionFailure> {
        match &self.detection {
            Detection::NotDetected(failure) => Some(failure),
            Detection::Detected(_) => None,
        }
    }
}

/// What the report keeps of an image once its corners moved into the set.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub path: PathBuf,
    pub pixel_dimensions: Option<ImageSize>,
    pub failure: Option<DetectionFailure>,
    pub winding: Option<Winding>,
}

impl ImageRecord {
    pub fn is_detected(&self) -> bool {
        self.failure.is_none()
    }
}

/// Index-aligned object and image point sets, one entry per detected view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrespondenceSet {
    object_points: Vec<Vec<Point3<f64>>>,
    image_points: Vec<Vec<Point2<f64>>>,
    sources: Vec<PathBuf>,
    image_size: Option<ImageSize>,
}

impl CorrespondenceSet {
    fn push(&mut self, template: &ObjectTemplate, corners: Vec<Point2<f64>>, source: PathBuf) {
        self.object_points.push(template.to_vec());
        self.image_points.push(corners);
        self.sources.push(source);
    }

    pub fn len(&self) -> usize {
        self.image_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_points.is_empty()
    }

    pub fn object_points(&self) -> &[Vec<Point3<f64>>] {
        &self.object_points
    }

    pub fn image_points(&self) -> &[Vec<Point2<f64>>] {
        &self.image_points
    }

    /// File each view came from.
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Dimensions of the first detected image.
    pub fn image_size(&self) -> Option<ImageSize> {
        self.image_size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionStatus {
    Ready,
    Insufficient { detected: usize, required: usize },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionReport {
    /// One record per scanned path, in scan order.
    pub records: Vec<ImageRecord>,
    pub min_images: usize,
    /// Detected views whose grid handedness differs from the first view.
    pub inconsistent_orientation: Vec<PathBuf>,
    /// Detected views whose size differs from the first view.
    pub mismatched_size: Vec<PathBuf>,
}

impl CollectionReport {
    pub fn scanned(&self) -> usize {
        self.records.len()
    }

    pub fn detected(&self) -> usize {
        self.records.iter().filter(|r| r.is_detected()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &ImageRecord> {
        self.records.iter().filter(|r| !r.is_detected())
    }

    pub fn status(&self) -> CollectionStatus {
        let detected = self.detected();
        if detected < self.min_images {
            CollectionStatus::Insufficient {
                detected,
                required: self.min_images,
            }
        } else {
            CollectionStatus::Ready
        }
    }
}

pub struct CorrespondenceCollector<'a, T: VisionToolkit> {
    toolkit: &'a T,
    geometry: BoardGeometry,
    template: ObjectTemplate,
    min_images: usize,
}

impl<'a, T: VisionToolkit> CorrespondenceCollector<'a, T> {
    pub fn new(toolkit: &'a T, geometry: BoardGeometry, min_images: usize) -> Self {
        Self {
            toolkit,
            template: ObjectTemplate::build(&geometry),
            geometry,
            min_images,
        }
    }

    pub fn template(&self) -> &ObjectTemplate {
        &self.template
    }

    /// Decode, detect and refine one image.
    pub fn inspect(&self, path: &Path) -> CalibrationImage {
        let image = match self.toolkit.load_image(path) {
            Ok(image) => image,
            Err(e) => {
                return CalibrationImage {
                    path: path.to_path_buf(),
                    pixel_dimensions: None,
                    detection: Detection::NotDetected(DetectionFailure::DecodeFailed(
                        e.to_string(),
                    )),
                }
            }
        };
        let detection = match self.detect(&image) {
            Ok(corners) => Detection::Detected(corners),
            Err(failure) => Detection::NotDetected(failure),
        };
        CalibrationImage {
            path: path.to_path_buf(),
            pixel_dimensions: Some(self.toolkit.image_size(&image)),
            detection,
        }
    }

    fn detect(&self, image: &T::Image) -> Result<Vec<Point2<f64>>, DetectionFailure> {
        let corners = self
            .toolkit
            .detect_pattern(image, self.geometry.pattern_size())
            .map_err(|e| DetectionFailure::DetectorError(e.to_string()))?
            .ok_or(DetectionFailure::PatternNotFound)?;
        if corners.len() != self.template.len() {
            return Err(DetectionFailure::CornerCountMismatch {
                expected: self.template.len(),
                found: corners.len(),
            });
        }
        let refined = self
            .toolkit
            .refine_subpixel(image, corners)
            .map_err(|e| DetectionFailure::RefineFailed(e.to_string()))?;
        if refined.len() != self.template.len() {
            return Err(DetectionFailure::CornerCountMismatch {
                expected: self.template.len(),
                found: refined.len(),
            });
        }
        Ok(refined)
    }

    /// Inspect paths one at a time, handing each result over before the
    /// next image is decoded.
    #[cfg(not(feature = "rayon"))]
    fn inspect_each<F>(&self, paths: &[PathBuf], mut each: F)
    where
        F: FnMut(usize, CalibrationImage),
    {
        for (index, path) in paths.iter().enumerate() {
            each(index, self.inspect(path));
        }
    }

    /// Inspect paths on the rayon pool. Results are handed over in scan
    /// order as soon as every earlier image has finished.
    #[cfg(feature = "rayon")]
    fn inspect_each<F>(&self, paths: &[PathBuf], mut each: F)
    where
        F: FnMut(usize, CalibrationImage),
    {
        let (tx, rx) = mpsc::channel();
        thread::scope(|scope| {
            scope.spawn(move || {
                paths
                    .par_iter()
                    .enumerate()
                    .for_each_with(tx, |tx, (index, path)| {
                        // receiver outlives the scope
                        let _ = tx.send((index, self.inspect(path)));
                    });
            });

            let mut pending = BTreeMap::new();
            let mut next = 0;
            for (index, image) in rx {
                pending.insert(index, image);
                while let Some(image) = pending.remove(&next) {
                    each(next, image);
                    next += 1;
                }
            }
        });
    }

    /// Inspect every path and gather the detected views.
    ///
    /// `on_image` sees each image in scan order as soon as its detection is
    /// done. Failed images are recorded and skipped; the returned set holds
    /// the successful views even when the report's status is `Insufficient`.
    pub fn collect<F>(
        &self,
        paths: &[PathBuf],
        mut on_image: F,
    ) -> (CorrespondenceSet, CollectionReport)
    where
        F: FnMut(usize, &CalibrationImage),
    {
        log::info!(
            "detecting {}x{} pattern in {} images",
            self.geometry.corners_x,
            self.geometry.corners_y,
            paths.len()
        );

        let mut merge = Merge {
            set: CorrespondenceSet::default(),
            report: CollectionReport {
                min_images: self.min_images,
                ..Default::default()
            },
            reference_winding: None,
        };
        self.inspect_each(paths, |index, image| {
            on_image(index, &image);
            merge.absorb(image, &self.template, self.geometry.corners_x as usize);
        });

        let Merge { set, report, .. } = merge;
        log::info!(
            "pattern found in {} of {} images",
            report.detected(),
            report.scanned()
        );
        (set, report)
    }
}

/// Running state of one `collect` call.
struct Merge {
    set: CorrespondenceSet,
    report: CollectionReport,
    reference_winding: Option<Winding>,
}

impl Merge {
    fn absorb(&mut self, image: CalibrationImage, template: &ObjectTemplate, corners_x: usize) {
        let CalibrationImage {
            path,
            pixel_dimensions,
            detection,
        } = image;

        let corners = match detection {
            Detection::Detected(corners) => corners,
            Detection::NotDetected(failure) => {
                log::warn!("{}: {failure}", path.display());
                self.report.records.push(ImageRecord {
                    path,
                    pixel_dimensions,
                    failure: Some(failure),
                    winding: None,
                });
                return;
            }
        };
        log::debug!("{}: pattern found", path.display());

        let winding = grid_winding(&corners, corners_x);
        match (self.reference_winding, winding) {
            (None, Some(w)) => self.reference_winding = Some(w),
            (Some(reference), Some(w)) if reference != w => {
                log::warn!(
                    "{}: board appears mirrored relative to the first view ({w:?} vs {reference:?})",
                    path.display()
                );
                self.report.inconsistent_orientation.push(path.clone());
            }
            _ => {}
        }

        match (self.set.image_size, pixel_dimensions) {
            (None, size) => self.set.image_size = size,
            (Some(reference), Some(size)) if reference != size => {
                log::warn!(
                    "{}: size {size} differs from {reference}, using {reference}",
                    path.display()
                );
                self.report.mismatched_size.push(path.clone());
            }
            _ => {}
        }

        self.set.push(template, corners, path.clone());
        self.report.records.push(ImageRecord {
            path,
            pixel_dimensions,
            failure: None,
            winding,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use nalgebra::Point3;

    use super::*;
    use crate::board::PatternSize;
    use crate::toolkit::synthetic::{SyntheticImage, SyntheticToolkit, SyntheticView};
    use crate::toolkit::{SolveFlags, SolveOutput, ToolkitError};

    /// Synthetic toolkit that counts decoded images.
    struct CountingToolkit {
        inner: SyntheticToolkit,
        loads: AtomicUsize,
    }

    impl VisionToolkit for CountingToolkit {
        type Image = SyntheticImage;

        fn load_image(&self, path: &Path) -> Result<SyntheticImage, ToolkitError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.inner.load_image(path)
        }

        fn image_size(&self, image: &SyntheticImage) -> ImageSize {
            self.inner.image_size(image)
        }

        fn detect_pattern(
            &self,
            image: &SyntheticImage,
            pattern: PatternSize,
        ) -> Result<Option<Vec<Point2<f64>>>, ToolkitError> {
            self.inner.detect_pattern(image, pattern)
        }

        fn refine_subpixel(
            &self,
            image: &SyntheticImage,
            corners: Vec<Point2<f64>>,
        ) -> Result<Vec<Point2<f64>>, ToolkitError> {
            self.inner.refine_subpixel(image, corners)
        }

        fn solve_calibration(
            &self,
            object_points: &[Vec<Point3<f64>>],
            image_points: &[Vec<Point2<f64>>],
            image_size: ImageSize,
            flags: SolveFlags,
        ) -> Result<SolveOutput, ToolkitError> {
            self.inner
                .solve_calibration(object_points, image_points, image_size, flags)
        }
    }

    fn geometry() -> BoardGeometry {
        BoardGeometry::new(9, 6, 25.0).unwrap()
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| PathBuf::from("/data").join(n)).collect()
    }

    #[test]
    fn detected_views_are_a_subset_of_scanned() {
        let tk = SyntheticToolkit::new(ImageSize::new(1280, 720))
            .with_view("a.png", SyntheticView::board())
            .with_view("b.png", SyntheticView::Blank)
            .with_view("c.png", SyntheticView::Corrupt)
            .with_view("d.png", SyntheticView::board());
        let collector = CorrespondenceCollector::new(&tk, geometry(), 2);
        let input = paths(&["a.png", "b.png", "c.png", "d.png", "missing.png"]);

        let mut seen = Vec::new();
        let (set, report) = collector.collect(&input, |i, img| seen.push((i, img.is_detected())));

        assert_eq!(set.len(), 2);
        assert_eq!(set.object_points().len(), set.image_points().len());
        assert!(set.len() <= input.len());
        assert_eq!(report.scanned(), 5);
        assert_eq!(report.detected(), 2);
        assert_eq!(report.status(), CollectionStatus::Ready);
        assert_eq!(
            seen,
            [(0, true), (1, false), (2, false), (3, true), (4, false)]
        );
        assert_eq!(set.sources(), &paths(&["a.png", "d.png"])[..]);
        assert_eq!(set.image_size(), Some(ImageSize::new(1280, 720)));

        let failures: Vec<_> = report.failed().map(|r| r.failure.clone().unwrap()).collect();
        assert_eq!(failures[0], DetectionFailure::PatternNotFound);
        assert!(matches!(failures[1], DetectionFailure::DecodeFailed(_)));
        assert!(matches!(failures[2], DetectionFailure::DecodeFailed(_)));
    }

    #[test]
    fn every_view_uses_the_same_template() {
        let tk = SyntheticToolkit::new(ImageSize::new(640, 480))
            .with_view("a.png", SyntheticView::board())
            .with_view("b.png", SyntheticView::board());
        let collector = CorrespondenceCollector::new(&tk, geometry(), 1);
        let (set, _) = collector.collect(&paths(&["a.png", "b.png"]), |_, _| {});
        for (object, image) in set.object_points().iter().zip(set.image_points()) {
            assert_eq!(object.as_slice(), collector.template().points());
            assert_eq!(image.len(), 54);
        }
    }

    #[test]
    fn no_detections_is_insufficient() {
        let tk = SyntheticToolkit::new(ImageSize::new(640, 480))
            .with_view("a.png", SyntheticView::Blank);
        let collector = CorrespondenceCollector::new(&tk, geometry(), 1);
        let (set, report) = collector.collect(&paths(&["a.png"]), |_, _| {});
        assert!(set.is_empty());
        assert_eq!(set.image_size(), None);
        assert_eq!(
            report.status(),
            CollectionStatus::Insufficient {
                detected: 0,
                required: 1
            }
        );

        let (set, report) = collector.collect(&[], |_, _| {});
        assert!(set.is_empty());
        assert_eq!(report.scanned(), 0);
        assert!(matches!(report.status(), CollectionStatus::Insufficient { .. }));
    }

    #[test]
    fn below_floor_keeps_collected_views() {
        let tk = SyntheticToolkit::new(ImageSize::new(640, 480))
            .with_view("a.png", SyntheticView::board());
        let collector = CorrespondenceCollector::new(&tk, geometry(), 5);
        let (set, report) = collector.collect(&paths(&["a.png"]), |_, _| {});
        assert_eq!(set.len(), 1);
        assert_eq!(
            report.status(),
            CollectionStatus::Insufficient {
                detected: 1,
                required: 5
            }
        );
    }

    #[test]
    fn wrong_board_size_is_not_found() {
        let tk = SyntheticToolkit::new(ImageSize::new(640, 480)).with_view(
            "a.png",
            SyntheticView::Board {
                pattern: Some(PatternSize {
                    columns: 7,
                    rows: 5,
                }),
                depth_mm: 600.0,
                mirrored: false,
                size: None,
            },
        );
        let collector = CorrespondenceCollector::new(&tk, geometry(), 1);
        let image = collector.inspect(Path::new("a.png"));
        assert_eq!(image.failure(), Some(&DetectionFailure::PatternNotFound));
        assert_eq!(image.pixel_dimensions, Some(ImageSize::new(640, 480)));
    }

    #[test]
    fn mirrored_and_resized_views_are_flagged_not_dropped() {
        let tk = SyntheticToolkit::new(ImageSize::new(1280, 720))
            .with_view("a.png", SyntheticView::board())
            .with_view("b.png", SyntheticView::mirrored_board())
            .with_view(
                "c.png",
                SyntheticView::Board {
                    pattern: None,
                    depth_mm: 600.0,
                    mirrored: false,
                    size: Some(ImageSize::new(1920, 1080)),
                },
            );
        let collector = CorrespondenceCollector::new(&tk, geometry(), 1);
        let (set, report) = collector.collect(&paths(&["a.png", "b.png", "c.png"]), |_, _| {});
        assert_eq!(set.len(), 3);
        assert_eq!(report.inconsistent_orientation, paths(&["b.png"]));
        assert_eq!(report.mismatched_size, paths(&["c.png"]));
        assert_eq!(set.image_size(), Some(ImageSize::new(1280, 720)));
        assert_eq!(report.records[1].winding, Some(Winding::CounterClockwise));
    }

    #[test]
    fn images_are_reported_as_they_finish() {
        let names: Vec<String> = (0..5).map(|i| format!("{i}.png")).collect();
        let mut inner = SyntheticToolkit::new(ImageSize::new(640, 480));
        for name in &names {
            inner = inner.with_view(name.clone(), SyntheticView::board());
        }
        let tk = CountingToolkit {
            inner,
            loads: AtomicUsize::new(0),
        };
        let collector = CorrespondenceCollector::new(&tk, geometry(), 1);
        let input: Vec<PathBuf> = names.iter().map(PathBuf::from).collect();

        let mut loads_at_callback = Vec::new();
        let (set, _) = collector.collect(&input, |_, _| {
            loads_at_callback.push(tk.loads.load(Ordering::SeqCst));
        });
        assert_eq!(set.len(), 5);
        assert_eq!(loads_at_callback.len(), 5);
        for (i, loads) in loads_at_callback.iter().enumerate() {
            assert!(*loads > i, "image {i} reported before it was decoded");
        }
        #[cfg(not(feature = "rayon"))]
        assert_eq!(loads_at_callback, [1, 2, 3, 4, 5]);
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn parallel_results_merge_in_scan_order() {
        let names: Vec<String> = (0..64).map(|i| format!("{i:03}.png")).collect();
        let mut tk = SyntheticToolkit::new(ImageSize::new(640, 480));
        for (i, name) in names.iter().enumerate() {
            let view = if i % 3 == 0 {
                SyntheticView::Blank
            } else {
                SyntheticView::board()
            };
            tk = tk.with_view(name.clone(), view);
        }
        let collector = CorrespondenceCollector::new(&tk, geometry(), 1);
        let input: Vec<PathBuf> = names.iter().map(PathBuf::from).collect();

        let mut order = Vec::new();
        let (set, report) = collector.collect(&input, |i, img| order.push((i, img.path.clone())));

        let expected: Vec<_> = input.iter().cloned().enumerate().collect();
        assert_eq!(order, expected);
        let recorded: Vec<_> = report.records.iter().map(|r| r.path.clone()).collect();
        assert_eq!(recorded, input);
        let detected: Vec<_> = input
            .iter()
            .enumerate()
            .filter(|(i, _)| i % 3 != 0)
            .map(|(_, p)| p.clone())
            .collect();
        assert_eq!(set.sources(), &detected[..]);
    }
}
