//! Calibration image sources.
//!
//! A directory of photographs is the only source today; the trait keeps the
//! collector independent of where the list of paths comes from.
mod image_dir;

use std::path::PathBuf;

pub use image_dir::{has_image_extension, ImageDirectory, IMAGE_EXTENSIONS};

pub type DefaultDataset = ImageDirectory;

pub trait ImageSource {
    /// Candidate image paths, deduplicated and in a stable order.
    fn image_paths(&self) -> &[PathBuf];

    fn len(&self) -> usize {
        self.image_paths().len()
    }

    fn is_empty(&self) -> bool {
        self.image_paths().is_empty()
    }
}
