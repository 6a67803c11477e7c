use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use super::ImageSource;
use crate::error::CalibError;

/// Recognized extensions, compared case-insensitively.
pub const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "tiff", "tif"];

pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
}

/// Files with a recognized image extension directly inside one directory.
#[derive(Debug, Clone, Default)]
pub struct ImageDirectory {
    pub root: PathBuf,
    pub images: Vec<PathBuf>,
}

/// Identity of the file behind a path, so links to one file count once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum FileKey {
    #[cfg(unix)]
    Inode { dev: u64, ino: u64 },
    #[cfg_attr(unix, allow(dead_code))]
    Canonical(PathBuf),
}

impl FileKey {
    fn of(path: &Path, meta: &fs::Metadata) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            let _ = path;
            FileKey::Inode {
                dev: meta.dev(),
                ino: meta.ino(),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = meta;
            FileKey::Canonical(fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()))
        }
    }
}

impl ImageDirectory {
    /// List candidate images in `root`, non-recursively.
    ///
    /// Paths are sorted by name; when several entries resolve to the same file
    /// (case-variant names on a case-insensitive filesystem, symlinks, hard
    /// links) only the first is kept. An existing directory with no images is
    /// not an error.
    pub fn scan(root: impl AsRef<Path>) -> Result<Self, CalibError> {
        let root = root.as_ref();
        let not_found = |reason: String| CalibError::DirectoryNotFound {
            path: root.to_path_buf(),
            reason,
        };

        let meta = fs::metadata(root).map_err(|e| not_found(e.to_string()))?;
        if !meta.is_dir() {
            return Err(not_found("not a directory".to_string()));
        }
        let entries = fs::read_dir(root).map_err(|e| not_found(e.to_string()))?;

        let mut candidates: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| has_image_extension(p))
            .collect();
        candidates.sort();

        let mut seen = HashSet::new();
        let mut images = Vec::with_capacity(candidates.len());
        for path in candidates {
            // follows symlinks; dangling links and directories are skipped
            let meta = match fs::metadata(&path) {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => {
                    log::debug!("skipping {}: {e}", path.display());
                    continue;
                }
            };
            if seen.insert(FileKey::of(&path, &meta)) {
                images.push(path);
            } else {
                log::debug!("skipping duplicate {}", path.display());
            }
        }

        log::info!("found {} image files in {}", images.len(), root.display());
        Ok(Self {
            root: root.to_path_buf(),
            images,
        })
    }
}

impl ImageSource for ImageDirectory {
    fn image_paths(&self) -> &[PathBuf] {
        &self.images
    }
}
