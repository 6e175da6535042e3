//! Directory-tree image dataset.
//!
//! Expects the usual layout of one subdirectory per class under a root,
//! `root/<class_name>/<image file>`. Class indices are assigned by sorted
//! subdirectory name. Images are decoded lazily in `get`, resized, and
//! normalized with the standard ImageNet channel statistics.

use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use ndarray::Array3;

use crate::data::dataset::{Dataset, Sample};
use crate::error::{Error, Result};

const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Labeled images discovered from a class-per-subdirectory tree.
pub struct ImageFolderDataset {
    entries: Vec<(PathBuf, usize)>,
    classes: Vec<String>,
    // (height, width) every image is resized to
    image_size: (usize, usize),
}

impl ImageFolderDataset {
    /// Scan `root` for class subdirectories and their image files.
    pub fn open(root: &Path, image_size: (usize, usize)) -> Result<Self> {
        if image_size.0 == 0 || image_size.1 == 0 {
            return Err(Error::DataError {
                reason: format!("invalid image size {image_size:?}"),
            });
        }
        let read_dir = |p: &Path| {
            fs::read_dir(p).map_err(|e| Error::DataError {
                reason: format!("cannot read directory '{}': {e}", p.display()),
            })
        };

        let mut classes = Vec::new();
        for entry in read_dir(root)? {
            let entry = entry.map_err(|e| Error::DataError {
                reason: format!("cannot read directory '{}': {e}", root.display()),
            })?;
            if entry.path().is_dir() {
                classes.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        classes.sort();
        if classes.is_empty() {
            return Err(Error::DataError {
                reason: format!("no class subdirectories under '{}'", root.display()),
            });
        }

        let mut entries = Vec::new();
        for (label, class) in classes.iter().enumerate() {
            let class_dir = root.join(class);
            let mut files: Vec<PathBuf> = read_dir(&class_dir)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.extension()
                        .and_then(|e| e.to_str())
                        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                        .unwrap_or(false)
                })
                .collect();
            files.sort();
            entries.extend(files.into_iter().map(|p| (p, label)));
        }
        if entries.is_empty() {
            return Err(Error::DataError {
                reason: format!("no image files under '{}'", root.display()),
            });
        }

        Ok(Self {
            entries,
            classes,
            image_size,
        })
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }
}

impl Dataset for ImageFolderDataset {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn num_classes(&self) -> usize {
        self.classes.len()
    }

    fn image_shape(&self) -> (usize, usize, usize) {
        (3, self.image_size.0, self.image_size.1)
    }

    fn get(&self, idx: usize) -> Result<Sample> {
        let (path, label) = self.entries.get(idx).ok_or_else(|| Error::DataError {
            reason: format!("index {idx} out of bounds for dataset of {}", self.entries.len()),
        })?;

        let decoded = image::open(path).map_err(|e| Error::DataError {
            reason: format!("cannot decode image '{}': {e}", path.display()),
        })?;
        let (h, w) = self.image_size;
        let rgb = decoded
            .resize_exact(w as u32, h as u32, FilterType::Triangle)
            .to_rgb8();

        let image = Array3::from_shape_fn((3, h, w), |(c, y, x)| {
            let v = rgb.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
            (v - CHANNEL_MEAN[c]) / CHANNEL_STD[c]
        });
        Ok(Sample {
            image,
            label: *label,
        })
    }
}
