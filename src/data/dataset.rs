//! Dataset trait and batch types for the training pipeline.

use ndarray::{Array3, Array4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};

/// One labeled image in `[channels, height, width]` layout.
#[derive(Debug, Clone)]
pub struct Sample {
    pub image: Array3<f32>,
    pub label: usize,
}

/// A collated batch: images stacked along a leading batch dimension.
#[derive(Debug, Clone)]
pub struct Batch {
    pub images: Array4<f32>,
    pub labels: Vec<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Trait for indexable labeled-image datasets.
///
/// Samples are unbatched; the `DataLoader` handles shuffling and collation.
pub trait Dataset: Send + Sync {
    /// Number of samples in the dataset.
    fn len(&self) -> usize;

    /// Whether the dataset is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of label classes.
    fn num_classes(&self) -> usize;

    /// Image shape as `(channels, height, width)`.
    fn image_shape(&self) -> (usize, usize, usize);

    /// Get a single sample by index.
    fn get(&self, idx: usize) -> Result<Sample>;
}

/// A dataset held fully in memory.
pub struct InMemoryDataset {
    samples: Vec<Sample>,
    num_classes: usize,
    image_shape: (usize, usize, usize),
}

impl InMemoryDataset {
    pub fn new(
        samples: Vec<Sample>,
        num_classes: usize,
        image_shape: (usize, usize, usize),
    ) -> Result<Self> {
        for (i, s) in samples.iter().enumerate() {
            if s.image.dim() != image_shape {
                return Err(Error::DataError {
                    reason: format!(
                        "sample {i} has shape {:?}, expected {image_shape:?}",
                        s.image.dim()
                    ),
                });
            }
            if s.label >= num_classes {
                return Err(Error::DataError {
                    reason: format!("sample {i} has label {} >= {num_classes}", s.label),
                });
            }
        }
        Ok(Self {
            samples,
            num_classes,
            image_shape,
        })
    }

    /// Deterministic synthetic dataset: each class draws pixels around its
    /// own mean, so a small classifier can actually separate them.
    pub fn synthetic(
        num_samples: usize,
        num_classes: usize,
        image_shape: (usize, usize, usize),
        seed: u64,
    ) -> Result<Self> {
        if num_classes == 0 {
            return Err(Error::DataError {
                reason: "synthetic dataset needs at least one class".to_string(),
            });
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let samples = (0..num_samples)
            .map(|i| {
                let label = i % num_classes;
                let center = label as f32 / num_classes as f32 - 0.5;
                let image =
                    Array3::from_shape_simple_fn(image_shape, || center + rng.gen_range(-0.2..0.2));
                Sample { image, label }
            })
            .collect();
        Self::new(samples, num_classes, image_shape)
    }
}

impl Dataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn image_shape(&self) -> (usize, usize, usize) {
        self.image_shape
    }

    fn get(&self, idx: usize) -> Result<Sample> {
        self.samples.get(idx).cloned().ok_or_else(|| Error::DataError {
            reason: format!("index {idx} out of bounds for dataset of {}", self.samples.len()),
        })
    }
}
