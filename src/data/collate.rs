//! Batch collation and index shuffling helpers.

use ndarray::Array4;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::data::dataset::{Batch, Dataset, Sample};
use crate::error::{Error, Result};

/// Deterministically shuffled `0..len` from a seed.
pub(crate) fn shuffled_indices(len: usize, seed: u64) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..len).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    indices
}

/// Collate individual samples into a batched image tensor.
///
/// Samples are fetched in parallel (decoding is the expensive part for
/// on-disk datasets), then stacked along a new leading batch dimension.
/// With `channels_last` the batch keeps its logical NCHW shape but is laid
/// out in memory with the channel axis innermost.
pub(crate) fn collate_batch<D: Dataset + ?Sized>(
    dataset: &D,
    indices: &[usize],
    channels_last: bool,
) -> Result<Batch> {
    if indices.is_empty() {
        return Err(Error::DataError {
            reason: "empty batch indices".to_string(),
        });
    }

    let samples: Vec<Sample> = indices
        .par_iter()
        .map(|&idx| dataset.get(idx))
        .collect::<Result<_>>()?;

    let shape = dataset.image_shape();
    let mut pixels = Vec::with_capacity(indices.len() * shape.0 * shape.1 * shape.2);
    let mut labels = Vec::with_capacity(indices.len());
    for sample in &samples {
        if sample.image.dim() != shape {
            return Err(Error::DataError {
                reason: format!(
                    "inconsistent sample shapes: expected {shape:?}, got {:?}",
                    sample.image.dim()
                ),
            });
        }
        pixels.extend(sample.image.iter());
        labels.push(sample.label);
    }

    let images = Array4::from_shape_vec((indices.len(), shape.0, shape.1, shape.2), pixels)
        .map_err(|e| Error::DataError {
            reason: format!("batch stacking failed: {e}"),
        })?;
    let images = if channels_last {
        images
            .permuted_axes([0, 2, 3, 1])
            .as_standard_layout()
            .into_owned()
            .permuted_axes([0, 3, 1, 2])
    } else {
        images
    };
    Ok(Batch { images, labels })
}
