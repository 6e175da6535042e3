//! DataLoader with deterministic shuffling and batching.
//!
//! Iterates over a `Dataset`, producing collated `Batch`es with a leading
//! batch dimension. Indices are shuffled deterministically per epoch from a
//! seed so that every rank draws the same permutation of its shard; sample
//! fetches within a batch are parallelized during collation.

use crate::data::collate::{collate_batch, shuffled_indices};
use crate::data::dataset::{Batch, Dataset};
use crate::error::{Error, Result};

/// DataLoader that iterates a dataset with shuffling and batching.
pub struct DataLoader<D> {
    dataset: D,
    batch_size: usize,
    seed: u64,
    shuffle: bool,
    channels_last: bool,
    workers: Option<rayon::ThreadPool>,
}

impl<D> DataLoader<D>
where
    D: Dataset,
{
    /// Create a new DataLoader.
    ///
    /// # Arguments
    /// * `dataset` - The dataset to iterate
    /// * `batch_size` - Number of samples per batch
    /// * `seed` - Random seed for deterministic shuffling
    /// * `shuffle` - Reshuffle each epoch (training); `false` keeps dataset order (validation)
    pub fn new(dataset: D, batch_size: usize, seed: u64, shuffle: bool) -> Self {
        Self {
            dataset,
            batch_size,
            seed,
            shuffle,
            channels_last: false,
            workers: None,
        }
    }

    /// Fetch samples on a dedicated pool of `workers` threads instead of the
    /// global rayon pool.
    pub fn with_workers(mut self, workers: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| Error::DataError {
                reason: format!("failed to start {workers} loader workers: {e}"),
            })?;
        self.workers = Some(pool);
        Ok(self)
    }

    /// Lay out batched images with the channel axis innermost in memory.
    pub fn with_channels_last(mut self, channels_last: bool) -> Self {
        self.channels_last = channels_last;
        self
    }

    /// Number of batches per epoch; the last incomplete batch is dropped.
    pub fn num_batches(&self) -> usize {
        self.dataset.len() / self.batch_size
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// The underlying dataset.
    pub fn dataset(&self) -> &D {
        &self.dataset
    }

    /// Create an iterator for one epoch.
    ///
    /// Shuffled loaders draw their permutation from `seed + epoch`, so every
    /// rank running the same epoch agrees on the order.
    pub fn iter(&self, epoch: u64) -> DataLoaderIter<'_, D> {
        let indices = if self.shuffle {
            shuffled_indices(self.dataset.len(), self.seed.wrapping_add(epoch))
        } else {
            (0..self.dataset.len()).collect()
        };
        let num_batches = indices.len() / self.batch_size;
        let indices: Vec<usize> = indices[..num_batches * self.batch_size].to_vec();

        DataLoaderIter {
            loader: self,
            indices,
            batch_idx: 0,
            num_batches,
        }
    }
}

/// Iterator over batches in one epoch.
///
/// Implements `Iterator<Item = Result<Batch>>`.
pub struct DataLoaderIter<'a, D> {
    loader: &'a DataLoader<D>,
    indices: Vec<usize>,
    batch_idx: usize,
    num_batches: usize,
}

impl<D> DataLoaderIter<'_, D>
where
    D: Dataset,
{
    /// Number of batches remaining in this epoch.
    pub fn remaining(&self) -> usize {
        self.num_batches - self.batch_idx
    }

    fn advance(&mut self) -> Result<Option<Batch>> {
        if self.batch_idx >= self.num_batches {
            return Ok(None);
        }

        let start = self.batch_idx * self.loader.batch_size;
        let end = start + self.loader.batch_size;
        let indices = &self.indices[start..end];
        let batch = match &self.loader.workers {
            Some(pool) => pool.install(|| {
                collate_batch(&self.loader.dataset, indices, self.loader.channels_last)
            })?,
            None => collate_batch(&self.loader.dataset, indices, self.loader.channels_last)?,
        };

        self.batch_idx += 1;
        Ok(Some(batch))
    }
}

impl<D> Iterator for DataLoaderIter<'_, D>
where
    D: Dataset,
{
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

impl<D> ExactSizeIterator for DataLoaderIter<'_, D> where D: Dataset {}
