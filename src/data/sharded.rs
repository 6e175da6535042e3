//! Sharded dataset wrapper for distributed training.
//!
//! Each rank reads a disjoint subset of the underlying dataset, so no sample
//! is duplicated across ranks within an epoch.

use crate::data::dataset::{Dataset, Sample};
use crate::error::{Error, Result};

/// Wraps any `Dataset` to expose only a disjoint shard for one rank.
///
/// Indices are assigned round-robin: rank `r` of `W` total ranks sees indices
/// `r, r+W, r+2W, ...` from the underlying dataset.
pub struct ShardedDataset<D> {
    inner: D,
    rank: usize,
    world_size: usize,
    shard_len: usize,
}

impl<D> ShardedDataset<D> {
    pub fn inner(&self) -> &D {
        &self.inner
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    fn from_parts(inner: D, rank: usize, world_size: usize, total: usize) -> Result<Self> {
        if world_size == 0 {
            return Err(Error::DataError {
                reason: "world_size must be > 0".to_string(),
            });
        }
        if rank >= world_size {
            return Err(Error::DataError {
                reason: format!("rank {rank} >= world_size {world_size}"),
            });
        }
        let shard_len = total.saturating_sub(rank).div_ceil(world_size);
        Ok(Self {
            inner,
            rank,
            world_size,
            shard_len,
        })
    }
}

/// Create a sharded view of `inner` for one rank.
pub fn new_sharded<D: Dataset>(inner: D, rank: usize, world_size: usize) -> Result<ShardedDataset<D>> {
    let total = inner.len();
    ShardedDataset::from_parts(inner, rank, world_size, total)
}

impl<D: Dataset> Dataset for ShardedDataset<D> {
    fn len(&self) -> usize {
        self.shard_len
    }

    fn num_classes(&self) -> usize {
        self.inner.num_classes()
    }

    fn image_shape(&self) -> (usize, usize, usize) {
        self.inner.image_shape()
    }

    fn get(&self, idx: usize) -> Result<Sample> {
        if idx >= self.shard_len {
            return Err(Error::DataError {
                reason: format!("index {idx} out of bounds for shard of {}", self.shard_len),
            });
        }
        self.inner.get(self.rank + idx * self.world_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::InMemoryDataset;

    fn base(n: usize) -> InMemoryDataset {
        InMemoryDataset::synthetic(n, 2, (1, 2, 2), 0).unwrap()
    }

    #[test]
    fn test_shards_partition_dataset() {
        // 10 samples over 3 ranks: lengths 4, 3, 3 and disjoint coverage.
        let lens: Vec<usize> = (0..3)
            .map(|r| new_sharded(base(10), r, 3).unwrap().len())
            .collect();
        assert_eq!(lens, vec![4, 3, 3]);
        assert_eq!(lens.iter().sum::<usize>(), 10);
    }

    #[test]
    fn test_round_robin_assignment() {
        let shard = new_sharded(base(10), 1, 3).unwrap();
        // Shard indices 0..3 map to base indices 1, 4, 7.
        for (idx, expect) in [(0usize, 1usize), (1, 4), (2, 7)] {
            assert_eq!(
                shard.get(idx).unwrap().label,
                shard.inner().get(expect).unwrap().label
            );
        }
        assert!(shard.get(3).is_err());
    }

    #[test]
    fn test_invalid_rank() {
        assert!(new_sharded(base(4), 2, 2).is_err());
        assert!(new_sharded(base(4), 0, 0).is_err());
    }

    #[test]
    fn test_single_rank_is_identity() {
        let shard = new_sharded(base(5), 0, 1).unwrap();
        assert_eq!(shard.len(), 5);
    }
}
