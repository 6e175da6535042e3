//! Data pipeline: datasets, sharding, collation, and the epoch loader.

pub mod collate;
pub mod dataset;
pub mod folder;
pub mod loader;
pub mod sharded;

pub use dataset::{Batch, Dataset, InMemoryDataset, Sample};
pub use folder::ImageFolderDataset;
pub use loader::DataLoader;
pub use sharded::{new_sharded, ShardedDataset};
