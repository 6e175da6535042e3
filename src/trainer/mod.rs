//! Training orchestration: the per-epoch train/validate loops and
//! checkpointing.

pub mod checkpoint;
pub mod epoch;

pub use checkpoint::{load_checkpoint, save_checkpoint, CheckpointRecord, BEST_FILE, CHECKPOINT_FILE};
pub use epoch::{train_epoch, validate, EpochStats};
