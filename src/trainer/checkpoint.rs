//! Checkpoint save/load for training resumption.
//!
//! A checkpoint is a single JSON document carrying the last completed epoch,
//! the architecture name, the best validation top-1 seen so far, and the
//! model/optimizer state dicts. The latest checkpoint always lands in
//! `checkpoint.json`; when the epoch is the best so far it is also copied to
//! `model_best.json`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{Arch, TensorData};
use crate::optim::SgdState;

pub const CHECKPOINT_FILE: &str = "checkpoint.json";
pub const BEST_FILE: &str = "model_best.json";

/// Everything needed to resume a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Last completed epoch; resuming starts at `epoch + 1`.
    pub epoch: u64,
    pub arch: Arch,
    pub best_prec1: f64,
    pub model_state: HashMap<String, TensorData>,
    pub optimizer_state: SgdState,
}

/// Write `checkpoint.json` under `dir`, copying it to `model_best.json` when
/// `is_best` is set.
pub fn save_checkpoint(dir: &Path, record: &CheckpointRecord, is_best: bool) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| Error::CheckpointError {
        reason: format!("failed to create checkpoint dir '{}': {e}", dir.display()),
    })?;

    let path = dir.join(CHECKPOINT_FILE);
    let json = serde_json::to_string(record).map_err(|e| Error::CheckpointError {
        reason: format!("failed to serialize checkpoint: {e}"),
    })?;
    fs::write(&path, json).map_err(|e| Error::CheckpointError {
        reason: format!("failed to write '{}': {e}", path.display()),
    })?;

    if is_best {
        let best = dir.join(BEST_FILE);
        fs::copy(&path, &best).map_err(|e| Error::CheckpointError {
            reason: format!("failed to copy checkpoint to '{}': {e}", best.display()),
        })?;
    }
    Ok(())
}

/// Load a checkpoint file.
///
/// Returns [`Error::CheckpointNotFound`] when the file does not exist, so
/// callers can distinguish a missing checkpoint (warn, start fresh) from a
/// corrupt one (fail).
pub fn load_checkpoint(path: &Path) -> Result<CheckpointRecord> {
    if !path.exists() {
        return Err(Error::CheckpointNotFound {
            path: path.to_path_buf(),
        });
    }
    let json = fs::read_to_string(path).map_err(|e| Error::CheckpointError {
        reason: format!("failed to read '{}': {e}", path.display()),
    })?;
    serde_json::from_str(&json).map_err(|e| Error::CheckpointError {
        reason: format!("failed to parse '{}': {e}", path.display()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{build_model, Arch};
    use crate::optim::{Sgd, SgdConfig};
    use tempfile::TempDir;

    fn record(epoch: u64, best: f64) -> CheckpointRecord {
        let model = build_model(Arch::Mlp, 4, 3, 1).unwrap();
        CheckpointRecord {
            epoch,
            arch: Arch::Mlp,
            best_prec1: best,
            model_state: model.state_dict(),
            optimizer_state: Sgd::new(SgdConfig::default()).state_dict(),
        }
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let rec = record(5, 42.0);
        save_checkpoint(dir.path(), &rec, false).unwrap();

        let loaded = load_checkpoint(&dir.path().join(CHECKPOINT_FILE)).unwrap();
        assert_eq!(loaded.epoch, 5);
        assert_eq!(loaded.arch, Arch::Mlp);
        assert_eq!(loaded.best_prec1, 42.0);
        assert_eq!(loaded.model_state, rec.model_state);
        assert!(!dir.path().join(BEST_FILE).exists());
    }

    #[test]
    fn test_best_copy() {
        let dir = TempDir::new().unwrap();
        save_checkpoint(dir.path(), &record(0, 10.0), true).unwrap();
        save_checkpoint(dir.path(), &record(1, 8.0), false).unwrap();

        // model_best.json still holds epoch 0, checkpoint.json moved on.
        let latest = load_checkpoint(&dir.path().join(CHECKPOINT_FILE)).unwrap();
        let best = load_checkpoint(&dir.path().join(BEST_FILE)).unwrap();
        assert_eq!(latest.epoch, 1);
        assert_eq!(best.epoch, 0);
        assert_eq!(best.best_prec1, 10.0);
    }

    #[test]
    fn test_missing_checkpoint_is_distinct() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CHECKPOINT_FILE);
        match load_checkpoint(&path) {
            Err(Error::CheckpointNotFound { path: p }) => assert_eq!(p, path),
            other => panic!("expected CheckpointNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_corrupt_checkpoint_fails_loudly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CHECKPOINT_FILE);
        fs::write(&path, "{not json").unwrap();
        match load_checkpoint(&path) {
            Err(Error::CheckpointError { .. }) => {}
            other => panic!("expected CheckpointError, got {other:?}"),
        }
    }

    #[test]
    fn test_restored_model_matches() {
        let dir = TempDir::new().unwrap();
        let mut src = build_model(Arch::Mlp, 4, 3, 1).unwrap();
        src.forward_train(&ndarray::Array4::from_elem((4, 1, 1, 4), 0.5))
            .unwrap();
        let rec = CheckpointRecord {
            epoch: 2,
            arch: Arch::Mlp,
            best_prec1: 1.0,
            model_state: src.state_dict(),
            optimizer_state: Sgd::new(SgdConfig::default()).state_dict(),
        };
        save_checkpoint(dir.path(), &rec, false).unwrap();

        let loaded = load_checkpoint(&dir.path().join(CHECKPOINT_FILE)).unwrap();
        let mut dst = build_model(loaded.arch, 4, 3, 99).unwrap();
        dst.load_state_dict(&loaded.model_state).unwrap();

        let x = ndarray::Array4::from_elem((2, 1, 1, 4), 0.25);
        assert_eq!(src.forward_eval(&x).unwrap(), dst.forward_eval(&x).unwrap());
    }
}
