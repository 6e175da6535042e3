//! Learning rate schedule for vision training.
//!
//! Step decay by 10x every 30 epochs with an extra decay step past epoch 80,
//! and a linear warmup ramp over the first 5 epochs. This schedule should
//! yield ~76% converged top-1 accuracy at a global batch size of 256.

/// Epochs between 10x decay steps.
const DECAY_INTERVAL_EPOCHS: usize = 30;
/// Past this epoch an extra decay step is applied.
const EXTRA_DECAY_EPOCH: usize = 80;
/// Linear warmup window, in epochs.
const WARMUP_EPOCHS: usize = 5;
/// Reference global batch size for base LR scaling.
const REFERENCE_BATCH_SIZE: f64 = 256.0;

/// Scale the base learning rate by the global batch size, once at startup:
/// `lr * (per_worker_batch_size * world_size) / 256`.
pub fn scale_base_lr(lr: f64, batch_size: usize, world_size: usize) -> f64 {
    lr * (batch_size * world_size) as f64 / REFERENCE_BATCH_SIZE
}

/// Step-decay learning rate schedule with linear warmup.
///
/// A pure function of `(epoch, step, steps_per_epoch)`; reproduces
/// bit-for-bit given identical inputs. Applied every step, not just on
/// logged steps.
#[derive(Debug, Clone)]
pub struct LrSchedule {
    base_lr: f64,
}

impl LrSchedule {
    /// `base_lr` is the already-scaled base learning rate (see
    /// [`scale_base_lr`]).
    pub fn new(base_lr: f64) -> Self {
        Self { base_lr }
    }

    /// Learning rate for a given epoch and step.
    ///
    /// `steps_per_epoch` must be > 0.
    pub fn rate(&self, epoch: usize, step: usize, steps_per_epoch: usize) -> f64 {
        let mut factor = epoch / DECAY_INTERVAL_EPOCHS;
        if epoch >= EXTRA_DECAY_EPOCH {
            factor += 1;
        }
        let mut lr = self.base_lr * 0.1f64.powi(factor as i32);

        if epoch < WARMUP_EPOCHS {
            lr *= (1 + step + epoch * steps_per_epoch) as f64
                / (WARMUP_EPOCHS * steps_per_epoch) as f64;
        }

        lr
    }

    pub fn base_lr(&self) -> f64 {
        self.base_lr
    }
}
