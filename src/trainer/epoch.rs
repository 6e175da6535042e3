//! One epoch of training or validation.
//!
//! Both loops keep running averages of loss, top-1/top-5 accuracy, batch
//! time, and data-loading time, reduce the per-batch statistics across ranks
//! so every process reports global values, and log a progress line from rank
//! 0 every `print_freq` steps (including step 0). Timing meters are updated
//! on print steps with the elapsed time since the previous print divided by
//! the print frequency.

use std::time::Instant;

use tracing::{debug, info};

use crate::data::{DataLoader, Dataset};
use crate::distributed::all_reduce_mean;
use crate::error::Result;
use crate::metrics::{topk_accuracy, AverageMeter};
use crate::nn::cross_entropy;
use crate::optim::Sgd;
use crate::parallel::{DataParallel, StepOutcome};
use crate::schedule::LrSchedule;

/// Aggregate statistics for one epoch.
#[derive(Debug, Clone)]
pub struct EpochStats {
    /// Average images per second across the whole world.
    pub throughput: f64,
    /// Average seconds per step.
    pub batch_time: f64,
    /// Average seconds spent waiting for data per step.
    pub loader_time: f64,
    /// Average loss, weighted by batch size.
    pub loss: f64,
    /// Average top-1 accuracy in percent.
    pub top1: f64,
    /// Average top-5 accuracy in percent.
    pub top5: f64,
    /// Learning rate applied on the last step (0 for validation).
    pub lr: f64,
    /// Steps at which a progress line was recorded.
    pub logged_steps: Vec<usize>,
}

struct Meters {
    batch_time: AverageMeter,
    loader_time: AverageMeter,
    losses: AverageMeter,
    top1: AverageMeter,
    top5: AverageMeter,
}

impl Meters {
    fn new() -> Self {
        Self {
            batch_time: AverageMeter::new(),
            loader_time: AverageMeter::new(),
            losses: AverageMeter::new(),
            top1: AverageMeter::new(),
            top5: AverageMeter::new(),
        }
    }

    fn stats(&self, world_size: usize, batch_size: usize, lr: f64, logged: Vec<usize>) -> EpochStats {
        let denom = self.batch_time.avg();
        EpochStats {
            throughput: if denom > 0.0 {
                (world_size * batch_size) as f64 / denom
            } else {
                0.0
            },
            batch_time: self.batch_time.avg(),
            loader_time: self.loader_time.avg(),
            loss: self.losses.avg(),
            top1: self.top1.avg(),
            top5: self.top5.avg(),
            lr,
            logged_steps: logged,
        }
    }
}

/// Train one epoch.
///
/// The learning rate is recomputed from the schedule before every step, so
/// warmup ramps within the epoch rather than between epochs.
pub fn train_epoch<D: Dataset>(
    model: &mut DataParallel,
    optimizer: &mut Sgd,
    schedule: &LrSchedule,
    loader: &DataLoader<D>,
    epoch: u64,
    print_freq: usize,
) -> Result<EpochStats> {
    let print_freq = print_freq.max(1);
    let comm = model.comm().clone();
    let world_size = comm.world_size();
    let rank = comm.rank();
    let steps_per_epoch = loader.num_batches();
    let batch_size = loader.batch_size();

    let mut meters = Meters::new();
    let mut logged = Vec::new();
    let mut lr = optimizer.lr();
    let mut last_print = Instant::now();
    let mut fetch_start = Instant::now();

    for (step, batch) in loader.iter(epoch).enumerate() {
        let batch = batch?;
        let fetch_elapsed = fetch_start.elapsed().as_secs_f64();

        lr = schedule.rate(epoch as usize, step, steps_per_epoch);
        optimizer.set_lr(lr);

        model.zero_grad();
        let logits = model.forward_train(&batch.images)?;
        let (loss, grad) = cross_entropy(&logits, &batch.labels)?;

        model.backward(&grad)?;
        if model.step(optimizer)? == StepOutcome::SkippedOverflow {
            debug!(epoch, step, scale = model.model().loss_scale(), "skipped step after gradient overflow");
        }

        // Metric collectives only run on print steps. Every rank takes this
        // branch at the same steps, so the reductions stay matched.
        if step % print_freq == 0 {
            let prec = topk_accuracy(logits.view(), &batch.labels, &[1, 5])?;
            let reduced_loss = all_reduce_mean(comm.as_ref(), loss)?;
            let prec1 = all_reduce_mean(comm.as_ref(), prec[0])?;
            let prec5 = all_reduce_mean(comm.as_ref(), prec[1])?;

            let n = batch.len();
            meters.losses.update(reduced_loss, n);
            meters.top1.update(prec1, n);
            meters.top5.update(prec5, n);
            meters.loader_time.update(fetch_elapsed, 1);
            meters
                .batch_time
                .update(last_print.elapsed().as_secs_f64() / print_freq as f64, 1);
            last_print = Instant::now();
            logged.push(step);

            let speed = (world_size * batch_size) as f64 / meters.batch_time.val().max(f64::MIN_POSITIVE);
            if rank == 0 {
                info!(
                    "Epoch: [{epoch}][{step}/{steps_per_epoch}]  \
                     Time {:.3} ({:.3})  Speed {speed:.3}  Data {:.3} ({:.3})  \
                     Loss {reduced_loss:.10} ({:.4})  \
                     Prec@1 {prec1:.3} ({:.3})  Prec@5 {prec5:.3} ({:.3})  Lr {lr:.6}",
                    meters.batch_time.val(),
                    meters.batch_time.avg(),
                    meters.loader_time.val(),
                    meters.loader_time.avg(),
                    meters.losses.avg(),
                    meters.top1.avg(),
                    meters.top5.avg(),
                );
            }
        }
        fetch_start = Instant::now();
    }

    Ok(meters.stats(world_size, batch_size, lr, logged))
}

/// Evaluate on the validation loader.
pub fn validate<D: Dataset>(
    model: &DataParallel,
    loader: &DataLoader<D>,
    print_freq: usize,
) -> Result<EpochStats> {
    let print_freq = print_freq.max(1);
    let comm = model.comm().clone();
    let world_size = comm.world_size();
    let rank = comm.rank();
    let num_batches = loader.num_batches();
    let batch_size = loader.batch_size();

    let mut meters = Meters::new();
    let mut logged = Vec::new();
    let mut last_print = Instant::now();
    let mut fetch_start = Instant::now();

    for (step, batch) in loader.iter(0).enumerate() {
        let batch = batch?;
        let fetch_elapsed = fetch_start.elapsed().as_secs_f64();

        let logits = model.forward_eval(&batch.images)?;

        if step % print_freq == 0 {
            let (loss, _) = cross_entropy(&logits, &batch.labels)?;
            let prec = topk_accuracy(logits.view(), &batch.labels, &[1, 5])?;
            let reduced_loss = all_reduce_mean(comm.as_ref(), loss)?;
            let prec1 = all_reduce_mean(comm.as_ref(), prec[0])?;
            let prec5 = all_reduce_mean(comm.as_ref(), prec[1])?;

            let n = batch.len();
            meters.losses.update(reduced_loss, n);
            meters.top1.update(prec1, n);
            meters.top5.update(prec5, n);
            meters.loader_time.update(fetch_elapsed, 1);
            meters
                .batch_time
                .update(last_print.elapsed().as_secs_f64() / print_freq as f64, 1);
            last_print = Instant::now();
            logged.push(step);
            let speed = (world_size * batch_size) as f64 / meters.batch_time.val().max(f64::MIN_POSITIVE);
            if rank == 0 {
                info!(
                    "Test: [{step}/{num_batches}]  \
                     Time {:.3} ({:.3})  Speed {speed:.3}  \
                     Loss {reduced_loss:.4} ({:.4})  \
                     Prec@1 {prec1:.3} ({:.3})  Prec@5 {prec5:.3} ({:.3})",
                    meters.batch_time.val(),
                    meters.batch_time.avg(),
                    meters.losses.avg(),
                    meters.top1.avg(),
                    meters.top5.avg(),
                );
            }
        }
        fetch_start = Instant::now();
    }

    let stats = meters.stats(world_size, batch_size, 0.0, logged);
    if rank == 0 {
        info!(
            "Prec@1 {:.3}  Prec@5 {:.3}",
            stats.top1, stats.top5
        );
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::InMemoryDataset;
    use crate::distributed::NoOpCommunicator;
    use crate::model::{build_model, Arch};
    use crate::optim::SgdConfig;
    use crate::precision::{AmpModel, Precision};
    use std::sync::Arc;

    fn harness(samples: usize, batch: usize) -> (DataParallel, Sgd, LrSchedule, DataLoader<InMemoryDataset>) {
        let ds = InMemoryDataset::synthetic(samples, 4, (1, 2, 2), 11).unwrap();
        let loader = DataLoader::new(ds, batch, 0, true);
        let inner = build_model(Arch::Linear, 4, 4, 3).unwrap();
        let amp = AmpModel::new(inner, Precision::Fp32).unwrap();
        let dp = DataParallel::new(amp, Arc::new(NoOpCommunicator)).unwrap();
        let opt = Sgd::new(SgdConfig {
            lr: 0.1,
            momentum: 0.9,
            ..Default::default()
        });
        (dp, opt, LrSchedule::new(0.1), loader)
    }

    #[test]
    fn test_progress_recorded_every_print_freq_steps() {
        let (mut dp, mut opt, sched, loader) = harness(32, 4);
        let stats = train_epoch(&mut dp, &mut opt, &sched, &loader, 0, 2).unwrap();
        assert_eq!(stats.logged_steps, vec![0, 2, 4, 6]);
    }

    #[test]
    fn test_stats_are_valid() {
        let (mut dp, mut opt, sched, loader) = harness(8, 4);
        let stats = train_epoch(&mut dp, &mut opt, &sched, &loader, 0, 2).unwrap();
        assert!(stats.throughput > 0.0);
        assert!(stats.batch_time > 0.0);
        assert!(stats.loss.is_finite());
        assert!((0.0..=100.0).contains(&stats.top1));
        assert!((0.0..=100.0).contains(&stats.top5));
        assert!(stats.top5 >= stats.top1);
        assert!(stats.lr > 0.0);
    }

    #[test]
    fn test_loss_decreases_across_epochs() {
        let (mut dp, mut opt, sched, loader) = harness(64, 8);
        let first = train_epoch(&mut dp, &mut opt, &sched, &loader, 0, 10).unwrap();
        let mut last = first.clone();
        for epoch in 1..6 {
            last = train_epoch(&mut dp, &mut opt, &sched, &loader, epoch, 10).unwrap();
        }
        assert!(last.loss < first.loss);
    }

    #[test]
    fn test_validate_reports_accuracy() {
        let (mut dp, mut opt, sched, loader) = harness(64, 8);
        for epoch in 0..6 {
            train_epoch(&mut dp, &mut opt, &sched, &loader, epoch, 10).unwrap();
        }
        let stats = validate(&dp, &loader, 10).unwrap();
        // Synthetic classes are separable; a trained model beats chance (25%).
        assert!(stats.top1 > 25.0);
        assert_eq!(stats.lr, 0.0);
    }
}
