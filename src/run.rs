//! Run orchestration.
//!
//! Builds the model, applies the precision and data-parallel wrappers in that
//! order, restores checkpoints, and drives the epoch loop: train, validate,
//! track the best validation top-1, persist state, and emit per-epoch
//! dashboard scalars from rank 0.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::config::RunConfig;
use crate::dashboard::ScalarWriter;
use crate::data::{new_sharded, DataLoader, Dataset};
use crate::distributed::Communicator;
use crate::error::{Error, Result};
use crate::model::build_model;
use crate::optim::{Sgd, SgdConfig};
use crate::parallel::DataParallel;
use crate::precision::AmpModel;
use crate::schedule::LrSchedule;
use crate::trainer::{
    load_checkpoint, save_checkpoint, train_epoch, validate, CheckpointRecord, EpochStats,
};

/// What a run did, for callers and tests.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// First epoch actually trained (non-zero after a resume).
    pub start_epoch: u64,
    /// Best validation top-1 seen, including any resumed value.
    pub best_prec1: f64,
    /// Top-1 of the final validation pass.
    pub final_top1: f64,
    pub epochs_completed: u64,
}

/// Execute a full run on the given communicator and datasets.
///
/// Training and validation datasets are sharded per rank here; callers pass
/// the full datasets.
pub fn run_with<T, V>(
    cfg: &RunConfig,
    comm: Arc<dyn Communicator>,
    train_data: T,
    val_data: V,
) -> Result<RunSummary>
where
    T: Dataset,
    V: Dataset,
{
    let started = Instant::now();
    let rank = comm.rank();
    let world_size = comm.world_size();

    if train_data.num_classes() != val_data.num_classes() {
        return Err(Error::DataError {
            reason: format!(
                "train has {} classes but val has {}",
                train_data.num_classes(),
                val_data.num_classes()
            ),
        });
    }
    let (c, h, w) = train_data.image_shape();
    let num_classes = train_data.num_classes();

    let mut model = build_model(cfg.arch, c * h * w, num_classes, cfg.seed)?;

    if let Some(path) = &cfg.pretrained {
        let record = load_checkpoint(path)?;
        if record.arch != cfg.arch {
            return Err(Error::ConfigError {
                reason: format!(
                    "pretrained checkpoint is for arch '{}', run uses '{}'",
                    record.arch, cfg.arch
                ),
            });
        }
        model.load_state_dict(&record.model_state)?;
        if rank == 0 {
            info!("initialized '{}' weights from '{}'", cfg.arch, path.display());
        }
    }

    if cfg.sync_bn {
        model.convert_sync_batchnorm(Arc::clone(&comm));
    }

    // Precision wrap must precede the parallel wrap; `DataParallel::new`
    // only accepts an `AmpModel`.
    let amp = AmpModel::new(model, cfg.precision)?;
    let mut model = DataParallel::new(amp, Arc::clone(&comm))?;

    let mut optimizer = Sgd::new(SgdConfig {
        lr: cfg.base_lr,
        momentum: cfg.momentum,
        weight_decay: cfg.weight_decay,
        dampening: 0.0,
        nesterov: false,
    });
    let schedule = LrSchedule::new(cfg.base_lr);

    let mut start_epoch: u64 = cfg.start_epoch;
    let mut best_prec1: f64 = 0.0;
    if let Some(path) = &cfg.resume {
        match load_checkpoint(path) {
            Ok(record) => {
                if record.arch != cfg.arch {
                    return Err(Error::ConfigError {
                        reason: format!(
                            "checkpoint is for arch '{}', run uses '{}'",
                            record.arch, cfg.arch
                        ),
                    });
                }
                model.model_mut().model_mut().load_state_dict(&record.model_state)?;
                optimizer.load_state_dict(record.optimizer_state);
                start_epoch = record.epoch + 1;
                best_prec1 = record.best_prec1;
                if rank == 0 {
                    info!(
                        "loaded checkpoint '{}' (epoch {})",
                        path.display(),
                        record.epoch
                    );
                }
            }
            Err(Error::CheckpointNotFound { path }) => {
                warn!("no checkpoint found at '{}', starting fresh", path.display());
            }
            Err(e) => return Err(e),
        }
    }

    let train_loader = DataLoader::new(
        new_sharded(train_data, rank, world_size)?,
        cfg.batch_size,
        cfg.seed,
        true,
    )
    .with_workers(cfg.workers)?
    .with_channels_last(cfg.channels_last);
    let val_loader = DataLoader::new(
        new_sharded(val_data, rank, world_size)?,
        cfg.batch_size,
        cfg.seed,
        false,
    )
    .with_workers(cfg.workers)?
    .with_channels_last(cfg.channels_last);

    if cfg.evaluate {
        let stats = validate(&model, &val_loader, cfg.print_freq)?;
        return Ok(RunSummary {
            start_epoch,
            best_prec1: best_prec1.max(stats.top1),
            final_top1: stats.top1,
            epochs_completed: 0,
        });
    }

    let mut dashboard = if rank == 0 {
        Some(ScalarWriter::create(&cfg.output_dir)?)
    } else {
        None
    };

    let mut final_top1 = 0.0;
    let mut epochs_completed = 0;
    for epoch in start_epoch..cfg.epochs {
        let train_stats = train_epoch(
            &mut model,
            &mut optimizer,
            &schedule,
            &train_loader,
            epoch,
            cfg.print_freq,
        )?;
        let val_stats = validate(&model, &val_loader, cfg.print_freq)?;
        final_top1 = val_stats.top1;
        epochs_completed += 1;

        let is_best = val_stats.top1 > best_prec1;
        best_prec1 = best_prec1.max(val_stats.top1);

        if rank == 0 {
            let record = CheckpointRecord {
                epoch,
                arch: cfg.arch,
                best_prec1,
                model_state: model.model().model().state_dict(),
                optimizer_state: optimizer.state_dict(),
            };
            save_checkpoint(&cfg.output_dir, &record, is_best)?;
            if let Some(writer) = dashboard.as_mut() {
                write_epoch_scalars(writer, epoch + 1, &train_stats, &val_stats)?;
            }
        }

        // No rank starts the next epoch until rank 0 has persisted this one.
        comm.barrier()?;
    }

    if rank == 0 {
        let total = started.elapsed().as_secs();
        info!(
            "run finished in {}h {}m {}s  best Prec@1 {:.3}  config {:?}",
            total / 3600,
            (total % 3600) / 60,
            total % 60,
            best_prec1,
            cfg,
        );
    }

    Ok(RunSummary {
        start_epoch,
        best_prec1,
        final_top1,
        epochs_completed,
    })
}

fn write_epoch_scalars(
    writer: &mut ScalarWriter,
    step: u64,
    train: &EpochStats,
    val: &EpochStats,
) -> Result<()> {
    writer.add_scalar("Throughput/train", train.throughput, step)?;
    writer.add_scalar("Throughput/val", val.throughput, step)?;
    writer.add_scalar("Time/train", train.batch_time, step)?;
    writer.add_scalar("Time/val", val.batch_time, step)?;
    writer.add_scalar("Loss/train", train.loss, step)?;
    writer.add_scalar("Loss/val", val.loss, step)?;
    writer.add_scalar("Top1/train", train.top1, step)?;
    writer.add_scalar("Top1/val", val.top1, step)?;
    writer.add_scalar("Top5/train", train.top5, step)?;
    writer.add_scalar("Top5/val", val.top5, step)?;
    writer.add_scalar("Lr", train.lr, step)?;
    writer.flush()
}
