//! Command-line interface and the immutable run configuration built from it.
//!
//! `RunConfig` is created once at startup and passed by reference into every
//! component; nothing mutates it afterwards. The base learning rate stored
//! here is already scaled by the global batch size.

use std::path::PathBuf;

use clap::Parser;

use crate::error::{Error, Result};
use crate::model::Arch;
use crate::precision::Precision;
use crate::schedule::scale_base_lr;

/// Distributed image-classification trainer.
#[derive(Parser, Debug)]
#[command(name = "lockstep", version, about)]
pub struct Cli {
    /// Dataset root containing the train and val class-per-directory trees
    pub data: PathBuf,

    /// Model architecture
    #[arg(long, default_value = "mlp")]
    pub arch: String,

    /// Data-loading worker threads per process
    #[arg(long, short = 'j', default_value_t = 4)]
    pub workers: usize,

    /// Number of epochs to train
    #[arg(long, default_value_t = 90)]
    pub epochs: u64,

    /// First epoch index; a resumed checkpoint overrides this
    #[arg(long, default_value_t = 0)]
    pub start_epoch: u64,

    /// Per-process batch size
    #[arg(long, short = 'b', default_value_t = 256)]
    pub batch_size: usize,

    /// Base learning rate for a global batch of 256; scaled automatically
    #[arg(long, default_value_t = 0.1)]
    pub lr: f64,

    /// SGD momentum
    #[arg(long, default_value_t = 0.9)]
    pub momentum: f64,

    /// L2 weight decay
    #[arg(long, default_value_t = 1e-4)]
    pub weight_decay: f64,

    /// Log every N steps
    #[arg(long, default_value_t = 10)]
    pub print_freq: usize,

    /// Resume from a checkpoint file; if the file is missing, warn and start
    /// fresh
    #[arg(long)]
    pub resume: Option<PathBuf>,

    /// Run validation only, then exit
    #[arg(long, short = 'e')]
    pub evaluate: bool,

    /// Initialize model weights from a saved checkpoint (no optimizer state)
    #[arg(long)]
    pub pretrained: Option<PathBuf>,

    /// Use cross-process synchronized batch-norm statistics
    #[arg(long)]
    pub sync_bn: bool,

    /// Numeric policy: fp32, amp, or fp16
    #[arg(long, default_value = "amp")]
    pub precision: String,

    /// Store batched images with channels-last (NHWC) memory layout
    #[arg(long)]
    pub channels_last: bool,

    /// Name of the training split directory under the data root
    #[arg(long, default_value = "train")]
    pub train_split: String,

    /// Name of the validation split directory under the data root
    #[arg(long, default_value = "val")]
    pub val_split: String,

    /// Square side every image is resized to
    #[arg(long, default_value_t = 32)]
    pub image_size: usize,

    /// Seed for shuffling and parameter init
    #[arg(long, default_value_t = 1)]
    pub seed: u64,

    /// Directory for checkpoints and scalar logs
    #[arg(long, default_value = "runs")]
    pub output_dir: PathBuf,
}

/// Immutable configuration snapshot for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub data_dir: PathBuf,
    pub arch: Arch,
    pub workers: usize,
    pub epochs: u64,
    /// First epoch to train; a resumed checkpoint takes precedence.
    pub start_epoch: u64,
    pub batch_size: usize,
    /// Base LR already scaled by `batch_size * world_size / 256`.
    pub base_lr: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    pub print_freq: usize,
    pub resume: Option<PathBuf>,
    pub evaluate: bool,
    pub pretrained: Option<PathBuf>,
    pub sync_bn: bool,
    pub precision: Precision,
    pub channels_last: bool,
    pub train_split: String,
    pub val_split: String,
    pub image_size: usize,
    pub seed: u64,
    pub output_dir: PathBuf,
}

impl RunConfig {
    /// Validate CLI arguments and fold in the distributed topology.
    ///
    /// Fails fast on unsupported architectures and nonsensical values so a
    /// bad launch dies before any rank touches data.
    pub fn from_cli(cli: Cli, world_size: usize) -> Result<Self> {
        let arch: Arch = cli.arch.parse()?;
        arch.ensure_supported()?;
        let precision: Precision = cli.precision.parse()?;

        if cli.epochs == 0 {
            return Err(Error::ConfigError {
                reason: "epochs must be > 0".to_string(),
            });
        }
        if cli.batch_size == 0 {
            return Err(Error::ConfigError {
                reason: "batch_size must be > 0".to_string(),
            });
        }
        if cli.workers == 0 {
            return Err(Error::ConfigError {
                reason: "workers must be > 0".to_string(),
            });
        }
        if cli.print_freq == 0 {
            return Err(Error::ConfigError {
                reason: "print_freq must be > 0".to_string(),
            });
        }
        if cli.lr <= 0.0 {
            return Err(Error::ConfigError {
                reason: format!("lr must be positive, got {}", cli.lr),
            });
        }
        if cli.momentum < 0.0 {
            return Err(Error::ConfigError {
                reason: format!("momentum must be non-negative, got {}", cli.momentum),
            });
        }
        if cli.weight_decay < 0.0 {
            return Err(Error::ConfigError {
                reason: format!("weight_decay must be non-negative, got {}", cli.weight_decay),
            });
        }
        if cli.image_size == 0 {
            return Err(Error::ConfigError {
                reason: "image_size must be > 0".to_string(),
            });
        }

        Ok(Self {
            data_dir: cli.data,
            arch,
            workers: cli.workers,
            epochs: cli.epochs,
            start_epoch: cli.start_epoch,
            batch_size: cli.batch_size,
            base_lr: scale_base_lr(cli.lr, cli.batch_size, world_size),
            momentum: cli.momentum,
            weight_decay: cli.weight_decay,
            print_freq: cli.print_freq,
            resume: cli.resume,
            evaluate: cli.evaluate,
            pretrained: cli.pretrained,
            sync_bn: cli.sync_bn,
            precision,
            channels_last: cli.channels_last,
            train_split: cli.train_split,
            val_split: cli.val_split,
            image_size: cli.image_size,
            seed: cli.seed,
            output_dir: cli.output_dir,
        })
    }
}
