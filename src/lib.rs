//! # lockstep
//!
//! **Distributed image-classification training harness.**
//!
//! lockstep orchestrates data-parallel, mixed-precision training: per-rank
//! dataset sharding, collective gradient averaging, learning-rate scheduling
//! with warmup, metric aggregation and periodic logging, and checkpoint
//! persistence with best-model tracking.
//!
//! ## Design
//!
//! - **Communicator seam**: all cross-process traffic goes through one trait;
//!   single-process runs use a no-op implementation, tests use an in-process
//!   rendezvous, so the training loop is identical in every topology
//! - **Typed wrap order**: the precision wrapper takes the bare model and the
//!   data-parallel wrapper only accepts a precision-wrapped model, so loss
//!   scaling always sits inside gradient averaging
//! - **Explicit backward**: models implement forward/backward with plain
//!   `ndarray` math and expose parameters through a visitor, which is all the
//!   optimizer and the collectives need

pub mod config;
pub mod dashboard;
pub mod data;
pub mod distributed;
pub mod error;
pub mod metrics;
pub mod model;
pub mod nn;
pub mod optim;
pub mod parallel;
pub mod precision;
pub mod run;
pub mod schedule;
pub mod trainer;

pub use config::{Cli, RunConfig};
pub use error::{Error, Result};
pub use run::{run_with, RunSummary};
