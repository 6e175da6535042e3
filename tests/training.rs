//! End-to-end tests for the run orchestrator: fresh runs, checkpointing,
//! dashboard output, resume, evaluate-only, and multi-rank lockstep.

use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use lockstep::config::RunConfig;
use lockstep::dashboard::{ScalarEvent, SCALAR_FILE};
use lockstep::data::InMemoryDataset;
use lockstep::distributed::{LocalCommunicator, NoOpCommunicator};
use lockstep::model::{build_model, Arch};
use lockstep::optim::{Sgd, SgdConfig};
use lockstep::precision::Precision;
use lockstep::run::run_with;
use lockstep::trainer::{save_checkpoint, CheckpointRecord, BEST_FILE, CHECKPOINT_FILE};

fn dataset(n: usize) -> InMemoryDataset {
    InMemoryDataset::synthetic(n, 4, (1, 2, 2), 11).unwrap()
}

fn config(out: &TempDir, epochs: u64) -> RunConfig {
    RunConfig {
        data_dir: out.path().to_path_buf(),
        arch: Arch::Linear,
        workers: 2,
        epochs,
        start_epoch: 0,
        batch_size: 4,
        base_lr: 0.05,
        momentum: 0.9,
        weight_decay: 1e-4,
        print_freq: 2,
        resume: None,
        evaluate: false,
        pretrained: None,
        sync_bn: false,
        precision: Precision::Fp32,
        channels_last: false,
        train_split: "train".to_string(),
        val_split: "val".to_string(),
        image_size: 2,
        seed: 1,
        output_dir: out.path().join("out"),
    }
}

fn saved_record(epoch: u64, best: f64) -> CheckpointRecord {
    CheckpointRecord {
        epoch,
        arch: Arch::Linear,
        best_prec1: best,
        model_state: build_model(Arch::Linear, 4, 4, 1).unwrap().state_dict(),
        optimizer_state: Sgd::new(SgdConfig::default()).state_dict(),
    }
}

#[test]
fn test_fresh_run_trains_and_checkpoints() {
    let tmp = TempDir::new().unwrap();
    let cfg = config(&tmp, 3);
    let summary = run_with(&cfg, Arc::new(NoOpCommunicator), dataset(32), dataset(16)).unwrap();

    assert_eq!(summary.start_epoch, 0);
    assert_eq!(summary.epochs_completed, 3);
    assert!((0.0..=100.0).contains(&summary.final_top1));
    assert!(cfg.output_dir.join(CHECKPOINT_FILE).exists());
    assert!(cfg.output_dir.join(BEST_FILE).exists());
}

#[test]
fn test_dashboard_scalars_per_epoch() {
    let tmp = TempDir::new().unwrap();
    let cfg = config(&tmp, 2);
    run_with(&cfg, Arc::new(NoOpCommunicator), dataset(32), dataset(16)).unwrap();

    let events: Vec<ScalarEvent> = std::fs::read_to_string(cfg.output_dir.join(SCALAR_FILE))
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();

    // 11 series per epoch, steps numbered from 1.
    assert_eq!(events.len(), 22);
    let epoch1: Vec<&ScalarEvent> = events.iter().filter(|e| e.step == 1).collect();
    assert_eq!(epoch1.len(), 11);
    for tag in [
        "Throughput/train",
        "Throughput/val",
        "Time/train",
        "Time/val",
        "Loss/train",
        "Loss/val",
        "Top1/train",
        "Top1/val",
        "Top5/train",
        "Top5/val",
        "Lr",
    ] {
        assert!(epoch1.iter().any(|e| e.tag == tag), "missing {tag}");
    }
    assert!(events.iter().all(|e| e.step == 1 || e.step == 2));
}

#[test]
fn test_resume_restores_epoch_and_best() {
    let tmp = TempDir::new().unwrap();
    save_checkpoint(&tmp.path().join("ck"), &saved_record(5, 42.0), false).unwrap();

    // epochs == start_epoch, so nothing trains and the restored values
    // surface unchanged.
    let mut cfg = config(&tmp, 6);
    cfg.resume = Some(tmp.path().join("ck").join(CHECKPOINT_FILE));
    let summary = run_with(&cfg, Arc::new(NoOpCommunicator), dataset(32), dataset(16)).unwrap();
    assert_eq!(summary.start_epoch, 6);
    assert_eq!(summary.best_prec1, 42.0);
    assert_eq!(summary.epochs_completed, 0);

    // With one more epoch budgeted, exactly one epoch runs.
    let mut cfg = config(&tmp, 7);
    cfg.resume = Some(tmp.path().join("ck").join(CHECKPOINT_FILE));
    let summary = run_with(&cfg, Arc::new(NoOpCommunicator), dataset(32), dataset(16)).unwrap();
    assert_eq!(summary.start_epoch, 6);
    assert!(summary.best_prec1 >= 42.0);
    assert_eq!(summary.epochs_completed, 1);
}

#[test]
fn test_start_epoch_skips_earlier_epochs() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = config(&tmp, 3);
    cfg.start_epoch = 2;
    let summary = run_with(&cfg, Arc::new(NoOpCommunicator), dataset(32), dataset(16)).unwrap();
    assert_eq!(summary.start_epoch, 2);
    assert_eq!(summary.epochs_completed, 1);
}

#[test]
fn test_resume_overrides_start_epoch() {
    let tmp = TempDir::new().unwrap();
    save_checkpoint(&tmp.path().join("ck"), &saved_record(5, 42.0), false).unwrap();

    let mut cfg = config(&tmp, 7);
    cfg.start_epoch = 1;
    cfg.resume = Some(tmp.path().join("ck").join(CHECKPOINT_FILE));
    let summary = run_with(&cfg, Arc::new(NoOpCommunicator), dataset(32), dataset(16)).unwrap();
    assert_eq!(summary.start_epoch, 6);
    assert_eq!(summary.epochs_completed, 1);
}

#[test]
fn test_resume_missing_file_starts_fresh() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = config(&tmp, 1);
    cfg.resume = Some(tmp.path().join("does-not-exist.json"));
    let summary = run_with(&cfg, Arc::new(NoOpCommunicator), dataset(32), dataset(16)).unwrap();
    assert_eq!(summary.start_epoch, 0);
    assert_eq!(summary.epochs_completed, 1);
}

#[test]
fn test_resume_arch_mismatch_fails() {
    let tmp = TempDir::new().unwrap();
    let mut record = saved_record(2, 10.0);
    record.arch = Arch::Mlp;
    record.model_state = build_model(Arch::Mlp, 4, 4, 1).unwrap().state_dict();
    save_checkpoint(&tmp.path().join("ck"), &record, false).unwrap();

    let mut cfg = config(&tmp, 3);
    cfg.resume = Some(tmp.path().join("ck").join(CHECKPOINT_FILE));
    assert!(run_with(&cfg, Arc::new(NoOpCommunicator), dataset(32), dataset(16)).is_err());
}

#[test]
fn test_evaluate_only_runs_no_training() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = config(&tmp, 5);
    cfg.evaluate = true;
    let summary = run_with(&cfg, Arc::new(NoOpCommunicator), dataset(32), dataset(16)).unwrap();
    assert_eq!(summary.epochs_completed, 0);
    assert!((0.0..=100.0).contains(&summary.final_top1));
    assert!(!cfg.output_dir.join(CHECKPOINT_FILE).exists());
}

#[test]
fn test_pretrained_weights_load() {
    let tmp = TempDir::new().unwrap();
    save_checkpoint(&tmp.path().join("pre"), &saved_record(0, 0.0), false).unwrap();

    let mut cfg = config(&tmp, 5);
    cfg.evaluate = true;
    cfg.pretrained = Some(tmp.path().join("pre").join(CHECKPOINT_FILE));
    let summary = run_with(&cfg, Arc::new(NoOpCommunicator), dataset(32), dataset(16)).unwrap();
    assert_eq!(summary.epochs_completed, 0);
}

#[test]
fn test_two_rank_run_agrees() {
    let tmp0 = TempDir::new().unwrap();
    let tmp1 = TempDir::new().unwrap();
    let cfgs = [config(&tmp0, 2), config(&tmp1, 2)];

    let comms = LocalCommunicator::group(2).unwrap();
    let handles: Vec<_> = comms
        .into_iter()
        .zip(cfgs)
        .map(|(comm, cfg)| {
            thread::spawn(move || {
                run_with(&cfg, Arc::new(comm), dataset(32), dataset(16)).unwrap()
            })
        })
        .collect();

    let summaries: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    // Metrics are reduced across ranks, so both report the same numbers.
    assert!((summaries[0].best_prec1 - summaries[1].best_prec1).abs() < 1e-9);
    assert!((summaries[0].final_top1 - summaries[1].final_top1).abs() < 1e-9);
    assert_eq!(summaries[0].epochs_completed, 2);
    // Only rank 0 writes artifacts; rank 1's output directory stays empty.
    assert!(tmp0.path().join("out").join(CHECKPOINT_FILE).exists());
    assert!(tmp0.path().join("out").join(SCALAR_FILE).exists());
    assert!(!tmp1.path().join("out").join(CHECKPOINT_FILE).exists());
    assert!(!tmp1.path().join("out").join(SCALAR_FILE).exists());
}
