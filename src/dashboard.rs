//! Append-only scalar log for training dashboards.
//!
//! Each call appends one JSON line `{"tag": ..., "value": ..., "step": ...}`
//! to the event file, so an external plotter can tail the run. Only rank 0
//! should create a writer.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const SCALAR_FILE: &str = "scalars.jsonl";

/// One logged scalar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalarEvent {
    pub tag: String,
    pub value: f64,
    pub step: u64,
}

/// Writes scalar events to `<dir>/scalars.jsonl`.
pub struct ScalarWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl ScalarWriter {
    /// Open (appending) the event file under `dir`.
    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| Error::ConfigError {
            reason: format!("cannot create output dir '{}': {e}", dir.display()),
        })?;
        let path = dir.join(SCALAR_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::ConfigError {
                reason: format!("cannot open scalar log '{}': {e}", path.display()),
            })?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add_scalar(&mut self, tag: &str, value: f64, step: u64) -> Result<()> {
        let event = ScalarEvent {
            tag: tag.to_string(),
            value,
            step,
        };
        let line = serde_json::to_string(&event).map_err(|e| Error::ConfigError {
            reason: format!("cannot serialize scalar event: {e}"),
        })?;
        writeln!(self.out, "{line}").map_err(|e| Error::ConfigError {
            reason: format!("cannot write scalar log '{}': {e}", self.path.display()),
        })
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush().map_err(|e| Error::ConfigError {
            reason: format!("cannot flush scalar log '{}': {e}", self.path.display()),
        })
    }
}
