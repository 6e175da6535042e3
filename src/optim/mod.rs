//! Optimization: SGD with momentum and dynamic loss scaling.

pub mod grad_scaler;
pub mod sgd;

pub use grad_scaler::{GradScaler, UnscaleOutcome};
pub use sgd::{Sgd, SgdConfig, SgdState};
