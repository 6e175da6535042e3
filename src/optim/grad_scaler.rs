//! Dynamic loss scaling for FP16 mixed precision training
//!
//! FP16 has a narrower exponent range than FP32, so gradients can underflow.
//! GradScaler multiplies the loss by a large scale factor before backward,
//! then divides gradients by that factor. If NaN/Inf is detected, the step is
//! skipped and the scale is reduced.

use crate::error::{Error, Result};
use crate::model::Model;

/// Result of unscaling gradients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnscaleOutcome {
    /// Gradients are valid after unscaling
    Ok,
    /// Overflow/NaN detected, skip this optimizer step
    Overflow,
}

/// Dynamic loss scaler for FP16 training
///
/// Maintains a scale factor that grows when training is stable and shrinks
/// when overflow is detected. Construct with a `growth_factor` of 1.0 and the
/// scale stays fixed, which matches static loss scaling.
pub struct GradScaler {
    scale: f64,
    growth_factor: f64,
    backoff_factor: f64,
    growth_interval: u64,
    consecutive_ok: u64,
}

impl GradScaler {
    /// Create a new GradScaler with dynamic scaling parameters.
    ///
    /// # Arguments
    /// * `initial_scale` - Starting loss scale (e.g., 2^16 = 65536)
    /// * `growth_factor` - Multiply scale by this after `growth_interval` clean steps
    /// * `backoff_factor` - Multiply scale by this on overflow (e.g., 0.5)
    /// * `growth_interval` - Number of consecutive clean steps before growing scale
    pub fn new(
        initial_scale: f64,
        growth_factor: f64,
        backoff_factor: f64,
        growth_interval: u64,
    ) -> Result<Self> {
        if initial_scale <= 0.0 {
            return Err(Error::TrainingError {
                reason: format!("initial_scale must be positive, got {initial_scale}"),
            });
        }
        if growth_factor < 1.0 {
            return Err(Error::TrainingError {
                reason: format!("growth_factor must be >= 1.0, got {growth_factor}"),
            });
        }
        if backoff_factor <= 0.0 || backoff_factor >= 1.0 {
            return Err(Error::TrainingError {
                reason: format!("backoff_factor must be in (0, 1), got {backoff_factor}"),
            });
        }
        if growth_interval == 0 {
            return Err(Error::TrainingError {
                reason: "growth_interval must be > 0".to_string(),
            });
        }

        Ok(Self {
            scale: initial_scale,
            growth_factor,
            backoff_factor,
            growth_interval,
            consecutive_ok: 0,
        })
    }

    /// Create with sensible defaults: scale=65536, grow=2x, backoff=0.5x, interval=2000
    pub fn default_dynamic() -> Self {
        Self {
            scale: 65536.0,
            growth_factor: 2.0,
            backoff_factor: 0.5,
            growth_interval: 2000,
            consecutive_ok: 0,
        }
    }

    /// Create a fixed-scale scaler that never grows or shrinks.
    pub fn fixed(scale: f64) -> Result<Self> {
        Self::new(scale, 1.0, 0.5, u64::MAX)
    }

    /// Get the current loss scale factor.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Scale a loss value before the backward pass.
    pub fn scale_loss(&self, loss: f64) -> f64 {
        loss * self.scale
    }

    /// Unscale the model's accumulated gradients in place and check for
    /// NaN/Inf.
    ///
    /// On `Overflow` the gradients are left partially unscaled; the caller
    /// must skip the optimizer step and zero the gradients.
    pub fn unscale(&self, model: &mut dyn Model) -> UnscaleOutcome {
        let inv_scale = (1.0 / self.scale) as f32;
        let mut overflow = false;
        model.visit_params(&mut |_, _, grads| {
            if overflow {
                return;
            }
            for g in grads.iter_mut() {
                *g *= inv_scale;
                if !g.is_finite() {
                    overflow = true;
                    return;
                }
            }
        });
        if overflow {
            UnscaleOutcome::Overflow
        } else {
            UnscaleOutcome::Ok
        }
    }

    /// Update the scale factor after an optimizer step.
    ///
    /// Call with `overflow=true` if `unscale` returned `Overflow`, with
    /// `overflow=false` after a successful optimizer step.
    pub fn update_scale(&mut self, overflow: bool) {
        if overflow {
            self.scale *= self.backoff_factor;
            self.consecutive_ok = 0;
        } else {
            self.consecutive_ok += 1;
            if self.consecutive_ok >= self.growth_interval {
                self.scale *= self.growth_factor;
                self.consecutive_ok = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{build_model, Arch};

    #[test]
    fn test_grad_scaler_default() {
        let scaler = GradScaler::default_dynamic();
        assert_eq!(scaler.scale(), 65536.0);
    }

    #[test]
    fn test_scale_loss() {
        let scaler = GradScaler::default_dynamic();
        assert_eq!(scaler.scale_loss(1.0), 65536.0);
        assert_eq!(scaler.scale_loss(0.5), 32768.0);
    }

    #[test]
    fn test_unscale_ok() {
        let mut model = build_model(Arch::Linear, 2, 2, 0).unwrap();
        model.visit_params(&mut |_, _, grads| grads.fill(200.0));
        let scaler = GradScaler::new(100.0, 2.0, 0.5, 10).unwrap();
        assert_eq!(scaler.unscale(model.as_mut()), UnscaleOutcome::Ok);
        model.visit_params(&mut |_, _, grads| {
            assert!(grads.iter().all(|g| (g - 2.0).abs() < 1e-5));
        });
    }

    #[test]
    fn test_unscale_overflow() {
        let mut model = build_model(Arch::Linear, 2, 2, 0).unwrap();
        model.visit_params(&mut |name, _, grads| {
            if name == "fc.bias" {
                grads[0] = f32::NAN;
            }
        });
        let scaler = GradScaler::new(100.0, 2.0, 0.5, 10).unwrap();
        assert_eq!(scaler.unscale(model.as_mut()), UnscaleOutcome::Overflow);
    }

    #[test]
    fn test_update_scale_growth() {
        let mut scaler = GradScaler::new(100.0, 2.0, 0.5, 3).unwrap();
        scaler.update_scale(false);
        scaler.update_scale(false);
        assert_eq!(scaler.scale(), 100.0);
        scaler.update_scale(false);
        assert_eq!(scaler.scale(), 200.0);
    }

    #[test]
    fn test_update_scale_backoff() {
        let mut scaler = GradScaler::new(100.0, 2.0, 0.5, 3).unwrap();
        scaler.update_scale(true);
        assert_eq!(scaler.scale(), 50.0);
        scaler.update_scale(false);
        scaler.update_scale(false);
        scaler.update_scale(true);
        assert_eq!(scaler.scale(), 25.0);
    }

    #[test]
    fn test_fixed_scale_never_moves_up() {
        let mut scaler = GradScaler::fixed(128.0).unwrap();
        for _ in 0..5000 {
            scaler.update_scale(false);
        }
        assert_eq!(scaler.scale(), 128.0);
    }

    #[test]
    fn test_invalid_params() {
        assert!(GradScaler::new(0.0, 2.0, 0.5, 10).is_err());
        assert!(GradScaler::new(100.0, 0.5, 0.5, 10).is_err());
        assert!(GradScaler::new(100.0, 2.0, 1.5, 10).is_err());
        assert!(GradScaler::new(100.0, 2.0, 0.5, 0).is_err());
    }
}
