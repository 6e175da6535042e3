//! Mixed-precision policy and the model wrapper that applies it.
//!
//! Reduced-precision modes round activations through IEEE half floats and
//! scale the loss before backward so small gradients survive the narrow FP16
//! exponent range. Parameters stay in FP32 master form; the scaler unscales
//! gradients before the optimizer step and skips steps that overflowed.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use half::f16;
use ndarray::{Array2, Array4};

use crate::distributed::Communicator;
use crate::error::{Error, Result};
use crate::model::Model;
use crate::optim::{GradScaler, UnscaleOutcome};

const STATIC_LOSS_SCALE: f64 = 128.0;

/// Numeric policy for forward/backward compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    /// Full FP32, no loss scaling.
    Fp32,
    /// Half-precision activations with dynamic loss scaling.
    Amp,
    /// Half-precision activations with a fixed loss scale.
    Fp16,
}

impl Precision {
    pub fn name(&self) -> &'static str {
        match self {
            Precision::Fp32 => "fp32",
            Precision::Amp => "amp",
            Precision::Fp16 => "fp16",
        }
    }

    fn reduced(&self) -> bool {
        !matches!(self, Precision::Fp32)
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Precision {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fp32" => Ok(Precision::Fp32),
            "amp" => Ok(Precision::Amp),
            "fp16" => Ok(Precision::Fp16),
            other => Err(Error::ConfigError {
                reason: format!("unknown precision '{other}' (choose fp32, amp, or fp16)"),
            }),
        }
    }
}

fn round_half_2(x: &Array2<f32>) -> Array2<f32> {
    x.mapv(|v| f16::from_f32(v).to_f32())
}

fn round_half_4(x: &Array4<f32>) -> Array4<f32> {
    x.mapv(|v| f16::from_f32(v).to_f32())
}

/// A model with a precision policy applied.
///
/// Must wrap the bare model BEFORE any data-parallel wrapper, so gradient
/// averaging across ranks sees the scaled gradients and a single unscale
/// happens right before the optimizer step.
pub struct AmpModel {
    inner: Box<dyn Model>,
    precision: Precision,
    scaler: Option<GradScaler>,
}

impl AmpModel {
    pub fn new(inner: Box<dyn Model>, precision: Precision) -> Result<Self> {
        let scaler = match precision {
            Precision::Fp32 => None,
            Precision::Amp => Some(GradScaler::default_dynamic()),
            Precision::Fp16 => Some(GradScaler::fixed(STATIC_LOSS_SCALE)?),
        };
        Ok(Self {
            inner,
            precision,
            scaler,
        })
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Current loss scale (1.0 in FP32 mode).
    pub fn loss_scale(&self) -> f64 {
        self.scaler.as_ref().map_or(1.0, |s| s.scale())
    }

    pub fn model(&self) -> &dyn Model {
        self.inner.as_ref()
    }

    pub fn model_mut(&mut self) -> &mut dyn Model {
        self.inner.as_mut()
    }

    pub fn forward_train(&mut self, images: &Array4<f32>) -> Result<Array2<f32>> {
        if self.precision.reduced() {
            let logits = self.inner.forward_train(&round_half_4(images))?;
            Ok(round_half_2(&logits))
        } else {
            self.inner.forward_train(images)
        }
    }

    pub fn forward_eval(&self, images: &Array4<f32>) -> Result<Array2<f32>> {
        if self.precision.reduced() {
            let logits = self.inner.forward_eval(&round_half_4(images))?;
            Ok(round_half_2(&logits))
        } else {
            self.inner.forward_eval(images)
        }
    }

    /// Backward pass with the loss gradient multiplied by the current scale.
    pub fn backward_scaled(&mut self, grad_logits: &Array2<f32>) -> Result<()> {
        match &self.scaler {
            Some(scaler) => {
                let scale = scaler.scale() as f32;
                self.inner.backward(&grad_logits.mapv(|g| g * scale))
            }
            None => self.inner.backward(grad_logits),
        }
    }

    /// Divide accumulated gradients by the scale and check for overflow.
    /// Always `Ok` in FP32 mode.
    pub fn unscale_grads(&mut self) -> UnscaleOutcome {
        match self.scaler.take() {
            Some(scaler) => {
                let outcome = scaler.unscale(self.inner.as_mut());
                self.scaler = Some(scaler);
                outcome
            }
            None => UnscaleOutcome::Ok,
        }
    }

    /// Adjust the dynamic scale after a step (or a skipped step).
    pub fn update_scale(&mut self, overflow: bool) {
        if let Some(scaler) = &mut self.scaler {
            scaler.update_scale(overflow);
        }
    }

    pub fn zero_grad(&mut self) {
        self.inner.zero_grad();
    }

    pub fn convert_sync_batchnorm(&mut self, comm: Arc<dyn Communicator>) {
        self.inner.convert_sync_batchnorm(comm);
    }
}
