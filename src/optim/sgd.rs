//! SGD optimizer with momentum
//!
//! Implements stochastic gradient descent with optional momentum and weight
//! decay. Follows PyTorch's SGD semantics with Nesterov momentum support.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::Model;

/// SGD configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SgdConfig {
    pub lr: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    pub dampening: f64,
    pub nesterov: bool,
}

impl Default for SgdConfig {
    fn default() -> Self {
        Self {
            lr: 0.01,
            momentum: 0.0,
            weight_decay: 0.0,
            dampening: 0.0,
            nesterov: false,
        }
    }
}

/// Serializable optimizer state for checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SgdState {
    pub config: SgdConfig,
    pub velocity: HashMap<String, Vec<f32>>,
}

/// SGD optimizer with optional momentum
///
/// When `momentum > 0`, maintains a velocity buffer per parameter, keyed by
/// the parameter's name from the model's parameter walk.
///
/// Update rules (following PyTorch):
/// - L2 weight decay: `grad = grad + weight_decay * param`
/// - Momentum: `buf = momentum * buf + (1 - dampening) * grad`
/// - Nesterov: `update = grad + momentum * buf`
/// - Standard: `update = buf`
/// - Parameter: `param = param - lr * update`
pub struct Sgd {
    config: SgdConfig,
    velocity: HashMap<String, Vec<f32>>,
}

impl Sgd {
    pub fn new(config: SgdConfig) -> Self {
        Self {
            config,
            velocity: HashMap::new(),
        }
    }

    pub fn config(&self) -> &SgdConfig {
        &self.config
    }

    pub fn set_lr(&mut self, lr: f64) {
        self.config.lr = lr;
    }

    pub fn lr(&self) -> f64 {
        self.config.lr
    }

    pub fn reset(&mut self) {
        self.velocity.clear();
    }

    /// Apply one update step to every parameter of `model` using the
    /// gradients accumulated by its backward pass.
    pub fn step(&mut self, model: &mut dyn Model) -> Result<()> {
        let lr = self.config.lr as f32;
        let momentum = self.config.momentum as f32;
        let wd = self.config.weight_decay as f32;
        let dampening = self.config.dampening as f32;
        let nesterov = self.config.nesterov;
        let velocity = &mut self.velocity;

        let mut mismatch: Option<String> = None;
        model.visit_params(&mut |name, vals, grads| {
            if mismatch.is_some() {
                return;
            }
            if momentum > 0.0 {
                let buf = velocity.entry(name.to_string()).or_insert_with(Vec::new);
                let first = buf.is_empty();
                if first {
                    buf.resize(vals.len(), 0.0);
                } else if buf.len() != vals.len() {
                    mismatch = Some(name.to_string());
                    return;
                }
                for ((v, g), b) in vals.iter_mut().zip(grads.iter()).zip(buf.iter_mut()) {
                    let d = *g + wd * *v;
                    *b = if first { d } else { momentum * *b + (1.0 - dampening) * d };
                    let update = if nesterov { d + momentum * *b } else { *b };
                    *v -= lr * update;
                }
            } else {
                for (v, g) in vals.iter_mut().zip(grads.iter()) {
                    *v -= lr * (*g + wd * *v);
                }
            }
        });

        match mismatch {
            Some(name) => Err(Error::TrainingError {
                reason: format!("velocity buffer for '{name}' does not match parameter size"),
            }),
            None => Ok(()),
        }
    }

    pub fn state_dict(&self) -> SgdState {
        SgdState {
            config: self.config.clone(),
            velocity: self.velocity.clone(),
        }
    }

    pub fn load_state_dict(&mut self, state: SgdState) {
        self.config = state.config;
        self.velocity = state.velocity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{build_model, Arch};
    use crate::nn::cross_entropy;
    use ndarray::Array;

    fn batch(n: usize, dim: usize) -> ndarray::Array4<f32> {
        Array::from_shape_fn((n, 1, 1, dim), |(i, _, _, d)| {
            ((i * dim + d) as f32 * 0.53).cos()
        })
    }

    #[test]
    fn test_sgd_default_config() {
        let config = SgdConfig::default();
        assert_eq!(config.lr, 0.01);
        assert_eq!(config.momentum, 0.0);
        assert_eq!(config.weight_decay, 0.0);
        assert_eq!(config.dampening, 0.0);
        assert!(!config.nesterov);
    }

    #[test]
    fn test_sgd_vanilla_step() {
        let mut model = build_model(Arch::Linear, 4, 2, 0).unwrap();
        // Install a known gradient, then check param -= lr * grad.
        let mut before = Vec::new();
        model.visit_params(&mut |_, vals, grads| {
            before.extend_from_slice(vals);
            for g in grads.iter_mut() {
                *g = 0.5;
            }
        });
        let mut opt = Sgd::new(SgdConfig {
            lr: 0.1,
            ..Default::default()
        });
        opt.step(model.as_mut()).unwrap();
        let mut after = Vec::new();
        model.visit_params(&mut |_, vals, _| after.extend_from_slice(vals));
        for (b, a) in before.iter().zip(after.iter()) {
            assert!((a - (b - 0.05)).abs() < 1e-6);
        }
    }

    #[test]
    fn test_sgd_weight_decay() {
        let mut model = build_model(Arch::Linear, 2, 2, 0).unwrap();
        model.visit_params(&mut |name, vals, grads| {
            if name == "fc.bias" {
                vals.fill(5.0);
            }
            grads.fill(0.0);
        });
        let mut opt = Sgd::new(SgdConfig {
            lr: 0.1,
            weight_decay: 0.1,
            ..Default::default()
        });
        opt.step(model.as_mut()).unwrap();
        model.visit_params(&mut |name, vals, _| {
            if name == "fc.bias" {
                // grad = 0 + 0.1 * 5.0 = 0.5, param = 5.0 - 0.1 * 0.5 = 4.95
                assert!(vals.iter().all(|v| (v - 4.95).abs() < 1e-5));
            }
        });
    }

    #[test]
    fn test_sgd_momentum_converges() {
        let mut model = build_model(Arch::Mlp, 4, 2, 3).unwrap();
        let x = batch(8, 4);
        let labels = [0, 1, 0, 1, 0, 1, 0, 1];
        let mut opt = Sgd::new(SgdConfig {
            lr: 0.05,
            momentum: 0.9,
            nesterov: true,
            ..Default::default()
        });

        let mut first_loss = 0.0;
        let mut last_loss = 0.0;
        for i in 0..60 {
            model.zero_grad();
            let logits = model.forward_train(&x).unwrap();
            let (loss, grad) = cross_entropy(&logits, &labels).unwrap();
            if i == 0 {
                first_loss = loss;
            }
            last_loss = loss;
            model.backward(&grad).unwrap();
            opt.step(model.as_mut()).unwrap();
        }
        assert!(
            last_loss < first_loss * 0.5,
            "loss should decrease: first={first_loss} last={last_loss}"
        );
    }

    #[test]
    fn test_sgd_state_round_trip() {
        let mut model = build_model(Arch::Linear, 4, 2, 0).unwrap();
        model.visit_params(&mut |_, _, grads| grads.fill(1.0));
        let mut opt = Sgd::new(SgdConfig {
            lr: 0.1,
            momentum: 0.9,
            ..Default::default()
        });
        opt.step(model.as_mut()).unwrap();

        let state = opt.state_dict();
        let json = serde_json::to_string(&state).unwrap();
        let mut restored = Sgd::new(SgdConfig::default());
        restored.load_state_dict(serde_json::from_str(&json).unwrap());
        assert_eq!(restored.lr(), 0.1);
        assert_eq!(restored.state_dict().velocity, state.velocity);
    }

    #[test]
    fn test_sgd_set_lr() {
        let mut opt = Sgd::new(SgdConfig::default());
        opt.set_lr(0.05);
        assert_eq!(opt.lr(), 0.05);
    }
}
