//! Batch normalization over a feature dimension, with optional cross-process
//! synchronized statistics.
//!
//! In sync mode the per-feature batch mean and second moment are averaged
//! across all ranks through the communicator, and the backward pass reduces
//! the per-feature gradient sums the same way, so every rank normalizes with
//! identical global-batch statistics. Assumes equal per-rank batch sizes.

use std::sync::Arc;

use ndarray::{Array1, Array2, Axis};

use crate::distributed::{all_reduce_mean_slice, Communicator};
use crate::error::{Error, Result};

const DEFAULT_MOMENTUM: f32 = 0.1;
const DEFAULT_EPS: f32 = 1e-5;

struct BnCache {
    xhat: Array2<f32>,
    invstd: Array1<f32>,
}

/// 1-D batch normalization layer.
pub struct BatchNorm1d {
    weight: Array1<f32>,
    bias: Array1<f32>,
    running_mean: Array1<f32>,
    running_var: Array1<f32>,
    grad_weight: Array1<f32>,
    grad_bias: Array1<f32>,
    momentum: f32,
    eps: f32,
    comm: Option<Arc<dyn Communicator>>,
    cache: Option<BnCache>,
}

impl BatchNorm1d {
    pub fn new(features: usize) -> Self {
        Self {
            weight: Array1::ones(features),
            bias: Array1::zeros(features),
            running_mean: Array1::zeros(features),
            running_var: Array1::ones(features),
            grad_weight: Array1::zeros(features),
            grad_bias: Array1::zeros(features),
            momentum: DEFAULT_MOMENTUM,
            eps: DEFAULT_EPS,
            comm: None,
            cache: None,
        }
    }

    pub fn features(&self) -> usize {
        self.weight.len()
    }

    /// Switch to cross-process synchronized batch statistics.
    pub fn convert_sync(&mut self, comm: Arc<dyn Communicator>) {
        self.comm = Some(comm);
    }

    fn sync_comm(&self) -> Option<&dyn Communicator> {
        match &self.comm {
            Some(c) if c.world_size() > 1 => Some(c.as_ref()),
            _ => None,
        }
    }

    /// Training-mode forward: normalize with (possibly synchronized) batch
    /// statistics, update running statistics, cache for backward.
    pub fn forward_train(&mut self, x: &Array2<f32>) -> Result<Array2<f32>> {
        let (n, features) = x.dim();
        self.check_features(features)?;
        if n == 0 {
            return Err(Error::TrainingError {
                reason: "batch norm requires a non-empty batch".to_string(),
            });
        }

        let mut mean = x.mean_axis(Axis(0)).ok_or_else(|| Error::TrainingError {
            reason: "batch norm mean over empty axis".to_string(),
        })?;
        let mut ex2 = x.mapv(|v| v * v).mean_axis(Axis(0)).ok_or_else(|| {
            Error::TrainingError {
                reason: "batch norm second moment over empty axis".to_string(),
            }
        })?;

        if let Some(comm) = self.sync_comm() {
            // One fused reduction for both statistics vectors.
            let mut buf = Vec::with_capacity(2 * features);
            buf.extend(mean.iter());
            buf.extend(ex2.iter());
            all_reduce_mean_slice(comm, &mut buf)?;
            mean = Array1::from_vec(buf[..features].to_vec());
            ex2 = Array1::from_vec(buf[features..].to_vec());
        }

        let var = (&ex2 - &mean.mapv(|m| m * m)).mapv(|v| v.max(0.0));
        let invstd = var.mapv(|v| 1.0 / (v + self.eps).sqrt());

        let xhat = (x - &mean) * &invstd;
        let y = &xhat * &self.weight + &self.bias;

        let m = self.momentum;
        self.running_mean = &self.running_mean * (1.0 - m) + &mean * m;
        self.running_var = &self.running_var * (1.0 - m) + &var * m;

        self.cache = Some(BnCache { xhat, invstd });
        Ok(y)
    }

    /// Inference-mode forward using running statistics.
    pub fn forward_eval(&self, x: &Array2<f32>) -> Result<Array2<f32>> {
        self.check_features(x.ncols())?;
        let invstd = self.running_var.mapv(|v| 1.0 / (v + self.eps).sqrt());
        Ok((x - &self.running_mean) * &invstd * &self.weight + &self.bias)
    }

    /// Backward pass; returns the gradient with respect to the layer input
    /// and accumulates weight/bias gradients.
    pub fn backward(&mut self, grad_out: &Array2<f32>) -> Result<Array2<f32>> {
        let cache = self.cache.take().ok_or_else(|| Error::TrainingError {
            reason: "batch norm backward called without a cached forward pass".to_string(),
        })?;
        let n = grad_out.nrows();
        let features = self.features();

        let mut sum_g = grad_out.sum_axis(Axis(0));
        let mut sum_g_xhat = (grad_out * &cache.xhat).sum_axis(Axis(0));

        self.grad_weight += &sum_g_xhat;
        self.grad_bias += &sum_g;

        if let Some(comm) = self.sync_comm() {
            // Averaging rank-local sums then dividing by the local batch size
            // equals dividing the global sums by the global batch size.
            let mut buf = Vec::with_capacity(2 * features);
            buf.extend(sum_g.iter());
            buf.extend(sum_g_xhat.iter());
            all_reduce_mean_slice(comm, &mut buf)?;
            sum_g = Array1::from_vec(buf[..features].to_vec());
            sum_g_xhat = Array1::from_vec(buf[features..].to_vec());
        }

        let inv_n = 1.0 / n as f32;
        let mean_g = sum_g.mapv(|v| v * inv_n);
        let mean_g_xhat = sum_g_xhat.mapv(|v| v * inv_n);

        let scale = &cache.invstd * &self.weight;
        let gx = (grad_out - &mean_g - &cache.xhat * &mean_g_xhat) * &scale;
        Ok(gx)
    }

    pub fn zero_grad(&mut self) {
        self.grad_weight.fill(0.0);
        self.grad_bias.fill(0.0);
    }

    pub fn weight(&self) -> &Array1<f32> {
        &self.weight
    }

    pub fn bias(&self) -> &Array1<f32> {
        &self.bias
    }

    pub fn running_mean(&self) -> &Array1<f32> {
        &self.running_mean
    }

    pub fn running_var(&self) -> &Array1<f32> {
        &self.running_var
    }

    /// Mutable access to (weight, grad_weight, bias, grad_bias) for the
    /// optimizer's parameter walk.
    pub fn params_mut(
        &mut self,
    ) -> (
        &mut Array1<f32>,
        &mut Array1<f32>,
        &mut Array1<f32>,
        &mut Array1<f32>,
    ) {
        (
            &mut self.weight,
            &mut self.grad_weight,
            &mut self.bias,
            &mut self.grad_bias,
        )
    }

    /// Install parameter and running-statistic values (for checkpoint resume).
    pub fn load(
        &mut self,
        weight: Array1<f32>,
        bias: Array1<f32>,
        running_mean: Array1<f32>,
        running_var: Array1<f32>,
    ) -> Result<()> {
        let features = self.features();
        for (name, arr) in [
            ("weight", &weight),
            ("bias", &bias),
            ("running_mean", &running_mean),
            ("running_var", &running_var),
        ] {
            if arr.len() != features {
                return Err(Error::ModelError {
                    reason: format!(
                        "batch norm {name} has {} features, layer has {features}",
                        arr.len()
                    ),
                });
            }
        }
        self.weight = weight;
        self.bias = bias;
        self.running_mean = running_mean;
        self.running_var = running_var;
        Ok(())
    }

    fn check_features(&self, features: usize) -> Result<()> {
        if features != self.features() {
            return Err(Error::TrainingError {
                reason: format!(
                    "batch norm input has {features} features, layer has {}",
                    self.features()
                ),
            });
        }
        Ok(())
    }
}
