//! Two-layer perceptron with batch normalization: fc1 -> bn -> relu -> fc2.

use std::collections::HashMap;
use std::sync::Arc;

use ndarray::{Array1, Array2, Array4, Axis};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::distributed::Communicator;
use crate::error::{Error, Result};
use crate::model::{flatten_images, param_slice, state_entry, Arch, Model, TensorData};
use crate::nn::BatchNorm1d;

pub const HIDDEN_DIM: usize = 64;

struct MlpCache {
    input: Array2<f32>,
    relu_out: Array2<f32>,
}

pub struct MlpClassifier {
    input_dim: usize,
    hidden_dim: usize,
    num_classes: usize,
    w1: Array2<f32>,
    b1: Array1<f32>,
    bn: BatchNorm1d,
    w2: Array2<f32>,
    b2: Array1<f32>,
    grad_w1: Array2<f32>,
    grad_b1: Array1<f32>,
    grad_w2: Array2<f32>,
    grad_b2: Array1<f32>,
    cache: Option<MlpCache>,
}

impl MlpClassifier {
    pub fn new(input_dim: usize, num_classes: usize, seed: u64) -> Self {
        Self::with_hidden(input_dim, HIDDEN_DIM, num_classes, seed)
    }

    pub fn with_hidden(input_dim: usize, hidden_dim: usize, num_classes: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut init = |rows: usize, cols: usize| {
            let bound = 1.0 / (rows as f32).sqrt();
            let dist = Uniform::new_inclusive(-bound, bound);
            Array2::from_shape_fn((rows, cols), |_| dist.sample(&mut rng))
        };
        let w1 = init(input_dim, hidden_dim);
        let w2 = init(hidden_dim, num_classes);
        Self {
            input_dim,
            hidden_dim,
            num_classes,
            w1,
            b1: Array1::zeros(hidden_dim),
            bn: BatchNorm1d::new(hidden_dim),
            w2,
            b2: Array1::zeros(num_classes),
            grad_w1: Array2::zeros((input_dim, hidden_dim)),
            grad_b1: Array1::zeros(hidden_dim),
            grad_w2: Array2::zeros((hidden_dim, num_classes)),
            grad_b2: Array1::zeros(num_classes),
            cache: None,
        }
    }

    fn check_input(&self, flat: &Array2<f32>) -> Result<()> {
        if flat.ncols() != self.input_dim {
            return Err(Error::ModelError {
                reason: format!(
                    "input has {} features, model expects {}",
                    flat.ncols(),
                    self.input_dim
                ),
            });
        }
        Ok(())
    }
}

impl Model for MlpClassifier {
    fn arch(&self) -> Arch {
        Arch::Mlp
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn forward_train(&mut self, images: &Array4<f32>) -> Result<Array2<f32>> {
        let flat = flatten_images(images);
        self.check_input(&flat)?;
        let pre = flat.dot(&self.w1) + &self.b1;
        let normed = self.bn.forward_train(&pre)?;
        let relu_out = normed.mapv(|v| v.max(0.0));
        let logits = relu_out.dot(&self.w2) + &self.b2;
        self.cache = Some(MlpCache {
            input: flat,
            relu_out,
        });
        Ok(logits)
    }

    fn forward_eval(&self, images: &Array4<f32>) -> Result<Array2<f32>> {
        let flat = flatten_images(images);
        self.check_input(&flat)?;
        let pre = flat.dot(&self.w1) + &self.b1;
        let relu_out = self.bn.forward_eval(&pre)?.mapv(|v| v.max(0.0));
        Ok(relu_out.dot(&self.w2) + &self.b2)
    }

    fn backward(&mut self, grad_logits: &Array2<f32>) -> Result<()> {
        let cache = self.cache.take().ok_or_else(|| Error::TrainingError {
            reason: "backward called without a cached forward pass".to_string(),
        })?;
        if grad_logits.nrows() != cache.input.nrows() || grad_logits.ncols() != self.num_classes {
            return Err(Error::TrainingError {
                reason: format!(
                    "logits gradient has shape {:?}, expected [{}, {}]",
                    grad_logits.shape(),
                    cache.input.nrows(),
                    self.num_classes
                ),
            });
        }

        self.grad_w2 += &cache.relu_out.t().dot(grad_logits);
        self.grad_b2 += &grad_logits.sum_axis(Axis(0));

        let grad_relu = grad_logits.dot(&self.w2.t());
        // relu_out > 0 exactly where the pre-activation was positive.
        let grad_normed = &grad_relu * &cache.relu_out.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
        let grad_pre = self.bn.backward(&grad_normed)?;

        self.grad_w1 += &cache.input.t().dot(&grad_pre);
        self.grad_b1 += &grad_pre.sum_axis(Axis(0));
        Ok(())
    }

    fn zero_grad(&mut self) {
        self.grad_w1.fill(0.0);
        self.grad_b1.fill(0.0);
        self.grad_w2.fill(0.0);
        self.grad_b2.fill(0.0);
        self.bn.zero_grad();
    }

    fn visit_params(&mut self, f: &mut dyn FnMut(&str, &mut [f32], &mut [f32])) {
        f(
            "fc1.weight",
            param_slice(&mut self.w1),
            param_slice(&mut self.grad_w1),
        );
        f(
            "fc1.bias",
            param_slice(&mut self.b1),
            param_slice(&mut self.grad_b1),
        );
        let (bw, gbw, bb, gbb) = self.bn.params_mut();
        f("bn.weight", param_slice(bw), param_slice(gbw));
        f("bn.bias", param_slice(bb), param_slice(gbb));
        f(
            "fc2.weight",
            param_slice(&mut self.w2),
            param_slice(&mut self.grad_w2),
        );
        f(
            "fc2.bias",
            param_slice(&mut self.b2),
            param_slice(&mut self.grad_b2),
        );
    }

    fn state_dict(&self) -> HashMap<String, TensorData> {
        HashMap::from([
            ("fc1.weight".to_string(), TensorData::from_array2(&self.w1)),
            ("fc1.bias".to_string(), TensorData::from_array1(&self.b1)),
            ("bn.weight".to_string(), TensorData::from_array1(self.bn.weight())),
            ("bn.bias".to_string(), TensorData::from_array1(self.bn.bias())),
            (
                "bn.running_mean".to_string(),
                TensorData::from_array1(self.bn.running_mean()),
            ),
            (
                "bn.running_var".to_string(),
                TensorData::from_array1(self.bn.running_var()),
            ),
            ("fc2.weight".to_string(), TensorData::from_array2(&self.w2)),
            ("fc2.bias".to_string(), TensorData::from_array1(&self.b2)),
        ])
    }

    fn load_state_dict(&mut self, state: &HashMap<String, TensorData>) -> Result<()> {
        let w1 = state_entry(state, "fc1.weight")?.to_array2()?;
        let b1 = state_entry(state, "fc1.bias")?.to_array1()?;
        let w2 = state_entry(state, "fc2.weight")?.to_array2()?;
        let b2 = state_entry(state, "fc2.bias")?.to_array1()?;
        if w1.dim() != (self.input_dim, self.hidden_dim)
            || b1.len() != self.hidden_dim
            || w2.dim() != (self.hidden_dim, self.num_classes)
            || b2.len() != self.num_classes
        {
            return Err(Error::ModelError {
                reason: format!(
                    "state dict shapes do not match a {}x{}x{} mlp model",
                    self.input_dim, self.hidden_dim, self.num_classes
                ),
            });
        }
        self.bn.load(
            state_entry(state, "bn.weight")?.to_array1()?,
            state_entry(state, "bn.bias")?.to_array1()?,
            state_entry(state, "bn.running_mean")?.to_array1()?,
            state_entry(state, "bn.running_var")?.to_array1()?,
        )?;
        self.w1 = w1;
        self.b1 = b1;
        self.w2 = w2;
        self.b2 = b2;
        Ok(())
    }

    fn convert_sync_batchnorm(&mut self, comm: Arc<dyn Communicator>) {
        self.bn.convert_sync(comm);
    }
}
