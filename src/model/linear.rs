//! Linear (softmax-regression) classifier over flattened pixels.

use std::collections::HashMap;
use std::sync::Arc;

use ndarray::{Array1, Array2, Array4, Axis};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::distributed::Communicator;
use crate::error::{Error, Result};
use crate::model::{flatten_images, param_slice, state_entry, Arch, Model, TensorData};

/// A single fully-connected layer: `logits = x W + b`.
pub struct LinearClassifier {
    input_dim: usize,
    num_classes: usize,
    weight: Array2<f32>,
    bias: Array1<f32>,
    grad_weight: Array2<f32>,
    grad_bias: Array1<f32>,
    cached_input: Option<Array2<f32>>,
}

impl LinearClassifier {
    pub fn new(input_dim: usize, num_classes: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let bound = 1.0 / (input_dim as f32).sqrt();
        let dist = Uniform::new_inclusive(-bound, bound);
        let weight = Array2::from_shape_fn((input_dim, num_classes), |_| dist.sample(&mut rng));
        Self {
            input_dim,
            num_classes,
            weight,
            bias: Array1::zeros(num_classes),
            grad_weight: Array2::zeros((input_dim, num_classes)),
            grad_bias: Array1::zeros(num_classes),
            cached_input: None,
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

impl Model for LinearClassifier {
    fn arch(&self) -> Arch {
        Arch::Linear
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn forward_train(&mut self, images: &Array4<f32>) -> Result<Array2<f32>> {
        let flat = flatten_images(images);
        self.check_input(&flat)?;
        let logits = flat.dot(&self.weight) + &self.bias;
        self.cached_input = Some(flat);
        Ok(logits)
    }

    fn forward_eval(&self, images: &Array4<f32>) -> Result<Array2<f32>> {
        let flat = flatten_images(images);
        self.check_input(&flat)?;
        Ok(flat.dot(&self.weight) + &self.bias)
    }

    fn backward(&mut self, grad_logits: &Array2<f32>) -> Result<()> {
        let x = self.cached_input.take().ok_or_else(|| Error::TrainingError {
            reason: "backward called without a cached forward pass".to_string(),
        })?;
        if grad_logits.nrows() != x.nrows() || grad_logits.ncols() != self.num_classes {
            return Err(Error::TrainingError {
                reason: format!(
                    "logits gradient has shape {:?}, expected [{}, {}]",
                    grad_logits.shape(),
                    x.nrows(),
                    self.num_classes
                ),
            });
        }
        self.grad_weight += &x.t().dot(grad_logits);
        self.grad_bias += &grad_logits.sum_axis(Axis(0));
        Ok(())
    }

    fn zero_grad(&mut self) {
        self.grad_weight.fill(0.0);
        self.grad_bias.fill(0.0);
    }

    fn visit_params(&mut self, f: &mut dyn FnMut(&str, &mut [f32], &mut [f32])) {
        f(
            "fc.weight",
            param_slice(&mut self.weight),
            param_slice(&mut self.grad_weight),
        );
        f(
            "fc.bias",
            param_slice(&mut self.bias),
            param_slice(&mut self.grad_bias),
        );
    }

    fn state_dict(&self) -> HashMap<String, TensorData> {
        HashMap::from([
            ("fc.weight".to_string(), TensorData::from_array2(&self.weight)),
            ("fc.bias".to_string(), TensorData::from_array1(&self.bias)),
        ])
    }

    fn load_state_dict(&mut self, state: &HashMap<String, TensorData>) -> Result<()> {
        let weight = state_entry(state, "fc.weight")?.to_array2()?;
        let bias = state_entry(state, "fc.bias")?.to_array1()?;
        if weight.dim() != (self.input_dim, self.num_classes) || bias.len() != self.num_classes {
            return Err(Error::ModelError {
                reason: format!(
                    "state dict shapes do not match a {}x{} linear model",
                    self.input_dim, self.num_classes
                ),
            });
        }
        self.weight = weight;
        self.bias = bias;
        Ok(())
    }

    fn convert_sync_batchnorm(&mut self, _comm: Arc<dyn Communicator>) {}
}
