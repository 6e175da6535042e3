//! Model registry: an explicit enumerated mapping from architecture name to
//! factory, validated at configuration-parse time.

pub mod linear;
pub mod mlp;

pub use linear::LinearClassifier;
pub use mlp::MlpClassifier;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use ndarray::{Array1, Array2, Array4};
use serde::{Deserialize, Serialize};

use crate::distributed::Communicator;
use crate::error::{Error, Result};

/// Supported architecture names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    /// Single fully-connected layer over flattened pixels.
    Linear,
    /// One hidden layer with batch norm and ReLU.
    Mlp,
    /// Convolutional backbone. Registered but requires a convolution backend
    /// that is not compiled into this build.
    Conv,
}

impl Arch {
    pub const ALL: [Arch; 3] = [Arch::Linear, Arch::Mlp, Arch::Conv];

    pub fn name(&self) -> &'static str {
        match self {
            Arch::Linear => "linear",
            Arch::Mlp => "mlp",
            Arch::Conv => "conv",
        }
    }

    /// Fail fast for architectures the harness cannot train.
    pub fn ensure_supported(&self) -> Result<()> {
        match self {
            Arch::Conv => Err(Error::ConfigError {
                reason: "the conv architecture requires a convolution backend that is not \
                         compiled into this build"
                    .to_string(),
            }),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Arch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linear" => Ok(Arch::Linear),
            "mlp" => Ok(Arch::Mlp),
            "conv" => Ok(Arch::Conv),
            other => Err(Error::ConfigError {
                reason: format!(
                    "unknown architecture '{other}' (registry: {})",
                    Arch::ALL.map(|a| a.name()).join(", ")
                ),
            }),
        }
    }
}

/// A named tensor in flattened form, used for checkpoint state dicts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorData {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl TensorData {
    pub fn from_array1(arr: &Array1<f32>) -> Self {
        Self {
            shape: vec![arr.len()],
            data: arr.to_vec(),
        }
    }

    pub fn from_array2(arr: &Array2<f32>) -> Self {
        Self {
            shape: arr.shape().to_vec(),
            data: arr.iter().copied().collect(),
        }
    }

    pub fn to_array1(&self) -> Result<Array1<f32>> {
        if self.shape.len() != 1 || self.shape[0] != self.data.len() {
            return Err(Error::ModelError {
                reason: format!("tensor shape {:?} is not a valid 1-d shape", self.shape),
            });
        }
        Ok(Array1::from_vec(self.data.clone()))
    }

    pub fn to_array2(&self) -> Result<Array2<f32>> {
        if self.shape.len() != 2 {
            return Err(Error::ModelError {
                reason: format!("tensor shape {:?} is not a valid 2-d shape", self.shape),
            });
        }
        Array2::from_shape_vec((self.shape[0], self.shape[1]), self.data.clone()).map_err(|e| {
            Error::ModelError {
                reason: format!("tensor data does not match shape {:?}: {e}", self.shape),
            }
        })
    }
}

/// An image classifier with explicit forward/backward.
///
/// Parameters live inside the model; the optimizer walks them through
/// [`Model::visit_params`], which pairs each parameter slice with its
/// accumulated gradient slice.
pub trait Model: Send {
    fn arch(&self) -> Arch;

    fn num_classes(&self) -> usize;

    /// Forward pass in training mode; caches activations for backward.
    /// Input is `[N, C, H, W]`, output logits are `[N, num_classes]`.
    fn forward_train(&mut self, images: &Array4<f32>) -> Result<Array2<f32>>;

    /// Forward pass in inference mode; no caching, running statistics used
    /// for any normalization layers.
    fn forward_eval(&self, images: &Array4<f32>) -> Result<Array2<f32>>;

    /// Accumulate parameter gradients from the logits gradient.
    fn backward(&mut self, grad_logits: &Array2<f32>) -> Result<()>;

    fn zero_grad(&mut self);

    /// Visit every trainable parameter as `(name, values, grads)`.
    fn visit_params(&mut self, f: &mut dyn FnMut(&str, &mut [f32], &mut [f32]));

    fn state_dict(&self) -> HashMap<String, TensorData>;

    fn load_state_dict(&mut self, state: &HashMap<String, TensorData>) -> Result<()>;

    /// Convert batch-norm layers to cross-process synchronized statistics.
    /// A no-op for models without normalization layers.
    fn convert_sync_batchnorm(&mut self, comm: Arc<dyn Communicator>);
}

/// Build a model from the registry.
///
/// `input_dim` is the flattened pixel count (`channels * height * width`).
/// Initialization is deterministic in `seed` so that all ranks construct
/// identical parameters before the initial broadcast.
pub fn build_model(arch: Arch, input_dim: usize, num_classes: usize, seed: u64) -> Result<Box<dyn Model>> {
    arch.ensure_supported()?;
    if input_dim == 0 || num_classes == 0 {
        return Err(Error::ModelError {
            reason: format!("invalid model dimensions: input_dim={input_dim}, num_classes={num_classes}"),
        });
    }
    match arch {
        Arch::Linear => Ok(Box::new(LinearClassifier::new(input_dim, num_classes, seed))),
        Arch::Mlp => Ok(Box::new(MlpClassifier::new(input_dim, num_classes, seed))),
        Arch::Conv => unreachable!("rejected by ensure_supported"),
    }
}

/// Flatten `[N, C, H, W]` images to `[N, C*H*W]` rows.
pub(crate) fn flatten_images(images: &Array4<f32>) -> Array2<f32> {
    let (n, c, h, w) = images.dim();
    let flat: Vec<f32> = images.iter().copied().collect();
    Array2::from_shape_vec((n, c * h * w), flat)
        .expect("owned image batches are standard layout")
}

/// View an owned parameter array as a mutable slice.
pub(crate) fn param_slice<D: ndarray::Dimension>(arr: &mut ndarray::Array<f32, D>) -> &mut [f32] {
    arr.as_slice_mut()
        .expect("owned parameter arrays are standard layout")
}

/// Fetch a required state-dict entry.
pub(crate) fn state_entry<'a>(
    state: &'a HashMap<String, TensorData>,
    key: &str,
) -> Result<&'a TensorData> {
    state.get(key).ok_or_else(|| Error::ModelError {
        reason: format!("state dict is missing '{key}'"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arch_round_trip() {
        for arch in Arch::ALL {
            assert_eq!(arch.name().parse::<Arch>().unwrap(), arch);
        }
    }

    #[test]
    fn test_unknown_arch_rejected() {
        let err = "resnet50".parse::<Arch>().unwrap_err();
        assert!(err.to_string().contains("unknown architecture"));
    }

    #[test]
    fn test_conv_unsupported() {
        assert!(build_model(Arch::Conv, 12, 4, 0).is_err());
    }

    #[test]
    fn test_build_registry() {
        let m = build_model(Arch::Linear, 12, 4, 0).unwrap();
        assert_eq!(m.arch(), Arch::Linear);
        let m = build_model(Arch::Mlp, 12, 4, 0).unwrap();
        assert_eq!(m.arch(), Arch::Mlp);
    }

    #[test]
    fn test_tensor_data_round_trip() {
        let a = ndarray::array![[1.0f32, 2.0], [3.0, 4.0]];
        let td = TensorData::from_array2(&a);
        assert_eq!(td.to_array2().unwrap(), a);
        assert!(td.to_array1().is_err());
    }
}
