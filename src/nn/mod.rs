//! Neural-network building blocks used by the model registry.

pub mod batchnorm;
pub mod loss;

pub use batchnorm::BatchNorm1d;
pub use loss::cross_entropy;
