//! Data-parallel model wrapper.
//!
//! Wraps an [`AmpModel`] with a communicator so every rank runs the same
//! training loop: parameters are broadcast from rank 0 at construction, and
//! each backward pass averages gradients across ranks before the optimizer
//! step. With a single-process communicator every collective is the identity,
//! so the same loop drives both modes.

use std::sync::Arc;

use ndarray::{Array2, Array4};

use crate::distributed::{all_reduce_mean_slice, Communicator};
use crate::error::Result;
use crate::optim::{Sgd, UnscaleOutcome};
use crate::precision::AmpModel;

/// Outcome of one optimizer step under data parallelism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Gradients were applied.
    Stepped,
    /// The step was skipped because unscaling detected overflow.
    SkippedOverflow,
}

/// Distributed data-parallel wrapper.
///
/// Takes the precision wrapper by value: the precision policy must be applied
/// to the bare model first so cross-rank averaging sees scaled gradients and
/// unscaling happens exactly once, after the reduction.
pub struct DataParallel {
    model: AmpModel,
    comm: Arc<dyn Communicator>,
}

impl DataParallel {
    /// Wrap a model, broadcasting rank 0's parameters so all replicas start
    /// identical.
    pub fn new(mut model: AmpModel, comm: Arc<dyn Communicator>) -> Result<Self> {
        if comm.world_size() > 1 {
            let mut failure = None;
            model.model_mut().visit_params(&mut |_, vals, _| {
                if failure.is_none() {
                    if let Err(e) = comm.broadcast(vals, 0) {
                        failure = Some(e);
                    }
                }
            });
            if let Some(e) = failure {
                return Err(e);
            }
        }
        Ok(Self { model, comm })
    }

    pub fn comm(&self) -> &Arc<dyn Communicator> {
        &self.comm
    }

    pub fn model(&self) -> &AmpModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut AmpModel {
        &mut self.model
    }

    pub fn into_model(self) -> AmpModel {
        self.model
    }

    pub fn forward_train(&mut self, images: &Array4<f32>) -> Result<Array2<f32>> {
        self.model.forward_train(images)
    }

    pub fn forward_eval(&self, images: &Array4<f32>) -> Result<Array2<f32>> {
        self.model.forward_eval(images)
    }

    pub fn zero_grad(&mut self) {
        self.model.zero_grad();
    }

    /// Scaled backward pass followed by cross-rank gradient averaging.
    pub fn backward(&mut self, grad_logits: &Array2<f32>) -> Result<()> {
        self.model.backward_scaled(grad_logits)?;
        if self.comm.world_size() > 1 {
            let comm = Arc::clone(&self.comm);
            let mut failure = None;
            self.model.model_mut().visit_params(&mut |_, _, grads| {
                if failure.is_none() {
                    if let Err(e) = all_reduce_mean_slice(comm.as_ref(), grads) {
                        failure = Some(e);
                    }
                }
            });
            if let Some(e) = failure {
                return Err(e);
            }
        }
        Ok(())
    }

    /// Unscale the averaged gradients and apply the optimizer, skipping the
    /// step (and backing off the loss scale) on overflow.
    pub fn step(&mut self, optimizer: &mut Sgd) -> Result<StepOutcome> {
        match self.model.unscale_grads() {
            UnscaleOutcome::Ok => {
                optimizer.step(self.model.model_mut())?;
                self.model.update_scale(false);
                Ok(StepOutcome::Stepped)
            }
            UnscaleOutcome::Overflow => {
                self.model.zero_grad();
                self.model.update_scale(true);
                Ok(StepOutcome::SkippedOverflow)
            }
        }
    }
}
