//! Scalar and slice averaging across ranks.

use crate::distributed::comm::Communicator;
use crate::error::Result;

/// Average a scalar across all ranks.
///
/// Sums via a blocking collective, then divides by the world size. In
/// single-process mode this is the identity. Every rank must reach every
/// invocation site in the same order.
pub fn all_reduce_mean(comm: &dyn Communicator, value: f64) -> Result<f64> {
    let world_size = comm.world_size();
    if world_size <= 1 {
        return Ok(value);
    }
    let mut buf = [value as f32];
    comm.all_reduce_sum(&mut buf)?;
    Ok(buf[0] as f64 / world_size as f64)
}

/// Average a slice across all ranks, in place.
pub fn all_reduce_mean_slice(comm: &dyn Communicator, buf: &mut [f32]) -> Result<()> {
    let world_size = comm.world_size();
    if world_size <= 1 {
        return Ok(());
    }
    comm.all_reduce_sum(buf)?;
    let scale = 1.0 / world_size as f32;
    for v in buf.iter_mut() {
        *v *= scale;
    }
    Ok(())
}
