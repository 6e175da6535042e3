//! Collective communication for data-parallel training.
//!
//! The [`Communicator`] trait is the seam where a real backend (NCCL, MPI)
//! would plug in. This crate ships two implementations: [`NoOpCommunicator`]
//! for single-process runs and [`LocalCommunicator`] for in-process
//! thread-per-rank groups, used in tests.

pub mod comm;
pub mod local;
pub mod reducer;

pub use comm::{Communicator, NoOpCommunicator};
pub use local::LocalCommunicator;
pub use reducer::{all_reduce_mean, all_reduce_mean_slice};

use std::sync::Arc;

use crate::error::{Error, Result};

/// Build a communicator from the launch environment.
///
/// Reads `WORLD_SIZE`; a value > 1 activates distributed mode. This build
/// carries no multi-process collective backend, so distributed launches fail
/// fast at startup with a descriptive error rather than hanging later inside
/// a collective call.
pub fn init_from_env() -> Result<Arc<dyn Communicator>> {
    let world_size = match std::env::var("WORLD_SIZE") {
        Ok(v) => v.parse::<usize>().map_err(|_| Error::ConfigError {
            reason: format!("WORLD_SIZE must be an integer, got '{v}'"),
        })?,
        Err(_) => 1,
    };

    if world_size > 1 {
        return Err(Error::DistributedError {
            reason: format!(
                "WORLD_SIZE={world_size} requires a multi-process collective backend, \
                 but none is compiled into this build"
            ),
        });
    }

    Ok(Arc::new(NoOpCommunicator))
}
