//! The collective-communication trait and the single-process implementation.

use crate::error::Result;

/// Blocking collective operations over a fixed group of ranks.
///
/// Every method is a synchronization point: all ranks in the group must call
/// the same method, on buffers of the same length, in the same order. A call
/// issued by a subset of ranks deadlocks the group; this ordering requirement
/// is a correctness constraint of the whole training loop, not an
/// optimization. There is no cancellation or timeout.
pub trait Communicator: Send + Sync {
    /// Zero-based index of this process within the group.
    fn rank(&self) -> usize;

    /// Total number of cooperating ranks.
    fn world_size(&self) -> usize;

    /// Element-wise sum of `buf` across all ranks; every rank receives the
    /// summed result in place.
    fn all_reduce_sum(&self, buf: &mut [f32]) -> Result<()>;

    /// Replace `buf` on every rank with the root rank's contents.
    fn broadcast(&self, buf: &mut [f32], root: usize) -> Result<()>;

    /// Block until every rank has reached this call.
    fn barrier(&self) -> Result<()>;
}

/// Single-process communicator: every collective is the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpCommunicator;

impl Communicator for NoOpCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn all_reduce_sum(&self, _buf: &mut [f32]) -> Result<()> {
        Ok(())
    }

    fn broadcast(&self, _buf: &mut [f32], _root: usize) -> Result<()> {
        Ok(())
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_identity() {
        let comm = NoOpCommunicator;
        let mut buf = [1.0f32, 2.0, 3.0];
        comm.all_reduce_sum(&mut buf).unwrap();
        assert_eq!(buf, [1.0, 2.0, 3.0]);

        comm.broadcast(&mut buf, 0).unwrap();
        assert_eq!(buf, [1.0, 2.0, 3.0]);

        comm.barrier().unwrap();
        assert_eq!(comm.rank(), 0);
        assert_eq!(comm.world_size(), 1);
    }
}
