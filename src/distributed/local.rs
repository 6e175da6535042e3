//! In-process thread-per-rank communicator.
//!
//! Gives tests real multi-rank collective semantics without a process group:
//! each rank runs on its own thread and shares a [`LocalGroup`] that
//! implements sum-reduction with a generation-counted rendezvous.

use std::sync::{Arc, Condvar, Mutex};

use crate::distributed::comm::Communicator;
use crate::error::{Error, Result};

struct GroupState {
    acc: Vec<f32>,
    result: Vec<f32>,
    arrived: usize,
    generation: u64,
}

/// Shared state for one group of local ranks.
///
/// Invariant: exactly one thread per rank. A rank blocked inside a collective
/// cannot start the next round, which is what keeps `result` stable until
/// every participant of the current round has read it.
pub struct LocalGroup {
    world_size: usize,
    state: Mutex<GroupState>,
    cond: Condvar,
}

/// One rank's handle onto a [`LocalGroup`].
#[derive(Clone)]
pub struct LocalCommunicator {
    group: Arc<LocalGroup>,
    rank: usize,
}

impl LocalCommunicator {
    /// Create a group of `world_size` connected communicators, one per rank.
    pub fn group(world_size: usize) -> Result<Vec<LocalCommunicator>> {
        if world_size == 0 {
            return Err(Error::DistributedError {
                reason: "world_size must be > 0".to_string(),
            });
        }
        let group = Arc::new(LocalGroup {
            world_size,
            state: Mutex::new(GroupState {
                acc: Vec::new(),
                result: Vec::new(),
                arrived: 0,
                generation: 0,
            }),
            cond: Condvar::new(),
        });
        Ok((0..world_size)
            .map(|rank| LocalCommunicator {
                group: Arc::clone(&group),
                rank,
            })
            .collect())
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.group.world_size
    }

    fn all_reduce_sum(&self, buf: &mut [f32]) -> Result<()> {
        let mut state = self.group.state.lock().map_err(|_| Error::DistributedError {
            reason: "communicator lock poisoned by a failed rank".to_string(),
        })?;

        if state.arrived == 0 {
            state.acc.clear();
            state.acc.extend_from_slice(buf);
        } else {
            if state.acc.len() != buf.len() {
                return Err(Error::DistributedError {
                    reason: format!(
                        "all_reduce length mismatch: rank {} sent {} elements, group round has {}",
                        self.rank,
                        buf.len(),
                        state.acc.len()
                    ),
                });
            }
            for (a, b) in state.acc.iter_mut().zip(buf.iter()) {
                *a += *b;
            }
        }

        state.arrived += 1;
        let round = state.generation;

        if state.arrived == self.group.world_size {
            state.result = std::mem::take(&mut state.acc);
            state.arrived = 0;
            state.generation += 1;
            self.group.cond.notify_all();
        } else {
            while state.generation == round {
                state = self.group.cond.wait(state).map_err(|_| Error::DistributedError {
                    reason: "communicator lock poisoned while waiting for reduction".to_string(),
                })?;
            }
        }

        buf.copy_from_slice(&state.result);
        Ok(())
    }

    fn broadcast(&self, buf: &mut [f32], root: usize) -> Result<()> {
        if root >= self.group.world_size {
            return Err(Error::DistributedError {
                reason: format!("broadcast root {root} >= world_size {}", self.group.world_size),
            });
        }
        // Non-root ranks contribute zeros, so the summed reduction carries
        // exactly the root's values.
        if self.rank != root {
            buf.fill(0.0);
        }
        self.all_reduce_sum(buf)
    }

    fn barrier(&self) -> Result<()> {
        let mut token = [0.0f32];
        self.all_reduce_sum(&mut token)
    }
}
