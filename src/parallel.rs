//! Explicit parallel context.
//!
//! Every component that performs collective operations or rank-conditioned output receives
//! a communicator rather than consulting global state. All collective methods must be called
//! by every process in the same order.

/// Collective operations over a group of processes.
pub trait Communicator: Send + Sync + std::fmt::Debug {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    fn is_root(&self) -> bool {
        self.rank() == 0
    }

    fn barrier(&self);

    fn all_reduce_sum_usize(&self, value: usize) -> usize;

    fn all_reduce_sum_f64(&self, value: f64) -> f64;

    /// Sum of `value` over all ranks lower than this one.
    fn exclusive_scan_sum_usize(&self, value: usize) -> usize;
}

/// A communicator containing only the calling process.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct SelfCommunicator;

impl Communicator for SelfCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn all_reduce_sum_usize(&self, value: usize) -> usize {
        value
    }

    fn all_reduce_sum_f64(&self, value: f64) -> f64 {
        value
    }

    fn exclusive_scan_sum_usize(&self, _value: usize) -> usize {
        0
    }
}
