//! Lazy partitioning of the job list into bounded batches.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crate::worker::Strategy;

/// One strategy instance to be simulated once.
///
/// Identity is the strategy; a job has no independent identity beyond it.
#[derive(Clone)]
pub struct Job {
    /// The strategy paired with a to-be-created worker.
    pub strategy: Arc<dyn Strategy>,
}

impl Job {
    /// Wrap a strategy as a job.
    #[must_use]
    pub fn new(strategy: Arc<dyn Strategy>) -> Self {
        Self { strategy }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("strategy", &self.strategy.id())
            .finish()
    }
}

/// Resumable sequence of batches, at most `batch_size` jobs each.
///
/// Batches are produced lazily and consumed exactly once, in order; the last
/// batch of a run may be shorter. The batch index is assigned by the
/// consumer, not here.
#[derive(Debug)]
pub struct BatchPartitioner {
    jobs: VecDeque<Job>,
    batch_size: usize,
}

impl BatchPartitioner {
    /// Partition `jobs` into groups of at most `batch_size`.
    #[must_use]
    pub fn new(jobs: Vec<Job>, batch_size: usize) -> Self {
        Self {
            jobs: jobs.into(),
            batch_size: batch_size.max(1),
        }
    }

    /// Pull the next batch, or `None` once exhausted.
    pub fn next_batch(&mut self) -> Option<Vec<Job>> {
        if self.jobs.is_empty() {
            return None;
        }
        let take = self.batch_size.min(self.jobs.len());
        Some(self.jobs.drain(..take).collect())
    }

    /// Jobs not yet handed out.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.jobs.len()
    }
}

/// Cap a requested iteration count and its job list consistently.
///
/// The effective count is bounded by the job list, the request, and the
/// configured maximum (0 = unbounded); `jobs` is truncated in place to the
/// same bound. Returns the effective iteration count.
pub fn truncate_jobs(jobs: &mut Vec<Job>, iteration_count: usize, max_iterations: usize) -> usize {
    let mut effective = iteration_count.min(jobs.len());
    if max_iterations > 0 {
        effective = effective.min(max_iterations);
    }
    jobs.truncate(effective);
    effective
}

/// `ceil(iteration_count / batch_size)`.
#[must_use]
pub const fn total_batches(iteration_count: usize, batch_size: usize) -> usize {
    iteration_count.div_ceil(batch_size)
}
