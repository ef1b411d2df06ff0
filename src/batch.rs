//! Batch Planning and Upsert Transactions
//!
//! `BatchPlanner` slices a record stream into bounded chunks without ever
//! holding more than one chunk. `UpsertTransaction` applies one chunk's
//! merges atomically and re-runs the whole chunk on transient failures.

use crate::error::{ImportError, ImportResult};
use crate::graph_store::{MergeOp, StoreSession};
use std::time::Duration;
use tracing::{error, warn};

// ============================================================================
// Batch Planner
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct BatchPlanner {
    batch_size: usize,
}

impl BatchPlanner {
    pub fn new(batch_size: usize) -> ImportResult<Self> {
        if batch_size == 0 {
            return Err(ImportError::InvalidBatchSize(batch_size));
        }
        Ok(Self { batch_size })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Lazily partition `items` into contiguous, order-preserving chunks.
    pub fn plan<I: IntoIterator>(&self, items: I) -> Batches<I::IntoIter> {
        Batches {
            inner: items.into_iter(),
            batch_size: self.batch_size,
        }
    }
}

pub struct Batches<I> {
    inner: I,
    batch_size: usize,
}

impl<I: Iterator> Iterator for Batches<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut batch = Vec::with_capacity(self.batch_size);
        batch.extend(self.inner.by_ref().take(self.batch_size));
        if batch.is_empty() {
            None
        } else {
            Some(batch)
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let (lo, hi) = self.inner.size_hint();
        (
            lo.div_ceil(self.batch_size),
            hi.map(|h| h.div_ceil(self.batch_size)),
        )
    }
}

// ============================================================================
// Retry Policy
// ============================================================================

/// Exponential backoff applied at the transaction boundary.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Single attempt; a failed batch fails the procedure.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait after the given failed attempt: base, 2*base, 4*base, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(4, Duration::from_secs(1))
    }
}

// ============================================================================
// Upsert Transaction
// ============================================================================

/// All merges derived from one batch of records.
#[derive(Debug, Clone, Default)]
pub struct UpsertTransaction {
    ops: Vec<MergeOp>,
}

impl UpsertTransaction {
    pub fn new(ops: Vec<MergeOp>) -> Self {
        Self { ops }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Commit every merge or none. Returns the number of retries it took.
    ///
    /// Ill-typed values are rejected before anything reaches the store.
    pub async fn execute(
        &self,
        session: &mut dyn StoreSession,
        retry: &RetryPolicy,
    ) -> ImportResult<u32> {
        if self.is_empty() {
            return Ok(0);
        }

        self.ops.iter().try_for_each(MergeOp::validate)?;

        let mut attempt = 1;
        loop {
            match session.run_transaction(&self.ops).await {
                Ok(()) => return Ok(attempt - 1),
                Err(e) if e.is_transient() && attempt < retry.max_attempts() => {
                    let wait = retry.delay_for(attempt);
                    warn!(
                        "⚠️  Batch transaction failed: {}. Retrying in {:?} (attempt {}/{})...",
                        e,
                        wait,
                        attempt,
                        retry.max_attempts()
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        "❌ Batch transaction failed after {} attempt(s): {}",
                        attempt, e
                    );
                    return Err(e);
                }
            }
        }
    }
}
