//! Pluggable commit policy hook.
//!
//! The design notes describe an optional variant where write-write
//! conflicts are resolved by a short-held per-record read/write lock
//! instead of bare CAS-and-abort. The core engine does not depend on
//! this structurally — [`crate::executor::Transaction::twrite`] always
//! uses first-updater-wins CAS — but a driver wanting to experiment
//! with the lock-based variant can implement [`CommitPolicy`] and
//! consult it before retrying an aborted write, e.g. to decide whether
//! a `FirstUpdaterWins` abort is worth a bounded retry under a lock.
use crate::error::AbortReason;

/// A driver-side hook consulted around commit outcomes. The default,
/// [`NoRetryPolicy`], never asks for a retry — matching the "no
/// waiting, no queueing" baseline the exclusion-window algorithm
/// assumes.
pub trait CommitPolicy {
    /// Called after a transaction aborts. Returning `true` tells the
    /// driver it may retry the same logical operation under this
    /// policy's rules (e.g. after acquiring a record-level lock);
    /// returning `false` means the abort is final.
    fn should_retry(&self, reason: AbortReason, attempt: u32) -> bool;
}

/// The baseline policy: every abort is final, matching the serial and
/// parallel commit protocols' no-wait design.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRetryPolicy;

impl CommitPolicy for NoRetryPolicy {
    fn should_retry(&self, _reason: AbortReason, _attempt: u32) -> bool {
        false
    }
}

/// The RW-lock design-note variant: bounds retries after a
/// `FirstUpdaterWins` write-write conflict, on the theory that a short
/// per-record lock would have let the loser proceed instead of
/// aborting outright. Does not itself take any lock — it only tells the
/// driver how many times it's worth re-running `twrite`+`commit`.
#[derive(Debug, Clone, Copy)]
pub struct BoundedRetryPolicy {
    pub max_attempts: u32,
}

impl CommitPolicy for BoundedRetryPolicy {
    fn should_retry(&self, reason: AbortReason, attempt: u32) -> bool {
        matches!(reason, AbortReason::FirstUpdaterWins) && attempt < self.max_attempts
    }
}
