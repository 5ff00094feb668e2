//! Error and abort taxonomy.
//!
//! Transaction abort is not modeled as a library error: per the commit
//! protocol it is a first-class status transition on the transaction
//! handle, mirroring how `stronghold_rlu::TransactionError` is threaded
//! back from `RluContext::execute`. [`SsnError`] covers everything else
//! that can go wrong calling into this crate.

use thiserror::Error;

/// Failures that are not transaction aborts: misuse of the API or an
/// internal invariant the caller configured away (e.g. too many workers
/// for the reader bitmap width).
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum SsnError {
    /// `key` is outside `0..TUPLE_NUM` for the engine's table.
    #[error("key {key} out of range for table of size {tuple_num}")]
    KeyOutOfRange {
        /// offending key
        key: usize,
        /// configured table size
        tuple_num: usize,
    },

    /// `THREAD_NUM` exceeds the reader bitmap width minus the reserved bit.
    #[error("worker count {thread_num} exceeds reader bitmap capacity {capacity}")]
    TooManyWorkers {
        /// configured worker count
        thread_num: usize,
        /// usable bitmap capacity (bitmap width minus the reserved bit)
        capacity: usize,
    },

    /// A worker id of 0 was used; worker ids are 1-based (bit 0 of the
    /// reader bitmap is reserved).
    #[error("worker id must be >= 1, bit 0 of the readers bitmap is reserved")]
    ZeroWorkerId,
}

/// Why a transaction aborted. Every cause reaches the same outcome
/// (the transaction is dead and must be retried by the driver); the
/// taxonomy exists for diagnostics only, per the propagation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// `verify_exclusion_or_abort` failed while reading.
    ReadPhase,
    /// `verify_exclusion_or_abort` failed while writing.
    WritePhase,
    /// Final exclusion check at commit: eta(T) >= pi(T).
    CommitPhase,
    /// First-updater-wins: the CASed-over head was still in flight.
    FirstUpdaterWins,
    /// The committed version visible at our snapshot is newer than our `txid`.
    SnapshotStale,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AbortReason::ReadPhase => "read-phase exclusion failure",
            AbortReason::WritePhase => "write-phase exclusion failure",
            AbortReason::CommitPhase => "commit-phase exclusion failure",
            AbortReason::FirstUpdaterWins => "write-write conflict (first-updater-wins)",
            AbortReason::SnapshotStale => "snapshot staleness",
        };
        f.write_str(s)
    }
}
