//! Engine globals.
//!
//! Per the design notes: model shared state as members of a single
//! value created at startup and passed explicitly to workers, rather
//! than hidden singletons. `Engine<V>` is that value — it owns the
//! `Table`, the version `Arena`, the `Tmt`, the global commit counter
//! (`Lsn`), the `SsnLock` serial-commit mutex, and the garbage
//! collector's pending queues.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::SsnError;
use crate::executor::Transaction;
use crate::gc::{GarbageCollector, GcStats};
use crate::record::Table;
use crate::tmt::{TxStatus, Tmt};
use crate::version::Arena;

/// Usable reader-bitmap capacity: 63 worker slots, bit 0 reserved.
const MAX_WORKERS: usize = 63;

/// Engine-wide tunables. `thread_num` governs both the TMT's and the
/// reader bitmap's sizing; `tuple_num` the table's.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Number of worker slots in the TMT (THREAD_NUM).
    pub thread_num: usize,
    /// Number of records in the table (TUPLE_NUM).
    pub tuple_num: usize,
    /// Suggested interval between `Engine::run_gc` calls, in
    /// microseconds (GC_INTER_US). The engine does not schedule its own
    /// timer thread — the driver calls `run_gc` on this cadence, the
    /// same way it drives workload generation.
    pub gc_interval_us: u64,
    /// Wall-clock calibration constant (CLOCK_PER_US) carried through
    /// for drivers that convert `gc_interval_us` into spin/sleep counts
    /// of their own; unused by the engine itself.
    pub clock_per_us: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thread_num: 4,
            tuple_num: 1 << 16,
            gc_interval_us: 10_000,
            clock_per_us: 1_000,
        }
    }
}

/// The shared, thread-safe engine state. One instance is created at
/// startup and shared (typically via `Arc`) across worker threads.
pub struct Engine<V> {
    config: EngineConfig,
    lsn: AtomicU64,
    tmt: Tmt,
    table: Table<V>,
    arena: Arena<V>,
    ssn_lock: Mutex<()>,
    gc: GarbageCollector<V>,
}

impl<V> Engine<V> {
    /// Builds an engine with a table seeded via `seed(key) -> value`,
    /// each record starting as a single committed version at `cstamp`
    /// 0 (matching the end-to-end scenarios' `V0_k*` fixtures).
    ///
    /// # Panics
    /// Panics if `config.thread_num` exceeds the reader bitmap's
    /// capacity. Use [`Engine::try_new`] to handle that as an error.
    pub fn new(config: EngineConfig, seed: impl FnMut(usize) -> V) -> Self
    where
        V: Send + Sync,
    {
        Self::try_new(config, seed).expect("invalid engine config")
    }

    /// Fallible form of [`Engine::new`].
    pub fn try_new(config: EngineConfig, mut seed: impl FnMut(usize) -> V) -> Result<Self, SsnError>
    where
        V: Send + Sync,
    {
        if config.thread_num > MAX_WORKERS {
            return Err(SsnError::TooManyWorkers {
                thread_num: config.thread_num,
                capacity: MAX_WORKERS,
            });
        }
        let arena = Arena::default();
        let table = Table::new(config.tuple_num, |k| arena.seed_committed(seed(k), 0));
        Ok(Self {
            config,
            lsn: AtomicU64::new(0),
            tmt: Tmt::new(config.thread_num),
            table,
            arena,
            ssn_lock: Mutex::new(()),
            gc: GarbageCollector::default(),
        })
    }

    /// The tunables this engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn tmt(&self) -> &Tmt {
        &self.tmt
    }

    pub(crate) fn table(&self) -> &Table<V> {
        &self.table
    }

    pub(crate) fn arena(&self) -> &Arena<V> {
        &self.arena
    }

    pub(crate) fn gc(&self) -> &GarbageCollector<V> {
        &self.gc
    }

    pub(crate) fn ssn_lock(&self) -> &Mutex<()> {
        &self.ssn_lock
    }

    /// Allocates the next global commit stamp (`++Lsn`).
    pub(crate) fn next_cstamp(&self) -> u64 {
        self.lsn.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// `tbegin`: starts a transaction on `worker` (1-based).
    pub fn begin(&self, worker: u32) -> Result<Transaction<'_, V>, SsnError>
    where
        V: Clone,
    {
        if worker == 0 {
            return Err(SsnError::ZeroWorkerId);
        }
        if worker as usize > self.tmt.len() {
            return Err(SsnError::TooManyWorkers {
                thread_num: worker as usize,
                capacity: self.tmt.len(),
            });
        }
        Ok(Transaction::begin(self, worker))
    }

    /// Watermark: the smallest live `cstamp` across every worker slot
    /// that has ever called `tbegin`. A committed descriptor's own
    /// `cstamp` is its most recent completed point in time; every other
    /// status (in-flight, committing, or already-finished-aborted) is
    /// bounded by its own frozen `txid` snapshot.
    pub fn watermark(&self) -> u64 {
        (1..=self.tmt.len())
            .filter_map(|w| {
                let d = self.tmt.get(w);
                if !d.started {
                    return None;
                }
                Some(match d.status() {
                    TxStatus::Committed => d.cstamp.load(Ordering::Acquire),
                    _ => d.txid,
                })
            })
            .min()
            .unwrap_or(0)
    }

    /// Runs one garbage-collection pass: sweeps reclaimable versions
    /// below the current watermark and drops retired TMT descriptors.
    pub fn run_gc(&self) -> GcStats
    where
        V: Send + Sync,
    {
        let watermark = self.watermark();
        let mut stats = self.gc.sweep(&self.table, &self.arena, watermark);
        stats.descriptors_reclaimed = self.tmt.sweep_retired();
        stats
    }

    /// Number of live versions across the whole arena.
    pub fn live_versions(&self) -> usize {
        self.arena.len()
    }

    /// Reads a record's state directly off the version chain, bypassing
    /// snapshot isolation: the head version if it has already
    /// committed, otherwise the newest committed version below it. For
    /// diagnostics and out-of-band verification only — the way
    /// `ermia.cc`'s own result reporting walks `Table[i].latest`
    /// straight off the chain instead of through a transaction.
    pub fn peek(&self, key: usize) -> Option<V>
    where
        V: Clone,
    {
        let slot = self.table.get(key)?;
        let head = slot.latest();
        let committed = if head.status() == crate::version::VersionStatus::Committed {
            head
        } else {
            head.committed_prev()?
        };
        Some(committed.value.clone())
    }
}
