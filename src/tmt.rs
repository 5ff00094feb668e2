//! Transaction descriptor table (TMT).
//!
//! One published descriptor per worker, replaced — not mutated in place
//! — on every `tbegin`, so a peer that grabbed the pointer before a
//! retry still sees a stable, internally consistent snapshot. Fields
//! within a live descriptor are mutated in place by its owning worker
//! only; every other worker only reads them.

use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

/// Status of a transaction as published in the TMT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TxStatus {
    /// Reading/writing, not yet attempting to commit.
    InFlight = 0,
    /// Inside the commit validation window (serial or parallel).
    Committing = 1,
    /// Passed validation.
    Committed = 2,
    /// Failed validation or hit a write-write conflict.
    Aborted = 3,
}

impl From<u8> for TxStatus {
    fn from(v: u8) -> Self {
        match v {
            0 => TxStatus::InFlight,
            1 => TxStatus::Committing,
            2 => TxStatus::Committed,
            _ => TxStatus::Aborted,
        }
    }
}

/// Sentinel published-`cstamp` value meaning "not yet assigned".
pub const CSTAMP_UNASSIGNED: u64 = 0;

/// One worker's published transaction descriptor.
pub struct Descriptor {
    /// This transaction's id, computed at `tbegin` as one past the
    /// highest `lastcstamp` published by any worker's descriptor
    /// (including this worker's own, carried forward from its previous
    /// attempt).
    pub txid: u64,
    /// This worker's most recent settled commit stamp: the `cstamp` of
    /// its previous transaction if that one committed, or the
    /// `lastcstamp` it was itself seeded with if that one aborted (an
    /// aborted attempt never advances `Lsn`, so there is nothing newer
    /// to carry forward). Read by every other worker's `tbegin` to
    /// compute its own `txid`.
    pub lastcstamp: u64,
    /// 0 until the transaction enters its commit window.
    pub cstamp: AtomicU64,
    /// pi(T) as published for peers racing our commit. Only meaningful
    /// once `status >= Committing`.
    pub sstamp: AtomicU32,
    /// False only for the placeholder descriptor a worker slot is
    /// seeded with before its first `tbegin`. Excluded from the GC
    /// watermark so a configured-but-never-used worker slot does not
    /// pin the watermark at its genesis value forever.
    pub started: bool,
    status: AtomicU8,
}

impl Descriptor {
    /// A fresh in-flight descriptor for a `tbegin` reading `txid`,
    /// carrying forward `lastcstamp` for the *next* worker's `tbegin` to
    /// read.
    pub fn begin(txid: u64, lastcstamp: u64) -> Self {
        Self {
            txid,
            lastcstamp,
            cstamp: AtomicU64::new(CSTAMP_UNASSIGNED),
            sstamp: AtomicU32::new(0),
            started: true,
            status: AtomicU8::new(TxStatus::InFlight as u8),
        }
    }

    /// The placeholder every worker slot starts with before its first
    /// `tbegin`.
    fn unstarted() -> Self {
        Self {
            started: false,
            ..Self::begin(0, 0)
        }
    }

    /// Current status, acquire-ordered so a peer observing `Committed`
    /// or `Aborted` also observes the final `cstamp`/`sstamp`.
    pub fn status(&self) -> TxStatus {
        TxStatus::from(self.status.load(Ordering::Acquire))
    }

    /// Transitions to `Committing` and publishes the allocated `cstamp`.
    /// Release-ordered: any peer that then observes `Committing` and
    /// spins on `cstamp` will see the value written here.
    pub fn begin_commit(&self, cstamp: u64) {
        self.cstamp.store(cstamp, Ordering::Release);
        self.status.store(TxStatus::Committing as u8, Ordering::Release);
    }

    /// Publishes the final `sstamp` ahead of the `Committed` transition,
    /// so peers spinning on status see a consistent pair once unblocked.
    pub fn publish_sstamp(&self, sstamp: u32) {
        self.sstamp.store(sstamp, Ordering::Release);
    }

    /// Publishes the final outcome.
    pub fn finish(&self, status: TxStatus) {
        self.status.store(status as u8, Ordering::Release);
    }
}

/// The per-worker table of published descriptors, plus a queue of
/// retired descriptors awaiting GC.
pub struct Tmt {
    slots: Vec<AtomicPtr<Descriptor>>,
    retired: Mutex<Vec<Descriptor>>,
}

impl Tmt {
    /// Builds a table sized for `thread_num` workers (1-based; index 0
    /// is unused, matching the reserved reader-bitmap bit).
    pub fn new(thread_num: usize) -> Self {
        let slots = (0..=thread_num)
            .map(|_| AtomicPtr::new(Box::into_raw(Box::new(Descriptor::unstarted()))))
            .collect();
        Self {
            slots,
            retired: Mutex::new(Vec::new()),
        }
    }

    /// Replaces `worker`'s descriptor, retiring the old one for GC, and
    /// returns a reference to the fresh descriptor.
    pub fn replace(&self, worker: usize, fresh: Descriptor) -> &Descriptor {
        let new_ptr = Box::into_raw(Box::new(fresh));
        let old_ptr = self.slots[worker].swap(new_ptr, Ordering::AcqRel);
        // SAFETY: `old_ptr` was installed by a previous `replace` (or
        // `new`) and is only ever read through `get`, never freed
        // except here and in `sweep_retired`, both of which take
        // exclusive ownership via `Box::from_raw` exactly once.
        let old = unsafe { Box::from_raw(old_ptr) };
        self.retired.lock().expect("tmt mutex poisoned").push(*old);
        // SAFETY: `new_ptr` was just installed and is stable for the
        // descriptor's lifetime in the table.
        unsafe { &*new_ptr }
    }

    /// Borrow of worker `w`'s current descriptor.
    pub fn get(&self, w: usize) -> &Descriptor {
        // SAFETY: see `replace`.
        unsafe { &*self.slots[w].load(Ordering::Acquire) }
    }

    /// Number of workers this table was sized for.
    pub fn len(&self) -> usize {
        self.slots.len().saturating_sub(1)
    }

    /// True if this table was sized for zero workers.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every retired descriptor, returning how many were freed.
    /// Safe any time — retired descriptors are already unreachable from
    /// `slots`, so there is no watermark to respect here (unlike
    /// version reclamation).
    pub fn sweep_retired(&self) -> usize {
        let mut retired = self.retired.lock().expect("tmt mutex poisoned");
        let n = retired.len();
        retired.clear();
        n
    }
}

impl Drop for Tmt {
    fn drop(&mut self) {
        for slot in &self.slots {
            let ptr = slot.load(Ordering::Acquire);
            if !ptr.is_null() {
                // SAFETY: exclusive access during drop, each slot freed once.
                unsafe { drop(Box::from_raw(ptr)) };
            }
        }
    }
}

// SAFETY: descriptors are only ever mutated through their own atomic
// fields; raw pointers are used purely to swap ownership wholesale.
unsafe impl Send for Tmt {}
unsafe impl Sync for Tmt {}
