//! Versions: one value of one record at one point in logical time.
//!
//! Version nodes are heap-allocated once and never moved; the chain
//! links (`prev`, `committed_prev`) are raw pointers into an [`Arena`]
//! that owns the boxes, so garbage collection is a watermark sweep over
//! the arena's id-keyed map rather than a reference-counted walk (see
//! the design notes on avoiding recursive chain traversal).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

use crate::stamp::{PackedStamp, TaggedStamp, NO_SUCCESSOR};

/// Lifecycle state of a version, closed per the "no dynamic dispatch in
/// the core" design note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VersionStatus {
    /// Installed by a writer, not yet validated.
    InFlight = 0,
    /// Passed SSN validation and is now visible to later readers.
    Committed = 1,
    /// Failed validation; left in the `prev` chain until GC, skipped by
    /// `committed_prev` walks.
    Aborted = 2,
}

impl From<u8> for VersionStatus {
    fn from(v: u8) -> Self {
        match v {
            0 => VersionStatus::InFlight,
            1 => VersionStatus::Committed,
            _ => VersionStatus::Aborted,
        }
    }
}

/// One version of one record.
pub struct Version<V> {
    /// Monotonically issued id, used as the arena key for GC.
    pub id: u64,
    /// Opaque payload. Modeled as a generic `V` rather than a fixed
    /// `[u8; VAL_SIZE]` array — see DESIGN.md for the rationale.
    pub value: V,
    /// Creation stamp: worker id before commit, `cstamp` after.
    pub cstamp: TaggedStamp,
    /// Packed `(pstamp, sstamp)` — eta(V)/pi(V).
    pub psstamp: PackedStamp,
    status: AtomicU8,
    /// Previous version installed at this record, possibly aborted. Set
    /// once at construction and never mutated afterwards.
    pub prev: *const Version<V>,
    /// Most recent *committed* version below this one, skipping any
    /// aborted versions in between. Set once at construction.
    pub committed_prev: *const Version<V>,
    /// Bitmap of worker ids with an uncommitted read dependency on this
    /// version. Bit 0 is reserved; worker ids are 1-based.
    pub readers: AtomicU64,
}

// SAFETY: `prev`/`committed_prev` point at other arena-owned `Version<V>`
// values that are never mutated through the raw pointer, only read; all
// mutable state lives in the atomic fields above.
unsafe impl<V: Send> Send for Version<V> {}
unsafe impl<V: Sync> Sync for Version<V> {}

impl<V> Version<V> {
    /// Reader bitmap bit for a 1-based worker id.
    #[inline]
    pub fn reader_bit(worker: u32) -> u64 {
        debug_assert!(worker >= 1, "worker ids are 1-based, bit 0 is reserved");
        1u64 << worker
    }

    /// Marks `worker` as holding an uncommitted read dependency.
    pub fn mark_reader(&self, worker: u32) {
        self.readers
            .fetch_or(Self::reader_bit(worker), Ordering::AcqRel);
    }

    /// Clears `worker`'s read dependency, e.g. at commit/abort.
    pub fn clear_reader(&self, worker: u32) {
        self.readers
            .fetch_and(!Self::reader_bit(worker), Ordering::AcqRel);
    }

    /// True if `worker` is still marked as a concurrent reader.
    pub fn has_reader(&self, worker: u32) -> bool {
        self.readers.load(Ordering::Acquire) & Self::reader_bit(worker) != 0
    }

    /// Iterates the worker ids currently marked as readers (1-based).
    pub fn reader_ids(&self, thread_num: usize) -> impl Iterator<Item = u32> + '_ {
        let bits = self.readers.load(Ordering::Acquire);
        (1..=thread_num as u32).filter(move |w| bits & Self::reader_bit(*w) != 0)
    }

    /// Atomically loads this version's status.
    pub fn status(&self) -> VersionStatus {
        VersionStatus::from(self.status.load(Ordering::Acquire))
    }

    /// Publishes a new status. Per the ordering guarantees, callers
    /// must have already written the payload and stamps they want
    /// visible before calling this with `Committed`.
    pub fn set_status(&self, status: VersionStatus, order: Ordering) {
        self.status.store(status as u8, order);
    }

    /// Borrow of `prev`, if any.
    pub fn prev(&self) -> Option<&Version<V>> {
        // SAFETY: `prev` is either null or points at an arena-owned
        // version that outlives this one (installed strictly earlier
        // and reclaimed only once unreachable under the GC watermark).
        unsafe { self.prev.as_ref() }
    }

    /// Borrow of `committed_prev`, if any.
    pub fn committed_prev(&self) -> Option<&Version<V>> {
        // SAFETY: see `prev`.
        unsafe { self.committed_prev.as_ref() }
    }

    /// Walks `committed_prev` to the newest committed version visible
    /// to `txid`, i.e. the first one whose decoded `cstamp <= txid`.
    /// Iterative per the design note against recursive chain walks.
    pub fn visible_to(&self, txid: u64) -> Option<&Version<V>> {
        let mut cur = if self.status() == VersionStatus::Committed {
            Some(self)
        } else {
            self.committed_prev()
        };
        while let Some(v) = cur {
            let cstamp_raw = v.cstamp.load(Ordering::Acquire);
            if crate::stamp::is_worker_tag(cstamp_raw) {
                // Still in flight somewhere below us; keep walking.
                cur = v.committed_prev();
                continue;
            }
            let cstamp = crate::stamp::untag(cstamp_raw) as u64;
            if cstamp <= txid {
                return Some(v);
            }
            cur = v.committed_prev();
        }
        None
    }
}

/// Owns every version node ever allocated, keyed by a monotonically
/// issued id. Chain pointers are raw references into this map; GC
/// reclaims entries by id once they age out under the watermark.
pub struct Arena<V> {
    next_id: AtomicU64,
    slots: Mutex<HashMap<u64, Box<Version<V>>>>,
}

impl<V> Default for Arena<V> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<V> Arena<V> {
    /// Allocates a fresh in-flight version and returns a raw pointer to
    /// it, stable for the version's lifetime in the arena.
    pub fn alloc(
        &self,
        value: V,
        worker: u32,
        prev: *const Version<V>,
        committed_prev: *const Version<V>,
    ) -> *const Version<V> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let version = Box::new(Version {
            id,
            value,
            cstamp: TaggedStamp::for_worker(worker),
            psstamp: PackedStamp::new(0, NO_SUCCESSOR),
            status: AtomicU8::new(VersionStatus::InFlight as u8),
            prev,
            committed_prev,
            readers: AtomicU64::new(0),
        });
        let ptr: *const Version<V> = &*version;
        self.slots.lock().expect("arena mutex poisoned").insert(id, version);
        ptr
    }

    /// Seeds the arena with an already-committed initial version (e.g.
    /// for test fixtures or a cold-start table), bypassing `tag_worker`.
    pub fn seed_committed(&self, value: V, cstamp: u32) -> *const Version<V> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let version = Box::new(Version {
            id,
            value,
            cstamp: TaggedStamp::for_worker(0),
            psstamp: PackedStamp::new(0, NO_SUCCESSOR),
            status: AtomicU8::new(VersionStatus::Committed as u8),
            prev: std::ptr::null(),
            committed_prev: std::ptr::null(),
            readers: AtomicU64::new(0),
        });
        version.cstamp.publish_commit(cstamp, Ordering::Release);
        let ptr: *const Version<V> = &*version;
        self.slots.lock().expect("arena mutex poisoned").insert(id, version);
        ptr
    }

    /// Removes and drops every version whose id is in `ids`. Callers
    /// (the GC component) are responsible for only passing ids that are
    /// provably unreachable: below the watermark and superseded on
    /// their record's `committed_prev` chain.
    pub fn reclaim(&self, ids: &[u64]) -> usize {
        let mut slots = self.slots.lock().expect("arena mutex poisoned");
        let mut reclaimed = 0;
        for id in ids {
            if slots.remove(id).is_some() {
                reclaimed += 1;
            }
        }
        reclaimed
    }

    /// Number of versions currently live in the arena.
    pub fn len(&self) -> usize {
        self.slots.lock().expect("arena mutex poisoned").len()
    }

    /// True if the arena has no live versions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
