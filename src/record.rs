//! Record slots and the flat table of records.
//!
//! A record slot is nothing but a CAS-guarded head pointer: `latest`
//! grows toward newer versions via `Version::prev`; readers skip
//! aborted versions via `Version::committed_prev`. All addressing is by
//! dense index into a fixed-size table — dynamic insertion/deletion is
//! out of scope (see Non-goals).

use std::sync::atomic::{AtomicPtr, Ordering};

use crate::version::Version;

/// One record: a mutable pointer to its newest version (of any status).
pub struct RecordSlot<V> {
    latest: AtomicPtr<Version<V>>,
}

impl<V> RecordSlot<V> {
    /// Creates a slot pointing at an already-installed version (e.g. a
    /// seeded committed version from `Arena::seed_committed`).
    pub fn new(initial: *const Version<V>) -> Self {
        Self {
            latest: AtomicPtr::new(initial as *mut Version<V>),
        }
    }

    /// Loads the current head, of any status.
    pub fn latest(&self) -> &Version<V> {
        // SAFETY: `latest` always points at an arena-owned version; the
        // arena only reclaims entries below the GC watermark, and a
        // record's head is never below the watermark while reachable.
        unsafe { &*self.latest.load(Ordering::Acquire) }
    }

    /// Installs `new_head` as the record's head iff it is still
    /// `expected`. This is the only mutator of `latest` — writers alone
    /// call it, and only one CAS among racing writers can win.
    pub fn cas_latest(
        &self,
        expected: *const Version<V>,
        new_head: *const Version<V>,
    ) -> Result<(), *const Version<V>> {
        self.latest
            .compare_exchange(
                expected as *mut Version<V>,
                new_head as *mut Version<V>,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|actual| actual as *const Version<V>)
    }
}

/// The fixed-size flat table of records. Indexing scheme and capacity
/// are external-collaborator concerns per the distilled spec; this is
/// just the array of slots the executor reads and writes through.
pub struct Table<V> {
    slots: Vec<RecordSlot<V>>,
}

impl<V> Table<V> {
    /// Builds a table of `tuple_num` slots, each initialized via `init`
    /// (index -> initial committed version pointer).
    pub fn new(tuple_num: usize, mut init: impl FnMut(usize) -> *const Version<V>) -> Self {
        let slots = (0..tuple_num).map(|k| RecordSlot::new(init(k))).collect();
        Self { slots }
    }

    /// Number of records in the table.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True if the table has no records.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Borrow of record `key`'s slot, if in range.
    pub fn get(&self, key: usize) -> Option<&RecordSlot<V>> {
        self.slots.get(key)
    }
}
