//! Watermark-based garbage collection.
//!
//! Reclamation here is deliberately simple: a version is safe to free
//! once its `cstamp` (or, for an aborted write, once it is no longer a
//! record's head) falls below the GC watermark — the smallest `cstamp`
//! any worker might still need to read through. This is not full
//! epoch-based protection (epoch tunables are out of scope); it trades
//! a small synchronization window for the recursion-free, id-keyed
//! arena design described in the design notes.

use std::sync::Mutex;

use crate::record::Table;
use crate::version::{Arena, Version};

enum DeadKind {
    /// A write that never validated; safe to free once it is no longer
    /// its record's head (so no in-progress `twrite` dereferences it).
    AbortedWrite,
    /// A committed version superseded by a later committed write; safe
    /// to free once the watermark passes its `cstamp`.
    SupersededCommitted,
}

struct DeadEntry<V> {
    key: usize,
    id: u64,
    ptr: *const Version<V>,
    kind: DeadKind,
}

// SAFETY: `ptr` is only ever dereferenced transiently inside `sweep`,
// which holds the same synchronization the rest of the engine relies
// on (the version is arena-owned and not mutated through this pointer).
unsafe impl<V> Send for DeadEntry<V> {}

/// Outcome of one [`crate::engine::Engine::run_gc`] pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct GcStats {
    pub versions_reclaimed: usize,
    pub descriptors_reclaimed: usize,
}

/// Pending reclamation queues, fed by the executor's `abort`/`commit`.
pub struct GarbageCollector<V> {
    dead: Mutex<Vec<DeadEntry<V>>>,
}

impl<V> Default for GarbageCollector<V> {
    fn default() -> Self {
        Self {
            dead: Mutex::new(Vec::new()),
        }
    }
}

impl<V> GarbageCollector<V> {
    pub(crate) fn enqueue_aborted(&self, key: usize, id: u64, ptr: *const Version<V>) {
        self.dead
            .lock()
            .expect("gc mutex poisoned")
            .push(DeadEntry {
                key,
                id,
                ptr,
                kind: DeadKind::AbortedWrite,
            });
    }

    pub(crate) fn enqueue_superseded(&self, key: usize, id: u64, ptr: *const Version<V>) {
        self.dead
            .lock()
            .expect("gc mutex poisoned")
            .push(DeadEntry {
                key,
                id,
                ptr,
                kind: DeadKind::SupersededCommitted,
            });
    }

    /// Drains the pending queue and reclaims everything provably
    /// unreachable: aborted writes no longer at their record's head,
    /// and superseded committed versions whose `cstamp` is below
    /// `watermark`. Entries not yet eligible are re-queued.
    pub fn sweep(&self, table: &Table<V>, arena: &Arena<V>, watermark: u64) -> GcStats {
        let mut pending = self.dead.lock().expect("gc mutex poisoned");
        let entries = std::mem::take(&mut *pending);
        let mut reclaim_ids = Vec::with_capacity(entries.len());
        let mut requeue = Vec::new();

        for entry in entries {
            let eligible = match entry.kind {
                DeadKind::AbortedWrite => table
                    .get(entry.key)
                    .map(|slot| !std::ptr::eq(slot.latest(), entry.ptr))
                    .unwrap_or(true),
                DeadKind::SupersededCommitted => {
                    // SAFETY: still arena-owned until `reclaim` below.
                    let v = unsafe { &*entry.ptr };
                    let cstamp = crate::stamp::untag(v.cstamp.load(std::sync::atomic::Ordering::Acquire)) as u64;
                    cstamp < watermark
                }
            };
            if eligible {
                reclaim_ids.push(entry.id);
            } else {
                requeue.push(entry);
            }
        }

        *pending = requeue;
        drop(pending);

        let versions_reclaimed = arena.reclaim(&reclaim_ids);
        GcStats {
            versions_reclaimed,
            descriptors_reclaimed: 0,
        }
    }
}
