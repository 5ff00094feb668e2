//! Packed predecessor/successor stamp word.
//!
//! Grounded on the teacher's `VersionLock`: a single machine word split
//! into a tag bit and a payload, manipulated with plain atomic
//! fetch/CAS ops rather than a mutex. Here the word is a `u64` split into
//! two `u32` halves (`pstamp`, `sstamp`); the `sstamp` half additionally
//! reserves its low bit as `TIDFLAG`.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Tag bit reserved in the low bit of every `sstamp`/`cstamp` half.
/// Fixed at 1 by construction; asserted at compile time so the two
/// places in the algorithm that shift by "1" and by `TIDFLAG` can never
/// silently drift apart (see the open question in the design notes).
pub const TIDFLAG: u32 = 1;
const _: () = assert!(TIDFLAG == 1, "TIDFLAG must be 1, see design notes §9");

/// Sentinel meaning "no committed successor yet": `u32::MAX` with the
/// tag bit cleared.
pub const NO_SUCCESSOR: u32 = !TIDFLAG;

/// Packs a worker id as an in-flight overwriter tag.
#[inline]
pub const fn tag_worker(worker: u32) -> u32 {
    (worker << 1) | TIDFLAG
}

/// Packs a commit stamp as a committed successor/creation value.
#[inline]
pub const fn tag_commit(cstamp: u32) -> u32 {
    cstamp << 1
}

/// True if `raw`'s tag bit marks it as an in-flight worker id rather
/// than a committed stamp.
#[inline]
pub const fn is_worker_tag(raw: u32) -> bool {
    raw & TIDFLAG != 0
}

/// Strips the tag bit, recovering the worker id or commit stamp
/// depending on [`is_worker_tag`].
#[inline]
pub const fn untag(raw: u32) -> u32 {
    raw >> 1
}

/// Outcome of a compare-and-swap on one half of a stamp.
pub type CasResult = Result<u32, u32>;

/// The packed `(pstamp, sstamp)` word carried on every [`crate::version::Version`].
///
/// `pstamp` is plain (never tagged); `sstamp` uses [`is_worker_tag`] /
/// [`untag`] on its decoded value.
#[derive(Debug)]
pub struct PackedStamp {
    word: AtomicU64,
}

impl PackedStamp {
    /// Builds a packed stamp with an initial `pstamp` and `sstamp`.
    pub fn new(pstamp: u32, sstamp: u32) -> Self {
        Self {
            word: AtomicU64::new(pack(pstamp, sstamp)),
        }
    }

    /// Atomically loads both halves.
    pub fn load(&self, order: Ordering) -> (u32, u32) {
        unpack(self.word.load(order))
    }

    /// Atomically loads `pstamp`.
    pub fn load_pstamp(&self, order: Ordering) -> u32 {
        unpack(self.word.load(order)).0
    }

    /// Atomically loads `sstamp`.
    pub fn load_sstamp(&self, order: Ordering) -> u32 {
        unpack(self.word.load(order)).1
    }

    /// Atomically stores `pstamp`, leaving `sstamp` untouched.
    pub fn store_pstamp(&self, pstamp: u32, order: Ordering) {
        self.word.fetch_update(order, Ordering::Acquire, |w| {
            let (_, s) = unpack(w);
            Some(pack(pstamp, s))
        })
        .expect("fetch_update with an always-Some closure cannot fail");
    }

    /// Atomically stores `sstamp`, leaving `pstamp` untouched.
    pub fn store_sstamp(&self, sstamp: u32, order: Ordering) {
        self.word.fetch_update(order, Ordering::Acquire, |w| {
            let (p, _) = unpack(w);
            Some(pack(p, sstamp))
        })
        .expect("fetch_update with an always-Some closure cannot fail");
    }

    /// Raises `pstamp` to `max(current, candidate)`, retrying on
    /// concurrent collision. Used post-commit to publish eta(T) onto
    /// read versions without clobbering a racing reader's own raise.
    pub fn raise_pstamp(&self, candidate: u32, order: Ordering) {
        self.word
            .fetch_update(order, Ordering::Acquire, |w| {
                let (p, s) = unpack(w);
                if candidate > p {
                    Some(pack(candidate, s))
                } else {
                    None
                }
            })
            .ok();
    }

    /// Compare-and-swap on the `pstamp` half only.
    pub fn cas_pstamp(&self, current: u32, new: u32, order: Ordering) -> CasResult {
        self.word
            .fetch_update(order, Ordering::Acquire, |w| {
                let (p, s) = unpack(w);
                if p == current {
                    Some(pack(new, s))
                } else {
                    None
                }
            })
            .map(|w| unpack(w).0)
            .map_err(|w| unpack(w).0)
    }

    /// Compare-and-swap on the `sstamp` half only.
    pub fn cas_sstamp(&self, current: u32, new: u32, order: Ordering) -> CasResult {
        self.word
            .fetch_update(order, Ordering::Acquire, |w| {
                let (p, s) = unpack(w);
                if s == current {
                    Some(pack(p, new))
                } else {
                    None
                }
            })
            .map(|w| unpack(w).1)
            .map_err(|w| unpack(w).1)
    }
}

#[inline]
const fn pack(pstamp: u32, sstamp: u32) -> u64 {
    ((pstamp as u64) << 32) | (sstamp as u64)
}

#[inline]
const fn unpack(word: u64) -> (u32, u32) {
    ((word >> 32) as u32, word as u32)
}

/// A single tagged word, used for `Version::cstamp`: the worker id
/// before commit, the commit stamp (shifted) after.
#[derive(Debug)]
pub struct TaggedStamp {
    raw: AtomicU32,
}

impl TaggedStamp {
    /// Creates a tagged stamp already carrying a worker id (in flight).
    pub fn for_worker(worker: u32) -> Self {
        Self {
            raw: AtomicU32::new(tag_worker(worker)),
        }
    }

    /// Atomically loads the raw tagged value.
    pub fn load(&self, order: Ordering) -> u32 {
        self.raw.load(order)
    }

    /// Publishes the committed stamp, clearing the worker tag.
    pub fn publish_commit(&self, cstamp: u32, order: Ordering) {
        self.raw.store(tag_commit(cstamp), order);
    }
}
