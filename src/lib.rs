//! A Serial Safety Net (SSN) certifier over a multi-version in-memory
//! record store.
//!
//! Readers and writers operate on [`version::Version`] chains addressed
//! through a flat [`record::Table`]; conflicts are detected, not
//! avoided, by tracking each transaction's predecessor high-water mark
//! (eta, "pstamp") and successor low-water mark (pi, "sstamp") and
//! checking the exclusion window `eta(T) < pi(T)` at validation time.
//! [`executor::Transaction`] drives one worker's read/write/commit
//! sequence; [`engine::Engine`] owns everything shared across workers.
//!
//! Two commit paths are provided: [`executor::Transaction::commit`]
//! serializes validation under a single mutex (`SsnLock`), and
//! [`parallel`]'s [`executor::Transaction::parallel_commit`] validates
//! lock-free by spin-waiting on individual peer descriptors instead.
//! Both converge on the same exclusion check and the same version
//! chain invariants.

pub mod breaker;
pub mod engine;
pub mod error;
pub mod executor;
pub mod gc;
pub mod parallel;
pub mod policy;
pub mod record;
pub mod stamp;
pub mod tmt;
pub mod version;

pub use engine::{Engine, EngineConfig};
pub use error::{AbortReason, SsnError};
pub use executor::Transaction;
pub use tmt::TxStatus;
