//! Literal transcriptions of the end-to-end scenarios (S1-S6):
//! THREAD_NUM=2, TUPLE_NUM=4, values A=0/B=1 in place of the
//! distilled spec's byte-string fixtures. Driven single-threaded with
//! an explicit call order standing in for the scenarios' "both try to
//! commit" concurrency, since the properties under test depend only on
//! the relative order `tbegin`/`tread`/`twrite`/`commit` happen in, not
//! on real OS-thread parallelism.

use ssn_mvcc::{Engine, EngineConfig};

const A: i64 = 0;
const B: i64 = 1;

fn engine() -> Engine<i64> {
    Engine::new(
        EngineConfig {
            thread_num: 2,
            tuple_num: 4,
            ..EngineConfig::default()
        },
        |_| A,
    )
}

/// S1 - write skew is detected: T1 reads k0, writes k1; T2 reads k1,
/// writes k0. Both try to commit; exactly one must succeed.
#[test]
fn s1_write_skew_is_detected() {
    let engine = engine();

    let mut t1 = engine.begin(1).unwrap();
    assert_eq!(t1.tread(0), Some(A));
    t1.twrite(1, B);

    let mut t2 = engine.begin(2).unwrap();
    assert_eq!(t2.tread(1), Some(A));
    t2.twrite(0, B);

    let r1 = t1.commit();
    let r2 = t2.commit();
    if r1.is_err() {
        t1.abort();
    }
    if r2.is_err() {
        t2.abort();
    }
    assert_ne!(r1.is_ok(), r2.is_ok(), "exactly one of T1/T2 must commit");
}

/// S2 - first-updater-wins: T1 writes k0 and has not yet committed. T2
/// observes the in-flight head and aborts on its own write attempt. T1
/// commits; T2 retried afterward succeeds.
#[test]
fn s2_first_updater_wins() {
    let engine = engine();

    let mut t1 = engine.begin(1).unwrap();
    t1.twrite(0, B);

    let mut t2 = engine.begin(2).unwrap();
    t2.twrite(0, 2);
    assert_eq!(t2.abort_reason(), Some(ssn_mvcc::AbortReason::FirstUpdaterWins));
    t2.abort();

    assert_eq!(t1.commit(), Ok(1));

    let mut reader = engine.begin(1).unwrap();
    assert_eq!(reader.tread(0), Some(B));

    let mut t2_retry = engine.begin(2).unwrap();
    t2_retry.twrite(0, 2);
    assert!(t2_retry.commit().is_ok());
}

/// Gives worker 2 two extra settled commits (on keys that don't
/// otherwise matter to the scenario) before the scenario proper begins.
/// `tbegin`'s txid is one past the highest `lastcstamp` published by any
/// worker, and a worker's own `lastcstamp` only advances the round
/// *after* it commits — so two workers racing to begin from a cold,
/// entirely idle engine read each other's still-zero `lastcstamp` and
/// tie. Running worker 2 ahead of worker 1 breaks that tie the same way
/// an already-busy multi-worker system would, which is what S3/S4's
/// illustrative txid numbers (10, 11, 12 rather than 0, 1, 2) depict.
fn warm_up_worker_2_ahead(engine: &Engine<i64>) {
    for key in [2, 3] {
        let mut t = engine.begin(2).unwrap();
        t.twrite(key, 9);
        assert!(t.commit().is_ok());
    }
}

/// S3 - snapshot staleness abort: T1 begins before T2. T2 writes k0 and
/// commits. T1 then (blind-)writes k0; the committed ancestor it finds
/// has a `cstamp` newer than T1's snapshot, so it aborts rather than
/// silently overwriting a commit it could not have seen.
#[test]
fn s3_snapshot_staleness_abort() {
    let engine = engine();
    warm_up_worker_2_ahead(&engine);

    let mut t1 = engine.begin(1).unwrap();

    let mut t2 = engine.begin(2).unwrap();
    t2.twrite(0, B);
    assert!(t2.commit().is_ok());

    t1.twrite(0, 2);
    assert_eq!(
        t1.commit(),
        Err(ssn_mvcc::AbortReason::SnapshotStale)
    );
    t1.abort();
}

/// S4 - a read-only transaction succeeds across a concurrent writer:
/// T1 begins, T2 writes and commits k0, T1 still sees the pre-T2 value
/// on every key and commits cleanly.
#[test]
fn s4_read_only_tx_succeeds_across_concurrent_writer() {
    let engine = engine();
    warm_up_worker_2_ahead(&engine);

    let mut t1 = engine.begin(1).unwrap();

    let mut t2 = engine.begin(2).unwrap();
    t2.twrite(0, B);
    assert!(t2.commit().is_ok());

    assert_eq!(t1.tread(0), Some(A));
    assert_eq!(t1.tread(1), Some(A));
    assert!(t1.commit().is_ok());
}

/// S5 - eta/pi propagation does not force an unnecessary abort: a long
/// read-only transaction R reading k0..k3 does not abort a short
/// writer W on k3 whose commit happens strictly after R began and
/// which never reads anything R wrote.
#[test]
fn s5_eta_pi_propagation_no_false_abort() {
    let engine = engine();

    let mut r = engine.begin(1).unwrap();
    for k in 0..4 {
        assert_eq!(r.tread(k), Some(A));
    }

    let mut w = engine.begin(2).unwrap();
    w.twrite(3, B);
    assert!(w.commit().is_ok(), "W must commit: it never read anything R wrote");

    assert!(r.commit().is_ok(), "R must commit: W's write has no anti-dependency on R's reads");
}

/// S6 - repeat read is stable: a second `tread` within the same
/// transaction returns the same version as the first even after a
/// concurrent committed write, and does not grow the reader bitmap.
#[test]
fn s6_repeat_read_is_stable() {
    let engine = engine();

    let mut t1 = engine.begin(1).unwrap();
    assert_eq!(t1.tread(0), Some(A));

    let mut writer = engine.begin(2).unwrap();
    writer.twrite(0, B);
    assert!(writer.commit().is_ok());

    // Same transaction, same key: must still see its own snapshot.
    assert_eq!(t1.tread(0), Some(A));
    assert!(t1.commit().is_ok());
}
