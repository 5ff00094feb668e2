use std::sync::mpsc::channel;
use std::sync::Arc;
use ssn_mvcc::{Engine, EngineConfig};
use threadpool::ThreadPool;

fn engine(thread_num: usize, tuple_num: usize) -> Arc<Engine<i64>> {
    Arc::new(Engine::new(
        EngineConfig { thread_num, tuple_num, ..EngineConfig::default() },
        |_| 0i64,
    ))
}

fn main() {
    let _ = env_logger::builder().filter_level(log::LevelFilter::Trace).try_init();
    for attempt in 0..200 {
        let engine = engine(6, 1);
        let pool = ThreadPool::new(6);
        let (tx, rx) = channel();
        for worker in 1..=6u32 {
            let engine = Arc::clone(&engine);
            let tx = tx.clone();
            pool.execute(move || {
                let mut commits = 0u32;
                for _ in 0..40 {
                    let mut txn = engine.begin(worker).expect("begin");
                    let current = txn.tread(0).unwrap_or(0);
                    txn.twrite(0, current + 1);
                    match txn.commit() {
                        Ok(_) => commits += 1,
                        Err(_) => txn.abort(),
                    }
                }
                tx.send(commits).unwrap();
            });
        }
        drop(tx);
        pool.join();
        let total_commits: u32 = rx.into_iter().sum();
        let mut reader = engine.begin(1).expect("begin");
        let final_value = reader.tread(0).unwrap();
        if final_value as u32 != total_commits {
            eprintln!("MISMATCH at attempt {attempt}: final={final_value} commits={total_commits}");
            std::process::exit(1);
        }
    }
    eprintln!("no mismatch found");
}
