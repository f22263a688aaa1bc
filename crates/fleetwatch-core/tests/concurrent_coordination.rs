//! Lock contention tests for the coordination store.
//!
//! Many threads, each with its own store handle, mutate the same document.
//! The tests verify:
//!
//! - No lost updates: the active set equals begun-minus-ended
//! - Sequence numbers are unique and strictly increasing
//! - The materialized table stays consistent with a replay of the log

use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;

use fleetwatch_core::coordination::{
    CoordinationApi, CoordinationStore, EventQuery, KIND_RESET, KIND_RUN_BEGIN, KIND_RUN_END,
    RunRequest,
};

const THREADS: usize = 8;
const RUNS_PER_THREAD: usize = 25;

fn run_id(thread: usize, run: usize) -> String {
    format!("t{thread}-r{run}")
}

#[test]
fn concurrent_begin_and_end_lose_nothing() {
    let home = tempfile::tempdir().unwrap();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|thread| {
            let barrier = Arc::clone(&barrier);
            let home = home.path().to_path_buf();
            thread::spawn(move || {
                let api = CoordinationApi::new(CoordinationStore::open(&home));
                barrier.wait();
                let mut seqs = Vec::new();
                for run in 0..RUNS_PER_THREAD {
                    let id = run_id(thread, run);
                    let begun = api.begin(&RunRequest::new(id.clone()).header("working"));
                    assert!(begun.ok, "begin failed: {:?}", begun.error);
                    seqs.push(begun.seq);
                    if run % 2 == 0 {
                        let ended = api.end(Some(id.as_str()), Some("test"));
                        assert!(ended.ok);
                        assert_eq!(ended.existed, Some(true));
                        seqs.push(ended.seq);
                    }
                }
                seqs
            })
        })
        .collect();

    let mut all_seqs = Vec::new();
    for handle in handles {
        let seqs = handle.join().unwrap();
        // Each thread observes its own writes in order.
        assert!(seqs.windows(2).all(|pair| pair[0] < pair[1]));
        all_seqs.extend(seqs);
    }

    let ends_per_thread = RUNS_PER_THREAD.div_ceil(2);
    let total_events = THREADS * (RUNS_PER_THREAD + ends_per_thread);
    let unique: BTreeSet<_> = all_seqs.iter().copied().collect();
    assert_eq!(unique.len(), total_events, "duplicate sequence numbers");
    assert_eq!(unique.first().copied(), Some(1));
    assert_eq!(unique.last().copied(), Some(total_events as u64));

    let api = CoordinationApi::new(CoordinationStore::open(home.path()));
    let snapshot = api.snapshot();
    let active: BTreeSet<_> = snapshot
        .active_runs
        .iter()
        .map(|run| run.run_id.clone())
        .collect();
    let expected: BTreeSet<_> = (0..THREADS)
        .flat_map(|thread| {
            (0..RUNS_PER_THREAD)
                .filter(|run| run % 2 == 1)
                .map(move |run| run_id(thread, run))
        })
        .collect();
    assert_eq!(active, expected);
    assert_eq!(snapshot.active_count, expected.len());
    assert!(snapshot.running);

    let page = api.list_events(EventQuery::new(1000, 0));
    assert_eq!(page.events.len(), total_events);
    assert!(page.events.windows(2).all(|pair| pair[0].seq < pair[1].seq));
    let begins = page.events.iter().filter(|e| e.kind == KIND_RUN_BEGIN).count();
    let ends = page.events.iter().filter(|e| e.kind == KIND_RUN_END).count();
    assert_eq!(begins, THREADS * RUNS_PER_THREAD);
    assert_eq!(ends, THREADS * ends_per_thread);

    let report = api.verify();
    assert!(report.ok);
    assert!(report.consistent, "mismatches: {:?}", report.mismatches);
}

#[test]
fn concurrent_writers_with_small_log_keep_newest_events() {
    let home = tempfile::tempdir().unwrap();
    let handles: Vec<_> = (0..4)
        .map(|thread| {
            let home = home.path().to_path_buf();
            thread::spawn(move || {
                let api =
                    CoordinationApi::new(CoordinationStore::open(&home).with_event_capacity(10));
                for run in 0..20 {
                    api.update(&RunRequest::new(run_id(thread, 0)).details(format!("step {run}")));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let api = CoordinationApi::new(CoordinationStore::open(home.path()).with_event_capacity(10));
    let page = api.list_events(EventQuery::new(1000, 0));
    assert_eq!(page.last_seq, 80);
    let seqs: Vec<_> = page.events.iter().map(|event| event.seq).collect();
    assert_eq!(seqs, (71..=80).collect::<Vec<_>>());
    assert_eq!(api.snapshot().active_count, 4);

    let report = api.verify();
    assert!(report.ok);
    assert!(!report.log_complete);
}

#[test]
fn reset_under_contention_always_restarts_sequence() {
    let home = tempfile::tempdir().unwrap();
    let api = CoordinationApi::new(CoordinationStore::open(home.path()));
    for run in 0..5 {
        api.begin(&RunRequest::new(format!("r{run}")));
    }

    let writer = {
        let home = home.path().to_path_buf();
        thread::spawn(move || {
            let api = CoordinationApi::new(CoordinationStore::open(&home));
            for run in 0..20 {
                api.begin(&RunRequest::new(format!("late{run}")));
            }
        })
    };
    let reset = api.reset(Some("operator"));
    writer.join().unwrap();

    assert!(reset.ok);
    assert_eq!(reset.seq, 1);
    assert_eq!(reset.active_count, 0);

    // Whatever landed after the reset continues from seq 1.
    let page = api.list_events(EventQuery::new(1000, 0));
    assert_eq!(page.events[0].seq, 1);
    assert_eq!(page.events[0].kind, KIND_RESET);
    assert!(page.events.windows(2).all(|pair| pair[0].seq + 1 == pair[1].seq));
    assert!(api.verify().consistent);
}
