//! Cross-process contention on one coordination store.
//!
//! Every mutation is a separate `fleetwatch` process, so only the advisory
//! file lock serializes them. The tests verify:
//!
//! - Sequence numbers are unique and contiguous across processes
//! - The active set equals begun-minus-ended
//! - `doctor` finds the log consistent with the active-run table

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::{Arc, Barrier};
use std::thread;

use serde_json::Value;

const WORKERS: usize = 6;
const RUNS_PER_WORKER: usize = 8;

fn fleetwatch(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fleetwatch"))
        .arg("--config")
        .arg(home.join("absent.toml"))
        .arg("--home")
        .arg(home)
        .args(args)
        .output()
        .unwrap()
}

fn json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "fleetwatch failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

fn run_id(worker: usize, run: usize) -> String {
    format!("w{worker}-r{run}")
}

#[test]
fn concurrent_processes_share_one_sequence() {
    let home = tempfile::tempdir().unwrap();
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let home: PathBuf = home.path().to_path_buf();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut seqs = Vec::new();
                for run in 0..RUNS_PER_WORKER {
                    let id = run_id(worker, run);
                    let begun = json(&fleetwatch(
                        &home,
                        &["run", "begin", &id, "--header", "working", "--source", "test"],
                    ));
                    assert_eq!(begun["ok"], true);
                    seqs.push(begun["seq"].as_u64().unwrap());
                    if run % 2 == 0 {
                        let ended = json(&fleetwatch(&home, &["run", "end", &id]));
                        assert_eq!(ended["existed"], true);
                        seqs.push(ended["seq"].as_u64().unwrap());
                    }
                }
                seqs
            })
        })
        .collect();

    let mut all_seqs = Vec::new();
    for handle in handles {
        let seqs = handle.join().unwrap();
        assert!(seqs.windows(2).all(|pair| pair[0] < pair[1]));
        all_seqs.extend(seqs);
    }

    let total = WORKERS * (RUNS_PER_WORKER + RUNS_PER_WORKER.div_ceil(2));
    let unique: BTreeSet<u64> = all_seqs.iter().copied().collect();
    assert_eq!(unique.len(), total, "duplicate sequence numbers");
    assert_eq!(unique, (1..=total as u64).collect::<BTreeSet<_>>());

    let status = json(&fleetwatch(home.path(), &["status"]));
    let active: BTreeSet<String> = status["active_runs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|run| run["run_id"].as_str().unwrap().to_string())
        .collect();
    let expected: BTreeSet<String> = (0..WORKERS)
        .flat_map(|worker| {
            (0..RUNS_PER_WORKER)
                .filter(|run| run % 2 == 1)
                .map(move |run| run_id(worker, run))
        })
        .collect();
    assert_eq!(active, expected);
    assert_eq!(status["last_seq"], total as u64);

    let doctor = json(&fleetwatch(home.path(), &["doctor"]));
    assert_eq!(doctor["consistent"], true);
    assert_eq!(doctor["log_complete"], true);
}

#[test]
fn reset_from_another_process_restarts_sequence() {
    let home = tempfile::tempdir().unwrap();
    for run in 0..3 {
        json(&fleetwatch(home.path(), &["run", "begin", &format!("r{run}")]));
    }

    let reset = json(&fleetwatch(home.path(), &["reset", "--source", "operator"]));
    assert_eq!(reset["seq"], 1);
    assert_eq!(reset["running"], false);

    let begun = json(&fleetwatch(home.path(), &["run", "begin", "after"]));
    assert_eq!(begun["seq"], 2);
    assert_eq!(begun["active_count"], 1);
}
