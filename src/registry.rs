//! Concurrency-safe occurrence counters for named assertions.
//!
//! Each (store file, test name) pair owns two counters: `running`, the
//! number of assertions seen so far in this process run, and `cleanup`, a
//! historical high-water mark consulted by the reconciliation scanner.
//! `reset` zeroes only `running`, so a re-executed test (table-driven
//! re-runs, selective re-run) restarts its numbering while obsolescence
//! checks still see the prior maximum.
//!
//! The registry is plain data behind one mutex; the lock covers only the
//! O(1) counter update and is never held across I/O. One registry exists
//! per test run as a field of the engine, never as process-wide state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

type CounterMap = HashMap<PathBuf, HashMap<String, usize>>;

#[derive(Debug, Default)]
struct Counters {
    running: CounterMap,
    cleanup: CounterMap,
}

/// Per-run occurrence registry.
#[derive(Debug, Default)]
pub struct TestRegistry {
    inner: Mutex<Counters>,
}

impl TestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next occurrence for `name` in `file` and returns the
    /// assertion identifier, `"<name> - <occurrence>"`, 1-based.
    pub fn next_id(&self, file: &Path, name: &str) -> String {
        let occurrence = {
            let mut counters = self.inner.lock().expect("registry lock poisoned");
            let running = counters
                .running
                .entry(file.to_path_buf())
                .or_default()
                .entry(name.to_string())
                .or_insert(0);
            *running += 1;
            let occurrence = *running;
            // Mirror into the high-water mark used for obsolescence.
            let seen = counters
                .cleanup
                .entry(file.to_path_buf())
                .or_default()
                .entry(name.to_string())
                .or_insert(0);
            *seen = (*seen).max(occurrence);
            occurrence
        };
        format!("{name} - {occurrence}")
    }

    /// Restarts numbering for one test, keeping its high-water mark.
    /// Invoked when the enclosing test finishes.
    pub fn reset(&self, file: &Path, name: &str) {
        let mut counters = self.inner.lock().expect("registry lock poisoned");
        if let Some(by_name) = counters.running.get_mut(file) {
            by_name.remove(name);
        }
    }

    /// The historical maximum occurrence for a test, 0 when never seen.
    pub fn high_water(&self, file: &Path, name: &str) -> usize {
        let counters = self.inner.lock().expect("registry lock poisoned");
        counters
            .cleanup
            .get(file)
            .and_then(|by_name| by_name.get(name))
            .copied()
            .unwrap_or(0)
    }

    /// All store files that registered at least one assertion this run.
    pub fn registered_files(&self) -> Vec<PathBuf> {
        let counters = self.inner.lock().expect("registry lock poisoned");
        let mut files: Vec<PathBuf> = counters.cleanup.keys().cloned().collect();
        files.sort();
        files
    }

    pub fn is_registered(&self, file: &Path) -> bool {
        let counters = self.inner.lock().expect("registry lock poisoned");
        counters.cleanup.contains_key(file)
    }

    /// Snapshot of a file's high-water marks, taken by the scanner after
    /// the run completes.
    pub fn high_water_marks(&self, file: &Path) -> HashMap<String, usize> {
        let counters = self.inner.lock().expect("registry lock poisoned");
        counters.cleanup.get(file).cloned().unwrap_or_default()
    }

    /// Forgets every high-water mark. Called by the scanner after an
    /// update-mode reconciliation has rewritten the stores.
    pub fn clear_high_water(&self) {
        let mut counters = self.inner.lock().expect("registry lock poisoned");
        counters.cleanup.clear();
    }
}
