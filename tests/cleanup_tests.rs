//! Reconciliation scenarios: obsolete files, obsolete entries, sorting,
//! and run-filter exclusions.

use std::fs;
use std::path::PathBuf;

use keepsake::engine::{Config, Engine};
use keepsake::{store, RunFilter};
use tempfile::TempDir;

fn snap_file(dir: &TempDir, name: &str) -> PathBuf {
    dir.path().join("__snapshots__").join(name)
}

#[test]
fn unreferenced_entries_are_flagged_and_removed_in_update_mode() {
    let dir = TempDir::new().unwrap();
    let file = snap_file(&dir, "suite.snap");

    // Yesterday's run stored three occurrences; today only two happen.
    store::append(&file, "[TestShrink - 1]", "one\n").unwrap();
    store::append(&file, "[TestShrink - 2]", "two\n").unwrap();
    store::append(&file, "[TestShrink - 3]", "three\n").unwrap();

    let engine = Engine::new(Config::default());
    engine.assert(&file, "TestShrink", "one\n").unwrap();
    engine.assert(&file, "TestShrink", "two\n").unwrap();

    let summary = engine.run_cleanup(&RunFilter::all()).unwrap();
    assert!(summary.obsolete_files.is_empty());
    assert_eq!(summary.obsolete_entries.len(), 1);
    assert_eq!(summary.obsolete_entries[0].header, "[TestShrink - 3]");
    // Dry run: the block is still there.
    assert!(store::lookup(&file, "[TestShrink - 3]").is_ok());

    let updater = Engine::new(Config {
        update_mode: true,
        ..Config::default()
    });
    updater.assert(&file, "TestShrink", "one\n").unwrap();
    updater.assert(&file, "TestShrink", "two\n").unwrap();
    let summary = updater.run_cleanup(&RunFilter::all()).unwrap();
    assert_eq!(summary.obsolete_entries.len(), 1);
    assert!(store::lookup(&file, "[TestShrink - 3]").is_err());
    assert_eq!(store::lookup(&file, "[TestShrink - 1]").unwrap().0, "one\n");
    assert_eq!(store::lookup(&file, "[TestShrink - 2]").unwrap().0, "two\n");
}

#[test]
fn unregistered_files_are_flagged_and_deleted_in_update_mode() {
    let dir = TempDir::new().unwrap();
    let live = snap_file(&dir, "live.snap");
    let stale = snap_file(&dir, "stale.snap");
    store::append(&stale, "[TestGone - 1]", "orphan\n").unwrap();

    let engine = Engine::new(Config::default());
    engine.assert(&live, "TestLive", "v\n").unwrap();
    let summary = engine.run_cleanup(&RunFilter::all()).unwrap();
    assert_eq!(summary.obsolete_files, vec![stale.clone()]);
    assert!(stale.exists());

    let updater = Engine::new(Config {
        update_mode: true,
        ..Config::default()
    });
    updater.assert(&live, "TestLive", "v\n").unwrap();
    updater.run_cleanup(&RunFilter::all()).unwrap();
    assert!(!stale.exists());
    assert!(live.exists());
}

#[test]
fn run_filter_shields_unselected_tests() {
    let dir = TempDir::new().unwrap();
    let file = snap_file(&dir, "suite.snap");
    let other = snap_file(&dir, "other.snap");
    store::append(&file, "[TestSelected - 1]", "v\n").unwrap();
    store::append(&file, "[TestUnselected - 1]", "kept\n").unwrap();
    store::append(&other, "[TestUnselected - 1]", "kept\n").unwrap();

    // Partial run: only TestSelected executed.
    let engine = Engine::new(Config {
        update_mode: true,
        ..Config::default()
    });
    engine.assert(&file, "TestSelected", "v\n").unwrap();
    let summary = engine
        .run_cleanup(&RunFilter::selecting(["TestSelected"]))
        .unwrap();

    // Neither the unselected entry nor the unselected file is obsolete.
    assert!(summary.is_clean());
    assert!(store::lookup(&file, "[TestUnselected - 1]").is_ok());
    assert!(other.exists());
}

#[test]
fn non_countable_headers_are_never_reconciled() {
    let dir = TempDir::new().unwrap();
    let file = snap_file(&dir, "suite.snap");
    store::append(&file, "[manual fixture]", "kept\n").unwrap();
    store::append(&file, "[TestAuto - 1]", "v\n").unwrap();

    let engine = Engine::new(Config {
        update_mode: true,
        ..Config::default()
    });
    engine.assert(&file, "TestAuto", "v\n").unwrap();
    let summary = engine.run_cleanup(&RunFilter::all()).unwrap();
    assert!(summary.is_clean());
    assert_eq!(store::lookup(&file, "[manual fixture]").unwrap().0, "kept\n");
}

#[test]
fn sort_mode_orders_headers_naturally() {
    let dir = TempDir::new().unwrap();
    let file = snap_file(&dir, "suite.snap");
    // Insertion order scrambles numeric order on purpose.
    store::append(&file, "[TestSort - 10]", "ten\n").unwrap();
    store::append(&file, "[TestSort - 2]", "two\n").unwrap();
    store::append(&file, "[TestSort - 1]", "one\n").unwrap();

    let engine = Engine::new(Config {
        sort_mode: true,
        ..Config::default()
    });
    // Register all ten occurrences so nothing is obsolete; the mismatching
    // bodies may fail the assertion, which is irrelevant here.
    for k in 1..=10 {
        let _ = engine.assert(&file, "TestSort", &format!("{k}\n"));
    }
    engine.run_cleanup(&RunFilter::all()).unwrap();

    let content = fs::read_to_string(&file).unwrap();
    let p1 = content.find("[TestSort - 1]").unwrap();
    let p2 = content.find("[TestSort - 2]").unwrap();
    let p10 = content.find("[TestSort - 10]").unwrap();
    assert!(p1 < p2, "1 must precede 2");
    assert!(p2 < p10, "2 must precede 10 under natural ordering");
}

#[test]
fn clean_sorted_files_stay_byte_identical() {
    let dir = TempDir::new().unwrap();
    let file = snap_file(&dir, "suite.snap");

    let engine = Engine::new(Config {
        update_mode: true,
        sort_mode: true,
        ..Config::default()
    });
    engine.assert(&file, "TestStable", "alpha\n").unwrap();
    engine.assert(&file, "TestStable", "beta\n").unwrap();
    let before = fs::read_to_string(&file).unwrap();

    let summary = engine.run_cleanup(&RunFilter::all()).unwrap();
    assert!(summary.is_clean());
    let after = fs::read_to_string(&file).unwrap();
    assert_eq!(before, after);
}

#[test]
fn sorting_applies_without_update_mode() {
    let dir = TempDir::new().unwrap();
    let file = snap_file(&dir, "suite.snap");
    store::append(&file, "[TestSort - 2]", "two\n").unwrap();
    store::append(&file, "[TestSort - 1]", "one\n").unwrap();

    let engine = Engine::new(Config {
        sort_mode: true,
        ..Config::default()
    });
    engine.assert(&file, "TestSort", "one\n").unwrap();
    engine.assert(&file, "TestSort", "two\n").unwrap();
    engine.run_cleanup(&RunFilter::all()).unwrap();

    let content = fs::read_to_string(&file).unwrap();
    assert!(content.find("[TestSort - 1]").unwrap() < content.find("[TestSort - 2]").unwrap());
}
