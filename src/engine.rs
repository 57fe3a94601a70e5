//! Per-run snapshot engine: the facade an assertion API builds on.
//!
//! One [`Engine`] is constructed at run start, shared by reference across
//! worker threads, and dropped at run end; nothing in the crate is
//! process-wide state. The engine owns the occurrence registry, the mode
//! flags, and the block-update lock that serializes whole-file rewrites.
//!
//! Serialization of values into snapshot text is the caller's concern:
//! the engine only ever sees canonical strings and never branches on what
//! produced them.

use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;

use crate::cleanup::{self, CleanupSummary, RunFilter};
use crate::diff::{self, DiffReport};
use crate::errors::{Result, SnapError};
use crate::registry::TestRegistry;
use crate::store;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Opaque mode flags consumed by the engine. How they are sourced (CLI,
/// env, harness options) is the caller's business; `from_env` covers the
/// conventional variables as a convenience.
#[derive(Debug, Clone, Copy, Default)]
pub struct Config {
    /// Persist received values instead of failing on mismatch, and let the
    /// cleanup pass delete what it flags.
    pub update_mode: bool,
    /// Forbid every write, including first-run creation.
    pub ci_mode: bool,
    /// Re-sort store files into natural header order during cleanup.
    pub sort_mode: bool,
}

impl Config {
    pub fn from_env() -> Self {
        fn truthy(var: &str) -> bool {
            std::env::var(var).is_ok_and(|v| !v.is_empty() && v != "0" && v != "false")
        }
        Self {
            update_mode: truthy("UPDATE_SNAPSHOTS"),
            ci_mode: truthy("CI"),
            sort_mode: truthy("SORT_SNAPSHOTS"),
        }
    }
}

/// Result of comparing a received value against the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// No snapshot with this identifier exists yet.
    New,
    /// The stored snapshot equals the received value.
    Unchanged,
    /// The stored snapshot differs; the diff says how.
    Changed(DiffReport),
}

// =============================================================================
// ENGINE
// =============================================================================

/// Per-run context: registry, flags, and the update lock.
#[derive(Debug, Default)]
pub struct Engine {
    config: Config,
    registry: TestRegistry,
    /// Serializes `commit`'s probe-and-write against the store files.
    /// Distinct from the registry's lock: two parallel tests may update
    /// different blocks of the same physical file, and each rewrite is a
    /// read-modify-write of the whole file.
    update_lock: Mutex<()>,
}

/// Bracketed header line under which an identifier is stored.
fn block_header(id: &str) -> String {
    format!("[{id}]")
}

impl Engine {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry: TestRegistry::new(),
            update_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &TestRegistry {
        &self.registry
    }

    /// Compares `new_body` against the stored snapshot for `id`.
    ///
    /// A missing snapshot is `Outcome::New`, except in CI mode where it is
    /// a terminal `NotFound`: nothing may create snapshots there.
    pub fn compare(&self, file: &Path, id: &str, new_body: &str) -> Result<Outcome> {
        let header = block_header(id);
        let stored = match store::lookup(file, &header) {
            Ok((body, _line)) => body,
            Err(SnapError::NotFound { .. }) => {
                if self.config.ci_mode {
                    return Err(SnapError::NotFound {
                        file: file.to_path_buf(),
                        id: id.to_string(),
                    });
                }
                return Ok(Outcome::New);
            }
            Err(err) => return Err(err),
        };
        let report = diff::render(&stored, new_body);
        if report.is_empty() {
            Ok(Outcome::Unchanged)
        } else {
            Ok(Outcome::Changed(report))
        }
    }

    /// Persists `new_body` under `id`: appends a fresh block, or rewrites
    /// the existing one. Refused outright in CI mode.
    ///
    /// The update lock covers the existence probe as well as the write, so
    /// two committers of the same identifier cannot both decide to append.
    pub fn commit(&self, file: &Path, id: &str, new_body: &str) -> Result<()> {
        if self.config.ci_mode {
            return Err(SnapError::CiWriteForbidden { id: id.to_string() });
        }
        let header = block_header(id);
        let _guard = self.update_lock.lock().expect("update lock poisoned");
        match store::lookup(file, &header) {
            Ok(_) => store::replace_block(file, &header, new_body),
            Err(SnapError::NotFound { .. }) => store::append(file, &header, new_body),
            Err(err) => Err(err),
        }
    }

    /// The full per-assertion flow: allocate the next occurrence id, look
    /// up the stored snapshot, and either create it, accept it, rewrite it
    /// (update mode), or fail with the rendered diff.
    pub fn assert(&self, file: &Path, test_name: &str, new_body: &str) -> Result<()> {
        let id = self.registry.next_id(file, test_name);
        match self.compare(file, &id, new_body)? {
            Outcome::Unchanged => Ok(()),
            Outcome::New => self.commit(file, &id, new_body),
            Outcome::Changed(diff) => {
                if self.config.update_mode {
                    self.commit(file, &id, new_body)
                } else {
                    Err(SnapError::Mismatch { id, diff })
                }
            }
        }
    }

    /// Restarts occurrence numbering for a finished test, so re-execution
    /// produces the same identifiers.
    pub fn test_finished(&self, file: &Path, test_name: &str) {
        self.registry.reset(file, test_name);
    }

    /// Runs the post-run reconciliation pass. Single-threaded; call after
    /// every test has completed.
    pub fn run_cleanup(&self, filter: &RunFilter) -> Result<CleanupSummary> {
        cleanup::scan(
            &self.registry,
            filter,
            self.config.update_mode,
            self.config.sort_mode,
        )
    }
}
