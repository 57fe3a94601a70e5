//! Unified error type for the snapshot engine.
//!
//! Every fallible operation in the crate returns [`SnapError`]. The variants
//! mirror the engine's recovery model: `NotFound` is recoverable by creating
//! the snapshot (unless CI mode forbids writes), `Mismatch` is recoverable by
//! accepting the update, and `Corrupted` is always terminal and never
//! auto-repaired, since repairing could mask a truncated earlier write.
//! I/O errors are propagated verbatim; local filesystem failures are assumed
//! non-transient, so nothing retries.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::diff::DiffReport;

pub type Result<T> = std::result::Result<T, SnapError>;

/// All failure modes surfaced by the snapshot engine.
///
/// Errors are values, never panics: the surrounding assertion API decides how
/// `Mismatch` and `NotFound` become user-visible test failures.
#[derive(Debug, Error, Diagnostic)]
pub enum SnapError {
    #[error("snapshot '{id}' not found in {}", file.display())]
    #[diagnostic(
        code(keepsake::store::not_found),
        help("a first run creates the snapshot automatically; in CI mode the missing entry is a failure")
    )]
    NotFound { file: PathBuf, id: String },

    #[error("snapshot file {} is corrupted: '{id}' has no terminator before end of file", file.display())]
    #[diagnostic(
        code(keepsake::store::corrupted),
        help("the file may have been truncated by an interrupted write; restore it from version control")
    )]
    Corrupted { file: PathBuf, id: String },

    #[error("snapshot mismatch for '{id}'")]
    #[diagnostic(
        code(keepsake::assert::mismatch),
        help("re-run in update mode to accept the received value as the new snapshot")
    )]
    Mismatch { id: String, diff: DiffReport },

    #[error("refusing to write snapshot '{id}': writes are disabled in CI mode")]
    #[diagnostic(code(keepsake::assert::ci_write))]
    CiWriteForbidden { id: String },

    #[error("failed to walk snapshot directory")]
    #[diagnostic(code(keepsake::cleanup::walk))]
    Walk(#[from] walkdir::Error),

    #[error("snapshot I/O error")]
    #[diagnostic(code(keepsake::store::io))]
    Io(#[from] std::io::Error),
}

impl SnapError {
    /// The rendered diff carried by a `Mismatch`, if any.
    pub fn diff(&self) -> Option<&DiffReport> {
        match self {
            SnapError::Mismatch { diff, .. } => Some(diff),
            _ => None,
        }
    }

    /// True for the errors an assertion can recover from by writing
    /// (first-run creation or an accepted update).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SnapError::NotFound { .. } | SnapError::Mismatch { .. }
        )
    }
}
