pub use crate::cleanup::{CleanupSummary, ObsoleteEntry, RunFilter};
pub use crate::diff::{render, strip_styles, DiffReport};
pub use crate::engine::{Config, Engine, Outcome};
pub use crate::errors::{Result, SnapError};

pub mod cleanup;
pub mod diff;
pub mod engine;
pub mod errors;
pub mod matcher;
pub mod registry;
pub mod store;
