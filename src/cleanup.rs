//! Post-run reconciliation of stores against the registry.
//!
//! After all tests complete, the scanner walks every directory owning a
//! registered store file and flags what the run no longer produces:
//! whole files nothing registered, and individual blocks whose occurrence
//! number exceeds the registry's high-water mark. Update mode deletes what
//! was flagged; sort mode rewrites files whose headers are out of natural
//! order. A file with nothing obsolete and no sort needed is left
//! byte-for-byte untouched.
//!
//! The scanner runs once, single-threaded; nothing here takes the
//! registry's hot-path lock for longer than one snapshot of its tables.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use walkdir::WalkDir;

use crate::errors::Result;
use crate::registry::TestRegistry;
use crate::store::{self, Block};

/// Headers participating in automated obsolescence counting: they begin
/// `[Test`, end `]`, and carry `" - "` followed by digits before the `]`.
/// Anything else is still usable for plain lookup and replace, but the
/// scanner never touches it.
static COUNTABLE_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[(Test.*) - (\d+)\]$").expect("static pattern compiles"));

/// Splits a countable header into its test name and occurrence number.
fn parse_countable_header(header: &str) -> Option<(&str, usize)> {
    let captures = COUNTABLE_HEADER.captures(header)?;
    let name = captures.get(1)?.as_str();
    let occurrence = captures.get(2)?.as_str().parse().ok()?;
    Some((name, occurrence))
}

// =============================================================================
// RUN FILTER
// =============================================================================

/// Which tests were selected for this run.
///
/// A snapshot belonging to a test that simply was not selected must never
/// be treated as obsolete, so partial runs (`cargo test some_name`) leave
/// unrelated snapshots alone.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    /// `None` means the whole suite ran.
    selected: Option<Vec<String>>,
}

impl RunFilter {
    /// The whole suite ran; everything is fair game.
    pub fn all() -> Self {
        Self { selected: None }
    }

    /// Only the named tests (and their `/`-separated subtests) ran.
    pub fn selecting<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            selected: Some(names.into_iter().map(Into::into).collect()),
        }
    }

    pub fn is_all(&self) -> bool {
        self.selected.is_none()
    }

    /// True when `test_name` was selected this run.
    pub fn matches(&self, test_name: &str) -> bool {
        match &self.selected {
            None => true,
            Some(names) => names.iter().any(|n| {
                test_name == n || test_name.strip_prefix(n.as_str()).is_some_and(|rest| rest.starts_with('/'))
            }),
        }
    }
}

// =============================================================================
// NATURAL ORDERING
// =============================================================================

/// Numeric-aware string comparison: digit runs compare by value, so
/// `"Test - 2"` sorts before `"Test - 10"`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    fn trim_zeros(digits: &[u8]) -> &[u8] {
        let start = digits.iter().take_while(|d| **d == b'0').count();
        &digits[start..]
    }

    let (a, b) = (a.as_bytes(), b.as_bytes());
    let (mut i, mut j) = (0usize, 0usize);
    while i < a.len() && j < b.len() {
        if a[i].is_ascii_digit() && b[j].is_ascii_digit() {
            let ia = i;
            while i < a.len() && a[i].is_ascii_digit() {
                i += 1;
            }
            let jb = j;
            while j < b.len() && b[j].is_ascii_digit() {
                j += 1;
            }
            let da = trim_zeros(&a[ia..i]);
            let db = trim_zeros(&b[jb..j]);
            match da.len().cmp(&db.len()).then_with(|| da.cmp(db)) {
                Ordering::Equal => {}
                other => return other,
            }
        } else {
            match a[i].cmp(&b[j]) {
                Ordering::Equal => {
                    i += 1;
                    j += 1;
                }
                other => return other,
            }
        }
    }
    (a.len() - i).cmp(&(b.len() - j))
}

fn is_naturally_sorted(blocks: &[Block]) -> bool {
    blocks
        .windows(2)
        .all(|w| natural_cmp(&w[0].header, &w[1].header) != Ordering::Greater)
}

// =============================================================================
// SUMMARY
// =============================================================================

/// One stored block no longer produced by any registered test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObsoleteEntry {
    pub file: PathBuf,
    pub header: String,
}

/// What the reconciliation pass found (and, in update mode, removed).
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupSummary {
    pub obsolete_files: Vec<PathBuf>,
    pub obsolete_entries: Vec<ObsoleteEntry>,
}

impl CleanupSummary {
    pub fn is_clean(&self) -> bool {
        self.obsolete_files.is_empty() && self.obsolete_entries.is_empty()
    }

    /// Machine-readable form for embedding harnesses that emit reports.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Prints an end-of-run report to stderr with colored headings.
    pub fn print(&self, removed: bool) {
        if self.is_clean() {
            return;
        }
        let mut stderr = StandardStream::stderr(ColorChoice::Auto);
        let verb = if removed { "removed" } else { "obsolete" };
        let mut heading = ColorSpec::new();
        heading.set_fg(Some(Color::Yellow)).set_bold(true);
        if !self.obsolete_files.is_empty() {
            let _ = stderr.set_color(&heading);
            let _ = writeln!(stderr, "{} snapshot files ({}):", verb, self.obsolete_files.len());
            let _ = stderr.reset();
            for file in &self.obsolete_files {
                let _ = writeln!(stderr, "  {}", file.display());
            }
        }
        if !self.obsolete_entries.is_empty() {
            let _ = stderr.set_color(&heading);
            let _ = writeln!(
                stderr,
                "{} snapshot entries ({}):",
                verb,
                self.obsolete_entries.len()
            );
            let _ = stderr.reset();
            for entry in &self.obsolete_entries {
                let _ = writeln!(stderr, "  {} in {}", entry.header, entry.file.display());
            }
        }
    }
}

// =============================================================================
// SCAN
// =============================================================================

/// Intersects the registry against on-disk stores.
///
/// `update_mode` deletes flagged files and compacts flagged entries out of
/// their files. `sort_mode` rewrites any scanned file whose headers are
/// not in natural ascending order, whether or not update mode is on.
pub fn scan(
    registry: &TestRegistry,
    filter: &RunFilter,
    update_mode: bool,
    sort_mode: bool,
) -> Result<CleanupSummary> {
    let mut summary = CleanupSummary::default();
    let registered = registry.registered_files();

    find_obsolete_files(&registered, filter, &mut summary)?;
    if update_mode {
        for file in &summary.obsolete_files {
            fs::remove_file(file)?;
        }
    }

    for file in &registered {
        reconcile_file(file, registry, filter, update_mode, sort_mode, &mut summary)?;
    }

    if update_mode {
        registry.clear_high_water();
    }
    Ok(summary)
}

/// Walks every directory owning a registered store and flags unregistered
/// `.snap` files whose tests were all selected this run.
fn find_obsolete_files(
    registered: &[PathBuf],
    filter: &RunFilter,
    summary: &mut CleanupSummary,
) -> Result<()> {
    let registered_set: BTreeSet<&Path> = registered.iter().map(PathBuf::as_path).collect();
    let dirs: BTreeSet<PathBuf> = registered
        .iter()
        .filter_map(|f| f.parent().map(Path::to_path_buf))
        .collect();

    for dir in dirs {
        for entry in WalkDir::new(&dir).max_depth(1).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.into_path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("snap") {
                continue;
            }
            if registered_set.contains(path.as_path()) {
                continue;
            }
            if file_fully_selected(&path, filter) {
                summary.obsolete_files.push(path);
            }
        }
    }
    Ok(())
}

/// True when the run filter covered every countable header in the file,
/// so its absence from the registry really means nothing produces it.
/// Unreadable or corrupted files are never flagged; deleting what we
/// cannot parse could mask a truncated write.
fn file_fully_selected(file: &Path, filter: &RunFilter) -> bool {
    if filter.is_all() {
        return true;
    }
    let Ok(content) = fs::read_to_string(file) else {
        return false;
    };
    let Ok(blocks) = store::parse_blocks(file, &content) else {
        return false;
    };
    let mut saw_countable = false;
    for block in &blocks {
        if let Some((name, _)) = parse_countable_header(&block.header) {
            saw_countable = true;
            if !filter.matches(name) {
                return false;
            }
        }
    }
    // A filtered run cannot vouch for a file it knows nothing about.
    saw_countable
}

/// Flags out-of-range entries in one registered file and rewrites it when
/// update or sort mode demands.
fn reconcile_file(
    file: &Path,
    registry: &TestRegistry,
    filter: &RunFilter,
    update_mode: bool,
    sort_mode: bool,
    summary: &mut CleanupSummary,
) -> Result<()> {
    if !file.exists() {
        return Ok(());
    }
    let content = fs::read_to_string(file)?;
    let blocks = store::parse_blocks(file, &content)?;
    let marks = registry.high_water_marks(file);

    let mut kept: Vec<Block> = Vec::with_capacity(blocks.len());
    let mut removed_any = false;
    for block in blocks {
        let obsolete = match parse_countable_header(&block.header) {
            Some((name, occurrence)) => {
                let valid = marks
                    .get(name)
                    .is_some_and(|&max| occurrence >= 1 && occurrence <= max);
                !valid && filter.matches(name)
            }
            None => false,
        };
        if obsolete {
            summary.obsolete_entries.push(ObsoleteEntry {
                file: file.to_path_buf(),
                header: block.header.clone(),
            });
            removed_any = true;
            if !update_mode {
                kept.push(block);
            }
        } else {
            kept.push(block);
        }
    }

    let needs_sort = sort_mode && !is_naturally_sorted(&kept);
    if needs_sort {
        kept.sort_by(|x, y| natural_cmp(&x.header, &y.header));
    }
    if (update_mode && removed_any) || needs_sort {
        let rewritten: String = kept.iter().map(Block::to_disk).collect();
        fs::write(file, rewritten)?;
    }
    Ok(())
}
