//! Flat-file snapshot store.
//!
//! A store file holds many named blocks, one per assertion, in insertion
//! order. The on-disk grammar, repeated per block, is:
//!
//! ```text
//! \n[<identifier>]\n<body>\n---\n
//! ```
//!
//! The terminator line is the literal `---`. A body line exactly equal to
//! the terminator is written as `/-/-/-/` and restored on read, so the
//! terminator search stays unambiguous no matter what the body contains.
//!
//! Block location is literal-text search, never pattern matching:
//! identifiers containing `[`, `.`, `*` and friends behave exactly like
//! plain ones. `append` opens, appends and closes per call; `replace_block`
//! does a read-modify-write of the whole file and is serialized by the
//! engine's update lock.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::errors::{Result, SnapError};

/// Terminator line closing every block.
pub const TERMINATOR: &str = "---";
/// Escaped form of a body line that equals the terminator.
const ESCAPED_TERMINATOR: &str = "/-/-/-/";

// =============================================================================
// ESCAPING
// =============================================================================

fn escape_body(body: &str) -> String {
    body.split('\n')
        .map(|line| if line == TERMINATOR { ESCAPED_TERMINATOR } else { line })
        .collect::<Vec<_>>()
        .join("\n")
}

fn unescape_body(escaped: &str) -> String {
    escaped
        .split('\n')
        .map(|line| if line == ESCAPED_TERMINATOR { TERMINATOR } else { line })
        .collect::<Vec<_>>()
        .join("\n")
}

// =============================================================================
// BLOCK MODEL
// =============================================================================

/// One parsed block of a store file. The body is kept in its escaped
/// on-disk form so a file can be reassembled byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: String,
    escaped_body: String,
}

impl Block {
    pub fn new(header: impl Into<String>, body: &str) -> Self {
        Self {
            header: header.into(),
            escaped_body: escape_body(body),
        }
    }

    /// The body with terminator escaping reversed.
    pub fn body(&self) -> String {
        unescape_body(&self.escaped_body)
    }

    /// Canonical on-disk text of this block, leading separator included.
    pub fn to_disk(&self) -> String {
        format!("\n{}\n{}\n---\n", self.header, self.escaped_body)
    }
}

/// Parses a whole store file into blocks, preserving order.
///
/// Blank lines between blocks are separators; every non-blank line at the
/// top level opens a block that runs until the next terminator line. A
/// block that reaches end of file without a terminator is `Corrupted`.
pub fn parse_blocks(file: &Path, content: &str) -> Result<Vec<Block>> {
    let mut blocks = Vec::new();
    let mut lines = content.split('\n');
    while let Some(line) = lines.next() {
        if line.is_empty() {
            continue;
        }
        let header = line.to_string();
        let mut body_lines: Vec<&str> = Vec::new();
        let mut terminated = false;
        for body_line in lines.by_ref() {
            if body_line == TERMINATOR {
                terminated = true;
                break;
            }
            body_lines.push(body_line);
        }
        if !terminated {
            return Err(SnapError::Corrupted {
                file: file.to_path_buf(),
                id: header,
            });
        }
        blocks.push(Block {
            header,
            escaped_body: body_lines.join("\n"),
        });
    }
    Ok(blocks)
}

// =============================================================================
// STORE OPERATIONS
// =============================================================================

fn read_store(file: &Path, id: &str) -> Result<String> {
    match fs::read_to_string(file) {
        Ok(content) => Ok(content),
        Err(err) if err.kind() == ErrorKind::NotFound => Err(SnapError::NotFound {
            file: file.to_path_buf(),
            id: id.to_string(),
        }),
        Err(err) => Err(err.into()),
    }
}

/// Looks up the block whose header line equals `id` exactly.
///
/// Returns the body (escaping reversed) and the 1-based line number of the
/// first line of the block's on-disk span; since every block begins with a
/// blank separator line, that is the line just above the header.
pub fn lookup(file: &Path, id: &str) -> Result<(String, usize)> {
    let content = read_store(file, id)?;
    let mut lines = content.split('\n').enumerate();
    while let Some((idx, line)) = lines.next() {
        if line != id {
            continue;
        }
        let mut body_lines: Vec<&str> = Vec::new();
        for (_, body_line) in lines.by_ref() {
            if body_line == TERMINATOR {
                return Ok((unescape_body(&body_lines.join("\n")), idx));
            }
            body_lines.push(body_line);
        }
        return Err(SnapError::Corrupted {
            file: file.to_path_buf(),
            id: id.to_string(),
        });
    }
    Err(SnapError::NotFound {
        file: file.to_path_buf(),
        id: id.to_string(),
    })
}

/// Appends a new block, creating parent directories as needed.
pub fn append(file: &Path, id: &str, body: &str) -> Result<()> {
    if let Some(parent) = file.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut handle = OpenOptions::new().create(true).append(true).open(file)?;
    // One write per block: parallel appenders to the same file must never
    // interleave inside a block.
    let block = format!("\n{id}\n{}\n---\n", escape_body(body));
    handle.write_all(block.as_bytes())?;
    Ok(())
}

/// Replaces the first block whose header equals `id`, leaving every byte
/// outside the block's span untouched.
///
/// The rewrite lands through a sibling temp file and a rename, so readers
/// holding no lock only ever observe the old content or the new, never a
/// half-written file.
pub fn replace_block(file: &Path, id: &str, new_body: &str) -> Result<()> {
    let content = read_store(file, id)?;

    // Two linear scans: the literal header span, then the literal
    // terminator after it.
    let with_separator = format!("\n{id}\n");
    let (span_start, body_start, lead) = if let Some(pos) = content.find(&with_separator) {
        (pos, pos + with_separator.len(), "\n")
    } else if content.starts_with(&format!("{id}\n")) {
        (0, id.len() + 1, "")
    } else {
        return Err(SnapError::NotFound {
            file: file.to_path_buf(),
            id: id.to_string(),
        });
    };

    let terminated = "\n---\n";
    let span_end = match content[body_start..].find(terminated) {
        Some(rel) => body_start + rel + terminated.len(),
        // A final terminator without a trailing newline still closes the
        // block at end of file.
        None if content[body_start..].ends_with("\n---") => content.len(),
        None => {
            return Err(SnapError::Corrupted {
                file: file.to_path_buf(),
                id: id.to_string(),
            });
        }
    };

    let mut next = String::with_capacity(content.len());
    next.push_str(&content[..span_start]);
    next.push_str(lead);
    next.push_str(id);
    next.push('\n');
    next.push_str(&escape_body(new_body));
    next.push_str("\n---\n");
    next.push_str(&content[span_end..]);
    write_atomic(file, &next)
}

/// Whole-file rewrite via temp file plus rename in the same directory.
fn write_atomic(file: &Path, content: &str) -> Result<()> {
    let mut tmp = file.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, content)?;
    fs::rename(&tmp, file)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn snap_path(dir: &TempDir) -> std::path::PathBuf {
        dir.path().join("__snapshots__").join("example.snap")
    }

    #[test]
    fn lookup_on_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let file = snap_path(&dir);
        let err = lookup(&file, "[t - 1]").unwrap_err();
        assert!(matches!(err, SnapError::NotFound { .. }));
    }

    #[test]
    fn append_then_lookup_round_trips() {
        let dir = TempDir::new().unwrap();
        let file = snap_path(&dir);
        append(&file, "[t - 1]", "hello\n").unwrap();
        let (body, line) = lookup(&file, "[t - 1]").unwrap();
        assert_eq!(body, "hello\n");
        assert_eq!(line, 1);
    }

    #[test]
    fn bodies_holding_terminator_lines_round_trip() {
        let dir = TempDir::new().unwrap();
        let file = snap_path(&dir);
        append(&file, "[t - 1]", "a\n---\nb").unwrap();
        let (body, _) = lookup(&file, "[t - 1]").unwrap();
        assert_eq!(body, "a\n---\nb");
        // On disk the terminator line is escaped.
        let raw = fs::read_to_string(&file).unwrap();
        assert!(raw.contains("/-/-/-/"));
        assert_eq!(raw.matches("\n---\n").count(), 1);
    }

    #[test]
    fn empty_and_newline_only_bodies_round_trip() {
        let dir = TempDir::new().unwrap();
        let file = snap_path(&dir);
        append(&file, "[a - 1]", "").unwrap();
        append(&file, "[b - 1]", "\n").unwrap();
        assert_eq!(lookup(&file, "[a - 1]").unwrap().0, "");
        assert_eq!(lookup(&file, "[b - 1]").unwrap().0, "\n");
    }

    #[test]
    fn lookup_reports_block_positions() {
        let dir = TempDir::new().unwrap();
        let file = snap_path(&dir);
        append(&file, "[t - 1]", "one\n").unwrap();
        append(&file, "[t - 2]", "two\n").unwrap();
        assert_eq!(lookup(&file, "[t - 1]").unwrap().1, 1);
        // "\n[t - 1]\none\n\n---\n" occupies lines 1-5; the next block
        // starts on line 6.
        assert_eq!(lookup(&file, "[t - 2]").unwrap().1, 6);
    }

    #[test]
    fn replace_block_leaves_neighbors_untouched() {
        let dir = TempDir::new().unwrap();
        let file = snap_path(&dir);
        append(&file, "[t - 1]", "first\n").unwrap();
        append(&file, "[t - 2]", "second\n").unwrap();
        append(&file, "[t - 3]", "third\n").unwrap();
        let before = fs::read_to_string(&file).unwrap();

        replace_block(&file, "[t - 2]", "rewritten\n").unwrap();

        assert_eq!(lookup(&file, "[t - 1]").unwrap().0, "first\n");
        assert_eq!(lookup(&file, "[t - 2]").unwrap().0, "rewritten\n");
        assert_eq!(lookup(&file, "[t - 3]").unwrap().0, "third\n");

        // Bytes outside the replaced span are identical.
        let after = fs::read_to_string(&file).unwrap();
        let span = "\n[t - 2]\n";
        let start = before.find(span).unwrap();
        assert_eq!(&after[..start], &before[..start]);
        assert!(after.ends_with("\n[t - 3]\nthird\n\n---\n"));
    }

    #[test]
    fn replace_block_handles_metacharacter_ids() {
        let dir = TempDir::new().unwrap();
        let file = snap_path(&dir);
        let id = "[weird .* id [1] - 1]";
        append(&file, id, "v1\n").unwrap();
        replace_block(&file, id, "v2\n").unwrap();
        assert_eq!(lookup(&file, id).unwrap().0, "v2\n");
    }

    #[test]
    fn replace_missing_block_is_not_found() {
        let dir = TempDir::new().unwrap();
        let file = snap_path(&dir);
        append(&file, "[t - 1]", "x\n").unwrap();
        let err = replace_block(&file, "[t - 9]", "y\n").unwrap_err();
        assert!(matches!(err, SnapError::NotFound { .. }));
    }

    #[test]
    fn truncated_block_is_corrupted() {
        let dir = TempDir::new().unwrap();
        let file = snap_path(&dir);
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, "\n[t - 1]\npartial body with no terminator\n").unwrap();
        let err = lookup(&file, "[t - 1]").unwrap_err();
        assert!(matches!(err, SnapError::Corrupted { .. }));
        let err = replace_block(&file, "[t - 1]", "new\n").unwrap_err();
        assert!(matches!(err, SnapError::Corrupted { .. }));
    }

    #[test]
    fn parse_blocks_reassembles_canonical_files() {
        let dir = TempDir::new().unwrap();
        let file = snap_path(&dir);
        append(&file, "[t - 1]", "one\n").unwrap();
        append(&file, "[t - 2]", "a\n---\nb").unwrap();
        let content = fs::read_to_string(&file).unwrap();
        let blocks = parse_blocks(&file, &content).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].body(), "a\n---\nb");
        let reassembled: String = blocks.iter().map(Block::to_disk).collect();
        assert_eq!(reassembled, content);
    }
}
