//! Renders the matcher's opcode stream as an annotated textual diff.
//!
//! The renderer is a pure function from two strings to a [`DiffReport`]. The
//! report text carries ANSI styling so changed content stands out on a
//! terminal; [`strip_styles`] removes the styling for plain-text consumers
//! and for byte-exact assertions in tests.
//!
//! Two output shapes exist: multi-line inputs get a line-level diff with
//! bounded context hunks, and single-line inputs get a grapheme-level diff
//! where only the changed characters are highlighted against a dimmed
//! common background.

use std::fmt::Write as _;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use unicode_segmentation::UnicodeSegmentation;

use crate::matcher::{SequenceMatcher, Tag};

// =============================================================================
// STYLING
// =============================================================================

// ANSI style constants for annotating diff output.
const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const BOLD_RED: &str = "\x1b[1;31m";
const BOLD_GREEN: &str = "\x1b[1;32m";
const CYAN: &str = "\x1b[36m";

static ANSI_SEQUENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*m").expect("static pattern compiles"));

fn paint(style: &str, text: &str) -> String {
    format!("{style}{text}{RESET}")
}

/// Removes the ANSI presentation markers from rendered diff text.
pub fn strip_styles(text: &str) -> String {
    ANSI_SEQUENCE.replace_all(text, "").into_owned()
}

// =============================================================================
// DIFF REPORT
// =============================================================================

/// Number of Equal context lines kept around each hunk.
const HUNK_CONTEXT: i64 = 3;
/// Inputs at or below this many lines are rendered in full, without `@@`
/// range headers.
const FULL_RENDER_LINES: usize = 10;

/// Result of rendering a comparison.
///
/// Equal inputs produce empty text and the `-1` sentinel in both counters;
/// callers should test [`DiffReport::is_empty`] rather than the sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffReport {
    /// Annotated diff text, empty when the inputs are equal.
    pub text: String,
    /// Number of inserted elements, `-1` when the inputs are equal.
    pub inserted: i32,
    /// Number of deleted elements, `-1` when the inputs are equal.
    pub deleted: i32,
}

impl DiffReport {
    fn empty() -> Self {
        Self {
            text: String::new(),
            inserted: -1,
            deleted: -1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl std::fmt::Display for DiffReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

// =============================================================================
// RENDERING
// =============================================================================

/// Renders the difference between the stored snapshot and the received
/// value. Pure: no I/O, no global state.
pub fn render(expected: &str, received: &str) -> DiffReport {
    if expected == received {
        return DiffReport::empty();
    }
    if expected.matches('\n').count() <= 1 && received.matches('\n').count() <= 1 {
        let (body, inserted, deleted) = intraline_diff(expected, received);
        return DiffReport {
            text: format!("{}{}", diff_header(inserted, deleted), body),
            inserted,
            deleted,
        };
    }
    line_diff(expected, received)
}

/// Two-line inserted/deleted count header, numbers right-aligned in a
/// shared column.
fn diff_header(inserted: i32, deleted: i32) -> String {
    let width = deleted.to_string().len().max(inserted.to_string().len());
    format!(
        "{}\n{}\n\n",
        paint(RED, &format!("- Snapshot  - {deleted:>width$}")),
        paint(GREEN, &format!("+ Received  + {inserted:>width$}")),
    )
}

/// Formats one side of a unified range header: 1-based, a length of 1 is
/// omitted, and an empty range reports the line just before it (`0` at the
/// start of the file).
pub fn format_range_unified(start: usize, stop: usize) -> String {
    let mut beginning = start + 1;
    let length = stop - start;
    if length == 1 {
        return beginning.to_string();
    }
    if length == 0 {
        beginning -= 1;
    }
    format!("{beginning},{length}")
}

fn hunk_header(a_start: usize, a_end: usize, b_start: usize, b_end: usize) -> String {
    paint(
        CYAN,
        &format!(
            "@@ -{} +{} @@",
            format_range_unified(a_start, a_end),
            format_range_unified(b_start, b_end),
        ),
    )
}

/// Splits into line tokens that keep their terminators, so concatenating
/// the tokens reconstructs the input byte-for-byte.
fn split_lines(s: &str) -> Vec<&str> {
    s.split_inclusive('\n').collect()
}

fn display_line(line: &str) -> &str {
    line.strip_suffix('\n').unwrap_or(line)
}

fn push_line(out: &mut String, style: &str, prefix: &str, line: &str) {
    let _ = writeln!(out, "{}", paint(style, &format!("{prefix}{}", display_line(line))));
}

fn line_diff(expected: &str, received: &str) -> DiffReport {
    let a = split_lines(expected);
    let b = split_lines(received);

    // Short inputs are shown whole; longer ones get bounded-context hunks
    // with range headers.
    let with_headers = a.len() > FULL_RENDER_LINES || b.len() > FULL_RENDER_LINES;
    let context = if with_headers { HUNK_CONTEXT } else { -1 };

    let mut matcher = SequenceMatcher::new(&a, &b);
    let mut body = String::new();
    let mut inserted = 0i32;
    let mut deleted = 0i32;

    for group in matcher.get_grouped_opcodes(context) {
        if with_headers {
            let (Some(first), Some(last)) = (group.first(), group.last()) else {
                continue;
            };
            let _ = writeln!(
                body,
                "{}",
                hunk_header(first.a_start, last.a_end, first.b_start, last.b_end)
            );
        }
        for code in group {
            match code.tag {
                Tag::Equal => {
                    for line in &a[code.a_start..code.a_end] {
                        push_line(&mut body, DIM, "  ", line);
                    }
                }
                Tag::Delete => {
                    for line in &a[code.a_start..code.a_end] {
                        push_line(&mut body, RED, "- ", line);
                        deleted += 1;
                    }
                }
                Tag::Insert => {
                    for line in &b[code.b_start..code.b_end] {
                        push_line(&mut body, GREEN, "+ ", line);
                        inserted += 1;
                    }
                }
                Tag::Replace => {
                    // A one-line-to-one-line replacement reads much better
                    // as an intraline character diff.
                    if code.a_end - code.a_start == 1 && code.b_end - code.b_start == 1 {
                        // Counts stay in lines here; the grapheme counts
                        // belong to the pure single-line path.
                        let (text, _, _) = intraline_diff(a[code.a_start], b[code.b_start]);
                        body.push_str(&text);
                        inserted += 1;
                        deleted += 1;
                    } else {
                        for line in &a[code.a_start..code.a_end] {
                            push_line(&mut body, RED, "- ", line);
                            deleted += 1;
                        }
                        for line in &b[code.b_start..code.b_end] {
                            push_line(&mut body, GREEN, "+ ", line);
                            inserted += 1;
                        }
                    }
                }
            }
        }
    }

    DiffReport {
        text: format!("{}{}", diff_header(inserted, deleted), body),
        inserted,
        deleted,
    }
}

/// Grapheme-level diff of a single-line pair: a `- ` line showing the
/// expected value with deleted spans in bold, and a `+ ` line showing the
/// received value with inserted spans in bold, both over a dimmed common
/// background. Counts are in changed graphemes.
fn intraline_diff(expected: &str, received: &str) -> (String, i32, i32) {
    // Compare without the trailing newline so the styled spans never embed
    // a raw line break; when the trailing newline is the only difference,
    // keep it so the change stays countable.
    let trimmed_a = expected.strip_suffix('\n').unwrap_or(expected);
    let trimmed_b = received.strip_suffix('\n').unwrap_or(received);
    let (expected, received) = if trimmed_a == trimmed_b {
        (expected, received)
    } else {
        (trimmed_a, trimmed_b)
    };

    let a: Vec<&str> = expected.graphemes(true).collect();
    let b: Vec<&str> = received.graphemes(true).collect();

    let mut matcher = SequenceMatcher::new(&a, &b);
    let mut old_line = String::new();
    let mut new_line = String::new();
    let mut inserted = 0i32;
    let mut deleted = 0i32;

    for code in matcher.get_opcodes() {
        let a_span: String = a[code.a_start..code.a_end].concat();
        let b_span: String = b[code.b_start..code.b_end].concat();
        match code.tag {
            Tag::Equal => {
                old_line.push_str(&paint(DIM, &a_span));
                new_line.push_str(&paint(DIM, &b_span));
            }
            Tag::Delete => {
                old_line.push_str(&paint(BOLD_RED, &a_span));
                deleted += (code.a_end - code.a_start) as i32;
            }
            Tag::Insert => {
                new_line.push_str(&paint(BOLD_GREEN, &b_span));
                inserted += (code.b_end - code.b_start) as i32;
            }
            Tag::Replace => {
                old_line.push_str(&paint(BOLD_RED, &a_span));
                new_line.push_str(&paint(BOLD_GREEN, &b_span));
                deleted += (code.a_end - code.a_start) as i32;
                inserted += (code.b_end - code.b_start) as i32;
            }
        }
    }

    let text = format!(
        "{}{old_line}\n{}{new_line}\n",
        paint(RED, "- "),
        paint(GREEN, "+ "),
    );
    (text, inserted, deleted)
}

// =============================================================================
// TERMINAL REPORTING
// =============================================================================

/// Writes a rendered diff to stderr, stripping the styling when stderr is
/// not a terminal. This is the thin presentation shim over the abstract
/// markers; embedding harnesses are free to ignore it.
pub fn eprint_report(report: &DiffReport) {
    if atty::is(atty::Stream::Stderr) {
        eprintln!("{}", report.text);
    } else {
        eprintln!("{}", strip_styles(&report.text));
    }
}
