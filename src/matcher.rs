//! Generic sequence alignment over two ordered token sequences.
//!
//! [`SequenceMatcher`] compares two slices of comparable tokens (lines for
//! multi-line diffs, graphemes for single-line diffs) and produces a minimal,
//! human-legible set of edit operations. The algorithm is junk-tolerant
//! longest-common-substring search with recursive bisection: find the best
//! matching block of the full range, recurse on what lies before and after
//! it, and read the edit script off the gaps between blocks.
//!
//! The junk heuristic treats an element as "popular" when it fills more than
//! 1% of the second sequence and that sequence holds more than 200 tokens.
//! Popular elements never anchor a match; they are only absorbed at its
//! edges. These constants are load-bearing: changing them changes rendered
//! diffs for snapshot files that already exist, so they stay fixed.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

// =============================================================================
// CORE DATA STRUCTURES
// =============================================================================

/// A maximal run of equal elements: `a[a_start..a_start+size]` equals
/// `b[b_start..b_start+size]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub a_start: usize,
    pub b_start: usize,
    pub size: usize,
}

impl Match {
    fn new(a_start: usize, b_start: usize, size: usize) -> Self {
        Self {
            a_start,
            b_start,
            size,
        }
    }
}

/// Edit operation kinds between the two sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// `a[a_start..a_end] == b[b_start..b_end]`
    Equal,
    /// `a[a_start..a_end]` should be deleted; the B range is empty.
    Delete,
    /// `b[b_start..b_end]` should be inserted; the A range is empty.
    Insert,
    /// `a[a_start..a_end]` should be replaced by `b[b_start..b_end]`.
    Replace,
}

/// A tagged pair of contiguous ranges mapping a span of A onto a span of B.
///
/// Opcodes from one comparison are contiguous and exhaustive: concatenating
/// the A ranges reconstructs A, concatenating the B ranges reconstructs B.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode {
    pub tag: Tag,
    pub a_start: usize,
    pub a_end: usize,
    pub b_start: usize,
    pub b_end: usize,
}

impl Opcode {
    fn new(tag: Tag, a_start: usize, a_end: usize, b_start: usize, b_end: usize) -> Self {
        Self {
            tag,
            a_start,
            a_end,
            b_start,
            b_end,
        }
    }
}

// =============================================================================
// SEQUENCE MATCHER
// =============================================================================

/// Junk-aware matcher over two borrowed token sequences.
///
/// Matching blocks and opcodes are computed lazily and cached, so grouped
/// opcodes can be requested repeatedly without re-running the alignment.
pub struct SequenceMatcher<'a, T: Eq + Hash> {
    a: &'a [T],
    b: &'a [T],
    /// Index from B element to its positions in B, with popular elements
    /// removed so they never anchor a match.
    b2j: HashMap<&'a T, Vec<usize>>,
    /// Elements dropped from `b2j` by the popularity heuristic.
    popular: HashSet<&'a T>,
    matching_blocks: Option<Vec<Match>>,
    opcodes: Option<Vec<Opcode>>,
}

impl<'a, T: Eq + Hash> SequenceMatcher<'a, T> {
    pub fn new(a: &'a [T], b: &'a [T]) -> Self {
        let mut matcher = Self {
            a,
            b,
            b2j: HashMap::new(),
            popular: HashSet::new(),
            matching_blocks: None,
            opcodes: None,
        };
        matcher.chain_b();
        matcher
    }

    /// Builds the B-position index and applies the popularity heuristic.
    fn chain_b(&mut self) {
        for (j, elt) in self.b.iter().enumerate() {
            self.b2j.entry(elt).or_default().push(j);
        }

        let n = self.b.len();
        if n <= 200 {
            return;
        }
        let threshold = n / 100 + 1;
        let popular: Vec<&'a T> = self
            .b2j
            .iter()
            .filter(|(_, positions)| positions.len() > threshold)
            .map(|(elt, _)| *elt)
            .collect();
        // If every distinct element is popular there is nothing left to
        // anchor on; keep the index intact rather than matching nothing.
        if popular.len() == self.b2j.len() {
            return;
        }
        for elt in popular {
            self.b2j.remove(elt);
            self.popular.insert(elt);
        }
    }

    fn is_popular(&self, elt: &T) -> bool {
        self.popular.contains(elt)
    }

    // =====================
    // Longest match search
    // =====================

    /// Finds the longest matching block within `a[a_lo..a_hi]` and
    /// `b[b_lo..b_hi]`.
    ///
    /// Ties break toward the earliest A position, then the earliest B
    /// position. The core scan never matches popular elements; the winning
    /// block is then extended backward and forward across popular elements
    /// that happen to be equal. Total function: an empty result is the
    /// zero-size block at `(a_lo, b_lo)`.
    pub fn find_longest_match(
        &self,
        a_lo: usize,
        a_hi: usize,
        b_lo: usize,
        b_hi: usize,
    ) -> Match {
        let mut best_i = a_lo;
        let mut best_j = b_lo;
        let mut best_size = 0usize;

        // run[j] = length of the longest match ending at a[i] and b[j];
        // carried across A positions as a sparse map.
        let mut run: HashMap<usize, usize> = HashMap::new();
        for i in a_lo..a_hi {
            let mut next_run: HashMap<usize, usize> = HashMap::new();
            if let Some(positions) = self.b2j.get(&self.a[i]) {
                for &j in positions {
                    if j < b_lo {
                        continue;
                    }
                    if j >= b_hi {
                        break;
                    }
                    let k = if j > 0 {
                        run.get(&(j - 1)).copied().unwrap_or(0) + 1
                    } else {
                        1
                    };
                    next_run.insert(j, k);
                    if k > best_size {
                        best_i = i + 1 - k;
                        best_j = j + 1 - k;
                        best_size = k;
                    }
                }
            }
            run = next_run;
        }

        // Absorb equal popular elements at both edges of the winner.
        while best_i > a_lo
            && best_j > b_lo
            && self.is_popular(&self.b[best_j - 1])
            && self.a[best_i - 1] == self.b[best_j - 1]
        {
            best_i -= 1;
            best_j -= 1;
            best_size += 1;
        }
        while best_i + best_size < a_hi
            && best_j + best_size < b_hi
            && self.is_popular(&self.b[best_j + best_size])
            && self.a[best_i + best_size] == self.b[best_j + best_size]
        {
            best_size += 1;
        }

        Match::new(best_i, best_j, best_size)
    }

    // =====================
    // Matching blocks
    // =====================

    /// All matching blocks in position order, coalesced where adjacent, with
    /// a terminal zero-size sentinel at `(len(a), len(b))`.
    pub fn get_matching_blocks(&mut self) -> &[Match] {
        if self.matching_blocks.is_none() {
            self.matching_blocks = Some(self.compute_matching_blocks());
        }
        self.matching_blocks.as_deref().unwrap_or_default()
    }

    fn compute_matching_blocks(&self) -> Vec<Match> {
        let (la, lb) = (self.a.len(), self.b.len());
        let mut queue = vec![(0usize, la, 0usize, lb)];
        let mut raw = Vec::new();

        while let Some((a_lo, a_hi, b_lo, b_hi)) = queue.pop() {
            let m = self.find_longest_match(a_lo, a_hi, b_lo, b_hi);
            if m.size == 0 {
                continue;
            }
            raw.push(m);
            if a_lo < m.a_start && b_lo < m.b_start {
                queue.push((a_lo, m.a_start, b_lo, m.b_start));
            }
            if m.a_start + m.size < a_hi && m.b_start + m.size < b_hi {
                queue.push((m.a_start + m.size, a_hi, m.b_start + m.size, b_hi));
            }
        }
        raw.sort_by_key(|m| (m.a_start, m.b_start));

        // Coalesce blocks that touch in both sequences.
        let mut blocks: Vec<Match> = Vec::with_capacity(raw.len() + 1);
        let mut acc = Match::new(0, 0, 0);
        for m in raw {
            if acc.a_start + acc.size == m.a_start && acc.b_start + acc.size == m.b_start {
                acc.size += m.size;
            } else {
                if acc.size > 0 {
                    blocks.push(acc);
                }
                acc = m;
            }
        }
        if acc.size > 0 {
            blocks.push(acc);
        }
        blocks.push(Match::new(la, lb, 0));
        blocks
    }

    // =====================
    // Opcodes
    // =====================

    /// The full edit script between A and B.
    pub fn get_opcodes(&mut self) -> &[Opcode] {
        if self.opcodes.is_none() {
            let mut codes = Vec::new();
            let (mut i, mut j) = (0usize, 0usize);
            for m in self.get_matching_blocks().to_vec() {
                let tag = match (i < m.a_start, j < m.b_start) {
                    (true, true) => Some(Tag::Replace),
                    (true, false) => Some(Tag::Delete),
                    (false, true) => Some(Tag::Insert),
                    (false, false) => None,
                };
                if let Some(tag) = tag {
                    codes.push(Opcode::new(tag, i, m.a_start, j, m.b_start));
                }
                i = m.a_start + m.size;
                j = m.b_start + m.size;
                if m.size > 0 {
                    codes.push(Opcode::new(Tag::Equal, m.a_start, i, m.b_start, j));
                }
            }
            self.opcodes = Some(codes);
        }
        self.opcodes.as_deref().unwrap_or_default()
    }

    /// Groups opcodes into hunks with up to `context` elements of Equal
    /// context on each side.
    ///
    /// The comparison's leading and trailing Equal runs are clamped to
    /// `context` elements; an interior Equal run longer than `2 * context`
    /// is split into two context windows and starts a new group. A negative
    /// `context` disables clamping and splitting entirely, yielding a single
    /// group holding the full comparison.
    pub fn get_grouped_opcodes(&mut self, context: i64) -> Vec<Vec<Opcode>> {
        let mut codes = self.get_opcodes().to_vec();
        if codes.is_empty() {
            codes.push(Opcode::new(Tag::Equal, 0, 1, 0, 1));
        }
        if context < 0 {
            return vec![codes];
        }
        let n = context as usize;

        if codes[0].tag == Tag::Equal {
            let c = codes[0];
            codes[0].a_start = c.a_end.saturating_sub(n).max(c.a_start);
            codes[0].b_start = c.b_end.saturating_sub(n).max(c.b_start);
        }
        if let Some(last) = codes.last_mut() {
            if last.tag == Tag::Equal {
                last.a_end = last.a_end.min(last.a_start + n);
                last.b_end = last.b_end.min(last.b_start + n);
            }
        }

        let wide = n * 2;
        let mut groups = Vec::new();
        let mut group: Vec<Opcode> = Vec::new();
        for mut code in codes {
            if code.tag == Tag::Equal && code.a_end - code.a_start > wide {
                group.push(Opcode::new(
                    Tag::Equal,
                    code.a_start,
                    code.a_end.min(code.a_start + n),
                    code.b_start,
                    code.b_end.min(code.b_start + n),
                ));
                groups.push(std::mem::take(&mut group));
                code.a_start = code.a_start.max(code.a_end.saturating_sub(n));
                code.b_start = code.b_start.max(code.b_end.saturating_sub(n));
            }
            group.push(code);
        }
        if !group.is_empty() && !(group.len() == 1 && group[0].tag == Tag::Equal) {
            groups.push(group);
        }
        groups
    }
}
