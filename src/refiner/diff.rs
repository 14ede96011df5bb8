//! Word-level unified diff between two criteria texts
//!
//! Texts are split on whitespace and diffed as word sequences. The rendering
//! follows the unified format (`--- previous`, `+++ current`, `@@` hunk
//! headers, ` `/`-`/`+` prefixed words) flattened onto one line.

const CONTEXT: usize = 3;

/// Above this many DP cells the diff degrades to a full replacement
const MAX_CELLS: usize = 4_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op<'a> {
    Equal(&'a str),
    Delete(&'a str),
    Insert(&'a str),
}

fn word_ops<'a>(old: &[&'a str], new: &[&'a str]) -> Vec<Op<'a>> {
    let (n, m) = (old.len(), new.len());
    if n.saturating_mul(m) > MAX_CELLS {
        return old
            .iter()
            .map(|w| Op::Delete(*w))
            .chain(new.iter().map(|w| Op::Insert(*w)))
            .collect();
    }

    // suffix[i][j] = LCS length of old[i..] and new[j..]
    let width = m + 1;
    let mut suffix = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            suffix[i * width + j] = if old[i] == new[j] {
                suffix[(i + 1) * width + j + 1] + 1
            } else {
                suffix[(i + 1) * width + j].max(suffix[i * width + j + 1])
            };
        }
    }

    let mut ops = Vec::with_capacity(n + m);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            ops.push(Op::Equal(old[i]));
            i += 1;
            j += 1;
        } else if suffix[(i + 1) * width + j] >= suffix[i * width + j + 1] {
            ops.push(Op::Delete(old[i]));
            i += 1;
        } else {
            ops.push(Op::Insert(new[j]));
            j += 1;
        }
    }
    ops.extend(old[i..].iter().map(|w| Op::Delete(*w)));
    ops.extend(new[j..].iter().map(|w| Op::Insert(*w)));

    // Within each changed run, list removals before additions
    let mut start = 0;
    while start < ops.len() {
        if matches!(ops[start], Op::Equal(_)) {
            start += 1;
            continue;
        }
        let mut end = start;
        while end < ops.len() && !matches!(ops[end], Op::Equal(_)) {
            end += 1;
        }
        ops[start..end].sort_by_key(|op| matches!(op, Op::Insert(_)));
        start = end;
    }
    ops
}

fn format_range(start: usize, len: usize) -> String {
    match len {
        0 => format!("{},0", start),
        1 => format!("{}", start + 1),
        _ => format!("{},{}", start + 1, len),
    }
}

/// Unified word diff from `old` to `new`; empty when the word sequences match
pub fn word_diff(old: &str, new: &str) -> String {
    let old_words: Vec<&str> = old.split_whitespace().collect();
    let new_words: Vec<&str> = new.split_whitespace().collect();
    let ops = word_ops(&old_words, &new_words);

    let changes: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| !matches!(op, Op::Equal(_)))
        .map(|(i, _)| i)
        .collect();
    if changes.is_empty() {
        return String::new();
    }

    // Positions in old/new before each op
    let mut old_pos = Vec::with_capacity(ops.len() + 1);
    let mut new_pos = Vec::with_capacity(ops.len() + 1);
    let (mut o, mut p) = (0, 0);
    for op in &ops {
        old_pos.push(o);
        new_pos.push(p);
        match op {
            Op::Equal(_) => {
                o += 1;
                p += 1;
            }
            Op::Delete(_) => o += 1,
            Op::Insert(_) => p += 1,
        }
    }
    old_pos.push(o);
    new_pos.push(p);

    // Group changes whose separating context is at most 2 * CONTEXT words
    let mut hunks: Vec<(usize, usize)> = Vec::new();
    let mut first = changes[0];
    let mut last = changes[0];
    for &change in &changes[1..] {
        if change - last - 1 > 2 * CONTEXT {
            hunks.push((first, last));
            first = change;
        }
        last = change;
    }
    hunks.push((first, last));

    let mut out = vec!["--- previous".to_string(), "+++ current".to_string()];
    for (first, last) in hunks {
        let lo = first.saturating_sub(CONTEXT);
        let hi = (last + 1 + CONTEXT).min(ops.len());
        out.push(format!(
            "@@ -{} +{} @@",
            format_range(old_pos[lo], old_pos[hi] - old_pos[lo]),
            format_range(new_pos[lo], new_pos[hi] - new_pos[lo]),
        ));
        for op in &ops[lo..hi] {
            out.push(match op {
                Op::Equal(w) => format!(" {}", w),
                Op::Delete(w) => format!("-{}", w),
                Op::Insert(w) => format!("+{}", w),
            });
        }
    }
    out.join(" ")
}
