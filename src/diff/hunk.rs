//! Grouping of an edit script into unified-diff hunks

use std::fmt;

use super::lcs::{align, Edit};

/// Lines of context kept around each change
pub const CONTEXT_LINES: usize = 3;

/// One line of text, without its terminator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line<'a> {
    pub text: &'a str,
    /// Ends with `\n`
    pub terminated: bool,
}

/// Split text into lines. A trailing newline does not start a new line.
pub fn split_lines(text: &str) -> Vec<Line<'_>> {
    text.split_inclusive('\n')
        .map(|line| match line.strip_suffix('\n') {
            Some(text) => Line {
                text,
                terminated: true,
            },
            None => Line {
                text: line,
                terminated: false,
            },
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Context,
    Added,
    Removed,
}

impl LineKind {
    fn prefix(&self) -> char {
        match self {
            LineKind::Context => ' ',
            LineKind::Added => '+',
            LineKind::Removed => '-',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    pub kind: LineKind,
    pub text: String,
    pub missing_newline: bool,
}

/// A contiguous block of changes with surrounding context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    /// 1-based first old line, or the line before the hunk when empty
    pub old_start: usize,
    pub old_len: usize,
    /// 1-based first new line, or the line before the hunk when empty
    pub new_start: usize,
    pub new_len: usize,
    pub lines: Vec<DiffLine>,
}

impl Hunk {
    /// `@@ -start,len +start,len @@`
    pub fn header(&self) -> String {
        format!(
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_len, self.new_start, self.new_len
        )
    }
}

impl fmt::Display for Hunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.header())?;
        for line in &self.lines {
            writeln!(f, "{}{}", line.kind.prefix(), line.text)?;
            if line.missing_newline {
                writeln!(f, "\\ No newline at end of file")?;
            }
        }
        Ok(())
    }
}

/// Diff two texts into hunks with [`CONTEXT_LINES`] of context
pub fn diff_lines(old: &str, new: &str) -> Vec<Hunk> {
    let old_lines = split_lines(old);
    let new_lines = split_lines(new);
    let edits = align(&old_lines, &new_lines);
    build_hunks(&old_lines, &new_lines, &edits, CONTEXT_LINES)
}

fn build_hunks(old: &[Line<'_>], new: &[Line<'_>], edits: &[Edit], context: usize) -> Vec<Hunk> {
    let changes: Vec<usize> = edits
        .iter()
        .enumerate()
        .filter(|(_, e)| !matches!(e, Edit::Equal { .. }))
        .map(|(idx, _)| idx)
        .collect();

    let Some(&first) = changes.first() else {
        return Vec::new();
    };

    // changes closer than two contexts apart share a hunk
    let mut groups = Vec::new();
    let (mut start, mut end) = (first, first);
    for &idx in &changes[1..] {
        if idx - end - 1 <= 2 * context {
            end = idx;
        } else {
            groups.push((start, end));
            start = idx;
            end = idx;
        }
    }
    groups.push((start, end));

    // old/new lines consumed before each edit
    let mut positions = Vec::with_capacity(edits.len());
    let (mut old_pos, mut new_pos) = (0, 0);
    for edit in edits {
        positions.push((old_pos, new_pos));
        match edit {
            Edit::Equal { .. } => {
                old_pos += 1;
                new_pos += 1;
            }
            Edit::Delete { .. } => old_pos += 1,
            Edit::Insert { .. } => new_pos += 1,
        }
    }

    groups
        .into_iter()
        .map(|(start, end)| {
            let lo = start.saturating_sub(context);
            let hi = (end + context).min(edits.len() - 1);

            let mut lines = Vec::with_capacity(hi - lo + 1);
            let (mut old_len, mut new_len) = (0, 0);
            for edit in &edits[lo..=hi] {
                let (kind, line) = match *edit {
                    Edit::Equal { old: o, .. } => {
                        old_len += 1;
                        new_len += 1;
                        (LineKind::Context, old[o])
                    }
                    Edit::Delete { old: o } => {
                        old_len += 1;
                        (LineKind::Removed, old[o])
                    }
                    Edit::Insert { new: n } => {
                        new_len += 1;
                        (LineKind::Added, new[n])
                    }
                };
                lines.push(DiffLine {
                    kind,
                    text: line.text.to_string(),
                    missing_newline: !line.terminated,
                });
            }

            let (old_before, new_before) = positions[lo];
            Hunk {
                old_start: if old_len == 0 { old_before } else { old_before + 1 },
                old_len,
                new_start: if new_len == 0 { new_before } else { new_before + 1 },
                new_len,
                lines,
            }
        })
        .collect()
}
