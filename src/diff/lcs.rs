//! Longest-common-subsequence line alignment

/// One step of an edit script turning `old` into `new`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edit {
    /// Line kept; indices into old and new
    Equal { old: usize, new: usize },
    /// Old line dropped
    Delete { old: usize },
    /// New line inserted
    Insert { new: usize },
}

/// Largest LCS table built. Bigger changed regions are aligned as one
/// delete-then-insert block.
pub const MAX_TABLE_CELLS: usize = 1 << 24;

/// Align two sequences. Deletions are emitted before insertions at the
/// same position.
pub fn align<T: PartialEq>(old: &[T], new: &[T]) -> Vec<Edit> {
    let prefix = old
        .iter()
        .zip(new.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];

    let mut edits = Vec::with_capacity(old.len().max(new.len()));
    edits.extend((0..prefix).map(|i| Edit::Equal { old: i, new: i }));

    let rows = old_mid.len() + 1;
    let cols = new_mid.len() + 1;
    if rows.checked_mul(cols).map_or(true, |cells| cells > MAX_TABLE_CELLS) {
        edits.extend((0..old_mid.len()).map(|i| Edit::Delete { old: prefix + i }));
        edits.extend((0..new_mid.len()).map(|j| Edit::Insert { new: prefix + j }));
        push_suffix(&mut edits, old.len(), new.len(), suffix);
        return edits;
    }

    // table[i][j] = LCS length of old_mid[i..] and new_mid[j..]
    let mut table = vec![0u32; rows * cols];
    for i in (0..old_mid.len()).rev() {
        for j in (0..new_mid.len()).rev() {
            table[i * cols + j] = if old_mid[i] == new_mid[j] {
                table[(i + 1) * cols + j + 1] + 1
            } else {
                table[(i + 1) * cols + j].max(table[i * cols + j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < old_mid.len() || j < new_mid.len() {
        if i < old_mid.len() && j < new_mid.len() && old_mid[i] == new_mid[j] {
            edits.push(Edit::Equal {
                old: prefix + i,
                new: prefix + j,
            });
            i += 1;
            j += 1;
        } else if j == new_mid.len()
            || (i < old_mid.len() && table[(i + 1) * cols + j] >= table[i * cols + j + 1])
        {
            edits.push(Edit::Delete { old: prefix + i });
            i += 1;
        } else {
            edits.push(Edit::Insert { new: prefix + j });
            j += 1;
        }
    }

    push_suffix(&mut edits, old.len(), new.len(), suffix);
    edits
}

fn push_suffix(edits: &mut Vec<Edit>, old_len: usize, new_len: usize, suffix: usize) {
    let old_tail = old_len - suffix;
    let new_tail = new_len - suffix;
    edits.extend((0..suffix).map(|k| Edit::Equal {
        old: old_tail + k,
        new: new_tail + k,
    }));
}
