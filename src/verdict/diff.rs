//! Line-oriented unified diff used to explain output mismatches.

/// Lines of context around each change
const CONTEXT: usize = 3;

/// Above this many DP cells the middle section is reported as one block
const MAX_TABLE_CELLS: usize = 4_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Op {
    Equal(usize, usize),
    Delete(usize),
    Insert(usize),
}

/// Split on `\n` exactly like the reference is stored (a trailing newline
/// yields a final empty line)
pub fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    data.split(|&b| b == b'\n').collect()
}

/// Unified diff turning `expected` into `actual`; empty when they are equal
pub fn unified_diff(expected: &[&[u8]], actual: &[&[u8]]) -> String {
    let ops = edit_script(expected, actual);
    if ops.iter().all(|op| matches!(op, Op::Equal(..))) {
        return String::new();
    }

    let mut out = String::from("--- expected\n+++ actual\n");
    for hunk in hunks(&ops) {
        render_hunk(&mut out, &ops[hunk.0..hunk.1], expected, actual);
    }
    out
}

fn edit_script(a: &[&[u8]], b: &[&[u8]]) -> Vec<Op> {
    let prefix = a.iter().zip(b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    let mut ops: Vec<Op> = (0..prefix).map(|i| Op::Equal(i, i)).collect();

    let (a_mid, b_mid) = (prefix..a.len() - suffix, prefix..b.len() - suffix);
    let (n, m) = (a_mid.len(), b_mid.len());

    if n * m > MAX_TABLE_CELLS {
        ops.extend(a_mid.clone().map(Op::Delete));
        ops.extend(b_mid.clone().map(Op::Insert));
    } else {
        // lcs[i][j]: LCS length of a_mid[i..] and b_mid[j..]
        let mut lcs = vec![0u32; (n + 1) * (m + 1)];
        let at = |i: usize, j: usize| i * (m + 1) + j;
        for i in (0..n).rev() {
            for j in (0..m).rev() {
                lcs[at(i, j)] = if a[a_mid.start + i] == b[b_mid.start + j] {
                    lcs[at(i + 1, j + 1)] + 1
                } else {
                    lcs[at(i + 1, j)].max(lcs[at(i, j + 1)])
                };
            }
        }

        let (mut i, mut j) = (0, 0);
        while i < n || j < m {
            if i < n && j < m && a[a_mid.start + i] == b[b_mid.start + j] {
                ops.push(Op::Equal(a_mid.start + i, b_mid.start + j));
                i += 1;
                j += 1;
            } else if j < m && (i == n || lcs[at(i, j + 1)] >= lcs[at(i + 1, j)]) {
                ops.push(Op::Insert(b_mid.start + j));
                j += 1;
            } else {
                ops.push(Op::Delete(a_mid.start + i));
                i += 1;
            }
        }
        // Within a changed run, show deletions before insertions
        normalize_runs(&mut ops[prefix..]);
    }

    let a_tail = a.len() - suffix;
    let b_tail = b.len() - suffix;
    ops.extend((0..suffix).map(|k| Op::Equal(a_tail + k, b_tail + k)));
    ops
}

fn normalize_runs(ops: &mut [Op]) {
    let mut start = 0;
    while start < ops.len() {
        if matches!(ops[start], Op::Equal(..)) {
            start += 1;
            continue;
        }
        let end = ops[start..]
            .iter()
            .position(|op| matches!(op, Op::Equal(..)))
            .map_or(ops.len(), |p| start + p);
        ops[start..end].sort_by_key(|op| match op {
            Op::Delete(i) => (0, *i),
            Op::Insert(j) => (1, *j),
            Op::Equal(..) => (2, 0),
        });
        start = end;
    }
}

/// Half-open op index ranges of each hunk, with context merged
fn hunks(ops: &[Op]) -> Vec<(usize, usize)> {
    let mut result: Vec<(usize, usize)> = Vec::new();
    for (idx, op) in ops.iter().enumerate() {
        if matches!(op, Op::Equal(..)) {
            continue;
        }
        let start = idx.saturating_sub(CONTEXT);
        let end = (idx + CONTEXT + 1).min(ops.len());
        match result.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => result.push((start, end)),
        }
    }
    result
}

fn render_hunk(out: &mut String, ops: &[Op], a: &[&[u8]], b: &[&[u8]]) {
    let a_start = ops.iter().find_map(|op| match op {
        Op::Equal(i, _) | Op::Delete(i) => Some(*i),
        Op::Insert(_) => None,
    });
    let b_start = ops.iter().find_map(|op| match op {
        Op::Equal(_, j) | Op::Insert(j) => Some(*j),
        Op::Delete(_) => None,
    });
    let a_len = ops.iter().filter(|op| !matches!(op, Op::Insert(_))).count();
    let b_len = ops.iter().filter(|op| !matches!(op, Op::Delete(_))).count();

    out.push_str(&format!(
        "@@ -{} +{} @@\n",
        range(a_start, a_len),
        range(b_start, b_len)
    ));
    for op in ops {
        let (sign, line) = match *op {
            Op::Equal(i, _) => (' ', a[i]),
            Op::Delete(i) => ('-', a[i]),
            Op::Insert(j) => ('+', b[j]),
        };
        out.push(sign);
        out.push_str(&String::from_utf8_lossy(line));
        out.push('\n');
    }
}

fn range(start: Option<usize>, len: usize) -> String {
    match (start, len) {
        (Some(s), 1) => format!("{}", s + 1),
        (Some(s), n) => format!("{},{}", s + 1, n),
        (None, _) => "0,0".to_string(),
    }
}
