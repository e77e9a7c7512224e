//! Myers' O(ND) shortest edit script over line sequences.

/// One step of an edit script, by 0-based position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edit {
    Equal { old: usize, new: usize },
    Delete { old: usize },
    Insert { new: usize },
}

impl Edit {
    pub fn is_change(&self) -> bool {
        !matches!(self, Edit::Equal { .. })
    }
}

/// Compute a minimal edit script turning `old` into `new`.
///
/// Within one change region deletions come before insertions, which is the
/// order unified diffs print them in.
pub fn diff<T: PartialEq>(old: &[T], new: &[T]) -> Vec<Edit> {
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

    let mut edits: Vec<Edit> = (0..prefix)
        .map(|i| Edit::Equal { old: i, new: i })
        .collect();

    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];
    edits.extend(middle(old_mid, new_mid).into_iter().map(|edit| match edit {
        Edit::Equal { old, new } => Edit::Equal {
            old: old + prefix,
            new: new + prefix,
        },
        Edit::Delete { old } => Edit::Delete { old: old + prefix },
        Edit::Insert { new } => Edit::Insert { new: new + prefix },
    }));

    let old_tail = old.len() - suffix;
    let new_tail = new.len() - suffix;
    edits.extend((0..suffix).map(|i| Edit::Equal {
        old: old_tail + i,
        new: new_tail + i,
    }));

    edits
}

fn middle<T: PartialEq>(old: &[T], new: &[T]) -> Vec<Edit> {
    let n = old.len() as isize;
    let m = new.len() as isize;
    if n == 0 {
        return (0..new.len()).map(|new| Edit::Insert { new }).collect();
    }
    if m == 0 {
        return (0..old.len()).map(|old| Edit::Delete { old }).collect();
    }

    let max = n + m;
    let offset = max;
    let at = |k: isize| (k + offset) as usize;

    // v[k] = furthest x reached on diagonal k; one copy is kept per round
    // so the path can be walked back afterwards.
    let mut v = vec![0isize; 2 * max as usize + 2];
    let mut trace: Vec<Vec<isize>> = Vec::new();

    'search: for d in 0..=max {
        trace.push(v.clone());
        let mut k = -d;
        while k <= d {
            let mut x = if k == -d || (k != d && v[at(k - 1)] < v[at(k + 1)]) {
                v[at(k + 1)]
            } else {
                v[at(k - 1)] + 1
            };
            let mut y = x - k;
            while x < n && y < m && old[x as usize] == new[y as usize] {
                x += 1;
                y += 1;
            }
            v[at(k)] = x;
            if x >= n && y >= m {
                break 'search;
            }
            k += 2;
        }
    }

    let mut edits = Vec::new();
    let (mut x, mut y) = (n, m);

    for (d, v) in trace.iter().enumerate().rev() {
        let d = d as isize;
        let k = x - y;
        let prev_k = if k == -d || (k != d && v[at(k - 1)] < v[at(k + 1)]) {
            k + 1
        } else {
            k - 1
        };
        let prev_x = v[at(prev_k)];
        let prev_y = prev_x - prev_k;

        while x > prev_x && y > prev_y {
            x -= 1;
            y -= 1;
            edits.push(Edit::Equal {
                old: x as usize,
                new: y as usize,
            });
        }

        if d > 0 {
            if x == prev_x {
                y -= 1;
                edits.push(Edit::Insert { new: y as usize });
            } else {
                x -= 1;
                edits.push(Edit::Delete { old: x as usize });
            }
        }
    }

    edits.reverse();
    edits
}
