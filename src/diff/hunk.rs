//! Unified-diff hunks: grouping an edit script into indexed change blocks,
//! header text, summaries, and the old/new sides a hunk was built from.

use anyhow::{anyhow, Context};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use super::myers::{self, Edit};

/// Lines of unchanged text kept around each change.
pub const CONTEXT_LINES: usize = 3;

/// Printed after a line that has no trailing newline.
pub const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

/// `@@ -old_start,old_count +new_start,new_count @@`, 1-based.
///
/// For an empty side the start is the line *before* the change, as in
/// `@@ -0,0 +1,4 @@` for a file that did not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HunkHeader {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
}

impl HunkHeader {
    /// 0-based index of the first old line this hunk covers.
    pub fn old_offset(&self) -> usize {
        if self.old_count == 0 {
            self.old_start
        } else {
            self.old_start.saturating_sub(1)
        }
    }
}

fn format_range(start: usize, count: usize) -> String {
    if count == 1 {
        start.to_string()
    } else {
        format!("{start},{count}")
    }
}

impl fmt::Display for HunkHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "@@ -{} +{} @@",
            format_range(self.old_start, self.old_count),
            format_range(self.new_start, self.new_count)
        )
    }
}

fn parse_range(range: &str) -> anyhow::Result<(usize, usize)> {
    let (start, count) = match range.split_once(',') {
        Some((start, count)) => (start, Some(count)),
        None => (range, None),
    };
    let start = start
        .parse()
        .with_context(|| format!("Invalid range start '{start}'"))?;
    let count = match count {
        Some(count) => count
            .parse()
            .with_context(|| format!("Invalid range count '{count}'"))?,
        None => 1,
    };
    Ok((start, count))
}

impl FromStr for HunkHeader {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s
            .trim()
            .strip_prefix("@@ ")
            .and_then(|rest| rest.split_once(" @@").map(|(ranges, _)| ranges))
            .ok_or_else(|| anyhow!("Not a hunk header: '{s}'"))?;

        let mut ranges = inner.split_whitespace();
        let old = ranges
            .next()
            .and_then(|r| r.strip_prefix('-'))
            .ok_or_else(|| anyhow!("Missing old range in '{s}'"))?;
        let new = ranges
            .next()
            .and_then(|r| r.strip_prefix('+'))
            .ok_or_else(|| anyhow!("Missing new range in '{s}'"))?;

        let (old_start, old_count) = parse_range(old)?;
        let (new_start, new_count) = parse_range(new)?;
        Ok(HunkHeader {
            old_start,
            old_count,
            new_start,
            new_count,
        })
    }
}

impl Serialize for HunkHeader {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HunkHeader {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// One indexed change block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    pub index: usize,
    pub header: HunkHeader,
    /// Body lines prefixed with ` `, `-` or `+`, plus no-newline markers
    pub lines: Vec<String>,
    pub summary: String,
}

impl Hunk {
    /// Raw lines (terminators included) this hunk expects on the old side.
    pub fn old_side(&self) -> Vec<String> {
        self.side(|prefix| prefix == ' ' || prefix == '-')
    }

    /// Raw lines this hunk produces on the new side.
    pub fn new_side(&self) -> Vec<String> {
        self.side(|prefix| prefix == ' ' || prefix == '+')
    }

    fn side(&self, keep: impl Fn(char) -> bool) -> Vec<String> {
        let mut out = Vec::new();
        let mut iter = self.lines.iter().peekable();
        while let Some(line) = iter.next() {
            let Some(prefix) = line.chars().next() else {
                continue;
            };
            if line == NO_NEWLINE_MARKER {
                continue;
            }
            let newline = !matches!(iter.peek(), Some(next) if next.as_str() == NO_NEWLINE_MARKER);
            if keep(prefix) {
                let mut raw = line[prefix.len_utf8()..].to_string();
                if newline {
                    raw.push('\n');
                }
                out.push(raw);
            }
        }
        out
    }

    pub fn added(&self) -> usize {
        self.lines.iter().filter(|l| l.starts_with('+')).count()
    }

    pub fn removed(&self) -> usize {
        self.lines.iter().filter(|l| l.starts_with('-')).count()
    }
}

/// Split text into lines, each keeping its `\n`.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

fn push_body_line(body: &mut Vec<String>, prefix: char, raw: &str) {
    match raw.strip_suffix('\n') {
        Some(line) => body.push(format!("{prefix}{line}")),
        None => {
            body.push(format!("{prefix}{raw}"));
            body.push(NO_NEWLINE_MARKER.to_string());
        }
    }
}

/// Human-readable location and size of a hunk.
pub fn summarize(header: &HunkHeader, added: usize, removed: usize) -> String {
    let location = if header.old_count == 0 {
        if header.old_start == 0 {
            "Start of file".to_string()
        } else {
            format!("After line {}", header.old_start)
        }
    } else if header.old_count == 1 {
        format!("Line {}", header.old_start)
    } else {
        format!(
            "Lines {}-{}",
            header.old_start,
            header.old_start + header.old_count - 1
        )
    };
    format!("{location}: {added} added, {removed} removed")
}

/// Diff `old` against `new` and group the result into hunks with
/// [`CONTEXT_LINES`] of context. Change regions whose context windows would
/// overlap or touch share one hunk.
pub fn compute_hunks(old: &str, new: &str) -> Vec<Hunk> {
    let old_lines = split_lines(old);
    let new_lines = split_lines(new);
    let edits = myers::diff(&old_lines, &new_lines);

    // Old/new line positions before each edit
    let mut positions = Vec::with_capacity(edits.len() + 1);
    let (mut o, mut n) = (0usize, 0usize);
    for edit in &edits {
        positions.push((o, n));
        match edit {
            Edit::Equal { .. } => {
                o += 1;
                n += 1;
            }
            Edit::Delete { .. } => o += 1,
            Edit::Insert { .. } => n += 1,
        }
    }
    positions.push((o, n));

    let change_at: Vec<usize> = edits
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_change())
        .map(|(i, _)| i)
        .collect();

    let mut groups: Vec<(usize, usize)> = Vec::new();
    for &i in &change_at {
        match groups.last_mut() {
            Some((_, last)) if i - *last - 1 <= 2 * CONTEXT_LINES => *last = i,
            _ => groups.push((i, i)),
        }
    }

    groups
        .into_iter()
        .enumerate()
        .map(|(index, (first, last))| {
            let start = first.saturating_sub(CONTEXT_LINES);
            let end = (last + 1 + CONTEXT_LINES).min(edits.len());

            let mut body = Vec::new();
            for edit in &edits[start..end] {
                match *edit {
                    Edit::Equal { old, .. } => push_body_line(&mut body, ' ', old_lines[old]),
                    Edit::Delete { old } => push_body_line(&mut body, '-', old_lines[old]),
                    Edit::Insert { new } => push_body_line(&mut body, '+', new_lines[new]),
                }
            }

            let (old_from, new_from) = positions[start];
            let (old_to, new_to) = positions[end];
            let old_count = old_to - old_from;
            let new_count = new_to - new_from;
            let header = HunkHeader {
                old_start: if old_count == 0 { old_from } else { old_from + 1 },
                old_count,
                new_start: if new_count == 0 { new_from } else { new_from + 1 },
                new_count,
            };

            let mut hunk = Hunk {
                index,
                header,
                lines: body,
                summary: String::new(),
            };
            hunk.summary = summarize(&header, hunk.added(), hunk.removed());
            hunk
        })
        .collect()
}

/// Render hunks as unified-diff text for `path`. Empty when there are none.
pub fn unified_diff(path: &str, hunks: &[Hunk]) -> String {
    if hunks.is_empty() {
        return String::new();
    }
    let mut out = format!("--- a/{path}\n+++ b/{path}\n");
    for hunk in hunks {
        out.push_str(&hunk.header.to_string());
        out.push('\n');
        for line in &hunk.lines {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}
