//! Writing reference content into the live tree: everything, one file, or
//! selected hunks. Every write is bracketed by backup snapshots.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::backup::BackupStore;
use crate::diff::{split_lines, DiffEngine, Hunk, ReferenceTree};
use crate::error::{Error, Result};

/// Outcome of a selective apply. `applied` and `failed` partition the
/// requested indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HunkApplyResult {
    pub applied: Vec<usize>,
    pub failed: Vec<usize>,
}

pub struct PatchApplier<'a> {
    engine: &'a DiffEngine,
    backups: &'a BackupStore,
}

impl<'a> PatchApplier<'a> {
    pub fn new(engine: &'a DiffEngine, backups: &'a BackupStore) -> Self {
        Self { engine, backups }
    }

    fn reference_content(&self, tree: ReferenceTree<'_>, path: &str) -> Result<Vec<u8>> {
        self.engine
            .read_reference(tree, path)?
            .ok_or_else(|| Error::NotFound(format!("Reference file not found: {path}")))
    }

    fn ensure_writable(&self, path: &str) -> Result<()> {
        if self.engine.is_protected(path) {
            return Err(Error::Protected(path.to_string()));
        }
        Ok(())
    }

    /// Write every modified or missing, unprotected file. Nothing is written
    /// and no snapshot is taken when the trees already agree.
    pub fn apply_all(&self, tree: ReferenceTree<'_>, branch: &str) -> Result<Vec<String>> {
        let targets: Vec<String> = self
            .engine
            .diff_all(tree)?
            .into_iter()
            .filter(|d| d.status.is_actionable() && !self.engine.is_protected(&d.path))
            .map(|d| d.path)
            .collect();

        if targets.is_empty() {
            log::info!("Live tree already matches reference {branch}");
            return Ok(targets);
        }

        self.backups.snapshot("Pre-update backup")?;
        for path in &targets {
            let content = self.reference_content(tree, path)?;
            self.engine.write_live(path, &content)?;
            log::debug!("Wrote {path}");
        }
        self.backups
            .snapshot(&format!("Applied reference {branch}"))?;

        log::info!("Applied {} file(s) from reference {}", targets.len(), branch);
        Ok(targets)
    }

    /// Write one modified or missing file.
    pub fn apply_file(&self, tree: ReferenceTree<'_>, path: &str) -> Result<Vec<String>> {
        self.ensure_writable(path)?;
        let diff = self.engine.diff_file(tree, path)?;
        if !diff.status.is_actionable() {
            return Err(Error::NotFound(format!(
                "No pending changes for {path} (status: {})",
                diff.status.as_str()
            )));
        }

        let content = self.reference_content(tree, path)?;
        self.backups
            .snapshot(&format!("Pre-update backup for {path}"))?;
        self.engine.write_live(path, &content)?;
        self.backups.snapshot(&format!("Applied {path}"))?;

        log::info!("Applied {path}");
        Ok(vec![path.to_string()])
    }

    /// Apply selected hunks of one file.
    ///
    /// The live file is re-read and each requested hunk is checked against
    /// it: its context and removed lines must sit unchanged at the hunk's
    /// position, or the hunk fails. `presented` are the hunks the caller was
    /// shown; without them the freshly computed hunks are used.
    pub fn apply_hunks(
        &self,
        tree: ReferenceTree<'_>,
        path: &str,
        indices: &[usize],
        presented: Option<&[Hunk]>,
    ) -> Result<HunkApplyResult> {
        self.ensure_writable(path)?;
        let fresh = self.engine.diff_file(tree, path)?;
        let requested: BTreeSet<usize> = indices.iter().copied().collect();

        let live = self.engine.read_live(path)?.unwrap_or_default();
        let live_text = std::str::from_utf8(&live).ok();
        let basis = presented.unwrap_or(&fresh.hunks);

        let mut result = HunkApplyResult::default();
        let mut accepted: Vec<&Hunk> = Vec::new();
        let mut lines: Vec<String> = live_text
            .map(|text| split_lines(text).into_iter().map(str::to_string).collect())
            .unwrap_or_default();

        for &index in &requested {
            let hunk = basis.iter().find(|h| h.index == index);
            match (hunk, live_text) {
                (Some(hunk), Some(_)) if context_matches(&lines, hunk) => accepted.push(hunk),
                _ => {
                    log::warn!("Hunk {index} of {path} does not match the live file");
                    result.failed.push(index);
                }
            }
        }

        self.backups
            .snapshot(&format!("Pre-update backup for {path}"))?;

        if accepted.is_empty() {
            return Ok(result);
        }

        // Bottom-up keeps the offsets of the remaining hunks valid
        accepted.sort_by_key(|h| std::cmp::Reverse(h.header.old_offset()));
        for hunk in &accepted {
            let start = hunk.header.old_offset();
            let end = start + hunk.old_side().len();
            lines.splice(start..end, hunk.new_side());
        }
        self.engine.write_live(path, lines.concat().as_bytes())?;

        result.applied = accepted.iter().map(|h| h.index).collect();
        result.applied.sort_unstable();

        let mut message = format!("Applied {} hunk(s) to {}", result.applied.len(), path);
        if !result.failed.is_empty() {
            message.push_str(&format!(" ({} failed)", result.failed.len()));
        }
        self.backups.snapshot(&message)?;

        log::info!("{message}");
        Ok(result)
    }
}

/// Whether the hunk's old side sits unchanged at its position in `lines`.
fn context_matches(lines: &[String], hunk: &Hunk) -> bool {
    let expected = hunk.old_side();
    // A hunk without old lines was made against an empty file
    if expected.is_empty() {
        return lines.is_empty();
    }
    let start = hunk.header.old_offset();
    let end = start + expected.len();
    end <= lines.len() && lines[start..end] == expected[..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::compute_hunks;

    fn lines(text: &str) -> Vec<String> {
        split_lines(text).into_iter().map(str::to_string).collect()
    }

    #[test]
    fn test_context_matches() {
        let old = "a\nb\nc\n";
        let hunks = compute_hunks(old, "a\nB\nc\n");
        assert!(context_matches(&lines(old), &hunks[0]));
        assert!(!context_matches(&lines("a\nx\nc\n"), &hunks[0]));
        assert!(!context_matches(&lines("a\n"), &hunks[0]));
    }

    #[test]
    fn test_context_matches_new_file() {
        let hunks = compute_hunks("", "a\n");
        assert!(context_matches(&[], &hunks[0]));
        assert!(!context_matches(&lines("x\n"), &hunks[0]));
    }
}
