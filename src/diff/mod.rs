//! Reference-vs-live comparison.
//!
//! The [`DiffEngine`] walks the union of the reference checkout's tracked
//! files and the live files under the mapped directories, classifies each
//! path, and computes indexed hunks for the ones that can be patched. Hunks
//! are always computed from the same (live, reference) content pair by the
//! same function, so summary and detail views agree on indices.

mod hunk;
mod myers;
mod paths;

pub use hunk::{
    compute_hunks, split_lines, summarize, unified_diff, Hunk, HunkHeader, CONTEXT_LINES,
    NO_NEWLINE_MARKER,
};
pub use paths::{checked_relative, default_directory_map, DirectoryMapping, PathMapper, ProtectList};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Classification of one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Byte-identical on both sides
    Unchanged,
    /// Present on both sides with different content
    Modified,
    /// Only in the reference
    Missing,
    /// Only on the device
    Extra,
    /// Matches the protect-list; never written
    Protected,
}

impl FileStatus {
    /// Whether an apply may write this file.
    pub fn is_actionable(&self) -> bool {
        matches!(self, FileStatus::Modified | FileStatus::Missing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Unchanged => "unchanged",
            FileStatus::Modified => "modified",
            FileStatus::Missing => "missing",
            FileStatus::Extra => "extra",
            FileStatus::Protected => "protected",
        }
    }
}

/// Comparison result for one path. Computed on demand, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    /// Path relative to the reference root (`sys/config.g`)
    pub path: String,
    /// Device path (`0:/sys/config.g`)
    pub device_path: String,
    pub status: FileStatus,
    pub hunks: Vec<Hunk>,
}

/// Summary-mode hunk: address only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HunkRef {
    pub index: usize,
    pub header: HunkHeader,
}

/// Summary-mode entry of `GET /diff`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub file: String,
    pub device_path: String,
    pub status: FileStatus,
    pub hunks: Vec<HunkRef>,
}

/// Detail-mode response of `GET /diff?file=`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDetail {
    pub file: String,
    pub device_path: String,
    pub status: FileStatus,
    pub hunks: Vec<Hunk>,
    pub unified_diff: String,
}

impl FileDiff {
    pub fn summary(&self) -> FileSummary {
        FileSummary {
            file: self.path.clone(),
            device_path: self.device_path.clone(),
            status: self.status,
            hunks: self
                .hunks
                .iter()
                .map(|h| HunkRef {
                    index: h.index,
                    header: h.header,
                })
                .collect(),
        }
    }

    pub fn detail(&self) -> FileDetail {
        FileDetail {
            file: self.path.clone(),
            device_path: self.device_path.clone(),
            status: self.status,
            hunks: self.hunks.clone(),
            unified_diff: unified_diff(&self.path, &self.hunks),
        }
    }
}

/// The active reference checkout: its root and tracked files.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceTree<'a> {
    pub root: &'a Path,
    pub files: &'a [String],
}

/// Hunks between two contents, or none when either side is not text.
pub fn text_hunks(old: &[u8], new: &[u8]) -> Vec<Hunk> {
    match (std::str::from_utf8(old), std::str::from_utf8(new)) {
        (Ok(old), Ok(new)) => compute_hunks(old, new),
        _ => Vec::new(),
    }
}

pub struct DiffEngine {
    mapper: PathMapper,
    protect: ProtectList,
}

impl DiffEngine {
    pub fn new(mapper: PathMapper, protect: ProtectList) -> Self {
        Self { mapper, protect }
    }

    pub fn mapper(&self) -> &PathMapper {
        &self.mapper
    }

    pub fn is_protected(&self, path: &str) -> bool {
        self.protect.is_protected(path)
    }

    /// Reference content of a tracked file.
    pub fn read_reference(&self, tree: ReferenceTree<'_>, path: &str) -> Result<Option<Vec<u8>>> {
        if !tree.files.iter().any(|f| f == path) {
            return Ok(None);
        }
        read_optional(&tree.root.join(checked_relative(path)?))
    }

    /// Live content for a reference path, `None` when absent.
    pub fn read_live(&self, path: &str) -> Result<Option<Vec<u8>>> {
        match self.mapper.live_path(path)? {
            Some(live) => read_optional(&live),
            None => Ok(None),
        }
    }

    /// Write live content for a reference path, creating parent directories.
    pub fn write_live(&self, path: &str, content: &[u8]) -> Result<()> {
        let live = self
            .mapper
            .live_path(path)?
            .ok_or_else(|| Error::NotFound(format!("Unknown reference path: {path}")))?;
        if let Some(parent) = live.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&live, content)?;
        Ok(())
    }

    /// Compare every file of the union of both trees.
    pub fn diff_all(&self, tree: ReferenceTree<'_>) -> Result<Vec<FileDiff>> {
        let mut paths: BTreeSet<String> = tree
            .files
            .iter()
            .filter(|f| self.mapper.to_device(f).is_some())
            .cloned()
            .collect();
        paths.extend(self.extra_files(tree)?);

        paths.iter().map(|path| self.compare(tree, path)).collect()
    }

    /// Compare one file. Unknown on both sides is `NotFound`.
    pub fn diff_file(&self, tree: ReferenceTree<'_>, path: &str) -> Result<FileDiff> {
        checked_relative(path).map_err(|e| Error::InvalidRequest(e.to_string()))?;
        if self.mapper.to_device(path).is_none() {
            return Err(Error::NotFound(format!("Unknown reference path: {path}")));
        }

        let known = tree.files.iter().any(|f| f == path)
            || self.extra_files(tree)?.iter().any(|f| f == path);
        if !known {
            return Err(Error::NotFound(format!("File not found: {path}")));
        }
        self.compare(tree, path)
    }

    fn compare(&self, tree: ReferenceTree<'_>, path: &str) -> Result<FileDiff> {
        let device_path = self.mapper.to_device(path).unwrap_or_default();
        let reference = self.read_reference(tree, path)?;
        let live = self.read_live(path)?;

        let (status, hunks) = if self.is_protected(path) {
            (FileStatus::Protected, Vec::new())
        } else {
            match (reference, live) {
                (Some(reference), Some(live)) if reference == live => {
                    (FileStatus::Unchanged, Vec::new())
                }
                (Some(reference), Some(live)) => {
                    (FileStatus::Modified, text_hunks(&live, &reference))
                }
                (Some(reference), None) => (FileStatus::Missing, text_hunks(&[], &reference)),
                (None, _) => (FileStatus::Extra, Vec::new()),
            }
        };

        Ok(FileDiff {
            path: path.to_string(),
            device_path,
            status,
            hunks,
        })
    }

    /// Live files under mapped directories the reference populates, that the
    /// reference does not track.
    fn extra_files(&self, tree: ReferenceTree<'_>) -> Result<Vec<String>> {
        let tracked: BTreeSet<&str> = tree.files.iter().map(String::as_str).collect();
        let mut extras = Vec::new();

        for mapping in self.mapper.mappings() {
            if !tree.files.iter().any(|f| f.starts_with(&mapping.reference)) {
                continue;
            }
            let live_dir = self.mapper.live_dir(mapping)?;
            if !live_dir.is_dir() {
                continue;
            }

            for entry in WalkDir::new(&live_dir)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                let Ok(relative) = entry.path().strip_prefix(&live_dir) else {
                    continue;
                };
                let relative: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                let ref_path = format!("{}{}", mapping.reference, relative.join("/"));

                // A nested mapping owns this path; it is scanned there
                if self.mapper.to_device(&ref_path).as_deref()
                    != Some(&format!("{}{}", mapping.device, relative.join("/")))
                {
                    continue;
                }
                if !tracked.contains(ref_path.as_str()) {
                    extras.push(ref_path);
                }
            }
        }

        Ok(extras)
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    if !path.is_file() {
        return Ok(None);
    }
    match fs::read(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        reference: std::path::PathBuf,
        files: Vec<String>,
        engine: DiffEngine,
        live: std::path::PathBuf,
    }

    fn write(root: &Path, path: &str, content: &str) {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }

    fn fixture(reference: &[(&str, &str)], live: &[(&str, &str)]) -> Fixture {
        let temp = TempDir::new().unwrap();
        let ref_root = temp.path().join("reference");
        let live_root = temp.path().join("live");
        fs::create_dir_all(&ref_root).unwrap();
        fs::create_dir_all(&live_root).unwrap();
        for (path, content) in reference {
            write(&ref_root, path, content);
        }
        for (path, content) in live {
            write(&live_root, path, content);
        }
        Fixture {
            reference: ref_root,
            files: reference.iter().map(|(p, _)| p.to_string()).collect(),
            engine: DiffEngine::new(
                PathMapper::new(default_directory_map(), &live_root),
                ProtectList::new(vec!["sys/meltingplot/machine-override*".to_string()]),
            ),
            live: live_root,
            _temp: temp,
        }
    }

    impl Fixture {
        fn tree(&self) -> ReferenceTree<'_> {
            ReferenceTree {
                root: &self.reference,
                files: &self.files,
            }
        }

        fn status_of(&self, path: &str) -> FileStatus {
            self.engine.diff_file(self.tree(), path).unwrap().status
        }
    }

    #[test]
    fn test_classification() {
        let f = fixture(
            &[
                ("sys/config.g", "G28\nM906 X800\n"),
                ("sys/homeall.g", "G28\n"),
                ("sys/bed.g", "G29\n"),
                ("sys/meltingplot/machine-override", "M92 X80\n"),
                ("README.md", "docs\n"),
            ],
            &[
                ("sys/config.g", "G28\nM906 X1000\n"),
                ("sys/homeall.g", "G28\n"),
                ("sys/meltingplot/machine-override", "M92 X81\n"),
                ("sys/local.g", "M117 local\n"),
                ("gcodes/part.gcode", "G1 X1\n"),
            ],
        );

        let diffs = f.engine.diff_all(f.tree()).unwrap();
        let statuses: Vec<(&str, FileStatus)> =
            diffs.iter().map(|d| (d.path.as_str(), d.status)).collect();
        assert_eq!(
            statuses,
            vec![
                ("sys/bed.g", FileStatus::Missing),
                ("sys/config.g", FileStatus::Modified),
                ("sys/homeall.g", FileStatus::Unchanged),
                ("sys/local.g", FileStatus::Extra),
                ("sys/meltingplot/machine-override", FileStatus::Protected),
            ]
        );
        assert_eq!(diffs[1].device_path, "0:/sys/config.g");
        assert_eq!(diffs[1].hunks.len(), 1);
        assert_eq!(diffs[0].hunks[0].header.to_string(), "@@ -0,0 +1 @@");
        assert!(diffs[3].hunks.is_empty());
        assert!(diffs[4].hunks.is_empty());
    }

    #[test]
    fn test_summary_and_detail_agree() {
        let reference: String = (1..=30).map(|i| format!("line {i}\n")).collect();
        let live = reference
            .replace("line 2\n", "line two\n")
            .replace("line 28\n", "line twenty-eight\n");
        let f = fixture(&[("sys/config.g", &reference)], &[("sys/config.g", &live)]);

        let summary = f.engine.diff_all(f.tree()).unwrap()[0].summary();
        let detail = f.engine.diff_file(f.tree(), "sys/config.g").unwrap().detail();

        assert_eq!(summary.hunks.len(), 2);
        for (s, d) in summary.hunks.iter().zip(&detail.hunks) {
            assert_eq!(s.index, d.index);
            assert_eq!(s.header, d.header);
        }
        assert!(detail.unified_diff.starts_with("--- a/sys/config.g\n+++ b/sys/config.g\n@@"));
    }

    #[test]
    fn test_protected_reported_even_when_identical() {
        let f = fixture(
            &[("sys/meltingplot/machine-override/axes.g", "same\n")],
            &[("sys/meltingplot/machine-override/axes.g", "same\n")],
        );
        assert_eq!(
            f.status_of("sys/meltingplot/machine-override/axes.g"),
            FileStatus::Protected
        );
    }

    #[test]
    fn test_extras_only_under_populated_directories() {
        let f = fixture(
            &[("sys/config.g", "G28\n")],
            &[("sys/config.g", "G28\n"), ("macros/local.g", "M117\n")],
        );
        let diffs = f.engine.diff_all(f.tree()).unwrap();
        assert_eq!(diffs.len(), 1);
        assert!(matches!(
            f.engine.diff_file(f.tree(), "macros/local.g"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_unknown_and_unmapped_paths() {
        let f = fixture(&[("sys/config.g", "G28\n")], &[]);
        assert!(matches!(
            f.engine.diff_file(f.tree(), "sys/nope.g"),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            f.engine.diff_file(f.tree(), "README.md"),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            f.engine.diff_file(f.tree(), "sys/../../etc/passwd"),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_write_live_creates_directories() {
        let f = fixture(&[("filaments/PLA/load.g", "M104 S200\n")], &[]);
        f.engine
            .write_live("filaments/PLA/load.g", b"M104 S200\n")
            .unwrap();
        assert_eq!(
            fs::read_to_string(f.live.join("filaments/PLA/load.g")).unwrap(),
            "M104 S200\n"
        );
        assert_eq!(f.status_of("filaments/PLA/load.g"), FileStatus::Unchanged);
    }

    #[test]
    fn test_binary_content_has_no_hunks() {
        let f = fixture(&[("www/logo.bin", "a")], &[]);
        fs::write(f.reference.join("www/logo.bin"), [0xff, 0xfe, 0x00]).unwrap();
        fs::create_dir_all(f.live.join("www")).unwrap();
        fs::write(f.live.join("www/logo.bin"), [0xff, 0x00]).unwrap();

        let diff = f.engine.diff_file(f.tree(), "www/logo.bin").unwrap();
        assert_eq!(diff.status, FileStatus::Modified);
        assert!(diff.hunks.is_empty());
    }
}
