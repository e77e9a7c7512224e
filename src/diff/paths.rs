//! Reference path <-> device path <-> filesystem path mapping, and the
//! protect-list.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// One reference folder mapped onto a device directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryMapping {
    /// Folder in the reference repository, with a trailing slash (`sys/`)
    pub reference: String,
    /// Device directory it lands in (`0:/sys/`)
    pub device: String,
}

impl DirectoryMapping {
    pub fn new(reference: &str, device: &str) -> Self {
        Self {
            reference: reference.to_string(),
            device: device.to_string(),
        }
    }
}

/// The standard device layout.
pub fn default_directory_map() -> Vec<DirectoryMapping> {
    ["sys", "macros", "filaments", "firmware", "gcodes", "menu", "www"]
        .iter()
        .map(|dir| DirectoryMapping::new(&format!("{dir}/"), &format!("0:/{dir}/")))
        .collect()
}

/// Translates between reference paths, device paths and live filesystem paths.
#[derive(Debug, Clone)]
pub struct PathMapper {
    mappings: Vec<DirectoryMapping>,
    live_root: PathBuf,
}

impl PathMapper {
    pub fn new(mappings: Vec<DirectoryMapping>, live_root: impl Into<PathBuf>) -> Self {
        Self {
            mappings,
            live_root: live_root.into(),
        }
    }

    pub fn live_root(&self) -> &Path {
        &self.live_root
    }

    pub fn mappings(&self) -> &[DirectoryMapping] {
        &self.mappings
    }

    /// The mapping owning a reference path; the longest prefix wins.
    fn mapping_for(&self, ref_path: &str) -> Option<&DirectoryMapping> {
        self.mappings
            .iter()
            .filter(|m| ref_path.starts_with(&m.reference))
            .max_by_key(|m| m.reference.len())
    }

    /// `sys/config.g` -> `0:/sys/config.g`. `None` for unmapped paths.
    pub fn to_device(&self, ref_path: &str) -> Option<String> {
        let mapping = self.mapping_for(ref_path)?;
        Some(format!(
            "{}{}",
            mapping.device,
            &ref_path[mapping.reference.len()..]
        ))
    }

    /// `0:/sys/config.g` -> `<live_root>/sys/config.g`.
    pub fn device_to_fs(&self, device_path: &str) -> Result<PathBuf> {
        let rest = match device_path.split_once(":/") {
            Some((volume, rest)) if volume.chars().all(|c| c.is_ascii_digit()) => rest,
            _ => bail!("Not a device path: {device_path}"),
        };
        Ok(self.live_root.join(checked_relative(rest)?))
    }

    /// Live file backing a reference path, `None` when the path is unmapped.
    pub fn live_path(&self, ref_path: &str) -> Result<Option<PathBuf>> {
        checked_relative(ref_path)?;
        match self.to_device(ref_path) {
            Some(device) => self.device_to_fs(&device).map(Some),
            None => Ok(None),
        }
    }

    /// Live directory of a mapping.
    pub fn live_dir(&self, mapping: &DirectoryMapping) -> Result<PathBuf> {
        self.device_to_fs(&mapping.device)
    }
}

/// Reject absolute paths and any `..` traversal out of the tree.
pub fn checked_relative(path: &str) -> Result<&Path> {
    let candidate = Path::new(path);
    for component in candidate.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => bail!("Invalid path: {path}"),
        }
    }
    Ok(candidate)
}

/// Reference paths that must never be overwritten.
///
/// A pattern without `*` protects that exact path and, when it names a
/// directory, everything below it. A pattern with `*` is a glob where `*`
/// matches any run of characters, `/` included.
#[derive(Debug, Clone, Default)]
pub struct ProtectList {
    patterns: Vec<String>,
}

impl ProtectList {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    pub fn is_protected(&self, ref_path: &str) -> bool {
        self.patterns.iter().any(|pattern| {
            if pattern.contains('*') {
                glob_match(pattern, ref_path)
            } else {
                let dir = pattern.trim_end_matches('/');
                ref_path == dir
                    || ref_path
                        .strip_prefix(dir)
                        .is_some_and(|rest| rest.starts_with('/'))
            }
        })
    }
}

/// Glob matching with `*` wildcards only.
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<_> = pattern.split('*').collect();
    let (first, last) = (parts[0], parts[parts.len() - 1]);

    if !text.starts_with(first) {
        return false;
    }
    let mut pos = first.len();

    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match text[pos..].find(part) {
            Some(idx) => pos += idx + part.len(),
            None => return false,
        }
    }

    text.len() - pos >= last.len() && text[pos..].ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn mapper() -> PathMapper {
        PathMapper::new(default_directory_map(), "/opt/dsf/sd")
    }

    #[test]
    fn test_to_device() {
        let mapper = mapper();
        assert_eq!(
            mapper.to_device("sys/config.g").as_deref(),
            Some("0:/sys/config.g")
        );
        assert_eq!(
            mapper.to_device("filaments/PLA/load.g").as_deref(),
            Some("0:/filaments/PLA/load.g")
        );
        assert_eq!(mapper.to_device("README.md"), None);
    }

    #[test]
    fn test_longest_mapping_wins() {
        let mapper = PathMapper::new(
            vec![
                DirectoryMapping::new("sys/", "0:/sys/"),
                DirectoryMapping::new("sys/boards/", "1:/boards/"),
            ],
            "/sd",
        );
        assert_eq!(
            mapper.to_device("sys/boards/duet.g").as_deref(),
            Some("1:/boards/duet.g")
        );
    }

    #[test]
    fn test_device_to_fs() {
        let mapper = mapper();
        assert_eq!(
            mapper.device_to_fs("0:/sys/config.g").unwrap(),
            PathBuf::from("/opt/dsf/sd/sys/config.g")
        );
        assert!(mapper.device_to_fs("/etc/passwd").is_err());
        assert!(mapper.device_to_fs("0:/sys/../../etc/passwd").is_err());
    }

    #[test]
    fn test_live_path_rejects_traversal() {
        let mapper = mapper();
        assert!(mapper.live_path("sys/../../etc/shadow").is_err());
        assert!(mapper.live_path("/sys/config.g").is_err());
        assert_eq!(mapper.live_path("README.md").unwrap(), None);
    }

    #[rstest]
    #[case("sys/meltingplot/dsf-config-override.g", true)]
    #[case("sys/meltingplot/machine-override", true)]
    #[case("sys/meltingplot/machine-override/axes.g", true)]
    #[case("sys/meltingplot/machine-override.g", true)]
    #[case("sys/dsf-config-override.g", false)]
    #[case("sys/my-override-settings.g", false)]
    #[case("sys/meltingplot/other-file.g", false)]
    #[case("sys/config.g", false)]
    fn test_protect_list(#[case] path: &str, #[case] expected: bool) {
        let protect = ProtectList::new(vec![
            "sys/meltingplot/machine-override*".to_string(),
            "sys/meltingplot/dsf-config-override.g".to_string(),
        ]);
        assert_eq!(protect.is_protected(path), expected, "{path}");
    }

    #[test]
    fn test_exact_pattern_covers_directory() {
        let protect = ProtectList::new(vec!["sys/calibration/".to_string()]);
        assert!(protect.is_protected("sys/calibration/bed.g"));
        assert!(!protect.is_protected("sys/calibration-old.g"));
    }

    #[rstest]
    #[case("*.g", "sys/config.g", true)]
    #[case("sys/*.g", "sys/config.g", true)]
    #[case("sys/*.g", "macros/config.g", false)]
    #[case("sys/*/bed*.g", "sys/probe/bed_mesh.g", true)]
    #[case("sys/*/bed*.g", "sys/probe/mesh.g", false)]
    #[case("a*a", "a", false)]
    #[case("*", "", true)]
    fn test_glob_match(#[case] pattern: &str, #[case] text: &str, #[case] expected: bool) {
        assert_eq!(glob_match(pattern, text), expected);
    }
}
