//! Picking the reference branch for a device version.
//!
//! Branches named like versions (`3.5`, `v3.6.1`) form a total order: they
//! compare component-wise with missing components counting as 0, ties go to
//! the name with more components, then to the lexicographically smaller
//! name. Anything else (`main`, `feature/x`) only matches exactly.

use serde::Serialize;
use std::cmp::Ordering;

use crate::error::{Error, Result};

/// Outcome of resolving a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub branch: String,
    /// True when the branch is the detected version itself or the override.
    pub exact: bool,
    pub warning: Option<String>,
}

/// Numeric components of a version-like name, `None` for anything else.
pub fn version_key(name: &str) -> Option<Vec<u64>> {
    let digits = name.strip_prefix('v').unwrap_or(name);
    if digits.is_empty() {
        return None;
    }
    digits.split('.').map(|part| part.parse::<u64>().ok()).collect()
}

/// Leading dotted-number core of a version string (`3.6.0-beta.2` -> `3.6.0`).
fn numeric_core(version: &str) -> Option<&str> {
    let digits = version.strip_prefix('v').unwrap_or(version);
    let end = digits
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(digits.len());
    let core = digits[..end].trim_end_matches('.');
    version_key(core).map(|_| core)
}

/// Compare two version keys with missing components counting as 0.
fn compare_keys(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            a.get(i)
                .copied()
                .unwrap_or(0)
                .cmp(&b.get(i).copied().unwrap_or(0))
        })
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// The total order over version-like branch names. Greater is preferred.
fn preference(a: (&str, &[u64]), b: (&str, &[u64])) -> Ordering {
    compare_keys(a.1, b.1)
        .then_with(|| a.1.len().cmp(&b.1.len()))
        .then_with(|| b.0.cmp(a.0))
}

/// `3.5.1` -> [`3.5`, `3`]
fn dotted_prefixes(version: &str) -> Vec<String> {
    let parts: Vec<&str> = version.split('.').collect();
    (1..parts.len())
        .rev()
        .map(|n| parts[..n].join("."))
        .collect()
}

/// Map a detected version and optional override onto one of `branches`.
pub fn resolve(detected: &str, version_override: &str, branches: &[String]) -> Result<Resolution> {
    let version_override = version_override.trim();
    if !version_override.is_empty() {
        return Ok(Resolution {
            branch: version_override.to_string(),
            exact: true,
            warning: None,
        });
    }

    let detected = detected.trim();
    if detected.is_empty() {
        return Err(Error::Resolution(
            "No device version detected and no version override set".to_string(),
        ));
    }

    let has = |name: &str| branches.iter().any(|b| b == name);

    if has(detected) {
        return Ok(Resolution {
            branch: detected.to_string(),
            exact: true,
            warning: None,
        });
    }

    let core = numeric_core(detected);
    let mut prefixes = dotted_prefixes(detected);
    if let Some(core) = core.filter(|c| *c != detected) {
        prefixes.push(core.to_string());
        prefixes.extend(dotted_prefixes(core));
    }
    let by_prefix = prefixes.into_iter().find(|p| has(p.as_str()));

    let chosen = by_prefix.or_else(|| {
        let target = version_key(core?)?;
        branches
            .iter()
            .filter_map(|b| version_key(b).map(|key| (b.as_str(), key)))
            .filter(|(_, key)| compare_keys(key, &target) != Ordering::Greater)
            .max_by(|a, b| preference((a.0, a.1.as_slice()), (b.0, b.1.as_slice())))
            .map(|(name, _)| name.to_string())
    });

    match chosen {
        Some(branch) => {
            let warning = format!(
                "Exact branch '{detected}' not found, using closest match '{branch}'"
            );
            log::warn!("{warning}");
            Ok(Resolution {
                branch,
                exact: false,
                warning: Some(warning),
            })
        }
        None => Err(Error::Resolution(format!(
            "No matching branch found for '{detected}'"
        ))),
    }
}
