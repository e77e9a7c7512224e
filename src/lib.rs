//! # device-config-sync
//!
//! A daemon that keeps a device's live configuration in line with a
//! version-controlled reference repository.
//!
//! ## Overview
//!
//! The reference repository holds one branch per firmware version. The
//! daemon mirrors it, picks the branch matching the version the device
//! reports, and diffs the reference files against the device's live tree.
//! Differences can be applied wholesale, per file, or hunk by hunk. Every
//! write is bracketed by snapshots in a backup repository whose history can
//! be browsed, downloaded, restored and pruned.
//!
//! ## Architecture
//!
//! - Configuration and persisted settings ([`config`], [`settings`])
//! - Version control access ([`scm`])
//! - Reference mirror and branch resolution ([`reference`], [`version`])
//! - Diffing and applying ([`diff`], [`patch`])
//! - Backup history ([`backup`])
//! - The service tying it together, and its HTTP surface ([`service`], [`server`])
//! - Command-line handlers and logging ([`handlers`], [`logger`])

/// Backup history of the live tree, kept in a git repository whose worktree
/// is the device volume itself.
pub mod backup;

/// Platform-aware location of the config file and daemon data directory.
pub mod config;

/// Reference-vs-live comparison: path mapping, protection rules, Myers diff
/// and unified hunks.
pub mod diff;

/// Error kinds surfaced to callers, with their HTTP status mapping.
pub mod error;

/// Command-line handlers for the `device-config-sync` binary.
pub mod handlers;

/// Console logging plus the persistent audit log.
pub mod logger;

/// Writing reference content into the live tree.
pub mod patch;

/// Local mirror of the reference repository.
pub mod reference;

/// Source control backends.
pub mod scm;

/// HTTP routes and the periodic sync task.
pub mod server;

/// The service object every surface talks to.
pub mod service;

/// Persisted user settings.
pub mod settings;

/// Firmware version to branch resolution.
pub mod version;
