//! Backup command handlers
//!
//! Handles listing, inspecting, creating, restoring, deleting and
//! downloading snapshots of the live configuration.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::{Path, PathBuf};

use super::confirm;
use crate::backup::{short, BackupFileStatus, FULL_BACKUP_SUFFIX};
use crate::service::ConfigSyncService;

/// Handle backups list command
pub fn handle_backup_list(service: &ConfigSyncService, limit: usize) -> Result<()> {
    let backups = service.backups().context("Failed to list backups")?;

    if backups.is_empty() {
        println!("{}", "No backups yet.".yellow());
        return Ok(());
    }

    println!("{}", "Backup History".cyan().bold());
    println!("{}", "=".repeat(80).cyan());

    let display_count = backups.len().min(limit);
    for backup in backups.iter().take(display_count) {
        let message = if backup.message.ends_with(FULL_BACKUP_SUFFIX) {
            backup.message.green()
        } else {
            backup.message.normal()
        };
        println!(
            "{} {} {} {}",
            short(&backup.hash).yellow(),
            backup.timestamp.dimmed(),
            message,
            format!("({} files)", backup.files_changed).dimmed()
        );
    }

    if backups.len() > display_count {
        println!(
            "\n{} Showing {} of {} backups",
            "Note:".yellow(),
            display_count,
            backups.len()
        );
    }

    Ok(())
}

/// Handle backups show command
///
/// Lists the files of a snapshot, or the hunks of one file when `file` is set.
pub fn handle_backup_show(service: &ConfigSyncService, hash: &str, file: Option<&str>) -> Result<()> {
    if let Some(path) = file {
        let diff = service.backup_file_diff(hash, path)?;
        let status = match diff.status {
            BackupFileStatus::Added => "added".green(),
            BackupFileStatus::Deleted => "deleted".red(),
            BackupFileStatus::Modified => "modified".yellow(),
            BackupFileStatus::Unchanged => "unchanged".dimmed(),
        };
        println!("{} {}", diff.file.bold(), status);
        for hunk in &diff.hunks {
            println!("  {} {}", hunk.header.to_string().cyan(), hunk.summary);
        }
        return Ok(());
    }

    let detail = service.backup_detail(hash)?;
    println!("{} {}", "Backup".cyan().bold(), detail.hash.yellow());
    println!("{}", "=".repeat(80).cyan());

    for path in &detail.files {
        let marker = if detail.changed_files.contains(path) {
            "*".yellow().bold()
        } else {
            " ".normal()
        };
        println!("  {marker} {path}");
    }
    println!(
        "\n{} {} file(s), {} changed",
        "Total:".bold(),
        detail.files.len(),
        detail.changed_files.len()
    );

    Ok(())
}

/// Handle backups create command
pub fn handle_backup_create(service: &ConfigSyncService, message: Option<&str>) -> Result<()> {
    let backup = service.manual_backup(message)?;
    println!(
        "{} Created backup {} {}",
        "✓".green(),
        short(&backup.hash).yellow(),
        backup.message
    );
    Ok(())
}

/// Handle backups restore command
pub fn handle_backup_restore(service: &ConfigSyncService, hash: &str, assume_yes: bool) -> Result<()> {
    let detail = service.backup_detail(hash)?;
    println!(
        "{} {} ({} files)",
        "Restoring backup".cyan(),
        short(&detail.hash).yellow(),
        detail.files.len()
    );

    let proceed = confirm(
        "Do you want to restore this backup?",
        "Live files are overwritten; a pre-restore backup is taken first",
        assume_yes,
    )?;
    if !proceed {
        println!("\n{}", "Restore cancelled.".yellow());
        return Ok(());
    }

    let restored = service.restore(&detail.hash)?;
    println!("\n{}", "SUCCESS".green().bold());
    println!("Restored {} file(s)", restored.len());
    Ok(())
}

/// Handle backups delete command
pub fn handle_backup_delete(service: &ConfigSyncService, hash: &str, assume_yes: bool) -> Result<()> {
    let proceed = confirm(
        &format!("Delete backup {hash}?"),
        "Later backups are kept; their hashes change",
        assume_yes,
    )?;
    if !proceed {
        println!("\n{}", "Delete cancelled.".yellow());
        return Ok(());
    }

    let deleted = service.delete_backup(hash)?;
    println!("{} Deleted backup {}", "✓".green(), short(&deleted).yellow());
    Ok(())
}

/// Handle backups download command
///
/// Writes the snapshot as a ZIP archive to `output`, or to
/// `config-backup-<hash>.zip` in the current directory.
pub fn handle_backup_download(
    service: &ConfigSyncService,
    hash: &str,
    output: Option<&Path>,
) -> Result<PathBuf> {
    let (full_hash, archive) = service.backup_archive(hash)?;

    let path = match output {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(format!("config-backup-{}.zip", short(&full_hash))),
    };
    std::fs::write(&path, &archive)
        .with_context(|| format!("Failed to write archive: {}", path.display()))?;

    println!(
        "{} Wrote {} ({} bytes)",
        "✓".green(),
        path.display(),
        archive.len()
    );
    Ok(path)
}
