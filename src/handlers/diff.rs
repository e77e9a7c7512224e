//! Diff and apply command handlers

use anyhow::{Context, Result};
use colored::Colorize;

use crate::diff::FileStatus;
use crate::service::ConfigSyncService;

fn status_label(status: FileStatus, width: usize) -> colored::ColoredString {
    let text = format!("{:<width$}", status.as_str());
    match status {
        FileStatus::Unchanged => text.dimmed(),
        FileStatus::Modified => text.yellow(),
        FileStatus::Missing => text.red(),
        FileStatus::Extra => text.blue(),
        FileStatus::Protected => text.magenta(),
    }
}

/// Print one colored line of a unified diff
fn print_diff_line(line: &str) {
    if line.starts_with("+++") || line.starts_with("---") {
        println!("{}", line.bold());
    } else if line.starts_with("@@") {
        println!("{}", line.cyan());
    } else if line.starts_with('+') {
        println!("{}", line.green());
    } else if line.starts_with('-') {
        println!("{}", line.red());
    } else {
        println!("{line}");
    }
}

/// Handle diff command
///
/// Without a file, lists every file that differs (unchanged files only with
/// `show_all`). With a file, prints its hunks and unified diff.
pub fn handle_diff(service: &ConfigSyncService, file: Option<&str>, show_all: bool) -> Result<()> {
    if let Some(path) = file {
        let detail = service.diff_file(path)?;

        println!(
            "{} {} ({})",
            detail.file.bold(),
            status_label(detail.status, 0),
            detail.device_path.dimmed()
        );
        if detail.hunks.is_empty() {
            println!("{}", "No hunks to show.".yellow());
            return Ok(());
        }

        for hunk in &detail.hunks {
            println!("  [{}] {}", hunk.index, hunk.summary);
        }
        println!();
        for line in detail.unified_diff.lines() {
            print_diff_line(line);
        }
        return Ok(());
    }

    let files = service.diff_summary().context("Failed to compute diff")?;
    if files.is_empty() {
        println!("{}", "No reference checkout yet. Run 'device-config-sync sync' first.".yellow());
        return Ok(());
    }

    println!("{}", "Reference vs Live".cyan().bold());
    println!("{}", "=".repeat(80).cyan());

    let mut shown = 0;
    for summary in &files {
        if summary.status == FileStatus::Unchanged && !show_all {
            continue;
        }
        shown += 1;
        let hunks = if summary.hunks.is_empty() {
            String::new()
        } else {
            format!(" {} hunk(s)", summary.hunks.len())
        };
        println!(
            "  {} {}{}",
            status_label(summary.status, 10),
            summary.file,
            hunks.dimmed()
        );
    }

    if shown == 0 {
        println!("{}", "Live configuration matches the reference.".green());
    }

    Ok(())
}

/// Handle apply command
pub fn handle_apply(service: &ConfigSyncService, file: Option<&str>, hunks: &[usize]) -> Result<()> {
    match file {
        Some(path) if !hunks.is_empty() => {
            // Record the hunks being applied so they are checked against the live file
            service.diff_file(path)?;
            let result = service.apply_hunks(path, hunks)?;

            if !result.applied.is_empty() {
                println!(
                    "{} Applied hunk(s) {:?} to {}",
                    "✓".green(),
                    result.applied,
                    path
                );
            }
            if !result.failed.is_empty() {
                println!(
                    "{} Hunk(s) {:?} no longer match the live file",
                    "✗".red(),
                    result.failed
                );
            }
        }
        Some(path) => {
            service.apply_file(path)?;
            println!("{} Applied {}", "✓".green(), path);
        }
        None => {
            anyhow::ensure!(hunks.is_empty(), "--hunks requires --file");

            let applied = service.apply_all()?;
            if applied.is_empty() {
                println!("{}", "Nothing to apply.".yellow());
            } else {
                for path in &applied {
                    println!("  {} {}", "✓".green(), path);
                }
                println!(
                    "\n{} Applied {} file(s)",
                    "SUCCESS".green().bold(),
                    applied.len()
                );
            }
        }
    }

    Ok(())
}
