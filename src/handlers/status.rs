//! Status and sync command handlers

use anyhow::{Context, Result};
use colored::Colorize;

use crate::service::ConfigSyncService;
use crate::settings::DeviceStatus;

/// Handle status command
pub fn handle_status(service: &ConfigSyncService, show_branches: bool) -> Result<()> {
    let report = service.status().context("Failed to read status")?;

    println!("{}", "Device Configuration Status".cyan().bold());
    println!("{}", "=".repeat(80).cyan());

    let status = match report.status {
        DeviceStatus::UpToDate => report.status.as_str().green(),
        DeviceStatus::Syncing => report.status.as_str().blue(),
        DeviceStatus::Error => report.status.as_str().red(),
        DeviceStatus::NotConfigured => report.status.as_str().yellow(),
    };
    println!("{} {}", "Status:".bold(), status.bold());
    println!(
        "{} {}",
        "Detected version:".bold(),
        display_or_dash(&report.detected_version)
    );
    println!(
        "{} {}",
        "Reference URL:".bold(),
        display_or_dash(&report.reference_repo_url)
    );
    println!(
        "{} {}",
        "Active branch:".bold(),
        display_or_dash(&report.active_branch)
    );
    println!(
        "{} {}",
        "Last sync:".bold(),
        display_or_dash(&report.last_sync_timestamp)
    );

    if show_branches {
        println!("\n{} ({})", "Branches".bold(), report.branches.len());
        for branch in &report.branches {
            let marker = if *branch == report.active_branch {
                "*".green().bold()
            } else {
                " ".normal()
            };
            println!("  {marker} {branch}");
        }
    }

    if report.status == DeviceStatus::NotConfigured {
        println!(
            "\n{} Set a reference URL with 'device-config-sync settings --url <URL>'",
            "Hint:".yellow()
        );
    }

    Ok(())
}

/// Handle sync command
pub fn handle_sync(service: &ConfigSyncService) -> Result<()> {
    println!("{}", "Syncing reference repository...".cyan());

    let report = service.sync()?;

    println!("\n{}", "SUCCESS".green().bold());
    println!(
        "{} {}{}",
        "Active branch:".bold(),
        report.active_branch,
        if report.exact { "" } else { " (closest match)" }
    );
    println!("{} {}", "Branches:".bold(), report.branches.len());
    if let Some(warning) = &report.warning {
        println!("{} {}", "Warning:".yellow().bold(), warning);
    }

    Ok(())
}

fn display_or_dash(value: &str) -> String {
    if value.is_empty() {
        "-".dimmed().to_string()
    } else {
        value.to_string()
    }
}
