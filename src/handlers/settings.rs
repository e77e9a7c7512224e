//! Settings command handlers

use anyhow::Result;
use colored::Colorize;

use crate::service::ConfigSyncService;
use crate::settings::SettingsUpdate;

/// Handle settings command without changes
pub fn handle_settings_show(service: &ConfigSyncService) -> Result<()> {
    let settings = service.settings();

    println!("{}", "Settings".cyan().bold());
    println!("{}", "=".repeat(80).cyan());
    println!("{} {}", "Reference URL:".bold(), settings.reference_repo_url);
    println!("{} {}", "Version override:".bold(), settings.version_override);
    println!(
        "{} {}",
        "Sync interval:".bold(),
        if settings.sync_interval == 0 {
            "disabled".to_string()
        } else {
            format!("{} min", settings.sync_interval)
        }
    );
    println!("{} {}", "Active branch:".bold(), settings.active_branch);

    Ok(())
}

/// Handle settings command with at least one change
pub fn handle_settings_set(service: &ConfigSyncService, update: &SettingsUpdate) -> Result<()> {
    service.update_settings(update)?;
    println!("{}", "✓ Settings saved".green());
    handle_settings_show(service)
}
