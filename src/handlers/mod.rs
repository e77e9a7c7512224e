//! Command handler modules
//!
//! Each handler drives one CLI subcommand against a
//! [`ConfigSyncService`](crate::service::ConfigSyncService) and prints the
//! outcome for a human.

pub mod backups;
pub mod diff;
pub mod settings;
pub mod status;

pub use backups::{
    handle_backup_create, handle_backup_delete, handle_backup_download, handle_backup_list,
    handle_backup_restore, handle_backup_show,
};
pub use diff::{handle_apply, handle_diff};
pub use settings::{handle_settings_set, handle_settings_show};
pub use status::{handle_status, handle_sync};

/// Check if we're running in an interactive terminal
pub fn is_interactive() -> bool {
    atty::is(atty::Stream::Stdin) && atty::is(atty::Stream::Stdout)
}

/// Ask before a destructive step. Non-interactive runs need `assume_yes`.
pub(crate) fn confirm(prompt: &str, help: &str, assume_yes: bool) -> anyhow::Result<bool> {
    use anyhow::Context;

    if assume_yes {
        return Ok(true);
    }
    if !is_interactive() {
        anyhow::bail!("Refusing to continue without a terminal; pass --yes to confirm");
    }

    inquire::Confirm::new(prompt)
        .with_default(false)
        .with_help_message(help)
        .prompt()
        .context("Failed to get confirmation")
}
