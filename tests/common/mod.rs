//! Shared fixtures: a throwaway upstream reference repository and a device
//! whose live tree and daemon data live under one temp directory.

#![allow(dead_code)]

use device_config_sync::config::DaemonConfig;
use device_config_sync::service::ConfigSyncService;
use device_config_sync::settings::{JsonSettingsStore, SettingsUpdate};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Twenty numbered lines, optionally with some lines replaced.
pub fn numbered(replace: &[(usize, &str)]) -> String {
    (1..=20)
        .map(|n| {
            let line = replace
                .iter()
                .find(|(at, _)| *at == n)
                .map(|(_, text)| text.to_string())
                .unwrap_or_else(|| format!("line {n}"));
            format!("{line}\n")
        })
        .collect()
}

pub fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args([
            "-c",
            "user.name=Test",
            "-c",
            "user.email=test@localhost",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

pub fn write(root: &Path, path: &str, content: &str) {
    let full = root.join(path);
    fs::create_dir_all(full.parent().unwrap()).unwrap();
    fs::write(full, content).unwrap();
}

pub fn read(root: &Path, path: &str) -> String {
    fs::read_to_string(root.join(path)).unwrap()
}

fn commit_all(repo: &Path, message: &str) {
    git(repo, &["add", "-A"]);
    git(repo, &["commit", "-q", "-m", message]);
}

/// Reference repository with branches `main`, `3.4` and `3.5`.
///
/// `3.5` carries a `sys/config.g` that differs from [`numbered`] at lines 2
/// and 18, far enough apart to form two hunks.
pub fn upstream(root: &Path) -> PathBuf {
    let path = root.join("upstream");
    fs::create_dir_all(&path).unwrap();
    git(&path, &["init", "-q"]);
    git(&path, &["symbolic-ref", "HEAD", "refs/heads/main"]);

    write(&path, "sys/config.g", &numbered(&[]));
    write(&path, "README.md", "reference\n");
    commit_all(&path, "main");

    git(&path, &["checkout", "-q", "-b", "3.4"]);
    write(&path, "sys/config.g", &numbered(&[(2, "M906 X600")]));
    commit_all(&path, "3.4");

    git(&path, &["checkout", "-q", "-b", "3.5", "main"]);
    write(
        &path,
        "sys/config.g",
        &numbered(&[(2, "M906 X800"), (18, "M906 Y800")]),
    );
    write(&path, "sys/bed.g", "G29\n");
    write(&path, "sys/meltingplot/machine-override.g", "M92 X80\n");
    write(&path, "macros/home.g", "G28\n");
    commit_all(&path, "3.5");

    git(&path, &["checkout", "-q", "main"]);
    path
}

pub struct Device {
    pub temp: TempDir,
    pub upstream: PathBuf,
    pub live: PathBuf,
    pub config: DaemonConfig,
}

impl Device {
    /// A device reporting `version`, with a live tree one sync behind `3.5`.
    pub fn new(version: &str) -> Self {
        let temp = TempDir::new().unwrap();
        let upstream = upstream(temp.path());
        let live = temp.path().join("sd");

        write(&live, "sys/config.g", &numbered(&[]));
        write(&live, "sys/extra.g", "M117 local\n");
        write(&live, "sys/meltingplot/machine-override.g", "M92 X81\n");

        let config = DaemonConfig {
            data_dir: Some(temp.path().join("data")),
            live_root: live.clone(),
            device_version: Some(version.to_string()),
            git_timeout_secs: 30,
            ..Default::default()
        };

        Self {
            temp,
            upstream,
            live,
            config,
        }
    }

    /// Build a service pointed at the upstream repository, without syncing.
    pub fn service(&self) -> ConfigSyncService {
        let store = JsonSettingsStore::new(self.config.settings_path().unwrap());
        let service = ConfigSyncService::new(&self.config, Box::new(store)).unwrap();
        service
            .update_settings(&SettingsUpdate {
                reference_repo_url: Some(self.upstream.to_string_lossy().into_owned()),
                ..Default::default()
            })
            .unwrap();
        service
    }

    /// Build a service and sync it once.
    pub fn synced(&self) -> ConfigSyncService {
        let service = self.service();
        service.sync().unwrap();
        service
    }

    pub fn read_live(&self, path: &str) -> String {
        read(&self.live, path)
    }

    pub fn write_live(&self, path: &str, content: &str) {
        write(&self.live, path, content)
    }
}
