//! Git SCM backend using CLI commands.

use anyhow::{anyhow, bail, Context, Result};
use chrono::DateTime;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use super::{CommitInfo, Scm};

const FIELD_SEP: char = '\x1f';
const RECORD_SEP: char = '\x1e';

/// Default stall timeout for network transfers, in seconds.
const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 120;

/// Git SCM implementation using the git CLI.
///
/// A repository is either a regular one (`.git` inside the working tree) or
/// detached, where the git directory lives elsewhere and the working tree is
/// some other directory. Backups use the detached form so the live tree never
/// contains a `.git` directory.
pub struct GitScm {
    workdir: PathBuf,
    git_dir: Option<PathBuf>,
    network_timeout_secs: u64,
}

impl GitScm {
    /// Open an existing Git repository.
    pub fn open(path: &Path) -> Result<Self> {
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        if !path.join(".git").exists() {
            return Err(anyhow!(
                "Not a git repository: '{}' (no .git directory)",
                path.display()
            ));
        }

        Ok(Self {
            workdir: path,
            git_dir: None,
            network_timeout_secs: DEFAULT_NETWORK_TIMEOUT_SECS,
        })
    }

    /// Initialize a new Git repository.
    pub fn init(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory '{}'", path.display()))?;

        let output = Command::new("git")
            .args(["init"])
            .current_dir(path)
            .output()
            .context("Failed to run 'git init'")?;

        if !output.status.success() {
            return Err(anyhow!(
                "git init failed: {}",
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        Self::configure_identity(path);

        Self::open(path)
    }

    /// Clone a remote repository.
    pub fn clone(url: &str, path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create parent directory for '{}'", path.display())
            })?;
        }

        let output = Command::new("git")
            .args(["clone", "--quiet", url, &path.to_string_lossy()])
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .context("Failed to run 'git clone'")?;

        if !output.status.success() {
            return Err(anyhow!(
                "git clone failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        Self::open(path)
    }

    /// Open a repository kept at `repo_path` that tracks files in `worktree`,
    /// initializing the repository on first use.
    pub fn init_detached(repo_path: &Path, worktree: &Path) -> Result<Self> {
        std::fs::create_dir_all(worktree)
            .with_context(|| format!("Failed to create directory '{}'", worktree.display()))?;

        let inner = if repo_path.join(".git").exists() {
            Self::open(repo_path)?
        } else {
            let repo = Self::init(repo_path)?;
            log::info!("Initialized backup repository at {}", repo_path.display());
            repo
        };

        let worktree = worktree
            .canonicalize()
            .unwrap_or_else(|_| worktree.to_path_buf());

        Ok(Self {
            git_dir: Some(inner.workdir.join(".git")),
            workdir: worktree,
            network_timeout_secs: inner.network_timeout_secs,
        })
    }

    /// Abort network transfers that stall for longer than `secs`.
    pub fn with_network_timeout(mut self, secs: u64) -> Self {
        self.network_timeout_secs = secs;
        self
    }

    fn configure_identity(path: &Path) {
        for (key, value) in [
            ("user.name", "Device Config Sync"),
            ("user.email", "device-config-sync@localhost"),
            ("commit.gpgsign", "false"),
        ] {
            let _ = Command::new("git")
                .args(["config", key, value])
                .current_dir(path)
                .output();
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        if let Some(git_dir) = &self.git_dir {
            cmd.arg("--git-dir")
                .arg(git_dir)
                .arg("--work-tree")
                .arg(&self.workdir);
        }
        cmd.args(args)
            .current_dir(&self.workdir)
            .env("GIT_TERMINAL_PROMPT", "0");
        cmd
    }

    fn output_with_env(&self, args: &[&str], envs: &[(&str, &str)]) -> Result<Output> {
        let mut cmd = self.command(args);
        for (key, value) in envs {
            cmd.env(key, value);
        }
        cmd.output()
            .with_context(|| format!("Failed to run 'git {}'", args.join(" ")))
    }

    /// Run a git command and return raw stdout.
    fn run_git_bytes(&self, args: &[&str]) -> Result<Vec<u8>> {
        self.run_git_bytes_with_env(args, &[])
    }

    fn run_git_bytes_with_env(&self, args: &[&str], envs: &[(&str, &str)]) -> Result<Vec<u8>> {
        log::debug!("Running: git {} (cwd={})", args.join(" "), self.workdir.display());
        let output = self.output_with_env(args, envs)?;

        if !output.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        Ok(output.stdout)
    }

    /// Run a git command and return stdout as a string.
    fn run_git(&self, args: &[&str]) -> Result<String> {
        let stdout = self.run_git_bytes(args)?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }

    /// Run a git command, returning Ok if it succeeds (ignoring stdout).
    fn run_git_ok(&self, args: &[&str]) -> Result<()> {
        self.run_git_bytes(args)?;
        Ok(())
    }

    /// Check if a git command succeeds (exit code 0).
    fn git_succeeds(&self, args: &[&str]) -> bool {
        self.command(args)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Run a command whose output is a NUL-separated path list.
    fn run_git_paths(&self, args: &[&str]) -> Result<Vec<String>> {
        let stdout = self.run_git_bytes(args)?;
        Ok(String::from_utf8_lossy(&stdout)
            .split('\0')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn rev_exists(&self, rev: &str) -> bool {
        self.git_succeeds(&["rev-parse", "--verify", "--quiet", &format!("{rev}^{{commit}}")])
    }
}

impl Scm for GitScm {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn current_branch(&self) -> Result<String> {
        let branch = self.run_git(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        if branch != "HEAD" {
            return Ok(branch);
        }
        // Detached at a tag
        Ok(self
            .run_git(&["describe", "--tags", "--exact-match", "HEAD"])
            .unwrap_or(branch))
    }

    fn current_commit_hash(&self) -> Result<String> {
        self.run_git(&["rev-parse", "HEAD"])
    }

    fn get_remote_url(&self, name: &str) -> Result<String> {
        self.run_git(&["remote", "get-url", name])
    }

    fn set_remote_url(&self, name: &str, url: &str) -> Result<()> {
        if self.git_succeeds(&["remote", "get-url", name]) {
            self.run_git_ok(&["remote", "set-url", name, url])
        } else {
            self.run_git_ok(&["remote", "add", name, url])
        }
    }

    fn fetch(&self, remote: &str) -> Result<()> {
        let low_speed_time = format!("http.lowSpeedTime={}", self.network_timeout_secs);
        self.run_git_ok(&[
            "-c",
            "http.lowSpeedLimit=1000",
            "-c",
            &low_speed_time,
            "fetch",
            "--quiet",
            "--prune",
            "--tags",
            remote,
        ])
    }

    fn remote_branches(&self, remote: &str) -> Result<Vec<String>> {
        let prefix = format!("refs/remotes/{remote}/");
        let output = self.run_git(&["for-each-ref", "--format=%(refname)", &prefix])?;

        let mut branches: Vec<String> = output
            .lines()
            .filter_map(|line| line.trim().strip_prefix(&prefix))
            .filter(|name| *name != "HEAD")
            .map(str::to_string)
            .collect();
        branches.sort();
        Ok(branches)
    }

    fn checkout(&self, remote: &str, name: &str) -> Result<()> {
        let remote_ref = format!("refs/remotes/{remote}/{name}");
        let tag_ref = format!("refs/tags/{name}");

        if self.rev_exists(&remote_ref) {
            self.run_git_ok(&[
                "checkout",
                "--quiet",
                "--force",
                "-B",
                name,
                &format!("{remote}/{name}"),
            ])
        } else if self.rev_exists(&tag_ref) {
            self.run_git_ok(&["checkout", "--quiet", "--force", "--detach", &tag_ref])
        } else {
            bail!("Branch or tag '{name}' not found on remote '{remote}'")
        }
    }

    fn tracked_files(&self) -> Result<Vec<String>> {
        self.run_git_paths(&["ls-files", "-z"])
    }

    fn stage_paths(&self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add", "-A", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run_git_ok(&args)
    }

    fn has_staged_changes(&self) -> Result<bool> {
        let output = self.output_with_env(&["diff", "--cached", "--quiet"], &[])?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(anyhow!(
                "git diff --cached failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )),
        }
    }

    fn commit(&self, message: &str, allow_empty: bool) -> Result<String> {
        let mut args = vec!["commit", "--quiet", "-m", message];
        if allow_empty {
            args.push("--allow-empty");
        }
        self.run_git_ok(&args)?;
        self.current_commit_hash()
    }

    fn log(&self) -> Result<Vec<CommitInfo>> {
        if !self.git_succeeds(&["rev-parse", "--verify", "--quiet", "HEAD"]) {
            return Ok(Vec::new());
        }

        let output = self.run_git(&["log", "--format=%H%x1f%P%x1f%aI%x1f%s%x1e"])?;
        let mut entries = Vec::new();

        for record in output.split(RECORD_SEP) {
            let record = record.trim();
            if record.is_empty() {
                continue;
            }
            let fields: Vec<&str> = record.splitn(4, FIELD_SEP).collect();
            if fields.len() < 4 {
                log::warn!("Skipping malformed log record: {record:?}");
                continue;
            }
            let timestamp = DateTime::parse_from_rfc3339(fields[2])
                .with_context(|| format!("Invalid commit date '{}'", fields[2]))?;
            entries.push(CommitInfo {
                hash: fields[0].to_string(),
                parent: fields[1].split_whitespace().next().map(str::to_string),
                timestamp,
                message: fields[3].to_string(),
            });
        }

        Ok(entries)
    }

    fn files_at(&self, rev: &str) -> Result<Vec<String>> {
        self.run_git_paths(&["ls-tree", "-r", "--name-only", "-z", rev])
    }

    fn changed_files(&self, rev: &str, base: Option<&str>) -> Result<Vec<String>> {
        match base {
            Some(base) => self.run_git_paths(&["diff-tree", "-r", "--name-only", "-z", base, rev]),
            None => self.run_git_paths(&[
                "diff-tree",
                "--root",
                "-r",
                "--no-commit-id",
                "--name-only",
                "-z",
                rev,
            ]),
        }
    }

    fn file_at(&self, rev: &str, path: &str) -> Result<Option<Vec<u8>>> {
        let spec = format!("{rev}:{path}");
        let kind = self.output_with_env(&["cat-file", "-t", &spec], &[])?;
        if !kind.status.success() || String::from_utf8_lossy(&kind.stdout).trim() != "blob" {
            return Ok(None);
        }
        self.run_git_bytes(&["cat-file", "blob", &spec]).map(Some)
    }

    fn archive_zip(&self, rev: &str) -> Result<Vec<u8>> {
        self.run_git_bytes(&["archive", "--format=zip", rev])
    }

    fn drop_commit(&self, rev: &str) -> Result<()> {
        let mut chain = self.log()?;
        chain.reverse();

        let position = chain
            .iter()
            .position(|c| c.hash == rev)
            .ok_or_else(|| anyhow!("Commit {rev} is not part of the current history"))?;
        if chain.len() == 1 {
            bail!("Cannot drop the only commit in the history");
        }

        let mut parent = position.checked_sub(1).map(|i| chain[i].hash.clone());

        for successor in &chain[position + 1..] {
            let meta = self.run_git(&[
                "log",
                "-1",
                "--format=%T%x1f%an%x1f%ae%x1f%aI%x1f%cn%x1f%ce%x1f%cI",
                &successor.hash,
            ])?;
            let fields: Vec<&str> = meta.split(FIELD_SEP).collect();
            if fields.len() != 7 {
                bail!("Unexpected commit metadata for {}", successor.hash);
            }
            let body = self.run_git(&["log", "-1", "--format=%B", &successor.hash])?;

            let mut args = vec!["commit-tree", fields[0]];
            if let Some(parent) = parent.as_deref() {
                args.extend(["-p", parent]);
            }
            args.extend(["-m", body.as_str()]);

            let envs = [
                ("GIT_AUTHOR_NAME", fields[1]),
                ("GIT_AUTHOR_EMAIL", fields[2]),
                ("GIT_AUTHOR_DATE", fields[3]),
                ("GIT_COMMITTER_NAME", fields[4]),
                ("GIT_COMMITTER_EMAIL", fields[5]),
                ("GIT_COMMITTER_DATE", fields[6]),
            ];
            let stdout = self.run_git_bytes_with_env(&args, &envs)?;
            let rewritten = String::from_utf8_lossy(&stdout).trim().to_string();
            log::debug!("Rewrote {} as {}", &successor.hash, rewritten);
            parent = Some(rewritten);
        }

        let tip = parent.ok_or_else(|| anyhow!("History would become empty"))?;
        self.run_git_ok(&["reset", "--soft", &tip])
    }
}
