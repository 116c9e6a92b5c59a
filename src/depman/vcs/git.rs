use std::fs::File;
use std::path::Path;
use std::process::Command;

use depman_util::process::{MonitoredCommand, MonitoredCommandError};

use crate::version::Revision;

use super::driver::{VcsError, VcsDriver};
use super::{CHEAP_IDLE_TIMEOUT, EXPENSIVE_IDLE_TIMEOUT};

/// Drives the `git` binary. Version checkout is always followed by a
/// defensive submodule update and an aggressive, recursive clean, per
/// §4.2, so that a vendored submodule that vanished upstream doesn't leave
/// stale files behind.
pub struct GitDriver;

impl GitDriver {
    fn run(&self, mut cmd: Command, timeout: std::time::Duration) -> Result<Vec<u8>, VcsError> {
        let command_str = format!("{cmd:?}");
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        match MonitoredCommand::new(cmd).idle_timeout(timeout).run() {
            Ok(out) if out.status.success() => Ok(out.tail),
            Ok(out) => Err(VcsError::Failed {
                command: command_str,
                detail: format!(
                    "exited with {}: {}",
                    out.status,
                    String::from_utf8_lossy(&out.tail)
                ),
            }),
            Err(MonitoredCommandError::Timeout(name, _)) => Err(VcsError::NoProgress(name)),
            Err(MonitoredCommandError::Io(e)) => Err(VcsError::Io(e)),
            Err(MonitoredCommandError::NonZeroExit(name, status)) => Err(VcsError::Failed {
                command: name,
                detail: status.to_string(),
            }),
        }
    }

    fn post_checkout_clean(&self, path: &Path) -> Result<(), VcsError> {
        let mut submodule = Command::new("git");
        submodule
            .current_dir(path)
            .args(["submodule", "update", "--init", "--recursive"]);
        self.run(submodule, EXPENSIVE_IDLE_TIMEOUT)?;

        let mut clean = Command::new("git");
        clean.current_dir(path).args(["clean", "-ffdx"]);
        self.run(clean, CHEAP_IDLE_TIMEOUT)?;

        let mut submodule_clean = Command::new("git");
        submodule_clean
            .current_dir(path)
            .args(["submodule", "foreach", "--recursive", "git", "clean", "-ffdx"]);
        self.run(submodule_clean, CHEAP_IDLE_TIMEOUT)?;
        Ok(())
    }
}

impl VcsDriver for GitDriver {
    fn get(&self, url: &str, path: &Path) -> Result<(), VcsError> {
        depman_util::paths::create_dir_all(path.parent().unwrap_or(path))
            .map_err(|e| VcsError::Failed { command: "mkdir".into(), detail: e.to_string() })?;
        let mut cmd = Command::new("git");
        cmd.args(["clone", "--no-checkout", url]).arg(path);
        self.run(cmd, EXPENSIVE_IDLE_TIMEOUT)?;
        Ok(())
    }

    fn fetch(&self, path: &Path) -> Result<(), VcsError> {
        let mut cmd = Command::new("git");
        cmd.current_dir(path).args(["fetch", "--all", "--tags", "--prune"]);
        self.run(cmd, EXPENSIVE_IDLE_TIMEOUT)?;
        Ok(())
    }

    fn update_version(&self, path: &Path, reference: &str) -> Result<(), VcsError> {
        let mut cmd = Command::new("git");
        cmd.current_dir(path).args(["checkout", "--force", reference]);
        self.run(cmd, CHEAP_IDLE_TIMEOUT)?;
        self.post_checkout_clean(path)
    }

    fn export(&self, path: &Path, reference: &str, dest: &Path) -> Result<(), VcsError> {
        depman_util::paths::create_dir_all(dest)
            .map_err(|e| VcsError::Failed { command: "mkdir".into(), detail: e.to_string() })?;

        let archive_path = dest.join(".depman-export.tar");
        let mut cmd = Command::new("git");
        cmd.current_dir(path).args([
            "archive",
            "--format=tar",
            "--output",
        ]);
        cmd.arg(&archive_path);
        cmd.arg(reference);
        self.run(cmd, EXPENSIVE_IDLE_TIMEOUT)?;

        let file = File::open(&archive_path)
            .map_err(|e| VcsError::Failed { command: "open archive".into(), detail: e.to_string() })?;
        let mut archive = tar::Archive::new(file);
        archive
            .unpack(dest)
            .map_err(|e| VcsError::Failed { command: "unpack archive".into(), detail: e.to_string() })?;
        let _ = std::fs::remove_file(&archive_path);
        Ok(())
    }

    fn list_versions(&self, path: &Path) -> Result<Vec<(String, Revision)>, VcsError> {
        let mut tags = Command::new("git");
        tags.current_dir(path)
            .args(["for-each-ref", "--format=%(refname:short) %(objectname)", "refs/tags", "refs/remotes/origin"]);
        let out = self.run(tags, CHEAP_IDLE_TIMEOUT)?;
        let text = String::from_utf8_lossy(&out);
        let mut versions = Vec::new();
        for line in text.lines() {
            let mut parts = line.split_whitespace();
            if let (Some(name), Some(rev)) = (parts.next(), parts.next()) {
                let name = name.strip_prefix("origin/").unwrap_or(name);
                if name == "HEAD" {
                    continue;
                }
                versions.push((name.to_string(), Revision(rev.to_string())));
            }
        }
        Ok(versions)
    }

    fn resolve_revision(&self, path: &Path, reference: &str) -> Result<Revision, VcsError> {
        let mut cmd = Command::new("git");
        cmd.current_dir(path).args(["rev-parse", reference]);
        let out = self.run(cmd, CHEAP_IDLE_TIMEOUT)?;
        let rev = String::from_utf8_lossy(&out).trim().to_string();
        Ok(Revision(rev))
    }
}
