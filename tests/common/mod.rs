//! Shared helpers for integration tests

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use boatman::domain::EventSink;

pub fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap_or_else(|e| panic!("failed to run git {:?}: {}", args, e));
    assert!(
        output.status.success(),
        "git {:?} failed:\nstdout:\n{}\nstderr:\n{}",
        args,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Worktree creation refuses to run as root; tests that need it bail out.
pub fn running_as_root() -> bool {
    Command::new("id")
        .arg("-u")
        .output()
        .map(|o| String::from_utf8_lossy(&o.stdout).trim() == "0")
        .unwrap_or(false)
}

/// A repository with one commit on `main` and a local bare origin.
pub fn init_repo_with_origin(base: &Path) -> PathBuf {
    let origin = base.join("origin.git");
    std::fs::create_dir(&origin).unwrap();
    git(&origin, &["init", "--bare"]);

    let repo = base.join("repo");
    std::fs::create_dir(&repo).unwrap();
    git(&repo, &["init"]);
    git(&repo, &["config", "user.email", "test@example.com"]);
    git(&repo, &["config", "user.name", "Test User"]);
    git(&repo, &["remote", "add", "origin", origin.to_str().unwrap()]);

    std::fs::write(repo.join("README.md"), "hello\n").unwrap();
    git(&repo, &["add", "README.md"]);
    git(&repo, &["commit", "-m", "init"]);
    git(&repo, &["branch", "-M", "main"]);
    git(&repo, &["push", "-u", "origin", "main"]);

    repo
}

/// Write an executable shell script and return its path as a string.
pub fn write_script(path: &Path, body: &str) -> String {
    std::fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    path.display().to_string()
}

/// Event sink writing into a shared buffer so tests can inspect the stream.
#[derive(Clone, Default)]
pub struct CapturedEvents(pub Arc<Mutex<Vec<u8>>>);

impl Write for CapturedEvents {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl CapturedEvents {
    pub fn sink(&self) -> EventSink {
        EventSink::new(Box::new(self.clone()))
    }

    pub fn lines(&self) -> Vec<serde_json::Value> {
        let raw = self.0.lock().unwrap().clone();
        String::from_utf8_lossy(&raw)
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    /// Events of a type whose id starts with a prefix.
    pub fn count(&self, event_type: &str, id_prefix: &str) -> usize {
        self.lines()
            .iter()
            .filter(|event| {
                event["type"] == event_type
                    && event["id"]
                        .as_str()
                        .is_some_and(|id| id.starts_with(id_prefix))
            })
            .count()
    }
}
