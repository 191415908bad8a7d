//! Tests for GitManager

use super::GitManager;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn git(dir: &Path, args: &[&str]) {
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

/// Worktree creation refuses to run as root; skip those tests there.
fn running_as_root() -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::geteuid() == 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

fn init_repo(dir: &Path) {
    git(dir, &["init"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "user.name", "Test User"]);
    fs::write(dir.join("README.md"), "hello\n").expect("write README");
    git(dir, &["add", "README.md"]);
    git(dir, &["commit", "-m", "init"]);
    git(dir, &["branch", "-m", "main"]);
}

#[test]
fn ensure_worktree_creates_branch_from_base() {
    if running_as_root() {
        return;
    }
    let tmp = TempDir::new().expect("tempdir");
    let repo = tmp.path();
    init_repo(repo);

    let gm = GitManager::new(repo).expect("git manager");
    let info = gm
        .ensure_worktree("eng-42-fix-login", "main")
        .expect("ensure_worktree");

    assert!(!info.reused);
    assert!(info.path.exists());
    assert!(info.path.starts_with(repo.join(".worktrees")));
    assert_eq!(info.branch, "eng-42-fix-login");

    let head = Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .current_dir(&info.path)
        .output()
        .unwrap();
    assert_eq!(
        String::from_utf8_lossy(&head.stdout).trim(),
        "eng-42-fix-login"
    );
}

#[test]
fn ensure_worktree_reuses_existing_path() {
    if running_as_root() {
        return;
    }
    let tmp = TempDir::new().expect("tempdir");
    let repo = tmp.path();
    init_repo(repo);

    let gm = GitManager::new(repo).expect("git manager");
    let first = gm.ensure_worktree("task-a", "main").expect("first");
    let second = gm.ensure_worktree("task-a", "main").expect("second");

    assert!(!first.reused);
    assert!(second.reused);
    assert_eq!(first.path, second.path);
}

#[test]
fn changed_files_reflects_worktree_state() {
    if running_as_root() {
        return;
    }
    let tmp = TempDir::new().expect("tempdir");
    let repo = tmp.path();
    init_repo(repo);

    let gm = GitManager::new(repo).expect("git manager");
    let info = gm.ensure_worktree("task-b", "main").expect("worktree");

    assert!(gm.changed_files(&info.path).expect("clean").is_empty());

    fs::write(info.path.join("README.md"), "hello world\n").expect("modify");
    fs::write(info.path.join("new.txt"), "fresh\n").expect("create");

    let mut changed = gm.changed_files(&info.path).expect("changed");
    changed.sort();
    assert_eq!(changed.len(), 2);
    assert_eq!(changed[0], Path::new("README.md"));
    assert_eq!(changed[1], Path::new("new.txt"));
}

#[test]
fn commit_all_and_diff() {
    if running_as_root() {
        return;
    }
    let tmp = TempDir::new().expect("tempdir");
    let repo = tmp.path();
    init_repo(repo);

    let gm = GitManager::new(repo).expect("git manager");
    let info = gm.ensure_worktree("task-c", "main").expect("worktree");

    fs::write(info.path.join("README.md"), "hello world\n").expect("modify");
    let diff = gm.diff(&info.path).expect("diff");
    assert!(diff.contains("hello world"), "diff was:\n{}", diff);

    let committed = gm.commit_all(&info.path, "change readme").expect("commit");
    assert!(committed);

    // Second commit with nothing changed is a no-op, not an error.
    let committed = gm.commit_all(&info.path, "empty").expect("no-op commit");
    assert!(!committed);

    let against_base = gm.diff_against(&info.path, "main").expect("diff base");
    assert!(against_base.contains("hello world"));
}

#[test]
fn squash_collapses_checkpoint_commits() {
    if running_as_root() {
        return;
    }
    let tmp = TempDir::new().expect("tempdir");
    let repo = tmp.path();
    init_repo(repo);

    let gm = GitManager::new(repo).expect("git manager");
    let info = gm.ensure_worktree("task-d", "main").expect("worktree");

    for i in 0..3 {
        fs::write(info.path.join("file.txt"), format!("v{}\n", i)).expect("write");
        assert!(gm.commit_all(&info.path, &format!("step {}", i)).unwrap());
    }

    let ahead = gm.commits_ahead_of(&info.path, "main").expect("ahead");
    assert_eq!(ahead, 3);

    gm.squash_last(&info.path, 3, "one change").expect("squash");
    let ahead = gm.commits_ahead_of(&info.path, "main").expect("ahead");
    assert_eq!(ahead, 1);
    assert_eq!(
        fs::read_to_string(info.path.join("file.txt")).unwrap(),
        "v2\n"
    );
}

#[test]
fn list_and_clean_worktrees() {
    if running_as_root() {
        return;
    }
    let tmp = TempDir::new().expect("tempdir");
    let repo = tmp.path();
    init_repo(repo);

    let gm = GitManager::new(repo).expect("git manager");
    gm.ensure_worktree("task-e", "main").expect("worktree e");
    gm.ensure_worktree("task-f", "main").expect("worktree f");

    assert_eq!(gm.list_worktrees().expect("list").len(), 2);
    assert_eq!(gm.clean_worktrees().expect("clean"), 2);
    assert!(gm.list_worktrees().expect("list").is_empty());
}

#[test]
fn not_a_repo_is_an_error() {
    let tmp = TempDir::new().expect("tempdir");
    assert!(GitManager::new(tmp.path()).is_err());
}
