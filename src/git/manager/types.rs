//! Git manager types

use std::path::PathBuf;

/// An isolated checkout for one task
#[derive(Debug, Clone)]
pub struct WorktreeInfo {
    /// Filesystem location of the worktree
    pub path: PathBuf,

    /// Branch checked out in the worktree
    pub branch: String,

    /// Branch the worktree branch was created from
    pub base_branch: String,

    /// True when an existing worktree at the path was reused
    pub reused: bool,
}

/// Parse `git status --porcelain` output into changed paths.
///
/// Renames (`R  old -> new`) contribute the new path.
pub(super) fn parse_porcelain(output: &str) -> Vec<PathBuf> {
    output
        .lines()
        .filter(|line| line.len() > 3)
        .map(|line| {
            let path_part = &line[3..];
            let path = match path_part.split_once(" -> ") {
                Some((_, renamed)) => renamed,
                None => path_part,
            };
            PathBuf::from(path.trim_matches('"'))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn porcelain_basic_statuses() {
        let out = " M src/lib.rs\n?? new_file.txt\nA  staged.rs\n";
        let files = parse_porcelain(out);
        assert_eq!(
            files,
            vec![
                PathBuf::from("src/lib.rs"),
                PathBuf::from("new_file.txt"),
                PathBuf::from("staged.rs"),
            ]
        );
    }

    #[test]
    fn porcelain_rename_takes_new_path() {
        let out = "R  old.rs -> new.rs\n";
        assert_eq!(parse_porcelain(out), vec![PathBuf::from("new.rs")]);
    }

    #[test]
    fn porcelain_empty() {
        assert!(parse_porcelain("").is_empty());
    }
}
