//! Git operations

mod manager;

pub use manager::{find_git_root, GitManager, WorktreeInfo};
