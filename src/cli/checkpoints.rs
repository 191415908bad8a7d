//! `boatman checkpoints` - inspect and prune stored checkpoints

use anyhow::Result;
use std::time::Duration;

use crate::checkpoint::CheckpointStore;

pub fn list_command(task: Option<&str>) -> Result<()> {
    let store = CheckpointStore::default_location();
    let mut checkpoints = match task {
        Some(task_id) => store.list_for_task(task_id)?,
        None => store.list()?,
    };
    checkpoints.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

    if checkpoints.is_empty() {
        println!("no checkpoints");
        return Ok(());
    }

    for cp in checkpoints {
        println!(
            "{}  step={}  iter={}/{}  updated={}  resumable={}",
            cp.id,
            cp.current_step,
            cp.iteration,
            cp.max_iterations,
            cp.updated_at.format("%Y-%m-%d %H:%M:%S"),
            cp.can_resume()
        );
    }
    Ok(())
}

pub fn cleanup_command(max_age_days: u64) -> Result<()> {
    let store = CheckpointStore::default_location();
    let removed = store.cleanup(Duration::from_secs(max_age_days * 24 * 3600))?;
    println!("removed {} checkpoint(s)", removed);
    Ok(())
}
