//! Boatman - autonomous software-change orchestrator
//!
//! Boatman takes a work item (a ticket, an inline prompt, or an instruction
//! file) and drives it through a nine-stage pipeline: plan, execute inside an
//! isolated git worktree, review, refactor until the review passes, then
//! commit, push, and open a pull request. Code generation and review are
//! delegated to an external LLM CLI; boatman sequences, parallelizes,
//! validates, retries, and carries context between those invocations.

pub mod agent;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod domain;
pub mod git;
pub mod pipeline;
pub mod pr;
pub mod review;
pub mod tracker;

pub use domain::*;
