//! The nine-stage pipeline engine
//!
//! Sequencing, checkpointing, resumption, and failure routing for one work
//! item: prepare, worktree, plan, preflight, execute, test + initial review
//! (in parallel), the review-refactor loop, commit, push, pull request.
//! The engine owns no intelligence of its own - stages delegate to agents -
//! but it is the only place that knows the order, what is recoverable, and
//! what survives a restart.

mod error;

pub use error::{ErrorKind, classify};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::agent::{
    AgentError, CancelSignal, ClaudeAdapter, CostTracker, Executor, Planner, Preflight, Refactor,
    Reviewer, TestRunner, is_cancellation, is_cancelled,
};
use crate::checkpoint::{
    Checkpoint, CheckpointStore, GitCheckpointStore, PipelineStep, STEP_ORDER, Transition,
};
use crate::config::Config;
use crate::context::ContextPinner;
use crate::coordinator::Coordinator;
use crate::domain::{
    EventData, EventSink, PipelineEvent, Plan, ReviewResult, Task, TestResult, WorkOutcome,
    WorkResult,
};
use crate::git::{GitManager, WorktreeInfo};
use crate::pr::PrCreator;
use crate::review::{ReviewCycle, synthetic_test_issue};
use crate::tracker::LinearClient;

/// Where the work item comes from
#[derive(Debug, Clone)]
pub enum TaskInput {
    /// Upstream ticket identifier, e.g. "ENG-42"
    Ticket(String),
    /// Inline instruction text
    Prompt(String),
    /// Instruction file
    File(PathBuf),
}

/// Stage state carried across a restart in the checkpoint's opaque blob
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RunState {
    task: Task,
    #[serde(default)]
    plan: Option<Plan>,
    #[serde(default)]
    review: Option<ReviewResult>,
    #[serde(default)]
    tests: Option<TestResult>,
}

/// The pipeline driver: one instance per repository, one `work` call per
/// task.
pub struct Pipeline {
    config: Config,
    git: GitManager,
    events: EventSink,
    costs: CostTracker,
    store: CheckpointStore,
    pr: PrCreator,
    coordinator: Arc<Coordinator>,
}

impl Pipeline {
    pub fn new(config: Config, git: GitManager, events: EventSink) -> Self {
        let coordinator = Arc::new(Coordinator::new(&config.coordinator));
        Self {
            config,
            git,
            events,
            costs: CostTracker::new(),
            store: CheckpointStore::default_location(),
            pr: PrCreator::default(),
            coordinator,
        }
    }

    /// Use a non-default checkpoint location (tests, sandboxes).
    pub fn with_checkpoint_store(mut self, store: CheckpointStore) -> Self {
        self.store = store;
        self
    }

    /// Use a non-default PR CLI (tests, forges other than GitHub).
    pub fn with_pr_creator(mut self, pr: PrCreator) -> Self {
        self.pr = pr;
        self
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Run the pipeline for one work item. Never panics the caller with an
    /// Err: fatal stage errors become a `Fatal` work result after cleanup.
    pub async fn work(&self, input: TaskInput, resume: bool, cancel: &CancelSignal) -> WorkResult {
        self.coordinator.start();
        let result = self.drive(input, resume, cancel).await;
        self.coordinator.stop().await;

        if !self.costs.is_empty() {
            eprintln!("{}", self.costs.format_table());
        }

        match result {
            Ok(result) => result,
            Err(err) => {
                let kind = classify(&err);
                tracing::error!("Pipeline failed ({}): {:#}", kind, err);
                WorkResult {
                    outcome: WorkOutcome::Fatal,
                    pr_created: false,
                    pr_url: None,
                    message: format!("{}: {:#}", kind, err),
                    iterations: 0,
                    tests_passed: false,
                    test_coverage: None,
                }
            }
        }
    }

    async fn drive(
        &self,
        input: TaskInput,
        resume: bool,
        cancel: &CancelSignal,
    ) -> Result<WorkResult> {
        let resumed = if resume {
            self.find_resumable(&input)?
        } else {
            None
        };

        // Stage 1: prepare task (skipped entirely on resume).
        let (mut cp, mut state) = match resumed {
            Some((cp, state)) => {
                tracing::info!(
                    "Resuming task {} from step {}",
                    cp.task_id,
                    cp.resume_point()
                );
                (cp, state)
            }
            None => {
                let task = self.prepare_task(&input, cancel).await?;
                let mut cp = Checkpoint::new(&task.id, self.config.max_iterations);
                cp.begin_step(PipelineStep::Prepare);
                cp.complete_step(
                    PipelineStep::Prepare,
                    Some(serde_json::json!({ "title": task.title })),
                );
                let state = RunState {
                    task,
                    plan: None,
                    review: None,
                    tests: None,
                };
                self.persist(&mut cp, &state)?;
                (cp, state)
            }
        };

        let resume_from = cp.resume_point();
        let runs = |step: PipelineStep| step_index(step) >= step_index(resume_from);
        let task_id = state.task.id.clone();

        // Stage 2: worktree.
        let worktree = if runs(PipelineStep::Worktree) {
            self.ensure_not_cancelled(cancel)?;
            self.setup_worktree(&mut cp, &state)?
        } else {
            self.restore_worktree(&cp)?
        };

        let git_store = GitCheckpointStore::new(self.git.clone(), &worktree.path, task_id.clone());
        let adapter = ClaudeAdapter::new(
            self.config.claude.clone(),
            self.config.retry.clone(),
            self.events.clone(),
        );

        // Stage 3: plan. Recoverable: a failed planner leaves plan = None
        // and downstream stages adapt.
        if runs(PipelineStep::Plan) {
            self.ensure_not_cancelled(cancel)?;
            self.run_planner(&mut cp, &mut state, &adapter, &worktree, cancel)
                .await?;
        }

        // Stage 4: preflight. Warnings only; skipped without a plan.
        if runs(PipelineStep::Preflight) {
            self.run_preflight(&mut cp, &state, &worktree)?;
        }

        // Stage 5: execute.
        if runs(PipelineStep::Execute) {
            self.ensure_not_cancelled(cancel)?;
            self.run_executor(&mut cp, &mut state, &adapter, &git_store, &worktree, cancel)
                .await?;
        }

        // Stage 6: test + initial review, in parallel.
        if runs(PipelineStep::Test) {
            self.ensure_not_cancelled(cancel)?;
            self.run_test_and_first_review(&mut cp, &mut state, &adapter, &git_store, &worktree, cancel)
                .await?;
        }

        // Stage 7: review-refactor loop.
        if runs(PipelineStep::Review) {
            self.ensure_not_cancelled(cancel)?;
            let outcome = self
                .run_review_loop(&mut cp, &mut state, &adapter, &git_store, &worktree, cancel)
                .await?;
            if let Some(result) = outcome {
                return Ok(result);
            }
        }

        // Stages 8 and 9: commit, push, pull request.
        self.ensure_not_cancelled(cancel)?;
        let pr_url = self
            .commit_push_and_pr(&mut cp, &state, &git_store, &worktree)
            .await?;

        Ok(WorkResult {
            outcome: WorkOutcome::Success,
            pr_created: true,
            pr_url: Some(pr_url),
            message: "Review passed; pull request created".to_string(),
            iterations: cp.iteration.max(1),
            tests_passed: state.tests.as_ref().map(|t| t.passed).unwrap_or(true),
            test_coverage: state.tests.as_ref().and_then(|t| t.coverage),
        })
    }

    // ---- stage implementations -------------------------------------------

    async fn prepare_task(&self, input: &TaskInput, cancel: &CancelSignal) -> Result<Task> {
        self.ensure_not_cancelled(cancel)?;

        let task = match input {
            TaskInput::Ticket(identifier) => {
                let key = self.config.linear_key.clone().with_context(|| {
                    "config missing linear_key (set linear_key in ~/.boatman.yaml \
                     or the LINEAR_API_KEY environment variable)"
                })?;

                let agent_id = format!("prepare-{}", identifier);
                self.events.emit(&PipelineEvent::started(
                    &agent_id,
                    "prepare",
                    format!("Fetch ticket {}", identifier),
                ));

                match LinearClient::new(key)
                    .fetch_ticket(identifier, &self.config.retry)
                    .await
                {
                    Ok(task) => {
                        self.events
                            .emit(&PipelineEvent::completed(&agent_id, "prepare", true));
                        task
                    }
                    Err(err) => {
                        self.events
                            .emit(&PipelineEvent::completed(&agent_id, "prepare", false));
                        return Err(err.context("failed to prepare task"));
                    }
                }
            }
            TaskInput::Prompt(text) => {
                let task = Task::from_prompt(text.clone());
                let agent_id = format!("prepare-{}", task.id);
                self.events.emit(&PipelineEvent::started(
                    &agent_id,
                    "prepare",
                    "Parse inline prompt",
                ));
                self.events
                    .emit(&PipelineEvent::completed(&agent_id, "prepare", true));
                task
            }
            TaskInput::File(path) => {
                let task = Task::from_file(path).context("failed to prepare task")?;
                let agent_id = format!("prepare-{}", task.id);
                self.events.emit(&PipelineEvent::started(
                    &agent_id,
                    "prepare",
                    format!("Load task file {}", path.display()),
                ));
                self.events
                    .emit(&PipelineEvent::completed(&agent_id, "prepare", true));
                task
            }
        };

        self.events.emit(&PipelineEvent::TaskCreated {
            id: task.id.clone(),
            name: task.title.clone(),
            description: Some(task.description.chars().take(200).collect()),
        });

        Ok(task)
    }

    fn setup_worktree(&self, cp: &mut Checkpoint, state: &RunState) -> Result<WorktreeInfo> {
        let agent_id = format!("worktree-{}", state.task.id);
        self.events.emit(&PipelineEvent::started(
            &agent_id,
            "worktree",
            format!("Set up worktree for branch {}", state.task.branch()),
        ));
        cp.begin_step(PipelineStep::Worktree);
        self.persist(cp, state)?;

        match self
            .git
            .ensure_worktree(&state.task.branch(), &self.config.base_branch)
        {
            Ok(info) => {
                cp.worktree_path = Some(info.path.clone());
                cp.branch = Some(info.branch.clone());
                cp.complete_step(
                    PipelineStep::Worktree,
                    Some(serde_json::json!({ "path": info.path, "reused": info.reused })),
                );
                self.persist(cp, state)?;
                self.events
                    .emit(&PipelineEvent::completed(&agent_id, "worktree", true));
                Ok(info)
            }
            Err(err) => {
                self.fail_stage(cp, state, PipelineStep::Worktree, &agent_id, "worktree", &err);
                Err(err.context("failed to set up worktree"))
            }
        }
    }

    fn restore_worktree(&self, cp: &Checkpoint) -> Result<WorktreeInfo> {
        let path = cp
            .worktree_path
            .clone()
            .context("checkpoint is missing the worktree path")?;
        if !path.exists() {
            bail!("checkpointed worktree no longer exists: {}", path.display());
        }
        Ok(WorktreeInfo {
            path,
            branch: cp.branch.clone().unwrap_or_default(),
            base_branch: self.config.base_branch.clone(),
            reused: true,
        })
    }

    async fn run_planner(
        &self,
        cp: &mut Checkpoint,
        state: &mut RunState,
        adapter: &ClaudeAdapter,
        worktree: &WorktreeInfo,
        cancel: &CancelSignal,
    ) -> Result<()> {
        let agent_id = format!("planning-{}", state.task.id);
        self.events.emit(&PipelineEvent::started(
            &agent_id,
            "planner",
            "Plan the change",
        ));
        cp.begin_step(PipelineStep::Plan);
        self.persist(cp, state)?;

        let planner = Planner::new(adapter, &self.costs, self.config.token_budget.plan);
        match planner.plan(&state.task, &worktree.path, cancel).await {
            Ok(plan) => {
                self.events.emit(&PipelineEvent::completed_with(
                    &agent_id,
                    "planner",
                    true,
                    EventData {
                        plan: Some(plan.summary.clone()),
                        ..Default::default()
                    },
                ));
                state.plan = Some(plan);
                cp.complete_step(PipelineStep::Plan, None);
                self.persist(cp, state)?;
                Ok(())
            }
            Err(err) if is_cancellation(&err) => {
                self.fail_stage(cp, state, PipelineStep::Plan, &agent_id, "planner", &err);
                Err(err)
            }
            Err(err) => {
                // Recoverable: downstream stages work from the raw task.
                tracing::warn!("Planner failed, continuing without a plan: {:#}", err);
                self.fail_stage(cp, state, PipelineStep::Plan, &agent_id, "planner", &err);
                state.plan = None;
                Ok(())
            }
        }
    }

    fn run_preflight(
        &self,
        cp: &mut Checkpoint,
        state: &RunState,
        worktree: &WorktreeInfo,
    ) -> Result<()> {
        let agent_id = format!("preflight-{}", state.task.id);

        let Some(plan) = &state.plan else {
            tracing::debug!("No plan available; skipping preflight");
            cp.skip_step(PipelineStep::Preflight);
            self.persist(cp, state)?;
            return Ok(());
        };

        self.events.emit(&PipelineEvent::started(
            &agent_id,
            "preflight",
            "Validate the plan against the worktree",
        ));
        cp.begin_step(PipelineStep::Preflight);
        self.persist(cp, state)?;

        let report = Preflight::validate(plan, &worktree.path);
        for warning in &report.warnings {
            tracing::warn!("Preflight: {}", warning);
            self.events
                .emit(&PipelineEvent::progress(format!("Preflight: {}", warning)));
        }
        if report.looks_wrong() {
            tracing::warn!(
                "Preflight: {} of the plan's files are missing; the plan may be stale",
                report.missing_files.len()
            );
        }

        cp.complete_step(
            PipelineStep::Preflight,
            Some(serde_json::json!({ "warnings": report.warnings.len() })),
        );
        self.persist(cp, state)?;
        self.events
            .emit(&PipelineEvent::completed(&agent_id, "preflight", true));
        Ok(())
    }

    async fn run_executor(
        &self,
        cp: &mut Checkpoint,
        state: &mut RunState,
        adapter: &ClaudeAdapter,
        git_store: &GitCheckpointStore,
        worktree: &WorktreeInfo,
        cancel: &CancelSignal,
    ) -> Result<()> {
        let agent_id = format!("execute-{}", state.task.id);
        self.events.emit(&PipelineEvent::started(
            &agent_id,
            "executor",
            "Implement the change",
        ));
        cp.begin_step(PipelineStep::Execute);
        self.persist(cp, state)?;
        self.record_git(git_store, cp, Transition::Begin, PipelineStep::Execute);

        let executor = Executor::new(
            adapter,
            &self.git,
            &self.costs,
            self.config.token_budget.context,
            self.config.enable_tools,
        );
        let plan_summary = state.plan.as_ref().map(|plan| {
            Planner::new(adapter, &self.costs, self.config.token_budget.plan)
                .summary_for_handoff(plan)
        });

        match executor
            .execute(&state.task, plan_summary, &worktree.path, cancel)
            .await
        {
            Ok(result) => {
                let diff = self.git.diff(&worktree.path).unwrap_or_default();
                self.events.emit(&PipelineEvent::completed_with(
                    &agent_id,
                    "executor",
                    result.success,
                    EventData {
                        diff: Some(diff),
                        ..Default::default()
                    },
                ));
                cp.complete_step(
                    PipelineStep::Execute,
                    Some(serde_json::json!({
                        "files_changed": result.files_changed,
                        "summary": result.summary,
                    })),
                );
                self.persist(cp, state)?;
                self.record_git(git_store, cp, Transition::Complete, PipelineStep::Execute);
                Ok(())
            }
            Err(err) => {
                self.fail_stage(cp, state, PipelineStep::Execute, &agent_id, "executor", &err);
                Err(err.context("failed to execute the change"))
            }
        }
    }

    async fn run_test_and_first_review(
        &self,
        cp: &mut Checkpoint,
        state: &mut RunState,
        adapter: &ClaudeAdapter,
        git_store: &GitCheckpointStore,
        worktree: &WorktreeInfo,
        cancel: &CancelSignal,
    ) -> Result<()> {
        let test_id = format!("test-{}", state.task.id);
        let review_id = format!("review-1-{}", state.task.id);
        self.events
            .emit(&PipelineEvent::started(&test_id, "test-runner", "Run the test suite"));
        self.events.emit(&PipelineEvent::started(
            &review_id,
            "reviewer",
            "Initial review of the diff",
        ));
        cp.begin_step(PipelineStep::Test);
        self.persist(cp, state)?;
        self.record_git(git_store, cp, Transition::Begin, PipelineStep::Test);

        let reviewer = Reviewer::new(
            adapter,
            &self.costs,
            self.config.review_skill.clone(),
            self.config.token_budget.review,
            self.config.review_thresholds(),
        );
        let diff = self
            .git
            .diff_against(&worktree.path, &worktree.base_branch)?;
        let changed_files = self.git.changed_files(&worktree.path)?;

        let (tests, review) = tokio::join!(
            TestRunner::run(&worktree.path, cancel),
            reviewer.review(
                1,
                &state.task.title,
                &diff,
                &changed_files,
                &worktree.path,
                cancel
            ),
        );

        let tests = match tests {
            Ok(tests) => tests,
            Err(err) => {
                self.events
                    .emit(&PipelineEvent::completed(&test_id, "test-runner", false));
                self.events
                    .emit(&PipelineEvent::completed(&review_id, "reviewer", false));
                self.fail_stage(cp, state, PipelineStep::Test, &test_id, "test-runner", &err);
                return Err(err.context("test runner failed"));
            }
        };
        self.events
            .emit(&PipelineEvent::completed(&test_id, "test-runner", tests.passed));

        let mut review = match review {
            Ok(review) => review,
            Err(err) => {
                self.events
                    .emit(&PipelineEvent::completed(&review_id, "reviewer", false));
                self.fail_stage(cp, state, PipelineStep::Test, &review_id, "reviewer", &err);
                return Err(err.context("initial review failed"));
            }
        };
        self.events.emit(&PipelineEvent::completed_with(
            &review_id,
            "reviewer",
            review.passed,
            EventData {
                issues: Some(review.issues.clone()),
                feedback: Some(review.guidance.clone()),
                ..Default::default()
            },
        ));

        if !tests.passed {
            tracing::warn!(
                "Tests failed; injecting a synthetic issue into the review ({} chars of output)",
                tests.output.len()
            );
            review.issues.push(synthetic_test_issue(&tests));
        }

        state.tests = Some(tests);
        state.review = Some(review);
        cp.complete_step(PipelineStep::Test, None);
        self.persist(cp, state)?;
        self.record_git(git_store, cp, Transition::Complete, PipelineStep::Test);
        Ok(())
    }

    /// Stage 7. Returns Some(result) when the loop exhausted its budget and
    /// the pipeline must terminate without pushing.
    async fn run_review_loop(
        &self,
        cp: &mut Checkpoint,
        state: &mut RunState,
        adapter: &ClaudeAdapter,
        git_store: &GitCheckpointStore,
        worktree: &WorktreeInfo,
        cancel: &CancelSignal,
    ) -> Result<Option<WorkResult>> {
        cp.begin_step(PipelineStep::Review);
        self.persist(cp, state)?;
        self.record_git(git_store, cp, Transition::Begin, PipelineStep::Review);

        let reviewer = Reviewer::new(
            adapter,
            &self.costs,
            self.config.review_skill.clone(),
            self.config.token_budget.review,
            self.config.review_thresholds(),
        );
        let refactor = Refactor::new(
            adapter,
            &self.git,
            &self.costs,
            self.config.token_budget.context,
            self.config.enable_tools,
        );
        let pinner = ContextPinner::new(&worktree.path, Arc::clone(&self.coordinator));

        let initial_review = match state.review.clone() {
            Some(review) => review,
            None => {
                // Resumed past stage 6 without a saved review: review now.
                let diff = self
                    .git
                    .diff_against(&worktree.path, &worktree.base_branch)?;
                let changed_files = self.git.changed_files(&worktree.path)?;
                reviewer
                    .review(
                        1,
                        &state.task.title,
                        &diff,
                        &changed_files,
                        &worktree.path,
                        cancel,
                    )
                    .await?
            }
        };
        let initial_tests = state.tests.clone().unwrap_or_else(TestResult::no_tests);

        let cycle = ReviewCycle {
            reviewer: &reviewer,
            refactor: &refactor,
            git: &self.git,
            events: &self.events,
            pinner: &pinner,
            max_iterations: self.config.max_iterations,
            min_confidence: self.config.review.min_verification_confidence,
        };

        let outcome = match cycle
            .run(
                &state.task,
                &worktree.path,
                &worktree.base_branch,
                initial_review,
                &initial_tests,
                cancel,
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                self.fail_stage(
                    cp,
                    state,
                    PipelineStep::Review,
                    &format!("review-loop-{}", state.task.id),
                    "review-loop",
                    &err,
                );
                return Err(err.context("review-refactor loop failed"));
            }
        };

        cp.iteration = outcome.iterations;
        state.review = Some(outcome.final_review.clone());
        state.tests = state.tests.clone().map(|mut t| {
            t.passed = outcome.tests_passed;
            t
        });
        cp.complete_step(
            PipelineStep::Review,
            Some(serde_json::json!({
                "passed": outcome.passed,
                "iterations": outcome.iterations,
                "issues_total": outcome.stats.total,
                "issues_addressed": outcome.stats.addressed,
                "persistent": outcome.stats.persistent,
            })),
        );
        self.persist(cp, state)?;
        self.record_git(git_store, cp, Transition::Complete, PipelineStep::Review);

        if !outcome.passed {
            return Ok(Some(WorkResult::max_iterations(
                outcome.iterations,
                outcome.tests_passed,
            )));
        }
        Ok(None)
    }

    async fn commit_push_and_pr(
        &self,
        cp: &mut Checkpoint,
        state: &RunState,
        git_store: &GitCheckpointStore,
        worktree: &WorktreeInfo,
    ) -> Result<String> {
        let task = &state.task;
        let commit_message = format!("{}: {}", task.id, task.title);

        // Stage 8: commit and push.
        let commit_id = format!("commit-{}", task.id);
        self.events.emit(&PipelineEvent::started(
            &commit_id,
            "commit",
            "Commit and push the change",
        ));

        cp.begin_step(PipelineStep::Commit);
        self.persist(cp, state)?;

        let commit_result = (|| -> Result<()> {
            // The checkpoint state file has served its purpose.
            let state_file = worktree.path.join(crate::checkpoint::STATE_FILE_NAME);
            if state_file.exists() {
                let _ = std::fs::remove_file(&state_file);
            }
            self.git.stage_all(&worktree.path)?;
            git_store.squash(&commit_message)?;
            self.git.commit_all(&worktree.path, &commit_message)?;
            Ok(())
        })();
        if let Err(err) = commit_result {
            self.fail_stage(cp, state, PipelineStep::Commit, &commit_id, "commit", &err);
            return Err(err.context("failed to commit the change"));
        }
        cp.complete_step(PipelineStep::Commit, None);
        self.persist(cp, state)?;

        cp.begin_step(PipelineStep::Push);
        self.persist(cp, state)?;
        if let Err(err) = self.git.push(&worktree.path, &worktree.branch) {
            self.fail_stage(cp, state, PipelineStep::Push, &commit_id, "commit", &err);
            return Err(err.context("failed to push the branch"));
        }
        cp.complete_step(PipelineStep::Push, None);
        self.persist(cp, state)?;
        self.events
            .emit(&PipelineEvent::completed(&commit_id, "commit", true));

        // Stage 9: pull request.
        let pr_id = format!("pr-{}", task.id);
        self.events
            .emit(&PipelineEvent::started(&pr_id, "pr", "Open the pull request"));
        cp.begin_step(PipelineStep::CreatePr);
        self.persist(cp, state)?;

        let body = pr_body(state);
        match self
            .pr
            .create(&worktree.path, &task.title, &body, &worktree.base_branch)
            .await
        {
            Ok(url) => {
                cp.complete_step(
                    PipelineStep::CreatePr,
                    Some(serde_json::json!({ "url": url })),
                );
                self.persist(cp, state)?;
                self.events.emit(&PipelineEvent::completed(&pr_id, "pr", true));
                Ok(url)
            }
            Err(err) => {
                self.fail_stage(cp, state, PipelineStep::CreatePr, &pr_id, "pr", &err);
                Err(err.context("pr creation failed"))
            }
        }
    }

    // ---- helpers ---------------------------------------------------------

    fn find_resumable(&self, input: &TaskInput) -> Result<Option<(Checkpoint, RunState)>> {
        let mut candidates = self.store.list()?;
        candidates.retain(|c| c.is_incomplete() && c.can_resume());
        if let TaskInput::Ticket(identifier) = input {
            candidates.retain(|c| &c.task_id == identifier);
        }
        candidates.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        let Some(cp) = candidates.into_iter().next() else {
            return Ok(None);
        };
        let state = cp
            .load_state()
            .context("resumable checkpoint has no saved state")?;
        let state: RunState =
            serde_json::from_value(state.clone()).context("invalid checkpoint state")?;
        Ok(Some((cp, state)))
    }

    fn persist(&self, cp: &mut Checkpoint, state: &RunState) -> Result<()> {
        cp.save_state(serde_json::to_value(state).context("failed to serialize run state")?);
        self.store.save(cp)
    }

    /// Record a step transition in the git-backed store; the JSON store is
    /// authoritative, so git failures only warn.
    fn record_git(
        &self,
        git_store: &GitCheckpointStore,
        cp: &Checkpoint,
        transition: Transition,
        step: PipelineStep,
    ) {
        if let Err(err) = git_store.record(cp, transition, step) {
            tracing::warn!("Failed to record git checkpoint for {}: {:#}", step, err);
        }
    }

    fn fail_stage(
        &self,
        cp: &mut Checkpoint,
        state: &RunState,
        step: PipelineStep,
        agent_id: &str,
        name: &str,
        err: &anyhow::Error,
    ) {
        cp.fail_step(step, &format!("{:#}", err));
        if let Err(save_err) = self.persist(cp, state) {
            tracing::warn!("Failed to persist checkpoint after failure: {:#}", save_err);
        }
        self.events
            .emit(&PipelineEvent::completed(agent_id, name, false));
    }

    fn ensure_not_cancelled(&self, cancel: &CancelSignal) -> Result<()> {
        if is_cancelled(cancel) {
            return Err(anyhow::Error::new(AgentError::Cancelled));
        }
        Ok(())
    }
}

fn step_index(step: PipelineStep) -> usize {
    STEP_ORDER
        .iter()
        .position(|s| *s == step)
        .unwrap_or(STEP_ORDER.len())
}

fn pr_body(state: &RunState) -> String {
    let task = &state.task;
    let mut body = task.description.clone();
    if let Some(review) = &state.review {
        body.push_str(&format!(
            "\n\n---\nReview score: {} - {}\n",
            review.score, review.summary
        ));
    }
    if let Some(tests) = &state.tests {
        if let Some(framework) = &tests.framework {
            body.push_str(&format!(
                "Tests ({}): {}\n",
                framework,
                if tests.passed { "passing" } else { "failing" }
            ));
        }
    }
    body
}
