//! Run orchestration.
//!
//! Sequences staging, invocation, and packaging with per-stage failure
//! isolation: a failed stage marks the run failed but never stops the later
//! obligations. Packaging runs exactly once on every path, and the run root
//! is removed on entry to `Done` whether the run succeeded or not. Nothing
//! propagates out of [`Orchestrator::execute`]; the caller gets a
//! [`RunReport`] either way.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::context::RunContext;
use crate::invoke::{Pipeline, PipelineParams};
use crate::package::{Packager, PackagingOutcome};
use crate::remote::RemoteStore;
use crate::stage::Stager;

/// The run's position in its lifecycle. The `failed` flag travels beside the
/// state and, once set, is never cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Staging,
    Invoking,
    Packaging,
    Done,
}

/// What happened to one stage attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed(String),
    Skipped,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, RunOutcome::Succeeded)
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Succeeded => write!(f, "succeeded"),
            RunOutcome::Failed(reason) => write!(f, "failed: {reason}"),
            RunOutcome::Skipped => write!(f, "skipped"),
        }
    }
}

/// Everything the platform needs to know about a finished run. This is the
/// run's status channel; the process exit code never carries it.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: String,
    pub failed: bool,
    pub staging: RunOutcome,
    pub invocation: RunOutcome,
    pub packaging: Vec<PackagingOutcome>,
    pub cleanup: RunOutcome,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
}

impl RunReport {
    pub fn summary(&self) -> String {
        let status = if self.failed { "FAILED" } else { "succeeded" };
        let mut lines = vec![format!(
            "run {} {} after {}s",
            self.run_id,
            status,
            (self.finished - self.started).num_seconds()
        )];
        lines.push(format!("  staging: {}", self.staging));
        lines.push(format!("  invocation: {}", self.invocation));
        for outcome in &self.packaging {
            lines.push(format!(
                "  archive {}: {}",
                outcome.category.stem(),
                outcome.status
            ));
        }
        lines.push(format!("  cleanup: {}", self.cleanup));
        lines.join("\n")
    }
}

/// Drives one run end to end against the injected collaborators.
pub struct Orchestrator {
    store: Arc<dyn RemoteStore>,
    pipeline: Arc<dyn Pipeline>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn RemoteStore>, pipeline: Arc<dyn Pipeline>) -> Self {
        Self { store, pipeline }
    }

    /// Execute the run. Every stage boundary catches its own errors and
    /// folds them into the report, so this never returns an error and the
    /// packaging and cleanup obligations hold on every path.
    pub async fn execute(&self, ctx: &RunContext) -> RunReport {
        let started = Utc::now();
        let mut state = RunState::Init;
        let mut failed = false;

        transition(&mut state, RunState::Staging);
        let stager = Stager::new(Arc::clone(&self.store));
        let staging = match stager.stage(ctx).await {
            Ok(()) => RunOutcome::Succeeded,
            Err(e) => {
                error!("staging failed: {e}");
                failed = true;
                RunOutcome::Failed(e.to_string())
            }
        };

        let invocation = if failed {
            info!("skipping pipeline invocation after staging failure");
            RunOutcome::Skipped
        } else {
            transition(&mut state, RunState::Invoking);
            let params = PipelineParams::from_context(ctx);
            match self.pipeline.run(&params).await {
                Ok(()) => RunOutcome::Succeeded,
                Err(e) => {
                    error!("pipeline invocation failed: {e}");
                    failed = true;
                    RunOutcome::Failed(e.to_string())
                }
            }
        };

        // Attempted exactly once, success or failure; its own per-category
        // errors are contained inside the outcome list.
        transition(&mut state, RunState::Packaging);
        let packaging = Packager::new().package_all(ctx, failed);

        transition(&mut state, RunState::Done);
        let cleanup = remove_run_root(ctx);

        RunReport {
            run_id: ctx.run_id.clone(),
            failed,
            staging,
            invocation,
            packaging,
            cleanup,
            started,
            finished: Utc::now(),
        }
    }
}

fn transition(state: &mut RunState, to: RunState) {
    debug!("run state {:?} -> {:?}", state, to);
    *state = to;
}

/// Terminal cleanup: the run root is a resource acquired at Init and must be
/// released at Done on every path. A cleanup failure is logged and recorded
/// but never changes the run's reported status.
fn remove_run_root(ctx: &RunContext) -> RunOutcome {
    let run_root = &ctx.paths.run_root;
    match std::fs::remove_dir_all(run_root) {
        Ok(()) => {
            info!("removed run root {}", run_root.display());
            RunOutcome::Succeeded
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => RunOutcome::Succeeded,
        Err(e) => {
            warn!("cleanup of {} failed: {e}", run_root.display());
            RunOutcome::Failed(e.to_string())
        }
    }
}
