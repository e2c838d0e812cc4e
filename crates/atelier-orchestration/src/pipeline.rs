//! The staged execution engine.
//!
//! A pipeline is an ordered sequence of stages plus an iteration budget.
//! Stages return tagged outcomes instead of throwing across stage
//! boundaries; repeats skip every stage strictly before the repeat point,
//! which is how verifier dissent loops back to implementation without ever
//! re-running planning or registration.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use atelier_providers::{ChunkHandler, ProviderRouter};
use atelier_tools::CoordinationTools;
use atelier_types::{TaskStatus, Verdict};

use crate::{OrchestrationError, OrchestrationResult};

/// Pipeline tuning knobs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Iteration budget; each verifier rejection consumes one.
    pub max_iterations: u32,
    /// Run the wave's implementors concurrently, bounded by the selected
    /// provider's `max_concurrent_agents`.
    pub parallel_crafters: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            parallel_crafters: true,
        }
    }
}

/// Per-task summary included in pipeline results.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    /// Task id.
    pub task_id: String,
    /// Task title.
    pub title: String,
    /// Final stored status.
    pub status: TaskStatus,
    /// Verifier verdict, when one was recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    /// Implementor completion summary, when one was recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Final result of one pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum OrchestratorResult {
    /// Every wave task was approved.
    #[serde(rename_all = "camelCase")]
    Success {
        /// Per-task summaries.
        summaries: Vec<TaskSummary>,
    },
    /// The Coordinator produced no task blocks.
    #[serde(rename_all = "camelCase")]
    NoTasks {
        /// The plan text, preserved for the caller.
        plan: String,
    },
    /// The iteration budget ran out; summaries reflect the latest state.
    #[serde(rename_all = "camelCase")]
    MaxWavesReached {
        /// Waves executed.
        waves: u32,
        /// Per-task summaries.
        summaries: Vec<TaskSummary>,
    },
    /// A stage failed.
    #[serde(rename_all = "camelCase")]
    Error {
        /// Failure description.
        error: String,
        /// The responsible stage.
        stage: String,
    },
}

/// Phases emitted while the pipeline runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum PipelinePhase {
    /// The Coordinator is being invoked.
    Planning,
    /// Planning finished.
    #[serde(rename_all = "camelCase")]
    PlanReady {
        /// The Coordinator's output.
        output: String,
    },
    /// The parser persisted tasks.
    #[serde(rename_all = "camelCase")]
    TasksRegistered {
        /// How many tasks were stored.
        count: usize,
    },
    /// An Implementor started on a task.
    #[serde(rename_all = "camelCase")]
    CrafterRunning {
        /// The task being worked on.
        task_id: String,
    },
    /// An Implementor's stream ended.
    #[serde(rename_all = "camelCase")]
    CrafterCompleted {
        /// The finished task.
        task_id: String,
    },
    /// The Verifier is being invoked for a wave.
    #[serde(rename_all = "camelCase")]
    VerificationStarting {
        /// The wave under verification.
        wave: u32,
    },
    /// The Verifier's stream ended.
    #[serde(rename_all = "camelCase")]
    VerificationCompleted {
        /// The Verifier's output.
        output: String,
    },
    /// The wave was rejected.
    #[serde(rename_all = "camelCase")]
    NeedsFix {
        /// The rejected wave.
        wave: u32,
    },
    /// The iteration budget ran out.
    #[serde(rename_all = "camelCase")]
    MaxWavesReached {
        /// Waves executed.
        waves: u32,
    },
    /// Every task was approved.
    Completed,
    /// A stage failed.
    #[serde(rename_all = "camelCase")]
    Failed {
        /// The responsible stage.
        stage: String,
        /// Failure description.
        message: String,
    },
}

/// Observer of pipeline phases.
pub type PhaseHandler = Arc<dyn Fn(&PipelinePhase) + Send + Sync>;

/// Everything a stage needs: the request, the session's tools and router,
/// and the mutable cross-stage slots.
pub struct PipelineContext {
    /// The user request being satisfied.
    pub request: String,
    /// Owning workspace.
    pub workspace_id: String,
    /// Working directory handed to agents.
    pub cwd: String,
    /// Coordination tool surface over the session stores.
    pub tools: CoordinationTools,
    /// Provider router.
    pub router: Arc<ProviderRouter>,
    /// Tuning knobs.
    pub config: PipelineConfig,
    /// The Coordinator's output, set by the planning stage.
    pub plan_text: Option<String>,
    /// The Coordinator agent id, set by the planning stage.
    pub coordinator_id: Option<String>,
    /// Current iteration, starting at 1.
    pub wave: u32,
    /// Cancellation propagated into provider calls.
    pub cancel: CancellationToken,
    phase_handler: Option<PhaseHandler>,
    chunk_handler: Option<ChunkHandler>,
}

impl PipelineContext {
    /// Build a context for one execution.
    pub fn new(
        request: impl Into<String>,
        workspace_id: impl Into<String>,
        cwd: impl Into<String>,
        tools: CoordinationTools,
        router: Arc<ProviderRouter>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            request: request.into(),
            workspace_id: workspace_id.into(),
            cwd: cwd.into(),
            tools,
            router,
            config,
            plan_text: None,
            coordinator_id: None,
            wave: 0,
            cancel: CancellationToken::new(),
            phase_handler: None,
            chunk_handler: None,
        }
    }

    /// Attach a phase observer.
    pub fn with_phase_handler(mut self, handler: PhaseHandler) -> Self {
        self.phase_handler = Some(handler);
        self
    }

    /// Attach a stream-chunk observer fanned into every provider call.
    pub fn with_chunk_handler(mut self, handler: ChunkHandler) -> Self {
        self.chunk_handler = Some(handler);
        self
    }

    /// Emit a phase to the observer, if any.
    pub fn emit_phase(&self, phase: PipelinePhase) {
        if let Some(handler) = &self.phase_handler {
            handler(&phase);
        }
    }

    /// The chunk handler to pass into providers; a no-op when unset.
    pub fn chunk_handler(&self) -> ChunkHandler {
        self.chunk_handler
            .clone()
            .unwrap_or_else(|| Arc::new(|_| {}))
    }

    /// Summaries of every task in the workspace, for result payloads.
    pub async fn task_summaries(&self) -> Vec<TaskSummary> {
        let mut tasks = self.tools.tasks().list_by_workspace(&self.workspace_id).await;
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tasks
            .into_iter()
            .map(|t| TaskSummary {
                task_id: t.id,
                title: t.title,
                status: t.status,
                verdict: t.verification_verdict,
                summary: t.completion_summary,
            })
            .collect()
    }
}

/// What a stage tells the pipeline to do next.
#[derive(Debug)]
pub enum StageOutcome {
    /// Advance to the next stage.
    Continue,
    /// Terminate immediately with this result.
    SkipRemaining(OrchestratorResult),
    /// Start a new iteration, skipping every stage strictly before the
    /// named one (or before the issuing stage when unnamed).
    RepeatPipeline {
        /// Stage name to resume from.
        from: Option<&'static str>,
    },
    /// Terminate with this result.
    Done(OrchestratorResult),
    /// Terminate with an error attributed to the issuing stage.
    Failed(String),
}

/// One pipeline stage.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stable stage name, used for repeat targets and error attribution.
    fn name(&self) -> &'static str;

    /// Run the stage.
    async fn execute(&self, ctx: &mut PipelineContext) -> OrchestrationResult<StageOutcome>;
}

/// An ordered sequence of stages plus an iteration budget.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    /// Build a pipeline from stages.
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// The default four-stage pipeline.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(crate::stages::PlanningStage),
            Box::new(crate::stages::TaskRegistrationStage),
            Box::new(crate::stages::CrafterExecutionStage),
            Box::new(crate::stages::GateVerificationStage),
        ])
    }

    /// Execute until a stage terminates the pipeline or the iteration
    /// budget runs out. Every stage error is caught at the boundary and
    /// attributed to the responsible stage.
    #[instrument(skip_all, fields(workspace = %ctx.workspace_id))]
    pub async fn execute(&self, ctx: &mut PipelineContext) -> OrchestratorResult {
        let max_iterations = ctx.config.max_iterations.max(1);
        let mut resume_from: Option<String> = None;

        for iteration in 1..=max_iterations {
            ctx.wave = iteration;
            info!(iteration, "pipeline iteration starting");

            let mut skipping = resume_from.is_some();
            let mut repeat_requested = false;

            for stage in &self.stages {
                if skipping {
                    if resume_from.as_deref() == Some(stage.name()) {
                        skipping = false;
                    } else {
                        continue;
                    }
                }

                let outcome = match stage.execute(ctx).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(stage = stage.name(), error = %e, "stage failed");
                        ctx.emit_phase(PipelinePhase::Failed {
                            stage: stage.name().to_string(),
                            message: e.to_string(),
                        });
                        return OrchestratorResult::Error {
                            error: e.to_string(),
                            stage: stage.name().to_string(),
                        };
                    }
                };

                match outcome {
                    StageOutcome::Continue => {}
                    StageOutcome::SkipRemaining(result) | StageOutcome::Done(result) => {
                        return result;
                    }
                    StageOutcome::Failed(message) => {
                        ctx.emit_phase(PipelinePhase::Failed {
                            stage: stage.name().to_string(),
                            message: message.clone(),
                        });
                        return OrchestratorResult::Error {
                            error: message,
                            stage: stage.name().to_string(),
                        };
                    }
                    StageOutcome::RepeatPipeline { from } => {
                        resume_from = Some(from.unwrap_or(stage.name()).to_string());
                        repeat_requested = true;
                        break;
                    }
                }
            }

            if !repeat_requested {
                // A full pass without a terminal outcome or repeat request
                // completes the pipeline.
                return OrchestratorResult::Success {
                    summaries: ctx.task_summaries().await,
                };
            }
        }

        info!(waves = max_iterations, "iteration budget exhausted");
        ctx.emit_phase(PipelinePhase::MaxWavesReached {
            waves: max_iterations,
        });
        OrchestratorResult::MaxWavesReached {
            waves: max_iterations,
            summaries: ctx.task_summaries().await,
        }
    }
}
