//! The four default pipeline stages.

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use tracing::{info, warn};

use atelier_providers::{AgentRequest, AgentResponse};
use atelier_tools::{build_delegation_prompt, SpecialistProfile};
use atelier_types::{
    AgentEvent, AgentRole, CompletionReport, Message, MessageRole, Task, TaskStatus, Verdict,
};

use crate::parser::parse_tasks;
use crate::pipeline::{OrchestratorResult, PipelineContext, PipelinePhase, Stage, StageOutcome};
use crate::{OrchestrationError, OrchestrationResult};

/// Characters of agent output kept in synthesized report summaries.
const SYNTH_SUMMARY_LIMIT: usize = 200;

//─────────────────────────────
//  Planning
//─────────────────────────────

/// Invokes the Coordinator on the user request and stores the plan text.
pub struct PlanningStage;

#[async_trait]
impl Stage for PlanningStage {
    fn name(&self) -> &'static str {
        "Planning"
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> OrchestrationResult<StageOutcome> {
        ctx.emit_phase(PipelinePhase::Planning);

        let coordinator_id = match &ctx.coordinator_id {
            Some(id) => id.clone(),
            None => {
                let created = ctx
                    .tools
                    .create_agent("coordinator", AgentRole::Coordinator, &ctx.workspace_id, None, None)
                    .await;
                let id = tool_data_str(&created, "agentId")?;
                ctx.coordinator_id = Some(id.clone());
                id
            }
        };

        let profile = SpecialistProfile::for_role(AgentRole::Coordinator);
        let prompt = format!(
            "{}\n---\n\n## User Request\n{}\n",
            profile.system_prompt, ctx.request
        );

        if let Ok(message) = Message::new(&coordinator_id, MessageRole::User, &ctx.request) {
            let _ = ctx.tools.conversations().append(&message).await;
        }

        let request = AgentRequest {
            agent_id: coordinator_id.clone(),
            role: AgentRole::Coordinator,
            workspace_id: ctx.workspace_id.clone(),
            prompt,
            cwd: ctx.cwd.clone(),
            cancel: ctx.cancel.child_token(),
        };
        let response = ctx.router.run_streaming(request, ctx.chunk_handler()).await?;

        if let Ok(message) = Message::new(&coordinator_id, MessageRole::Assistant, &response.text) {
            let _ = ctx.tools.conversations().append(&message).await;
        }

        ctx.plan_text = Some(response.text.clone());
        ctx.emit_phase(PipelinePhase::PlanReady {
            output: response.text,
        });
        Ok(StageOutcome::Continue)
    }
}

//─────────────────────────────
//  Task registration
//─────────────────────────────

/// Runs the parser over the plan and persists the tasks.
pub struct TaskRegistrationStage;

#[async_trait]
impl Stage for TaskRegistrationStage {
    fn name(&self) -> &'static str {
        "TaskRegistration"
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> OrchestrationResult<StageOutcome> {
        let plan = ctx.plan_text.clone().ok_or_else(|| {
            OrchestrationError::Precondition("task registration requires a plan".to_string())
        })?;

        let tasks = parse_tasks(&plan, &ctx.workspace_id);
        for task in &tasks {
            ctx.tools.tasks().save(task).await?;
        }

        ctx.emit_phase(PipelinePhase::TasksRegistered { count: tasks.len() });
        info!(count = tasks.len(), "tasks registered");

        if tasks.is_empty() {
            return Ok(StageOutcome::Done(OrchestratorResult::NoTasks { plan }));
        }
        Ok(StageOutcome::Continue)
    }
}

//─────────────────────────────
//  Crafter execution
//─────────────────────────────

/// Delegates every runnable task to an Implementor and runs it through the
/// provider, serially or with bounded parallelism.
pub struct CrafterExecutionStage;

impl CrafterExecutionStage {
    /// Tasks this wave should run: ready ones plus verifier rejects.
    async fn runnable_tasks(ctx: &PipelineContext) -> Vec<Task> {
        let mut tasks = ctx.tools.tasks().find_ready(&ctx.workspace_id).await;
        tasks.extend(
            ctx.tools
                .tasks()
                .list_by_status(TaskStatus::NeedsFix)
                .await
                .into_iter()
                .filter(|t| t.workspace_id == ctx.workspace_id),
        );
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tasks
    }
}

#[async_trait]
impl Stage for CrafterExecutionStage {
    fn name(&self) -> &'static str {
        "CrafterExecution"
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> OrchestrationResult<StageOutcome> {
        // Routing failures surface here, before any implementor starts.
        let provider = ctx.router.select_for_role(AgentRole::Implementor)?;
        let parallelism = provider.capabilities().max_concurrent_agents.max(1);

        let coordinator_id = ctx.coordinator_id.clone().ok_or_else(|| {
            OrchestrationError::Precondition("crafter execution requires a coordinator".to_string())
        })?;

        let tasks = Self::runnable_tasks(ctx).await;
        if tasks.is_empty() {
            info!("no runnable tasks this wave");
            return Ok(StageOutcome::Continue);
        }

        let ctx_ref: &PipelineContext = ctx;
        if ctx_ref.config.parallel_crafters {
            let outcomes: Vec<OrchestrationResult<()>> =
                futures::stream::iter(tasks.into_iter().map(|task| {
                    let coordinator_id = coordinator_id.clone();
                    async move { run_crafter(ctx_ref, &coordinator_id, task).await }
                }))
                .buffer_unordered(parallelism)
                .collect()
                .await;
            for outcome in outcomes {
                outcome?;
            }
        } else {
            for task in tasks {
                run_crafter(ctx_ref, &coordinator_id, task).await?;
            }
        }
        Ok(StageOutcome::Continue)
    }
}

/// Wake or create the task's Implementor, run it, and deliver its report.
async fn run_crafter(
    ctx: &PipelineContext,
    coordinator_id: &str,
    task: Task,
) -> OrchestrationResult<()> {
    let context_message = wave_context(ctx.wave, &task);
    let woken = ctx
        .tools
        .wake_or_create_task_agent(atelier_tools::WakeOrCreateParams {
            task_id: task.id.clone(),
            context_message,
            caller_agent_id: coordinator_id.to_string(),
            workspace_id: ctx.workspace_id.clone(),
            agent_name: None,
            model_tier: None,
        })
        .await;
    let agent_id = tool_data_str(&woken, "agentId")?;

    // A woken assignee keeps its InProgress task; a fresh one was already
    // delegated by the wake path. Rejected tasks go back in progress here.
    if let Some(mut stored) = ctx.tools.tasks().get(&task.id).await {
        if stored.status == TaskStatus::NeedsFix {
            stored.status = TaskStatus::InProgress;
            stored.updated_at = Utc::now();
            ctx.tools.tasks().save(&stored).await?;
            ctx.tools.bus().publish(&AgentEvent::TaskStatusChanged {
                task_id: stored.id.clone(),
                workspace_id: stored.workspace_id.clone(),
                from: TaskStatus::NeedsFix,
                to: TaskStatus::InProgress,
                timestamp: Utc::now(),
            });
        }
    }

    ctx.emit_phase(PipelinePhase::CrafterRunning {
        task_id: task.id.clone(),
    });

    let profile = SpecialistProfile::for_role(AgentRole::Implementor);
    let prompt = build_delegation_prompt(&profile, &agent_id, coordinator_id, &task);
    let request = AgentRequest {
        agent_id: agent_id.clone(),
        role: AgentRole::Implementor,
        workspace_id: ctx.workspace_id.clone(),
        prompt,
        cwd: ctx.cwd.clone(),
        cancel: ctx.cancel.child_token(),
    };
    let response = ctx.router.run_streaming(request, ctx.chunk_handler()).await?;

    let report = normalize_report(&agent_id, &task.id, &response);
    let delivered = ctx.tools.report_to_parent(report).await;
    if !delivered.success {
        warn!(
            task_id = %task.id,
            error = delivered.error.as_deref().unwrap_or("unknown"),
            "implementor report was not delivered"
        );
    }

    ctx.emit_phase(PipelinePhase::CrafterCompleted { task_id: task.id });
    Ok(())
}

/// First message an implementor sees for this wave.
fn wave_context(wave: u32, task: &Task) -> String {
    let mut context = format!("Wave {wave}: you are assigned task \"{}\".", task.title);
    if let Some(report) = &task.verification_report {
        context.push_str(&format!(
            "\nThe previous attempt was rejected: {report}\nAddress the feedback and report again."
        ));
    }
    context
}

/// Use the agent's own report when it produced one, otherwise synthesize a
/// successful report from its output. Ids are normalized either way.
fn normalize_report(agent_id: &str, task_id: &str, response: &AgentResponse) -> CompletionReport {
    match &response.report {
        Some(report) => {
            let mut report = report.clone();
            report.agent_id = agent_id.to_string();
            report.task_id = Some(task_id.to_string());
            report
        }
        None => CompletionReport {
            agent_id: agent_id.to_string(),
            task_id: Some(task_id.to_string()),
            summary: truncate(&response.text, SYNTH_SUMMARY_LIMIT),
            files_modified: None,
            verification_results: None,
            success: true,
        },
    }
}

//─────────────────────────────
//  Gate verification
//─────────────────────────────

/// Creates one Verifier for the wave, runs it, and either completes the
/// pipeline or loops it back to crafter execution.
pub struct GateVerificationStage;

#[async_trait]
impl Stage for GateVerificationStage {
    fn name(&self) -> &'static str {
        "GateVerification"
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> OrchestrationResult<StageOutcome> {
        let mut wave_tasks: Vec<Task> = ctx
            .tools
            .tasks()
            .list_by_status(TaskStatus::ReviewRequired)
            .await
            .into_iter()
            .filter(|t| t.workspace_id == ctx.workspace_id)
            .collect();
        wave_tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        if wave_tasks.is_empty() {
            warn!("no tasks reached review this wave");
            return Ok(StageOutcome::RepeatPipeline {
                from: Some("CrafterExecution"),
            });
        }

        ctx.emit_phase(PipelinePhase::VerificationStarting { wave: ctx.wave });

        let coordinator_id = ctx.coordinator_id.clone();
        let created = ctx
            .tools
            .create_agent(
                &format!("gate-wave-{}", ctx.wave),
                AgentRole::Verifier,
                &ctx.workspace_id,
                coordinator_id,
                None,
            )
            .await;
        let verifier_id = tool_data_str(&created, "agentId")?;

        let profile = SpecialistProfile::for_role(AgentRole::Verifier);
        let prompt = verification_prompt(profile.system_prompt, ctx.wave, &wave_tasks);
        let request = AgentRequest {
            agent_id: verifier_id.clone(),
            role: AgentRole::Verifier,
            workspace_id: ctx.workspace_id.clone(),
            prompt,
            cwd: ctx.cwd.clone(),
            cancel: ctx.cancel.child_token(),
        };
        let response = ctx.router.run_streaming(request, ctx.chunk_handler()).await?;

        ctx.emit_phase(PipelinePhase::VerificationCompleted {
            output: response.text.clone(),
        });

        let approved = response
            .report
            .as_ref()
            .map(|r| r.success)
            .unwrap_or_else(|| text_looks_approving(&response.text));
        let verdict_summary = response
            .report
            .as_ref()
            .map(|r| r.summary.clone())
            .unwrap_or_else(|| truncate(&response.text, SYNTH_SUMMARY_LIMIT));

        // The verifier itself completes and reports to the coordinator;
        // task transitions are applied per wave task below.
        let verifier_report = CompletionReport {
            agent_id: verifier_id.clone(),
            task_id: None,
            summary: verdict_summary.clone(),
            files_modified: None,
            verification_results: response
                .report
                .as_ref()
                .and_then(|r| r.verification_results.clone()),
            success: approved,
        };
        let delivered = ctx.tools.report_to_parent(verifier_report).await;
        if !delivered.success {
            warn!(
                error = delivered.error.as_deref().unwrap_or("unknown"),
                "verifier report was not delivered"
            );
        }

        let (status, verdict) = if approved {
            (TaskStatus::Completed, Verdict::Approved)
        } else {
            (TaskStatus::NeedsFix, Verdict::NotApproved)
        };
        for task in &wave_tasks {
            let mut task = task.clone();
            let previous = task.status;
            task.status = status;
            task.verification_verdict = Some(verdict);
            task.verification_report = Some(verdict_summary.clone());
            task.updated_at = Utc::now();
            ctx.tools.tasks().save(&task).await?;
            if previous != status {
                ctx.tools.bus().publish(&AgentEvent::TaskStatusChanged {
                    task_id: task.id.clone(),
                    workspace_id: task.workspace_id.clone(),
                    from: previous,
                    to: status,
                    timestamp: Utc::now(),
                });
            }
        }

        if approved {
            ctx.emit_phase(PipelinePhase::Completed);
            return Ok(StageOutcome::Done(OrchestratorResult::Success {
                summaries: ctx.task_summaries().await,
            }));
        }

        ctx.emit_phase(PipelinePhase::NeedsFix { wave: ctx.wave });
        Ok(StageOutcome::RepeatPipeline {
            from: Some("CrafterExecution"),
        })
    }
}

/// Render the verifier's wave briefing.
fn verification_prompt(system_prompt: &str, wave: u32, tasks: &[Task]) -> String {
    let mut prompt = format!("{system_prompt}\n---\n\n## Wave {wave} under verification\n");
    for task in tasks {
        prompt.push_str(&format!("\n# Task: {} ({})\n", task.title, task.id));
        prompt.push_str(&format!("## Objective\n{}\n", task.objective));
        if !task.acceptance_criteria.is_empty() {
            prompt.push_str("## Acceptance Criteria\n");
            for criterion in &task.acceptance_criteria {
                prompt.push_str(&format!("- {criterion}\n"));
            }
        }
        if !task.verification_commands.is_empty() {
            prompt.push_str("## Verification\n");
            for command in &task.verification_commands {
                prompt.push_str(&format!("- `{command}`\n"));
            }
        }
        if let Some(summary) = &task.completion_summary {
            prompt.push_str(&format!("## Implementor Summary\n{summary}\n"));
        }
    }
    prompt
}

/// Fallback verdict parsing for verifiers that do not submit a report.
fn text_looks_approving(text: &str) -> bool {
    let upper = text.to_uppercase();
    upper.contains("APPROVED") && !upper.contains("NOT APPROVED") && !upper.contains("REJECTED")
}

/// Extract a string field from a successful tool result.
fn tool_data_str(
    result: &atelier_types::ToolResult,
    field: &str,
) -> OrchestrationResult<String> {
    if !result.success {
        return Err(OrchestrationError::Tool(
            result
                .error
                .clone()
                .unwrap_or_else(|| "tool call failed".to_string()),
        ));
    }
    result
        .data
        .as_ref()
        .and_then(|d| d.get(field))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| OrchestrationError::Tool(format!("tool result missing field: {field}")))
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        text.chars().take(limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_text_fallback() {
        assert!(text_looks_approving("All criteria hold. APPROVED."));
        assert!(!text_looks_approving("NOT APPROVED: missing regex"));
        assert!(!text_looks_approving("REJECTED, see notes"));
        assert!(!text_looks_approving("looks fine I guess"));
    }

    #[test]
    fn wave_context_carries_feedback() {
        let mut task = Task::new("T", "obj", "ws").unwrap();
        assert!(!wave_context(1, &task).contains("rejected"));
        task.verification_report = Some("Missing email regex".to_string());
        let context = wave_context(2, &task);
        assert!(context.contains("Missing email regex"));
        assert!(context.starts_with("Wave 2"));
    }

    #[test]
    fn normalize_report_overrides_ids() {
        let response = AgentResponse {
            text: "did the thing".to_string(),
            report: Some(CompletionReport {
                agent_id: "wrong".to_string(),
                task_id: None,
                summary: "done".to_string(),
                files_modified: None,
                verification_results: None,
                success: true,
            }),
            stop_reason: None,
        };
        let report = normalize_report("agent-1", "task-1", &response);
        assert_eq!(report.agent_id, "agent-1");
        assert_eq!(report.task_id.as_deref(), Some("task-1"));

        let bare = AgentResponse {
            text: "x".repeat(500),
            report: None,
            stop_reason: None,
        };
        let synthesized = normalize_report("agent-1", "task-1", &bare);
        assert!(synthesized.success);
        assert_eq!(synthesized.summary.chars().count(), SYNTH_SUMMARY_LIMIT);
    }
}
