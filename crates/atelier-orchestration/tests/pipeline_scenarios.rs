//! End-to-end pipeline scenarios driven by the scripted provider.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use atelier_orchestration::{
    CoordinationState, OrchestrationHandle, OrchestratorResult, PipelineConfig, PipelinePhase,
    SessionManager,
};
use atelier_providers::{
    ProviderCapabilities, ProviderRouter, ScriptedProvider, ScriptedTurn,
};
use atelier_types::{AgentEvent, AgentRole, CompletionReport, TaskStatus, Verdict};

const PLAN_WITH_ONE_TASK: &str = "\
Here is the plan.

@@@task
# Add login form

## Objective
Build the login form.

## Acceptance Criteria
- Form validates email

## Verification
- cargo test login
@@@
";

fn report(success: bool, summary: &str) -> CompletionReport {
    CompletionReport {
        agent_id: String::new(),
        task_id: None,
        summary: summary.to_string(),
        files_modified: None,
        verification_results: None,
        success,
    }
}

struct Scenario {
    provider: Arc<ScriptedProvider>,
    handle: Arc<OrchestrationHandle>,
    phases: Arc<Mutex<Vec<String>>>,
    task_transitions: Arc<Mutex<Vec<TaskStatus>>>,
}

fn scenario(provider: Arc<ScriptedProvider>, max_iterations: u32) -> Scenario {
    let mut router = ProviderRouter::new();
    router.register(Arc::clone(&provider) as Arc<dyn atelier_providers::AgentProvider>);

    let phases = Arc::new(Mutex::new(Vec::new()));
    let phase_sink = Arc::clone(&phases);

    let manager = SessionManager::with_ttl(Duration::from_secs(3600));
    let handle = manager.create_session(
        "session-1",
        "ws-1",
        Arc::new(router),
        PipelineConfig {
            max_iterations,
            parallel_crafters: true,
        },
        Some(Arc::new(move |phase: &PipelinePhase| {
            let label = serde_json::to_value(phase).unwrap()["phase"]
                .as_str()
                .unwrap()
                .to_string();
            phase_sink.lock().unwrap().push(label);
        })),
        None,
    );

    let task_transitions = Arc::new(Mutex::new(Vec::new()));
    let transition_sink = Arc::clone(&task_transitions);
    handle.bus.subscribe_direct(Arc::new(move |event: &AgentEvent| {
        if let AgentEvent::TaskStatusChanged { to, .. } = event {
            transition_sink.lock().unwrap().push(*to);
        }
    }));

    Scenario {
        provider,
        handle,
        phases,
        task_transitions,
    }
}

#[tokio::test]
async fn s1_single_task_happy_path() {
    let provider = Arc::new(ScriptedProvider::with_full_capabilities("scripted"));
    provider.push_turn(AgentRole::Coordinator, ScriptedTurn::text(PLAN_WITH_ONE_TASK));
    provider.push_turn(
        AgentRole::Implementor,
        ScriptedTurn::with_report("form built", report(true, "form built")),
    );
    provider.push_turn(
        AgentRole::Verifier,
        ScriptedTurn::with_report("APPROVED", report(true, "all criteria verified")),
    );

    let s = scenario(provider, 3);
    let result = s.handle.execute("Please add a login form", ".").await;

    match result {
        OrchestratorResult::Success { summaries } => {
            assert_eq!(summaries.len(), 1);
            assert_eq!(summaries[0].title, "Add login form");
            assert_eq!(summaries[0].status, TaskStatus::Completed);
            assert_eq!(summaries[0].verdict, Some(Verdict::Approved));
        }
        other => panic!("unexpected result: {other:?}"),
    }

    // One iteration: each role invoked exactly once.
    assert_eq!(s.provider.call_count(AgentRole::Coordinator), 1);
    assert_eq!(s.provider.call_count(AgentRole::Implementor), 1);
    assert_eq!(s.provider.call_count(AgentRole::Verifier), 1);

    let phases = s.phases.lock().unwrap();
    assert!(phases.contains(&"planning".to_string()));
    assert!(phases.contains(&"completed".to_string()));

    // The state machine observed the run end.
    assert_eq!(s.handle.machine.state(), Some(CoordinationState::Completed));
}

#[tokio::test]
async fn s2_rejected_then_approved() {
    let provider = Arc::new(ScriptedProvider::with_full_capabilities("scripted"));
    provider.push_turn(AgentRole::Coordinator, ScriptedTurn::text(PLAN_WITH_ONE_TASK));
    provider.push_turn(
        AgentRole::Implementor,
        ScriptedTurn::with_report("first attempt", report(true, "first attempt")),
    );
    provider.push_turn(
        AgentRole::Implementor,
        ScriptedTurn::with_report("added the regex", report(true, "added the regex")),
    );
    provider.push_turn(
        AgentRole::Verifier,
        ScriptedTurn::with_report("NOT APPROVED", report(false, "Missing email regex")),
    );
    provider.push_turn(
        AgentRole::Verifier,
        ScriptedTurn::with_report("APPROVED", report(true, "regex present")),
    );

    let s = scenario(provider, 3);
    let result = s.handle.execute("Please add a login form", ".").await;
    assert!(matches!(result, OrchestratorResult::Success { .. }));

    // Planning ran once; the verifier twice.
    assert_eq!(s.provider.call_count(AgentRole::Coordinator), 1);
    assert_eq!(s.provider.call_count(AgentRole::Implementor), 2);
    assert_eq!(s.provider.call_count(AgentRole::Verifier), 2);

    let transitions = s.task_transitions.lock().unwrap();
    assert_eq!(
        *transitions,
        vec![
            TaskStatus::InProgress,
            TaskStatus::ReviewRequired,
            TaskStatus::NeedsFix,
            TaskStatus::InProgress,
            TaskStatus::ReviewRequired,
            TaskStatus::Completed,
        ]
    );

    // The second implementor saw the verifier's feedback.
    let implementor_prompts: Vec<String> = s
        .provider
        .calls()
        .into_iter()
        .filter(|c| c.role == AgentRole::Implementor)
        .map(|c| c.prompt)
        .collect();
    assert_eq!(implementor_prompts.len(), 2);
}

#[tokio::test]
async fn s3_no_tasks() {
    let provider = Arc::new(ScriptedProvider::with_full_capabilities("scripted"));
    provider.push_turn(
        AgentRole::Coordinator,
        ScriptedTurn::text("Nothing to build; the feature already exists."),
    );

    let s = scenario(provider, 3);
    let result = s.handle.execute("Do we need a login form?", ".").await;

    match result {
        OrchestratorResult::NoTasks { plan } => {
            assert!(plan.contains("already exists"));
        }
        other => panic!("unexpected result: {other:?}"),
    }

    // Neither implementor nor verifier ever ran.
    assert_eq!(s.provider.call_count(AgentRole::Implementor), 0);
    assert_eq!(s.provider.call_count(AgentRole::Verifier), 0);
}

#[tokio::test]
async fn s4_max_iterations() {
    let provider = Arc::new(ScriptedProvider::with_full_capabilities("scripted"));
    provider.push_turn(AgentRole::Coordinator, ScriptedTurn::text(PLAN_WITH_ONE_TASK));
    for _ in 0..2 {
        provider.push_turn(
            AgentRole::Implementor,
            ScriptedTurn::with_report("attempt", report(true, "attempt")),
        );
        provider.push_turn(
            AgentRole::Verifier,
            ScriptedTurn::with_report("NOT APPROVED", report(false, "still wrong")),
        );
    }

    let s = scenario(provider, 2);
    let result = s.handle.execute("Please add a login form", ".").await;

    match result {
        OrchestratorResult::MaxWavesReached { waves, summaries } => {
            assert_eq!(waves, 2);
            assert_eq!(summaries.len(), 1);
            assert_eq!(summaries[0].status, TaskStatus::NeedsFix);
            assert_eq!(summaries[0].verdict, Some(Verdict::NotApproved));
        }
        other => panic!("unexpected result: {other:?}"),
    }

    assert_eq!(s.provider.call_count(AgentRole::Implementor), 2);
    assert_eq!(s.provider.call_count(AgentRole::Verifier), 2);

    let phases = s.phases.lock().unwrap();
    assert!(phases.contains(&"maxWavesReached".to_string()));
}

#[tokio::test]
async fn s5_routing_failure_for_implementor() {
    // The only provider lacks terminal support: planning succeeds, the
    // crafter stage cannot be routed.
    let provider = Arc::new(ScriptedProvider::new(ProviderCapabilities {
        name: "planner-only".to_string(),
        supports_streaming: true,
        supports_interrupt: true,
        supports_health_check: true,
        supports_file_editing: false,
        supports_terminal: false,
        supports_tool_calling: true,
        max_concurrent_agents: 4,
        priority: 0,
    }));
    provider.push_turn(AgentRole::Coordinator, ScriptedTurn::text(PLAN_WITH_ONE_TASK));

    let s = scenario(provider, 3);
    let result = s.handle.execute("Please add a login form", ".").await;

    match result {
        OrchestratorResult::Error { error, stage } => {
            assert_eq!(stage, "CrafterExecution");
            assert!(error.contains("needsTerminal"));
            assert!(error.contains("planner-only"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(s.provider.call_count(AgentRole::Implementor), 0);
}

#[tokio::test]
async fn parallel_group_of_tasks_all_complete() {
    let plan = "\
@@@task
# Task one

## Objective
One.

# Task two

## Objective
Two.
@@@
";
    let provider = Arc::new(ScriptedProvider::with_full_capabilities("scripted"));
    provider.push_turn(AgentRole::Coordinator, ScriptedTurn::text(plan));
    for _ in 0..2 {
        provider.push_turn(
            AgentRole::Implementor,
            ScriptedTurn::with_report("done", report(true, "done")),
        );
    }
    provider.push_turn(
        AgentRole::Verifier,
        ScriptedTurn::with_report("APPROVED", report(true, "both fine")),
    );

    let s = scenario(provider, 3);
    let result = s.handle.execute("Two independent tasks", ".").await;

    match result {
        OrchestratorResult::Success { summaries } => {
            assert_eq!(summaries.len(), 2);
            assert!(summaries.iter().all(|t| t.status == TaskStatus::Completed));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(s.provider.call_count(AgentRole::Implementor), 2);
    // One verifier per wave, not per task.
    assert_eq!(s.provider.call_count(AgentRole::Verifier), 1);
}
