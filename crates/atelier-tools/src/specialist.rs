//! Role profiles and the delegation prompt builder.
//!
//! Each role carries a system prompt and a short reminder that is repeated
//! at the end of every delegation so long conversations do not drift away
//! from the role contract.

use atelier_types::{AgentRole, ModelTier, Task};

/// Static per-role configuration: prompt, reminder, and default tier.
#[derive(Debug, Clone)]
pub struct SpecialistProfile {
    /// Role the profile describes.
    pub role: AgentRole,
    /// Display name used in spawned-agent names.
    pub name: &'static str,
    /// Default model tier for the role.
    pub default_tier: ModelTier,
    /// System prompt injected at the top of the delegation.
    pub system_prompt: &'static str,
    /// One-line reminder repeated at the bottom of the delegation.
    pub role_reminder: &'static str,
}

const COORDINATOR_SYSTEM_PROMPT: &str = r#"## Coordinator

You plan the work for a user request and delegate it. Break the request
into small, independently verifiable tasks and emit each as a fenced
@@@task block with a title, objective, acceptance criteria, and
verification commands.

## Hard rules
1. Plan only. Never edit files yourself.
2. Each task must be completable without the others in its wave.
3. Acceptance criteria must be checkable by a command or an observation.
"#;

const COORDINATOR_REMINDER: &str =
    "Plan and delegate only; never implement. Emit tasks as @@@task blocks.";

const IMPLEMENTOR_SYSTEM_PROMPT: &str = r#"## Implementor

Implement your assigned task, nothing more. Produce minimal, clean
changes.

## Hard rules
1. No scope creep: only what the task asks.
2. No refactors; report to your parent if one is needed.
3. Check `list_agents` / `read_agent_conversation` before touching files a
   sibling may own.
4. Do not delegate; message your parent coordinator if blocked.

## Completion
When done you MUST call `report_to_parent` with a summary (1-3 sentences),
success true/false, the files you modified, and your task id.
"#;

const IMPLEMENTOR_REMINDER: &str =
    "Stay within task scope. Call report_to_parent when complete.";

const VERIFIER_SYSTEM_PROMPT: &str = r#"## Verifier

Verify the implementation against the task's acceptance criteria. You are
evidence-driven: a criterion without concrete evidence is not verified.

## Hard rules
1. The acceptance criteria are the checklist; verify nothing else.
2. Run the verification commands and cite their output.
3. No partial approvals: success only when every criterion holds.

## Completion
Call `report_to_parent` with your verdict, the commands you ran and their
outcomes, success true/false, and the task id you verified.
"#;

const VERIFIER_REMINDER: &str =
    "Verify against acceptance criteria only. Report the verdict to your parent.";

impl SpecialistProfile {
    /// The profile for a role.
    pub fn for_role(role: AgentRole) -> Self {
        match role {
            AgentRole::Coordinator => Self {
                role,
                name: "coordinator",
                default_tier: ModelTier::Smart,
                system_prompt: COORDINATOR_SYSTEM_PROMPT,
                role_reminder: COORDINATOR_REMINDER,
            },
            AgentRole::Implementor => Self {
                role,
                name: "crafter",
                default_tier: ModelTier::Fast,
                system_prompt: IMPLEMENTOR_SYSTEM_PROMPT,
                role_reminder: IMPLEMENTOR_REMINDER,
            },
            AgentRole::Verifier => Self {
                role,
                name: "gate",
                default_tier: ModelTier::Smart,
                system_prompt: VERIFIER_SYSTEM_PROMPT,
                role_reminder: VERIFIER_REMINDER,
            },
        }
    }
}

/// Render the first `User` message of a delegated agent: role contract,
/// identity, and the task rendered with objective, scope, criteria, and
/// verification commands.
pub fn build_delegation_prompt(
    profile: &SpecialistProfile,
    agent_id: &str,
    parent_agent_id: &str,
    task: &Task,
) -> String {
    let mut prompt = format!("{}\n---\n\n", profile.system_prompt);
    prompt.push_str(&format!("**Your agent id:** {agent_id}\n"));
    prompt.push_str(&format!("**Your parent agent id:** {parent_agent_id}\n"));
    prompt.push_str(&format!("**Task id:** {}\n\n", task.id));
    prompt.push_str(&format!("# Task: {}\n\n", task.title));
    prompt.push_str(&format!("## Objective\n{}\n", task.objective));

    if let Some(scope) = &task.scope {
        prompt.push_str(&format!("\n## Scope\n{scope}\n"));
    }
    if !task.acceptance_criteria.is_empty() {
        prompt.push_str("\n## Acceptance Criteria\n");
        for criterion in &task.acceptance_criteria {
            prompt.push_str(&format!("- {criterion}\n"));
        }
    }
    if !task.verification_commands.is_empty() {
        prompt.push_str("\n## Verification\n");
        for command in &task.verification_commands {
            prompt.push_str(&format!("- `{command}`\n"));
        }
    }

    prompt.push_str(&format!("\n---\n**Reminder:** {}\n", profile.role_reminder));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_match_role_tiers() {
        assert_eq!(
            SpecialistProfile::for_role(AgentRole::Coordinator).default_tier,
            ModelTier::Smart
        );
        assert_eq!(
            SpecialistProfile::for_role(AgentRole::Implementor).default_tier,
            ModelTier::Fast
        );
        assert_eq!(
            SpecialistProfile::for_role(AgentRole::Verifier).default_tier,
            ModelTier::Smart
        );
    }

    #[test]
    fn delegation_prompt_renders_all_sections() {
        let mut task = Task::new("Add login form", "Build the login form", "ws").unwrap();
        task.scope = Some("src/login only".to_string());
        task.acceptance_criteria.push("Form validates email".to_string());
        task.verification_commands.push("cargo test login".to_string());

        let profile = SpecialistProfile::for_role(AgentRole::Implementor);
        let prompt = build_delegation_prompt(&profile, "agent-1", "parent-1", &task);

        assert!(prompt.contains("# Task: Add login form"));
        assert!(prompt.contains("## Objective\nBuild the login form"));
        assert!(prompt.contains("## Scope\nsrc/login only"));
        assert!(prompt.contains("- Form validates email"));
        assert!(prompt.contains("- `cargo test login`"));
        assert!(prompt.contains("**Your agent id:** agent-1"));
        assert!(prompt.contains(profile.role_reminder));
    }
}
