//! Extraction of structured tasks from the Coordinator's free-form output.
//!
//! Tasks are carried in fenced blocks:
//!
//! ```text
//! @@@task
//! # Add login form
//!
//! ## Objective
//! Build the login form.
//!
//! ## Acceptance Criteria
//! - Form validates email
//!
//! ## Verification
//! - cargo test login
//! @@@
//! ```
//!
//! A block opens on a line of up to six `#` characters, an optional space,
//! then `@@@task` or `@@@tasks`, and closes on a line of exactly `@@@`.
//! Triple-backtick fences inside a block are tracked so code samples can
//! never contribute titles or section headers. A block containing several
//! top-level `# ` titles is split into one task per title. Section headers
//! are recognized bilingually.

use tracing::debug;

use atelier_types::Task;

/// Which section of a task sub-block is being collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Objective,
    Scope,
    Acceptance,
    Verification,
    Ignored,
}

/// Parse the Coordinator output into tasks bound to `workspace_id`.
///
/// Invariants: the number of returned tasks equals the number of distinct
/// valid titles, code-fence contents never contribute structure, and empty
/// input yields an empty sequence.
pub fn parse_tasks(input: &str, workspace_id: &str) -> Vec<Task> {
    let mut tasks = Vec::new();
    for block in extract_blocks(input) {
        for sub_block in split_by_titles(&block) {
            if let Some(task) = parse_sub_block(&sub_block, workspace_id) {
                tasks.push(task);
            }
        }
    }
    debug!(count = tasks.len(), "tasks parsed from plan");
    tasks
}

/// Render tasks back into block text that parses to the same tasks.
pub fn render_tasks(tasks: &[Task]) -> String {
    let mut out = String::new();
    for task in tasks {
        out.push_str("@@@task\n");
        out.push_str(&format!("# {}\n\n", task.title));
        if !task.objective.is_empty() {
            out.push_str("## Objective\n");
            out.push_str(&task.objective);
            out.push_str("\n\n");
        }
        if let Some(scope) = &task.scope {
            out.push_str("## Scope\n");
            for item in scope.lines() {
                out.push_str(&format!("- {item}\n"));
            }
            out.push('\n');
        }
        if !task.acceptance_criteria.is_empty() {
            out.push_str("## Acceptance Criteria\n");
            for criterion in &task.acceptance_criteria {
                out.push_str(&format!("- {criterion}\n"));
            }
            out.push('\n');
        }
        if !task.verification_commands.is_empty() {
            out.push_str("## Verification\n");
            for command in &task.verification_commands {
                out.push_str(&format!("- {command}\n"));
            }
            out.push('\n');
        }
        out.push_str("@@@\n\n");
    }
    out
}

/// Does the trimmed line open a task block: up to six `#`, an optional
/// space, then `@@@task` or `@@@tasks`.
fn is_block_open(trimmed: &str) -> bool {
    let mut rest = trimmed;
    let mut hashes = 0;
    while let Some(stripped) = rest.strip_prefix('#') {
        rest = stripped;
        hashes += 1;
        if hashes > 6 {
            return false;
        }
    }
    let rest = rest.strip_prefix(' ').unwrap_or(rest);
    rest == "@@@task" || rest == "@@@tasks"
}

/// Pull raw task blocks out of the input. Content between blocks is
/// dropped; an unterminated trailing block is kept.
fn extract_blocks(input: &str) -> Vec<Vec<String>> {
    let mut blocks = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut in_task_block = false;
    let mut in_nested_code = false;

    for line in input.lines() {
        let trimmed = line.trim();
        if !in_task_block {
            if is_block_open(trimmed) {
                in_task_block = true;
                in_nested_code = false;
                current.clear();
            }
            continue;
        }
        if trimmed.starts_with("```") {
            in_nested_code = !in_nested_code;
            current.push(line.to_string());
            continue;
        }
        if !in_nested_code && trimmed == "@@@" {
            in_task_block = false;
            blocks.push(std::mem::take(&mut current));
            continue;
        }
        current.push(line.to_string());
    }
    if in_task_block && !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

/// Split a block on top-level `# ` titles outside code fences. Lines
/// before the first title form a titleless sub-block that is later
/// skipped.
fn split_by_titles(block: &[String]) -> Vec<Vec<String>> {
    let mut sub_blocks: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut in_code = false;

    for line in block {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            in_code = !in_code;
            current.push(line.clone());
            continue;
        }
        if !in_code && trimmed.starts_with("# ") && !current.is_empty() {
            sub_blocks.push(std::mem::take(&mut current));
        }
        current.push(line.clone());
    }
    if !current.is_empty() {
        sub_blocks.push(current);
    }
    sub_blocks
}

/// Map a `## ` header to its section, bilingually.
fn section_for(header: &str) -> Section {
    let normalized = header.trim().to_lowercase();
    match normalized.as_str() {
        "objective" | "goal" | "目标" | "目的" => Section::Objective,
        "scope" | "范围" | "作用域" => Section::Scope,
        "definition of done" | "acceptance criteria" | "done criteria" | "完成标准"
        | "验收标准" | "完成条件" => Section::Acceptance,
        "verification" | "verify" | "验证" | "验证方法" | "测试验证" => Section::Verification,
        _ => Section::Ignored,
    }
}

/// Parse one sub-block into a task. A sub-block without a valid title is
/// skipped.
fn parse_sub_block(lines: &[String], workspace_id: &str) -> Option<Task> {
    let mut title: Option<String> = None;
    let mut objective_lines: Vec<String> = Vec::new();
    let mut scope_items: Vec<String> = Vec::new();
    let mut acceptance: Vec<String> = Vec::new();
    let mut verification: Vec<String> = Vec::new();
    let mut section = Section::None;
    let mut in_code = false;

    for line in lines {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            in_code = !in_code;
            if section == Section::Objective {
                objective_lines.push(line.clone());
            }
            continue;
        }
        if in_code {
            // Fence contents are structure-inert; keep them only where
            // free text is collected.
            if section == Section::Objective {
                objective_lines.push(line.clone());
            }
            continue;
        }
        if title.is_none() {
            if let Some(text) = trimmed.strip_prefix("# ") {
                let text = text.trim();
                if !text.is_empty() {
                    title = Some(text.to_string());
                }
            }
            continue;
        }
        if let Some(header) = trimmed.strip_prefix("## ") {
            section = section_for(header);
            continue;
        }
        match section {
            Section::Objective => objective_lines.push(trimmed.to_string()),
            Section::Scope => push_list_item(&mut scope_items, trimmed),
            Section::Acceptance => push_list_item(&mut acceptance, trimmed),
            Section::Verification => push_list_item(&mut verification, trimmed),
            Section::None | Section::Ignored => {}
        }
    }

    let title = title?;
    let objective = objective_lines.join("\n").trim().to_string();
    let mut task = Task::new(title, objective, workspace_id).ok()?;
    if !scope_items.is_empty() {
        task.scope = Some(scope_items.join("\n"));
    }
    task.acceptance_criteria = acceptance;
    task.verification_commands = verification;
    Some(task)
}

/// Only lines whose first non-space character is `-` contribute to list
/// sections; the dash is stripped and the remainder trimmed.
fn push_list_item(items: &mut Vec<String>, trimmed: &str) {
    if let Some(item) = trimmed.strip_prefix('-') {
        let item = item.trim();
        if !item.is_empty() {
            items.push(item.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_no_tasks() {
        assert!(parse_tasks("", "ws").is_empty());
        assert!(parse_tasks("Just prose, no blocks.", "ws").is_empty());
    }

    #[test]
    fn single_block_with_all_sections() {
        let input = "\
Intro prose is dropped.

@@@task
# Add login form

## Objective
Build the login form.

## Scope
- src/login only

## Acceptance Criteria
- Form validates email
- Errors are shown inline

## Verification
- cargo test login
@@@

Trailing prose is dropped too.
";
        let tasks = parse_tasks(input, "ws-1");
        assert_eq!(tasks.len(), 1);
        let task = &tasks[0];
        assert_eq!(task.title, "Add login form");
        assert_eq!(task.objective, "Build the login form.");
        assert_eq!(task.scope.as_deref(), Some("src/login only"));
        assert_eq!(
            task.acceptance_criteria,
            vec!["Form validates email", "Errors are shown inline"]
        );
        assert_eq!(task.verification_commands, vec!["cargo test login"]);
        assert_eq!(task.workspace_id, "ws-1");
    }

    #[test]
    fn heading_prefixed_openers_are_recognized() {
        for opener in ["@@@task", "@@@tasks", "# @@@task", "###@@@tasks", "###### @@@task"] {
            let input = format!("{opener}\n# Titled\n## Objective\nDo it.\n@@@\n");
            assert_eq!(parse_tasks(&input, "ws").len(), 1, "opener: {opener}");
        }
        // Seven hashes is not an opener.
        let input = "####### @@@task\n# Titled\n@@@\n";
        assert!(parse_tasks(input, "ws").is_empty());
    }

    #[test]
    fn code_fences_hide_structure() {
        let input = "\
@@@task
# Real title

## Objective
Ship the sample below.
```
# not a title
## Objective
@@@
- not a list item
```

## Acceptance Criteria
- real criterion
@@@
";
        let tasks = parse_tasks(input, "ws");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Real title");
        assert_eq!(tasks[0].acceptance_criteria, vec!["real criterion"]);
        // The fenced sample is retained verbatim inside the objective.
        assert!(tasks[0].objective.contains("# not a title"));
    }

    #[test]
    fn multi_title_block_splits_into_tasks() {
        let input = "\
@@@task
# First task

## Objective
One.

# Second task

## Objective
Two.
@@@
";
        let tasks = parse_tasks(input, "ws");
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].title, "First task");
        assert_eq!(tasks[0].objective, "One.");
        assert_eq!(tasks[1].title, "Second task");
        assert_eq!(tasks[1].objective, "Two.");
    }

    #[test]
    fn titleless_block_is_skipped() {
        let input = "@@@task\n## Objective\nNo title here.\n@@@\n";
        assert!(parse_tasks(input, "ws").is_empty());
    }

    #[test]
    fn bilingual_headers() {
        let input = "\
@@@task
# 登录表单

## 目标
构建登录表单。

## 验收标准
- 邮箱校验通过

## 验证
- cargo test login
@@@
";
        let tasks = parse_tasks(input, "ws");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].objective, "构建登录表单。");
        assert_eq!(tasks[0].acceptance_criteria, vec!["邮箱校验通过"]);
        assert_eq!(tasks[0].verification_commands, vec!["cargo test login"]);
    }

    #[test]
    fn non_list_lines_in_list_sections_are_ignored() {
        let input = "\
@@@task
# T

## Acceptance Criteria
prose that is not an item
- the only item
@@@
";
        let tasks = parse_tasks(input, "ws");
        assert_eq!(tasks[0].acceptance_criteria, vec!["the only item"]);
    }

    #[test]
    fn unterminated_block_is_kept() {
        let input = "@@@task\n# Open ended\n## Objective\nStill counts.\n";
        let tasks = parse_tasks(input, "ws");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Open ended");
    }

    /// Projection used to compare parses regardless of ids and timestamps.
    fn projection(tasks: &[Task]) -> Vec<(String, String, Option<String>, Vec<String>, Vec<String>)> {
        tasks
            .iter()
            .map(|t| {
                (
                    t.title.clone(),
                    t.objective.clone(),
                    t.scope.clone(),
                    t.acceptance_criteria.clone(),
                    t.verification_commands.clone(),
                )
            })
            .collect()
    }

    #[test]
    fn parse_render_round_trip_is_stable() {
        let input = "\
@@@task
# Add login form

## Objective
Build the login form.

## Scope
- src/login only

## Acceptance Criteria
- Form validates email

## Verification
- cargo test login
@@@
";
        let first = parse_tasks(input, "ws");
        let second = parse_tasks(&render_tasks(&first), "ws");
        assert_eq!(projection(&first), projection(&second));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn item() -> impl Strategy<Value = String> {
            "[A-Za-z][A-Za-z0-9 ]{0,20}[A-Za-z0-9]".prop_map(|s| s.trim().to_string())
        }

        prop_compose! {
            fn arb_task()(
                title in item(),
                objective in item(),
                criteria in prop::collection::vec(item(), 0..4),
                commands in prop::collection::vec(item(), 0..3),
            ) -> Task {
                let mut task = Task::new(title, objective, "ws").unwrap();
                task.acceptance_criteria = criteria;
                task.verification_commands = commands;
                task
            }
        }

        proptest! {
            /// Rendering a parse and parsing it again reaches a fixed point.
            #[test]
            fn round_trip_idempotence(tasks in prop::collection::vec(arb_task(), 1..5)) {
                let text = render_tasks(&tasks);
                let parsed = parse_tasks(&text, "ws");
                prop_assert_eq!(parsed.len(), tasks.len());
                let reparsed = parse_tasks(&render_tasks(&parsed), "ws");
                prop_assert_eq!(projection(&parsed), projection(&reparsed));
            }

            /// Every parsed task keeps a non-empty title.
            #[test]
            fn titles_survive(tasks in prop::collection::vec(arb_task(), 1..5)) {
                let parsed = parse_tasks(&render_tasks(&tasks), "ws");
                for (parsed, original) in parsed.iter().zip(&tasks) {
                    prop_assert_eq!(&parsed.title, &original.title);
                }
            }
        }
    }
}
