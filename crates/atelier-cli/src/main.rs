#![forbid(unsafe_code)]

//! **atelier-cli** – Reference front-end for the Atelier engine.
//!
//! Reads requests from stdin, runs each through one orchestration session,
//! and streams phase markers and agent output to stdout. `quit` or `exit`
//! ends the loop. The process exits non-zero only when a request ended in
//! a fatal error result.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use atelier_orchestration::{
    OrchestratorResult, PipelineConfig, PipelinePhase, SessionManager,
};
use atelier_providers::{
    ProcessAgentProvider, ProcessProviderConfig, ProviderRouter, ScriptedProvider, StreamChunk,
};

//─────────────────────────────
//  CLI structure
//─────────────────────────────

#[derive(Parser)]
#[command(name = "atelier")]
#[command(about = "Atelier - coordinate planner, implementor, and verifier agents")]
#[command(version)]
struct Cli {
    /// Working directory handed to agents
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Executable of the external agent used for all roles
    #[arg(long, default_value = "opencode")]
    crafter: String,

    /// Workspace identifier shared by the session's agents and tasks
    #[arg(long, default_value = "default")]
    workspace: String,

    /// Iteration budget per request
    #[arg(long, default_value_t = 3)]
    max_waves: u32,

    /// Run implementors one at a time instead of concurrently
    #[arg(long)]
    serial: bool,

    /// Use the scripted offline provider instead of spawning agents
    #[arg(long)]
    offline: bool,

    /// Log filter, e.g. info or atelier_orchestration=debug
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Positional working directory (overrides --cwd)
    working_dir: Option<PathBuf>,
}

//─────────────────────────────
//  Main application
//─────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cwd = cli
        .working_dir
        .clone()
        .or_else(|| cli.cwd.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    let cwd = cwd.to_string_lossy().to_string();

    let mut router = ProviderRouter::new();
    if cli.offline {
        router.register(Arc::new(ScriptedProvider::with_full_capabilities("offline")));
    } else {
        router.register(Arc::new(ProcessAgentProvider::new(ProcessProviderConfig {
            name: cli.crafter.clone(),
            command: cli.crafter.clone(),
            args: vec!["--acp".to_string()],
            priority: 10,
            max_concurrent_agents: 4,
        })));
    }

    let session_id = format!("cli-{}", std::process::id());
    let handle = SessionManager::global().create_session(
        &session_id,
        &cli.workspace,
        Arc::new(router),
        PipelineConfig {
            max_iterations: cli.max_waves,
            parallel_crafters: !cli.serial,
        },
        Some(Arc::new(print_phase)),
        Some(Arc::new(print_chunk)),
    );
    info!(session_id = %handle.session_id, workspace = %cli.workspace, "session ready");

    let stdin = std::io::stdin();
    let mut fatal = false;

    println!("atelier ready. Type a request, or quit to exit.");
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // stdin closed
        }
        let request = line.trim();
        if request.is_empty() {
            continue;
        }
        if matches!(request, "quit" | "exit") {
            break;
        }

        let result = handle.execute(request, &cwd).await;
        fatal = print_result(&result) || fatal;
    }

    SessionManager::global().delete_session(&session_id);
    if fatal {
        std::process::exit(1);
    }
    Ok(())
}

/// Print one phase marker.
fn print_phase(phase: &PipelinePhase) {
    match phase {
        PipelinePhase::Planning => println!("[phase] planning"),
        PipelinePhase::PlanReady { .. } => println!("[phase] plan ready"),
        PipelinePhase::TasksRegistered { count } => {
            println!("[phase] {count} task(s) registered")
        }
        PipelinePhase::CrafterRunning { task_id } => println!("[phase] crafter running: {task_id}"),
        PipelinePhase::CrafterCompleted { task_id } => {
            println!("[phase] crafter completed: {task_id}")
        }
        PipelinePhase::VerificationStarting { wave } => {
            println!("[phase] verifying wave {wave}")
        }
        PipelinePhase::VerificationCompleted { .. } => println!("[phase] verification done"),
        PipelinePhase::NeedsFix { wave } => println!("[phase] wave {wave} needs fixes"),
        PipelinePhase::MaxWavesReached { waves } => {
            println!("[phase] wave budget exhausted after {waves}")
        }
        PipelinePhase::Completed => println!("[phase] completed"),
        PipelinePhase::Failed { stage, message } => {
            println!("[phase] failed in {stage}: {message}")
        }
    }
}

/// Print one stream chunk.
fn print_chunk(chunk: StreamChunk) {
    match chunk {
        StreamChunk::Text { text } => {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        StreamChunk::Error {
            message,
            recoverable,
        } => {
            eprintln!("[agent error{}] {message}", if recoverable { ", recoverable" } else { "" })
        }
        StreamChunk::Completed { .. } => println!(),
        _ => {}
    }
}

/// Print a final result; returns true when it was fatal.
fn print_result(result: &OrchestratorResult) -> bool {
    match result {
        OrchestratorResult::Success { summaries } => {
            println!("result: success ({} task(s))", summaries.len());
            for task in summaries {
                println!(
                    "  - {} [{}]",
                    task.title,
                    serde_json::to_value(task.status)
                        .ok()
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_default()
                );
            }
            false
        }
        OrchestratorResult::NoTasks { plan } => {
            println!("result: no tasks\n{plan}");
            false
        }
        OrchestratorResult::MaxWavesReached { waves, summaries } => {
            println!(
                "result: wave budget exhausted after {waves} ({} task(s) outstanding)",
                summaries.len()
            );
            false
        }
        OrchestratorResult::Error { error, stage } => {
            eprintln!("result: error in {stage}: {error}");
            true
        }
    }
}
