//! `dirsync run`: the long-running agent.
//!
//! The scheduler runs on its own task. When stdin is a terminal the console
//! reads commands and answers trust prompts; otherwise every trust question
//! is rejected and the agent runs until interrupted.

use crate::bootstrap::App;
use crate::console::{
    parse_console_command, ConsoleCommand, ConsoleInput, ConsolePrompt, ConsoleRenderer,
    CONSOLE_HELP,
};
use dsync_sync::sync::{
    RejectingPrompt, SyncEvent, SyncOrchestrator, SyncResult, TrustPrompt,
};
use log::{error, info, warn};
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub async fn run(app: &App, executor_override: Option<&Path>) -> SyncResult<()> {
    let executor = Arc::new(app.resolve_executor(executor_override)?);
    info!("Executor: {}", executor.program().display());

    let console = std::io::stdin().is_terminal().then(ConsoleInput::stdin);
    let prompt: Arc<dyn TrustPrompt> = match &console {
        Some((input, _)) => Arc::new(ConsolePrompt::new(input.clone())),
        None => {
            info!("stdin is not a terminal; unknown or changed host keys will be rejected");
            Arc::new(RejectingPrompt)
        }
    };

    let orchestrator = app.orchestrator(executor, prompt, app.orchestrator_config());
    let printer = spawn_output_printer(orchestrator.subscribe(), app.max_console_lines());
    spawn_interrupt_handler(orchestrator.clone());

    let mut scheduler = orchestrator.spawn_scheduler();
    let mut scheduler_done = false;

    if let Some((_, mut commands)) = console {
        println!("{}", CONSOLE_HELP);
        loop {
            tokio::select! {
                line = commands.recv() => match line {
                    Some(line) => {
                        if handle_line(&orchestrator, &line) {
                            orchestrator.quit();
                            break;
                        }
                    }
                    None => {
                        info!("Console input closed; running until interrupted");
                        break;
                    }
                },
                res = &mut scheduler => {
                    scheduler_done = true;
                    if let Err(e) = res {
                        error!("Scheduler task failed: {}", e);
                    }
                    break;
                }
            }
        }
    }

    if !scheduler_done {
        if let Err(e) = scheduler.await {
            error!("Scheduler task failed: {}", e);
        }
    }
    printer.abort();
    info!("Goodbye");
    Ok(())
}

fn spawn_interrupt_handler(orchestrator: Arc<SyncOrchestrator>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            orchestrator.quit();
        }
    });
}

/// Render executor output; everything else already reached the log.
fn spawn_output_printer(mut rx: broadcast::Receiver<SyncEvent>, max_lines: u32) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut renderer = ConsoleRenderer::new(max_lines);
        loop {
            match rx.recv().await {
                Ok(SyncEvent::Output { line }) => {
                    let mut out = std::io::stdout().lock();
                    if let Err(e) = renderer.render(&mut out, &line) {
                        warn!("Could not write executor output: {}", e);
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Console fell behind; {} event(s) dropped", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Handle one console line. Returns `true` when the operator asked to quit.
fn handle_line(orchestrator: &Arc<SyncOrchestrator>, line: &str) -> bool {
    if line.trim().is_empty() {
        return false;
    }
    let Some(command) = parse_console_command(line) else {
        println!("Unknown command \"{}\". {}", line.trim(), CONSOLE_HELP);
        return false;
    };
    match command {
        ConsoleCommand::Sync => {
            orchestrator.spawn_force_sync();
        }
        ConsoleCommand::Pause => orchestrator.set_paused(true),
        ConsoleCommand::Resume => orchestrator.set_paused(false),
        ConsoleCommand::Status => {
            let status = orchestrator.status();
            let last = status
                .last_sync
                .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
                .map(|dt| dt.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "never".to_string());
            println!(
                "state: {} | paused: {} | targets: {} | interval: {} min | last sync: {}",
                status.state, status.paused, status.target_count, status.interval_minutes, last
            );
        }
        ConsoleCommand::List => {
            for target in orchestrator.targets().list() {
                println!(
                    "{}  ->  {}@{}:{}",
                    target.identity_key(),
                    target.username,
                    target.host,
                    target.port
                );
            }
        }
        ConsoleCommand::Quit => return true,
        ConsoleCommand::Help => println!("{}", CONSOLE_HELP),
    }
    false
}
