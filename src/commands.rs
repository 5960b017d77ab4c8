//! One-shot subcommands. Each opens the data directory, does one thing and
//! exits.

use crate::bootstrap::App;
use crate::cli::AddArgs;
use crate::console::{ConsoleInput, ConsolePrompt, ConsoleRenderer};
use dsync_sync::sync::keys::{clamp_interval_minutes, SYNC_INTERVAL_MINUTES};
use dsync_sync::sync::{
    RejectingPrompt, SyncError, SyncEvent, SyncOrchestrator, SyncResult, SyncTarget,
    TargetOutcome, TrustPrompt,
};
use log::{info, warn};
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;

fn prompt_for_terminal() -> Arc<dyn TrustPrompt> {
    if std::io::stdin().is_terminal() {
        let (input, _commands) = ConsoleInput::stdin();
        Arc::new(ConsolePrompt::new(input))
    } else {
        Arc::new(RejectingPrompt)
    }
}

/// Build an orchestrator for a one-shot run: no follow-up cycle after adding.
fn one_shot(
    app: &App,
    executor_override: Option<&Path>,
    prompt: Arc<dyn TrustPrompt>,
) -> SyncResult<Arc<SyncOrchestrator>> {
    let executor = Arc::new(app.resolve_executor(executor_override)?);
    let mut config = app.orchestrator_config();
    config.follow_up_delay = None;
    Ok(app.orchestrator(executor, prompt, config))
}

pub fn target_from_args(args: AddArgs) -> SyncTarget {
    let mut target = SyncTarget::new(args.local, args.remote, args.host, args.username)
        .with_port(args.port)
        .with_password(args.password);
    if !args.ssh_key.trim().is_empty() {
        target = target.with_ssh_key(args.ssh_key, args.ssh_key_passphrase);
    }
    target
}

pub async fn add(app: &App, executor_override: Option<&Path>, args: AddArgs) -> SyncResult<()> {
    let orchestrator = one_shot(app, executor_override, prompt_for_terminal())?;
    let target = target_from_args(args);
    let key = target.identity_key();
    orchestrator.onboard(target).await?;
    println!("Added {}", key);
    Ok(())
}

pub fn remove(app: &App, key: &str) -> SyncResult<()> {
    if app.targets.remove(key)? {
        println!("Removed {}", key);
        Ok(())
    } else {
        Err(SyncError::not_found(format!("No synchronized directory \"{}\"", key)))
    }
}

pub fn list(app: &App) {
    let targets = app.targets.list();
    if targets.is_empty() {
        println!("No synchronized directories configured.");
        return;
    }
    for target in targets {
        println!(
            "{}  ->  {}@{}:{}{}",
            target.identity_key(),
            target.username,
            target.host,
            target.port,
            if target.ssh_key_path.is_empty() { "" } else { " (key)" }
        );
    }
}

pub fn hosts(app: &App) {
    let entries = app.known_hosts.entries();
    if entries.is_empty() {
        println!("No trusted hosts.");
        return;
    }
    for (endpoint, fingerprint) in entries {
        println!("{}  {}", endpoint, fingerprint);
    }
}

pub fn forget_host(app: &App, endpoint: &str) -> SyncResult<()> {
    if !app.known_hosts.forget(endpoint) {
        return Err(SyncError::not_found(format!("No trusted fingerprint for \"{}\"", endpoint)));
    }
    app.known_hosts.save()?;
    println!("Forgot {}", endpoint);
    Ok(())
}

/// Print a host's current fingerprint. Nothing is stored.
pub async fn scan(
    app: &App,
    executor_override: Option<&Path>,
    host: &str,
    port: u16,
) -> SyncResult<()> {
    let orchestrator = one_shot(app, executor_override, Arc::new(RejectingPrompt))?;
    let fingerprint = orchestrator
        .scanner()
        .scan(host, port)
        .await
        .ok_or_else(|| {
            SyncError::scan_failed(format!("Could not obtain the fingerprint of {}:{}", host, port))
        })?;
    println!("{}", fingerprint);
    Ok(())
}

pub async fn sync_once(app: &App, executor_override: Option<&Path>) -> SyncResult<()> {
    let orchestrator = one_shot(app, executor_override, prompt_for_terminal())?;
    let printer = print_output(orchestrator.subscribe(), app.max_console_lines());

    let interrupt = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                orchestrator.quit();
            }
        })
    };

    let report = orchestrator.force_sync().await;
    interrupt.abort();
    let _ = interrupt.await;
    drop(orchestrator);
    let _ = printer.await;

    for target in &report.targets {
        match &target.outcome {
            TargetOutcome::Synced => info!("{}: synced", target.key),
            other => warn!("{}: {:?}", target.key, other),
        }
    }
    if report.cancelled {
        return Err(SyncError::cancelled("Synchronization interrupted"));
    }
    let failed = report.failed_count();
    if failed > 0 {
        return Err(SyncError::executor_failed(format!(
            "{} of {} synchronized directories failed",
            failed,
            report.targets.len()
        )));
    }
    println!("Synchronized {} directories", report.synced_count());
    Ok(())
}

/// Drains executor output until the orchestrator is dropped.
fn print_output(
    mut rx: broadcast::Receiver<SyncEvent>,
    max_lines: u32,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut renderer = ConsoleRenderer::new(max_lines);
        loop {
            match rx.recv().await {
                Ok(SyncEvent::Output { line }) => {
                    let _ = renderer.render(&mut std::io::stdout().lock(), &line);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

pub fn interval(app: &App, minutes: i64) -> SyncResult<()> {
    let applied = clamp_interval_minutes(minutes);
    app.prefs.set(SYNC_INTERVAL_MINUTES, applied)?;
    app.prefs.save()?;
    if i64::from(applied) != minutes {
        println!("Interval {} is out of range; using {} minute(s)", minutes, applied);
    } else {
        println!("Interval set to {} minute(s)", applied);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> AddArgs {
        AddArgs {
            local: "/data/photos".into(),
            remote: "/srv/photos".into(),
            host: "nas.local".into(),
            port: 2222,
            username: "me".into(),
            password: "pw".into(),
            ssh_key: String::new(),
            ssh_key_passphrase: "ignored".into(),
        }
    }

    #[test]
    fn target_from_password_args() {
        let t = target_from_args(args());
        assert_eq!(t.identity_key(), "/data/photos:/srv/photos");
        assert_eq!(t.port, 2222);
        assert_eq!(t.password, "pw");
        assert!(t.ssh_key_passphrase.is_empty());
    }

    #[test]
    fn target_from_key_args() {
        let mut a = args();
        a.ssh_key = "/home/me/.ssh/id_ed25519".into();
        let t = target_from_args(a);
        assert_eq!(t.ssh_key_path, "/home/me/.ssh/id_ed25519");
        assert_eq!(t.ssh_key_passphrase, "ignored");
    }
}
