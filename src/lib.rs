//! # dirsync
//!
//! Headless agent that keeps local directories mirrored against SFTP
//! endpoints. The transfer itself is done by an external executor binary;
//! this crate owns configuration, host trust and scheduling.
//!
//! | Module        | Purpose                                                   |
//! |---------------|-----------------------------------------------------------|
//! | `cli`         | clap command-line surface                                 |
//! | `bootstrap`   | Data directory, key material, preference defaults         |
//! | `console`     | Terminal trust prompt, output renderer, console commands  |
//! | `daemon`      | `run`: scheduler plus interactive console                 |
//! | `commands`    | One-shot subcommands                                      |

pub mod bootstrap;
pub mod cli;
pub mod commands;
pub mod console;
pub mod daemon;

use crate::bootstrap::{App, AppPaths, PASSPHRASE_ENV};
use crate::cli::{Cli, Command};
use dsync_sync::sync::{SyncError, SyncErrorKind};
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins over `--log-level`.
///
/// Logs go to stderr so executor output on stdout stays clean. `log`
/// records from the library crates are bridged into `tracing`.
pub fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_target(false).with_writer(std::io::stderr)))
        .try_init();
}

/// Process exit code for a failed command.
pub fn exit_code_for(err: &SyncError) -> u8 {
    match err.kind {
        SyncErrorKind::ToolNotFound => 2,
        _ => 1,
    }
}

pub async fn run(cli: Cli) -> ExitCode {
    init_logging(&cli.log_level, cli.json_logs);

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

async fn dispatch(cli: Cli) -> Result<(), SyncError> {
    let paths = AppPaths::resolve(cli.data_dir.clone())?;
    let passphrase = std::env::var(PASSPHRASE_ENV).ok();
    let app = App::open(paths, passphrase.as_deref()).map_err(|e| {
        if e.kind == SyncErrorKind::Persistence {
            SyncError::persistence(format!(
                "{}. Check the key file or {} before retrying; nothing was overwritten",
                e.message, PASSPHRASE_ENV
            ))
        } else {
            e
        }
    })?;

    let executor = cli.executor.as_deref();
    match cli.command {
        Command::Run => daemon::run(&app, executor).await,
        Command::Add(args) => commands::add(&app, executor, args).await,
        Command::Remove { key } => commands::remove(&app, &key),
        Command::List => {
            commands::list(&app);
            Ok(())
        }
        Command::Hosts => {
            commands::hosts(&app);
            Ok(())
        }
        Command::ForgetHost { endpoint } => commands::forget_host(&app, &endpoint),
        Command::Scan { host, port } => commands::scan(&app, executor, &host, port).await,
        Command::Sync => commands::sync_once(&app, executor).await,
        Command::Interval { minutes } => commands::interval(&app, minutes),
        Command::SetExecutor { path, library } => {
            app.set_executor(&path, library.as_deref())?;
            println!("Executor set to {}", path.display());
            Ok(())
        }
    }
}
