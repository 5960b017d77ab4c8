//! Command-line surface.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dirsync")]
#[command(version, about = "Keeps local directories mirrored against SFTP endpoints", long_about = None)]
pub struct Cli {
    /// Data directory holding Config.json, KnownHosts.json and executor state
    #[arg(long, env = "DIRSYNC_HOME", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Path to the dirsync-executor binary; takes precedence over the stored one
    #[arg(long, global = true)]
    pub executor: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run the background agent with the periodic scheduler and console commands
    Run,
    /// Add a synchronization target after verifying the host fingerprint
    Add(AddArgs),
    /// Remove a synchronization target by its "local:remote" key
    Remove { key: String },
    /// List synchronization targets
    List,
    /// List trusted host fingerprints
    Hosts,
    /// Forget the trusted fingerprint of "host:port"
    ForgetHost { endpoint: String },
    /// Print the current fingerprint of a host without trusting it
    Scan {
        host: String,
        #[arg(long, default_value_t = 22)]
        port: u16,
    },
    /// Run one synchronization cycle now and exit
    Sync,
    /// Set the sync interval in minutes (clamped to 1-60)
    Interval {
        #[arg(allow_negative_numbers = true)]
        minutes: i64,
    },
    /// Store the executor binary (and optional library) location
    SetExecutor {
        path: PathBuf,
        #[arg(long)]
        library: Option<String>,
    },
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct AddArgs {
    /// Existing local directory to synchronize
    pub local: String,
    /// Remote directory on the SFTP endpoint
    pub remote: String,
    /// SFTP host
    #[arg(long)]
    pub host: String,
    #[arg(long, default_value_t = 22)]
    pub port: u16,
    #[arg(long, short)]
    pub username: String,
    /// Password; prefer the environment variable over the flag
    #[arg(long, env = "DIRSYNC_TARGET_PASSWORD", hide_env_values = true, default_value = "")]
    pub password: String,
    /// Private key file used instead of a password
    #[arg(long, default_value = "")]
    pub ssh_key: String,
    #[arg(long, env = "DIRSYNC_TARGET_KEY_PASSPHRASE", hide_env_values = true, default_value = "")]
    pub ssh_key_passphrase: String,
}
