use crate::sync::keys::DEFAULT_PORT;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;

// ═══════════════════════════════════════════════════════════════════════
//  Synchronization target
// ═══════════════════════════════════════════════════════════════════════

/// One local directory mirrored against one remote directory.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTarget {
    pub local_directory: String,
    pub remote_directory: String,
    pub host: String,
    #[serde(default = "default_port", deserialize_with = "deserialize_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub ssh_key_path: String,
    #[serde(default)]
    pub ssh_key_passphrase: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Accepts numbers, numeric strings and `null`; anything unusable becomes 22.
fn deserialize_port<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(port_from_value(&value))
}

pub(crate) fn port_from_value(value: &serde_json::Value) -> u16 {
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        serde_json::Value::String(s) => s.trim().parse::<u16>().ok(),
        _ => None,
    };
    parsed.filter(|p| *p != 0).unwrap_or(DEFAULT_PORT)
}

impl SyncTarget {
    pub fn new(
        local_directory: impl Into<String>,
        remote_directory: impl Into<String>,
        host: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            local_directory: local_directory.into(),
            remote_directory: remote_directory.into(),
            host: host.into(),
            port: DEFAULT_PORT,
            username: username.into(),
            password: String::new(),
            ssh_key_path: String::new(),
            ssh_key_passphrase: String::new(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = if port == 0 { DEFAULT_PORT } else { port };
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_ssh_key(mut self, path: impl Into<String>, passphrase: impl Into<String>) -> Self {
        self.ssh_key_path = path.into();
        self.ssh_key_passphrase = passphrase.into();
        self
    }

    /// `"{local}:{remote}"`, unique across the registry.
    pub fn identity_key(&self) -> String {
        format!("{}:{}", self.local_directory, self.remote_directory)
    }
}

impl fmt::Debug for SyncTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncTarget")
            .field("local_directory", &self.local_directory)
            .field("remote_directory", &self.remote_directory)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &redacted(&self.password))
            .field("ssh_key_path", &self.ssh_key_path)
            .field("ssh_key_passphrase", &redacted(&self.ssh_key_passphrase))
            .finish()
    }
}

fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        "<redacted>"
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Trust
// ═══════════════════════════════════════════════════════════════════════

/// Operator answer to a trust prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrustDecision {
    Accept,
    Reject,
}

// ═══════════════════════════════════════════════════════════════════════
//  Orchestrator state
// ═══════════════════════════════════════════════════════════════════════

/// Mutually exclusive activity of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunState {
    #[default]
    Idle,
    Adding,
    Synchronizing,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Adding => write!(f, "adding"),
            Self::Synchronizing => write!(f, "synchronizing"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Executor contract
// ═══════════════════════════════════════════════════════════════════════

/// Fingerprint-only executor run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub host: String,
    pub port: u16,
}

/// Captured result of a fingerprint scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ScanOutput {
    /// Trimmed stdout, or `None` when the executor printed nothing.
    pub fn fingerprint(&self) -> Option<String> {
        let fp = self.stdout.trim();
        if fp.is_empty() {
            None
        } else {
            Some(fp.to_string())
        }
    }
}

/// Fully resolved argument set for one synchronize run.
#[derive(Clone, PartialEq, Eq)]
pub struct SyncInvocation {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub ssh_key_path: String,
    pub ssh_key_passphrase: String,
    pub fingerprint: String,
    pub local_path: String,
    pub remote_path: String,
    pub state_file: PathBuf,
}

impl SyncInvocation {
    pub fn for_target(target: &SyncTarget, fingerprint: impl Into<String>, state_file: PathBuf) -> Self {
        Self {
            host: target.host.clone(),
            port: target.port,
            username: target.username.clone(),
            password: target.password.clone(),
            ssh_key_path: target.ssh_key_path.clone(),
            ssh_key_passphrase: target.ssh_key_passphrase.clone(),
            fingerprint: fingerprint.into(),
            local_path: target.local_directory.clone(),
            remote_path: target.remote_directory.clone(),
            state_file,
        }
    }
}

impl fmt::Debug for SyncInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncInvocation")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &redacted(&self.password))
            .field("ssh_key_path", &self.ssh_key_path)
            .field("ssh_key_passphrase", &redacted(&self.ssh_key_passphrase))
            .field("fingerprint", &self.fingerprint)
            .field("local_path", &self.local_path)
            .field("remote_path", &self.remote_path)
            .field("state_file", &self.state_file)
            .finish()
    }
}

/// How a synchronize run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    Exited(i32),
    /// Terminated because shutdown was requested.
    Killed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line of executor output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputLine {
    pub stream: OutputStream,
    pub line: String,
}

// ═══════════════════════════════════════════════════════════════════════
//  Cycle reporting
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum TargetOutcome {
    Synced,
    LocalDirectoryMissing,
    TrustFailed { reason: String },
    Failed { exit_code: i32 },
    ExecutorError { reason: String },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetReport {
    pub key: String,
    pub outcome: TargetOutcome,
}

/// Summary of one `perform_sync` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    /// `false` when the cycle was skipped because another activity was running.
    pub ran: bool,
    /// Epoch seconds recorded as the last sync attempt.
    pub started_at: Option<i64>,
    pub targets: Vec<TargetReport>,
    /// Shutdown interrupted the cycle; later targets were not attempted.
    pub cancelled: bool,
}

impl CycleReport {
    pub fn skipped() -> Self {
        Self::default()
    }

    pub fn synced_count(&self) -> usize {
        self.count(|o| matches!(o, TargetOutcome::Synced))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|o| !matches!(o, TargetOutcome::Synced | TargetOutcome::Cancelled))
    }

    pub fn outcome_for(&self, key: &str) -> Option<&TargetOutcome> {
        self.targets.iter().find(|t| t.key == key).map(|t| &t.outcome)
    }

    fn count(&self, pred: impl Fn(&TargetOutcome) -> bool) -> usize {
        self.targets.iter().filter(|t| pred(&t.outcome)).count()
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Events
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventLevel {
    Info,
    Warning,
    Error,
}

/// Everything the orchestrator reports to a shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    Message { level: EventLevel, text: String },
    Output { line: OutputLine },
    StateChanged { state: RunState },
    PauseChanged { paused: bool },
    CycleFinished { report: CycleReport },
}
