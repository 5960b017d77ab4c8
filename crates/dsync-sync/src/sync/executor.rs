//! External executor seam.
//!
//! The executor performs the actual diff-and-transfer for one target. The
//! orchestrator only talks to it through [`SyncExecutor`]; [`ProcessExecutor`]
//! is the production implementation that spawns the `dirsync-executor`
//! binary and streams its output.

use crate::sync::error::*;
use crate::sync::types::*;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::{debug, warn};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;

/// Receives executor output one line at a time.
pub type OutputSink = Arc<dyn Fn(OutputLine) + Send + Sync>;

pub const PASSWORD_ENV: &str = "DIRSYNC_PASSWORD_B64";
pub const SSH_KEY_PASSPHRASE_ENV: &str = "DIRSYNC_SSH_KEY_PASSPHRASE_B64";

#[async_trait]
pub trait SyncExecutor: Send + Sync {
    /// Run in fingerprint-only mode and capture the output.
    async fn scan_fingerprint(
        &self,
        request: &ScanRequest,
        shutdown: watch::Receiver<bool>,
    ) -> SyncResult<ScanOutput>;

    /// Synchronize one target, forwarding output lines to `sink` as they arrive.
    /// Returns [`ExecOutcome::Killed`] when `shutdown` flips to `true` first.
    async fn synchronize(
        &self,
        invocation: &SyncInvocation,
        sink: OutputSink,
        shutdown: watch::Receiver<bool>,
    ) -> SyncResult<ExecOutcome>;
}

/// Resolves once `rx` carries `true`. Never resolves if the sender is gone.
pub async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Argument builders
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn b64(value: &str) -> String {
    STANDARD.encode(value.as_bytes())
}

pub fn build_scan_args(request: &ScanRequest, library: Option<&str>) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "scan-fingerprint".into(),
        "--host".into(),
        request.host.clone(),
        "--port".into(),
        request.port.to_string(),
    ];
    if let Some(lib) = library {
        args.push("--library".into());
        args.push(lib.to_string());
    }
    args
}

/// Paths and identities are base64-encoded; secrets are left out entirely
/// and travel in the environment (see [`build_sync_env`]).
pub fn build_sync_args(invocation: &SyncInvocation, library: Option<&str>) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "sync".into(),
        "--host".into(),
        invocation.host.clone(),
        "--port".into(),
        invocation.port.to_string(),
    ];
    if let Some(lib) = library {
        args.push("--library".into());
        args.push(lib.to_string());
    }
    args.push("--username-b64".into());
    args.push(b64(&invocation.username));
    args.push("--fingerprint-b64".into());
    args.push(b64(&invocation.fingerprint));
    args.push("--local-path-b64".into());
    args.push(b64(&invocation.local_path));
    args.push("--remote-path-b64".into());
    args.push(b64(&invocation.remote_path));
    args.push("--state-file-b64".into());
    args.push(b64(&invocation.state_file.to_string_lossy()));
    if !invocation.ssh_key_path.is_empty() {
        args.push("--ssh-key-b64".into());
        args.push(b64(&invocation.ssh_key_path));
    }
    args
}

pub fn build_sync_env(invocation: &SyncInvocation) -> Vec<(String, String)> {
    let mut env = Vec::new();
    if !invocation.password.is_empty() {
        env.push((PASSWORD_ENV.to_string(), b64(&invocation.password)));
    }
    if !invocation.ssh_key_passphrase.is_empty() {
        env.push((
            SSH_KEY_PASSPHRASE_ENV.to_string(),
            b64(&invocation.ssh_key_passphrase),
        ));
    }
    env
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Prepared command descriptors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything needed to spawn one executor run. Reused across identical
/// invocations; each run still spawns a fresh process.
#[derive(Clone)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    env: Vec<(String, String)>,
}

impl CommandSpec {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd
    }
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let env_keys: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("CommandSpec")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &env_keys)
            .finish()
    }
}

/// SHA-256 hex over the program and the full argument string.
pub fn spec_cache_key(program: &Path, args: &[String], env: &[(String, String)]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(program.to_string_lossy().as_bytes());
    for arg in args {
        hasher.update(b"\0");
        hasher.update(arg.as_bytes());
    }
    for (k, v) in env {
        hasher.update(b"\0");
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(v.as_bytes());
    }
    hex::encode(hasher.finalize())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  ProcessExecutor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ProcessExecutor {
    program: PathBuf,
    library: Option<String>,
    specs: Mutex<HashMap<String, Arc<CommandSpec>>>,
}

impl ProcessExecutor {
    pub fn new(program: impl Into<PathBuf>, library: Option<String>) -> Self {
        Self {
            program: program.into(),
            library: library.filter(|l| !l.trim().is_empty()),
            specs: Mutex::new(HashMap::new()),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn library(&self) -> Option<&str> {
        self.library.as_deref()
    }

    /// Number of memoized command descriptors.
    pub fn cached_specs(&self) -> usize {
        self.specs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Memoized descriptor for `args`. Descriptors carrying environment
    /// values hold secrets and are built fresh, never kept.
    fn prepare(&self, args: Vec<String>, env: Vec<(String, String)>) -> Arc<CommandSpec> {
        if !env.is_empty() {
            return Arc::new(CommandSpec {
                program: self.program.clone(),
                args,
                env,
            });
        }
        let key = spec_cache_key(&self.program, &args, &env);
        let mut specs = self.specs.lock().unwrap_or_else(PoisonError::into_inner);
        specs
            .entry(key)
            .or_insert_with(|| {
                Arc::new(CommandSpec {
                    program: self.program.clone(),
                    args,
                    env,
                })
            })
            .clone()
    }

    fn spawn(&self, spec: &CommandSpec) -> SyncResult<tokio::process::Child> {
        debug!("Spawning {} {}", spec.program.display(), spec.args.join(" "));
        spec.command().spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SyncError::tool_not_found(format!(
                    "Executor not found at '{}'",
                    spec.program.display()
                ))
            } else {
                SyncError::spawn_failed(format!(
                    "Failed to start {}: {}",
                    spec.program.display(),
                    e
                ))
            }
        })
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut out = String::new();
    if let Some(mut r) = reader {
        let mut buf = Vec::new();
        if let Err(e) = r.read_to_end(&mut buf).await {
            warn!("Failed to read executor output: {}", e);
        }
        out = String::from_utf8_lossy(&buf).into_owned();
    }
    out
}

async fn forward_lines<R: AsyncRead + Unpin>(reader: Option<R>, stream: OutputStream, sink: OutputSink) {
    let Some(r) = reader else { return };
    let mut lines = BufReader::new(r).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => sink(OutputLine { stream, line }),
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read executor {:?}: {}", stream, e);
                break;
            }
        }
    }
}

#[async_trait]
impl SyncExecutor for ProcessExecutor {
    async fn scan_fingerprint(
        &self,
        request: &ScanRequest,
        mut shutdown: watch::Receiver<bool>,
    ) -> SyncResult<ScanOutput> {
        let spec = self.prepare(build_scan_args(request, self.library()), Vec::new());
        let mut child = self.spawn(&spec)?;
        let stdout = tokio::spawn(read_all(child.stdout.take()));
        let stderr = tokio::spawn(read_all(child.stderr.take()));

        let status = tokio::select! {
            status = child.wait() => Some(status),
            _ = wait_for_shutdown(&mut shutdown) => None,
        };
        let Some(status) = status else {
            let _ = child.kill().await;
            return Err(SyncError::cancelled("Fingerprint scan cancelled by shutdown"));
        };
        let status = status?;

        Ok(ScanOutput {
            exit_code: status.code(),
            stdout: stdout.await.unwrap_or_default(),
            stderr: stderr.await.unwrap_or_default(),
        })
    }

    async fn synchronize(
        &self,
        invocation: &SyncInvocation,
        sink: OutputSink,
        mut shutdown: watch::Receiver<bool>,
    ) -> SyncResult<ExecOutcome> {
        let spec = self.prepare(
            build_sync_args(invocation, self.library()),
            build_sync_env(invocation),
        );
        let mut child = self.spawn(&spec)?;
        let out = tokio::spawn(forward_lines(child.stdout.take(), OutputStream::Stdout, sink.clone()));
        let err = tokio::spawn(forward_lines(child.stderr.take(), OutputStream::Stderr, sink));

        let status = tokio::select! {
            status = child.wait() => Some(status),
            _ = wait_for_shutdown(&mut shutdown) => None,
        };
        let outcome = match status {
            Some(status) => ExecOutcome::Exited(status?.code().unwrap_or(-1)),
            None => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill executor: {}", e);
                }
                ExecOutcome::Killed
            }
        };
        let _ = out.await;
        let _ = err.await;
        Ok(outcome)
    }
}
