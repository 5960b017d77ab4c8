//! Terminal shell: trust prompt, executor output renderer and the
//! single-word console commands accepted while the agent runs.

use async_trait::async_trait;
use dsync_sync::sync::{OutputLine, OutputStream, TrustDecision, TrustPrompt};
use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};

// ── Input ─────────────────────────────────────────────────────────────

/// Owner of the input stream.
///
/// A single reader task hands each line either to a pending prompt or, when
/// no prompt is waiting, to the console command channel.
pub struct ConsoleInput {
    pending: Mutex<Option<oneshot::Sender<Option<String>>>>,
    closed: Mutex<bool>,
}

impl ConsoleInput {
    /// Route `raw` lines. The returned receiver yields console commands and
    /// closes once `raw` does.
    pub fn from_lines(mut raw: mpsc::Receiver<String>) -> (Arc<Self>, mpsc::Receiver<String>) {
        let input = Arc::new(Self {
            pending: Mutex::new(None),
            closed: Mutex::new(false),
        });
        let (tx, rx) = mpsc::channel(16);
        let this = input.clone();
        tokio::spawn(async move {
            while let Some(line) = raw.recv().await {
                if let Some(waiter) = this.take_pending() {
                    let _ = waiter.send(Some(line));
                } else if tx.send(line).await.is_err() {
                    break;
                }
            }
            this.close();
        });
        (input, rx)
    }

    /// Read the process stdin on a dedicated thread so a pending read never
    /// holds up runtime shutdown.
    pub fn stdin() -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, raw) = mpsc::channel(16);
        std::thread::spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });
        Self::from_lines(raw)
    }

    fn take_pending(&self) -> Option<oneshot::Sender<Option<String>>> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn close(&self) {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner) = true;
        if let Some(waiter) = self.take_pending() {
            let _ = waiter.send(None);
        }
    }

    /// Print `question` and wait for the next line. `None` at end of input.
    pub async fn ask(&self, question: &str) -> Option<String> {
        let rx = {
            let closed = self.closed.lock().unwrap_or_else(PoisonError::into_inner);
            if *closed {
                return None;
            }
            let (tx, rx) = oneshot::channel();
            *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
            rx
        };
        {
            let mut out = std::io::stdout().lock();
            let _ = write!(out, "{}", question);
            let _ = out.flush();
        }
        rx.await.ok().flatten()
    }
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

// ── Trust prompt ──────────────────────────────────────────────────────

/// Asks the operator on the terminal. Anything but "y"/"yes" rejects.
pub struct ConsolePrompt {
    input: Arc<ConsoleInput>,
}

impl ConsolePrompt {
    pub fn new(input: Arc<ConsoleInput>) -> Self {
        Self { input }
    }

    async fn decide(&self, question: String) -> TrustDecision {
        match self.input.ask(&question).await {
            Some(answer) if is_affirmative(&answer) => TrustDecision::Accept,
            _ => TrustDecision::Reject,
        }
    }
}

pub fn new_host_question(endpoint: &str, fingerprint: &str) -> String {
    format!(
        "\nThe host \"{}\" reported the following public key fingerprint:\n\n  {}\n\n\
         Trust it and continue connecting? [y/N]: ",
        endpoint, fingerprint
    )
}

pub fn changed_host_question(endpoint: &str, stored: &str, scanned: &str) -> String {
    format!(
        "\nWARNING: the host \"{}\" reported the following public key fingerprint:\n\n  {}\n\n\
         The trusted fingerprint stored for it is:\n\n  {}\n\n\
         These differ. The host may have changed keys, or someone may be \
         intercepting the connection (man-in-the-middle).\n\
         Answering \"y\" replaces the stored fingerprint; anything else keeps it \
         and the connection does not happen.\n\
         Accept the new fingerprint? [y/N]: ",
        endpoint, scanned, stored
    )
}

#[async_trait]
impl TrustPrompt for ConsolePrompt {
    async fn confirm_new(&self, endpoint: &str, fingerprint: &str) -> TrustDecision {
        self.decide(new_host_question(endpoint, fingerprint)).await
    }

    async fn confirm_changed(&self, endpoint: &str, stored: &str, scanned: &str) -> TrustDecision {
        self.decide(changed_host_question(endpoint, stored, scanned))
            .await
    }
}

// ── Output renderer ───────────────────────────────────────────────────

pub const TRUNCATION_MARKER: &str = "(truncated old entries...)";

/// Timestamped executor output with a rolling line cap.
///
/// Once more than `max_lines` lines were written since the last marker, a
/// truncation marker is printed and counting starts over.
pub struct ConsoleRenderer {
    max_lines: usize,
    count: usize,
}

impl ConsoleRenderer {
    pub fn new(max_lines: u32) -> Self {
        Self {
            max_lines: (max_lines as usize).max(1),
            count: 0,
        }
    }

    /// Text for one executor line, `None` for blank output.
    pub fn format_line(line: &OutputLine, timestamp: &str) -> Option<String> {
        let text = line.line.trim_end_matches(['\r', '\n']);
        if text.is_empty() {
            return None;
        }
        Some(match line.stream {
            OutputStream::Stdout => format!("[{}] {}", timestamp, text),
            OutputStream::Stderr => format!("[{}] ERROR: {}", timestamp, text),
        })
    }

    pub fn render(&mut self, out: &mut impl Write, line: &OutputLine) -> std::io::Result<()> {
        let stamp = chrono::Local::now().format("%d. %b. %Y %H:%M:%S").to_string();
        let Some(text) = Self::format_line(line, &stamp) else {
            return Ok(());
        };
        if self.count >= self.max_lines {
            writeln!(out, "{}\n", TRUNCATION_MARKER)?;
            self.count = 0;
        }
        writeln!(out, "{}", text)?;
        self.count += 1;
        Ok(())
    }
}

// ── Console commands ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Sync,
    Pause,
    Resume,
    Status,
    List,
    Quit,
    Help,
}

pub const CONSOLE_HELP: &str =
    "Commands: sync | pause | resume | status | list | quit | help";

/// `None` for blank lines and unknown words.
pub fn parse_console_command(line: &str) -> Option<ConsoleCommand> {
    let word = line.trim().to_ascii_lowercase();
    let cmd = match word.as_str() {
        "sync" | "s" => ConsoleCommand::Sync,
        "pause" | "p" => ConsoleCommand::Pause,
        "resume" | "r" => ConsoleCommand::Resume,
        "status" => ConsoleCommand::Status,
        "list" | "ls" => ConsoleCommand::List,
        "quit" | "q" | "exit" => ConsoleCommand::Quit,
        "help" | "?" | "h" => ConsoleCommand::Help,
        _ => return None,
    };
    Some(cmd)
}
