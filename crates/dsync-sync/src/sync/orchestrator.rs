//! Sync orchestrator – run-state machine, sync cycle, onboarding and the
//! periodic scheduler.
//!
//! Exactly one of `Idle`, `Adding` and `Synchronizing` holds at any time.
//! Leaving `Idle` goes through [`StateGuard`], which restores `Idle` when
//! dropped, so an early return or an error can never leave the orchestrator
//! stuck. Pausing only affects the scheduler. Quitting is one-way: the
//! scheduler stops, a running executor is killed and the rest of the cycle
//! is abandoned.

use crate::sync::error::*;
use crate::sync::events::EventBus;
use crate::sync::executor::{wait_for_shutdown, SyncExecutor};
use crate::sync::keys::*;
use crate::sync::known_hosts::{endpoint_key, KnownHosts};
use crate::sync::scanner::FingerprintScanner;
use crate::sync::targets::{validate_fields, TargetRegistry};
use crate::sync::trust::{TrustPrompt, TrustVerifier};
use crate::sync::types::*;
use dsync_prefs::prefs::JsonPrefs;
use log::{debug, info, warn};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

const EMPTY_REGISTRY_MESSAGE: &str =
    "List of synchronized directories is empty. Add a new entry to get started!";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Configuration & status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Directory holding one executor state file per target.
    pub state_dir: PathBuf,
    /// Delay before the scheduler's first cycle.
    pub initial_delay: Duration,
    /// Run a forced cycle this long after a successful onboarding.
    pub follow_up_delay: Option<Duration>,
}

impl OrchestratorConfig {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            initial_delay: INITIAL_SYNC_DELAY,
            follow_up_delay: Some(INITIAL_SYNC_DELAY),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStatus {
    pub state: RunState,
    pub paused: bool,
    pub quitting: bool,
    pub target_count: usize,
    pub interval_minutes: u32,
    /// Epoch seconds of the last attempted cycle, if any.
    pub last_sync: Option<i64>,
}

/// File name of a target's executor state: SHA-256 hex of its identity key.
pub fn state_file_name(identity_key: &str) -> String {
    hex::encode(Sha256::digest(identity_key.as_bytes()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  State guard
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Holds the orchestrator in `Adding` or `Synchronizing`; restores `Idle` on drop.
pub struct StateGuard<'a> {
    orchestrator: &'a SyncOrchestrator,
    state: RunState,
}

impl StateGuard<'_> {
    pub fn state(&self) -> RunState {
        self.state
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator.set_state(RunState::Idle);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SyncOrchestrator {
    prefs: Arc<JsonPrefs>,
    targets: Arc<TargetRegistry>,
    known_hosts: Arc<KnownHosts>,
    executor: Arc<dyn SyncExecutor>,
    scanner: Arc<FingerprintScanner>,
    verifier: TrustVerifier,
    events: EventBus,
    state: Mutex<RunState>,
    paused: AtomicBool,
    quit_tx: watch::Sender<bool>,
    config: OrchestratorConfig,
}

impl SyncOrchestrator {
    pub fn new(
        prefs: Arc<JsonPrefs>,
        targets: Arc<TargetRegistry>,
        known_hosts: Arc<KnownHosts>,
        executor: Arc<dyn SyncExecutor>,
        prompt: Arc<dyn TrustPrompt>,
        config: OrchestratorConfig,
    ) -> Arc<Self> {
        let events = EventBus::default();
        let (quit_tx, quit_rx) = watch::channel(false);
        let scanner = Arc::new(FingerprintScanner::new(
            executor.clone(),
            events.clone(),
            quit_rx,
        ));
        let verifier = TrustVerifier::new(
            known_hosts.clone(),
            scanner.clone(),
            prompt,
            quit_tx.subscribe(),
        );
        Arc::new(Self {
            prefs,
            targets,
            known_hosts,
            executor,
            scanner,
            verifier,
            events,
            state: Mutex::new(RunState::Idle),
            paused: AtomicBool::new(false),
            quit_tx,
            config,
        })
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn targets(&self) -> &Arc<TargetRegistry> {
        &self.targets
    }

    pub fn known_hosts(&self) -> &Arc<KnownHosts> {
        &self.known_hosts
    }

    pub fn scanner(&self) -> &Arc<FingerprintScanner> {
        &self.scanner
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> RunState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> OrchestratorStatus {
        let last = self.prefs.get::<i64>(LAST_SYNC_TIMESTAMP_UTC, 0);
        OrchestratorStatus {
            state: self.state(),
            paused: self.is_paused(),
            quitting: self.is_quitting(),
            target_count: self.targets.len(),
            interval_minutes: self.interval_minutes(),
            last_sync: (last > 0).then_some(last),
        }
    }

    pub fn state_file_for(&self, identity_key: &str) -> PathBuf {
        self.config.state_dir.join(state_file_name(identity_key))
    }

    // ── Run state ────────────────────────────────────────────────────

    fn set_state(&self, next: RunState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
        self.events.publish(SyncEvent::StateChanged { state: next });
    }

    fn try_enter(&self, next: RunState) -> Option<StateGuard<'_>> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != RunState::Idle {
                return None;
            }
            *state = next;
        }
        self.events.publish(SyncEvent::StateChanged { state: next });
        Some(StateGuard {
            orchestrator: self,
            state: next,
        })
    }

    /// Enter `Adding`. `None` while a cycle or another onboarding is running.
    pub fn begin_adding(&self) -> Option<StateGuard<'_>> {
        self.try_enter(RunState::Adding)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        if self.paused.swap(paused, Ordering::SeqCst) != paused {
            info!("Periodic synchronization {}", if paused { "paused" } else { "resumed" });
            self.events.publish(SyncEvent::PauseChanged { paused });
        }
    }

    /// Flip the pause flag and return the new value.
    pub fn toggle_pause(&self) -> bool {
        let paused = !self.is_paused();
        self.set_paused(paused);
        paused
    }

    pub fn is_quitting(&self) -> bool {
        *self.quit_tx.borrow()
    }

    /// Request shutdown. Idempotent.
    pub fn quit(&self) {
        if !self.quit_tx.send_replace(true) {
            info!("Shutdown requested");
        }
    }

    // ── Interval ─────────────────────────────────────────────────────

    pub fn interval_minutes(&self) -> u32 {
        clamp_interval_minutes(
            self.prefs
                .get::<i64>(SYNC_INTERVAL_MINUTES, DEFAULT_SYNC_INTERVAL_MINUTES as i64),
        )
    }

    /// Clamp, store and persist the interval. Takes effect on the next sleep.
    pub fn set_interval_minutes(&self, minutes: i64) -> SyncResult<u32> {
        let clamped = clamp_interval_minutes(minutes);
        self.prefs.set(SYNC_INTERVAL_MINUTES, clamped)?;
        self.prefs.save()?;
        info!("Sync interval set to {} minute(s)", clamped);
        Ok(clamped)
    }

    // ── Cycle ────────────────────────────────────────────────────────

    /// Run one cycle over every target. A no-op while adding or synchronizing.
    pub async fn perform_sync(&self) -> CycleReport {
        if self.is_quitting() {
            return CycleReport::skipped();
        }
        let Some(_guard) = self.try_enter(RunState::Synchronizing) else {
            debug!("Sync requested while {}; skipping", self.state());
            return CycleReport::skipped();
        };

        let started_at = chrono::Utc::now().timestamp();
        let mut report = CycleReport {
            ran: true,
            started_at: Some(started_at),
            ..CycleReport::default()
        };
        if let Err(e) = self.prefs.set(LAST_SYNC_TIMESTAMP_UTC, started_at) {
            warn!("Failed to record sync timestamp: {}", e);
        }
        if let Err(e) = self.prefs.save_async().await {
            warn!("Failed to persist sync timestamp: {}", e);
        }
        // The save merged in whatever other processes stored meanwhile.
        if let Err(e) = self.targets.load() {
            warn!("Keeping the current target list: {}", e.message);
        }

        let targets = self.targets.list();
        if targets.is_empty() {
            self.events.info(EMPTY_REGISTRY_MESSAGE);
        }
        let mut rejected = HashSet::new();
        for target in targets {
            if self.is_quitting() {
                report.cancelled = true;
                break;
            }
            let key = target.identity_key();
            let outcome = self.sync_target(&target, &key, &mut rejected).await;
            let cancelled = outcome == TargetOutcome::Cancelled;
            report.targets.push(TargetReport { key, outcome });
            if cancelled {
                report.cancelled = true;
                break;
            }
        }

        info!(
            "Sync cycle finished: {} synced, {} failed{}",
            report.synced_count(),
            report.failed_count(),
            if report.cancelled { ", cancelled" } else { "" }
        );
        self.events.publish(SyncEvent::CycleFinished {
            report: report.clone(),
        });
        report
    }

    /// Forced cycle; ignores the pause flag.
    pub async fn force_sync(&self) -> CycleReport {
        self.perform_sync().await
    }

    /// [`SyncOrchestrator::force_sync`] on its own task.
    pub fn spawn_force_sync(self: &Arc<Self>) -> JoinHandle<CycleReport> {
        let this = self.clone();
        tokio::spawn(async move { this.force_sync().await })
    }

    /// `rejected` collects endpoints the operator refused during this cycle;
    /// later targets on the same endpoint are skipped without asking again.
    async fn sync_target(
        &self,
        target: &SyncTarget,
        key: &str,
        rejected: &mut HashSet<String>,
    ) -> TargetOutcome {
        self.events
            .info(format!("Synchronizing {}... Please be patient...", key));

        if !Path::new(&target.local_directory).is_dir() {
            self.events.error(format!(
                "ERROR: Local directory \"{}\" not found!",
                target.local_directory
            ));
            return TargetOutcome::LocalDirectoryMissing;
        }

        let endpoint = endpoint_key(&target.host, target.port);
        if rejected.contains(&endpoint) {
            let reason = format!("Fingerprint of {} was rejected earlier in this cycle", endpoint);
            self.events
                .error(format!("ERROR: Skipping {}: {}", key, reason));
            return TargetOutcome::TrustFailed { reason };
        }

        let fingerprint = match self.verifier.verify(&target.host, target.port).await {
            Ok(fp) => fp,
            Err(_) if self.is_quitting() => return TargetOutcome::Cancelled,
            Err(e) => {
                if e.kind == SyncErrorKind::TrustRejected {
                    rejected.insert(endpoint);
                }
                self.events
                    .error(format!("ERROR: Skipping {}: {}", key, e.message));
                return TargetOutcome::TrustFailed { reason: e.message };
            }
        };

        let invocation = SyncInvocation::for_target(target, fingerprint, self.state_file_for(key));
        let result = self
            .executor
            .synchronize(&invocation, self.events.output_sink(), self.quit_tx.subscribe())
            .await;
        match result {
            Ok(ExecOutcome::Exited(0)) => {
                self.events.info(format!("Synchronized {}", key));
                TargetOutcome::Synced
            }
            Ok(ExecOutcome::Exited(code)) => {
                self.events.error(format!(
                    "ERROR: Synchronization of {} failed with exit code {}",
                    key, code
                ));
                TargetOutcome::Failed { exit_code: code }
            }
            Ok(ExecOutcome::Killed) => {
                self.events
                    .warn(format!("Synchronization of {} was interrupted by shutdown", key));
                TargetOutcome::Cancelled
            }
            Err(e) => {
                self.events
                    .error(format!("ERROR: Could not run the executor for {}: {}", key, e.message));
                TargetOutcome::ExecutorError { reason: e.message }
            }
        }
    }

    // ── Target management ────────────────────────────────────────────

    /// Onboard a new target: validate, scan, ask for trust, insert, persist.
    ///
    /// Nothing is added unless the operator trusts the endpoint. On success a
    /// follow-up cycle is scheduled if configured.
    pub async fn onboard(self: &Arc<Self>, candidate: SyncTarget) -> SyncResult<()> {
        let guard = self
            .begin_adding()
            .ok_or_else(|| SyncError::busy(format!("Cannot add a target while {}", self.state())))?;

        validate_fields(&candidate)?;
        if !Path::new(&candidate.local_directory).is_dir() {
            return Err(SyncError::local_directory_missing(format!(
                "ERROR: Local directory \"{}\" not found!",
                candidate.local_directory
            )));
        }
        self.targets.validate(&candidate)?;

        let fingerprint = self
            .scanner
            .scan(&candidate.host, candidate.port)
            .await
            .ok_or_else(|| {
                SyncError::scan_failed(format!(
                    "Could not obtain the fingerprint of {}:{}",
                    candidate.host, candidate.port
                ))
            })?;
        self.verifier
            .verify_scanned(&candidate.host, candidate.port, &fingerprint)
            .await?;

        let key = candidate.identity_key();
        self.targets.add(candidate)?;
        self.events.info(format!("Added {}", key));
        drop(guard);

        if let Some(delay) = self.config.follow_up_delay {
            let this = self.clone();
            tokio::spawn(async move {
                if this.sleep_or_quit(delay).await {
                    this.force_sync().await;
                }
            });
        }
        Ok(())
    }

    pub fn remove_target(&self, key: &str) -> SyncResult<bool> {
        let removed = self.targets.remove(key)?;
        if removed {
            self.events.info(format!("Removed {}", key));
        }
        Ok(removed)
    }

    // ── Scheduler ────────────────────────────────────────────────────

    /// `true` when `duration` elapsed, `false` when shutdown came first.
    async fn sleep_or_quit(&self, duration: Duration) -> bool {
        let mut quit_rx = self.quit_tx.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_quitting(),
            _ = wait_for_shutdown(&mut quit_rx) => false,
        }
    }

    /// Periodic loop; returns once [`SyncOrchestrator::quit`] is called.
    pub async fn run_scheduler(self: Arc<Self>) {
        info!("Scheduler started");
        if self.sleep_or_quit(self.config.initial_delay).await {
            loop {
                if self.is_quitting() {
                    break;
                }
                if self.is_paused() {
                    debug!("Scheduler tick skipped: paused");
                } else {
                    self.perform_sync().await;
                }
                let interval = Duration::from_secs(u64::from(self.interval_minutes()) * 60);
                if !self.sleep_or_quit(interval).await {
                    break;
                }
            }
        }
        info!("Scheduler stopped");
    }

    /// [`SyncOrchestrator::run_scheduler`] on its own task.
    pub fn spawn_scheduler(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(self.clone().run_scheduler())
    }
}
