use async_trait::async_trait;
use dsync_prefs::prefs::protect::KEY_LEN;
use dsync_prefs::prefs::{JsonPrefs, Protector};
use dsync_sync::sync::executor::OutputSink;
use dsync_sync::sync::keys::*;
use dsync_sync::sync::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};

// ── Fakes ────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeExecutor {
    fingerprint: Mutex<String>,
    exit_code: i32,
    scans: AtomicUsize,
    runs: Mutex<Vec<SyncInvocation>>,
    /// When set, `synchronize` parks until notified or shut down.
    gate: Option<Arc<Notify>>,
    started: Arc<Notify>,
}

impl FakeExecutor {
    fn with_fingerprint(fp: &str) -> Self {
        Self {
            fingerprint: Mutex::new(fp.to_string()),
            ..Self::default()
        }
    }

    fn gated(fp: &str, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::with_fingerprint(fp)
        }
    }

    fn set_fingerprint(&self, fp: &str) {
        *self.fingerprint.lock().unwrap() = fp.to_string();
    }

    fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }
}

#[async_trait]
impl SyncExecutor for FakeExecutor {
    async fn scan_fingerprint(&self, _: &ScanRequest, _: watch::Receiver<bool>) -> SyncResult<ScanOutput> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        Ok(ScanOutput {
            exit_code: Some(0),
            stdout: format!("{}\n", self.fingerprint.lock().unwrap()),
            stderr: String::new(),
        })
    }

    async fn synchronize(
        &self,
        invocation: &SyncInvocation,
        sink: OutputSink,
        mut shutdown: watch::Receiver<bool>,
    ) -> SyncResult<ExecOutcome> {
        self.runs.lock().unwrap().push(invocation.clone());
        sink(OutputLine {
            stream: OutputStream::Stdout,
            line: format!("Comparing {}", invocation.local_path),
        });
        self.started.notify_one();
        if let Some(gate) = &self.gate {
            tokio::select! {
                _ = gate.notified() => {}
                _ = executor::wait_for_shutdown(&mut shutdown) => return Ok(ExecOutcome::Killed),
            }
        }
        Ok(ExecOutcome::Exited(self.exit_code))
    }
}

#[derive(Default)]
struct ScriptedPrompt {
    accept_new: bool,
    accept_changed: bool,
    /// Never answer, like an operator who walked away.
    silent: bool,
    asked: Arc<Notify>,
    new_prompts: AtomicUsize,
    changed_prompts: AtomicUsize,
}

impl ScriptedPrompt {
    fn accepting() -> Self {
        Self {
            accept_new: true,
            accept_changed: true,
            ..Self::default()
        }
    }

    fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }

    async fn answer(&self, accept: bool) -> TrustDecision {
        self.asked.notify_one();
        if self.silent {
            std::future::pending::<()>().await;
        }
        decision(accept)
    }
}

fn decision(accept: bool) -> TrustDecision {
    if accept {
        TrustDecision::Accept
    } else {
        TrustDecision::Reject
    }
}

#[async_trait]
impl TrustPrompt for ScriptedPrompt {
    async fn confirm_new(&self, _: &str, _: &str) -> TrustDecision {
        self.new_prompts.fetch_add(1, Ordering::SeqCst);
        self.answer(self.accept_new).await
    }

    async fn confirm_changed(&self, _: &str, _: &str, _: &str) -> TrustDecision {
        self.changed_prompts.fetch_add(1, Ordering::SeqCst);
        self.answer(self.accept_changed).await
    }
}

// ── Fixture ──────────────────────────────────────────────────────────

struct Fixture {
    dir: tempfile::TempDir,
    prefs: Arc<JsonPrefs>,
    hosts: Arc<KnownHosts>,
    executor: Arc<FakeExecutor>,
    prompt: Arc<ScriptedPrompt>,
    orch: Arc<SyncOrchestrator>,
}

fn fixture(executor: FakeExecutor, prompt: ScriptedPrompt) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let prefs = Arc::new(JsonPrefs::open(
        dir.path().join(CONFIG_FILE_NAME),
        Some(Arc::new(Protector::from_key([4u8; KEY_LEN]))),
    ));
    let hosts = Arc::new(KnownHosts::new(dir.path().join(KNOWN_HOSTS_FILE_NAME)));
    hosts.load();
    let targets = Arc::new(TargetRegistry::new(prefs.clone()));
    let executor = Arc::new(executor);
    let prompt = Arc::new(prompt);
    let mut config = OrchestratorConfig::new(dir.path().join(STATE_DIR_NAME));
    config.follow_up_delay = None;
    let orch = SyncOrchestrator::new(
        prefs.clone(),
        targets,
        hosts.clone(),
        executor.clone(),
        prompt.clone(),
        config,
    );
    Fixture {
        dir,
        prefs,
        hosts,
        executor,
        prompt,
        orch,
    }
}

impl Fixture {
    fn local_dir(&self, name: &str) -> String {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(&path).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn trust(&self, endpoint: &str, fingerprint: &str) {
        std::fs::write(
            self.hosts.path(),
            format!("{{\"{}\": \"{}\"}}", endpoint, fingerprint),
        )
        .unwrap();
        self.hosts.load();
    }
}

// ── Registry scenarios ───────────────────────────────────────────────

#[tokio::test]
async fn nested_target_is_rejected_without_mutation() {
    let f = fixture(FakeExecutor::with_fingerprint("AA:BB"), ScriptedPrompt::accepting());
    let a = f.local_dir("a");
    let ab = f.local_dir("a/b");
    f.orch
        .targets()
        .add(SyncTarget::new(&a, "/r", "h", "u"))
        .unwrap();

    let err = f
        .orch
        .onboard(SyncTarget::new(&ab, "/r2", "h2", "u2"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, SyncErrorKind::OverlappingTarget);
    assert_eq!(f.orch.targets().keys(), vec![format!("{}:/r", a)]);
    assert_eq!(f.executor.scans.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn registry_round_trip_keeps_secrets() {
    let f = fixture(FakeExecutor::with_fingerprint("AA:BB"), ScriptedPrompt::accepting());
    let target = SyncTarget::new("/srv/a", "/r", "h", "u")
        .with_port(2222)
        .with_password("pw")
        .with_ssh_key("/k", "phrase");
    f.orch.targets().add(target.clone()).unwrap();

    let reopened = Arc::new(JsonPrefs::open(
        f.prefs.path(),
        Some(Arc::new(Protector::from_key([4u8; KEY_LEN]))),
    ));
    let registry = TargetRegistry::new(reopened);
    assert_eq!(registry.load().unwrap(), 1);
    assert_eq!(registry.get(&target.identity_key()), Some(target));
}

#[tokio::test]
async fn target_added_by_another_process_survives_a_cycle() {
    let f = fixture(FakeExecutor::with_fingerprint("AA:BB"), ScriptedPrompt::accepting());
    f.trust("h:22", "AA:BB");
    f.prefs.set(CLIENT_ID, "DAEMON".to_string()).unwrap();
    f.prefs.save().unwrap();

    let other = TargetRegistry::new(Arc::new(JsonPrefs::open(
        f.prefs.path(),
        Some(Arc::new(Protector::from_key([4u8; KEY_LEN]))),
    )));
    other.load().unwrap();
    let a = f.local_dir("a");
    other.add(SyncTarget::new(&a, "/r", "h", "u")).unwrap();

    let report = f.orch.perform_sync().await;
    assert_eq!(report.synced_count(), 1);

    let reopened = Arc::new(JsonPrefs::open(
        f.prefs.path(),
        Some(Arc::new(Protector::from_key([4u8; KEY_LEN]))),
    ));
    assert!(reopened.has_key(LAST_SYNC_TIMESTAMP_UTC));
    assert_eq!(reopened.get_string(CLIENT_ID), "DAEMON");
    let registry = TargetRegistry::new(reopened);
    assert_eq!(registry.load().unwrap(), 1);
    assert!(registry.get(&format!("{}:/r", a)).is_some());
}

// ── Trust scenarios ──────────────────────────────────────────────────

#[tokio::test]
async fn first_contact_accept_then_silent_reverify() {
    let f = fixture(FakeExecutor::with_fingerprint("AA:BB"), ScriptedPrompt::accepting());
    let a = f.local_dir("a");

    f.orch
        .onboard(SyncTarget::new(&a, "/r", "h", "u"))
        .await
        .unwrap();
    assert_eq!(f.hosts.lookup("h:22").as_deref(), Some("AA:BB"));
    assert_eq!(f.prompt.new_prompts.load(Ordering::SeqCst), 1);

    let report = f.orch.perform_sync().await;
    assert_eq!(report.synced_count(), 1);
    assert_eq!(f.prompt.new_prompts.load(Ordering::SeqCst), 1);
    assert_eq!(f.prompt.changed_prompts.load(Ordering::SeqCst), 0);
    // Verification re-scans on every cycle.
    assert_eq!(f.executor.scans.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn rejected_first_contact_adds_nothing() {
    let f = fixture(FakeExecutor::with_fingerprint("AA:BB"), ScriptedPrompt::default());
    let a = f.local_dir("a");

    let err = f
        .orch
        .onboard(SyncTarget::new(&a, "/r", "h", "u"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, SyncErrorKind::TrustRejected);
    assert!(f.orch.targets().is_empty());
    assert!(f.hosts.is_empty());
    assert_eq!(f.orch.state(), RunState::Idle);
}

#[tokio::test]
async fn empty_fingerprint_blocks_onboarding() {
    let f = fixture(FakeExecutor::with_fingerprint(""), ScriptedPrompt::accepting());
    let a = f.local_dir("a");

    let err = f
        .orch
        .onboard(SyncTarget::new(&a, "/r", "h", "u"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, SyncErrorKind::FingerprintScanFailed);
    assert!(f.orch.targets().is_empty());
    assert_eq!(f.prompt.new_prompts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rejected_key_change_skips_target_and_keeps_record() {
    let prompt = ScriptedPrompt {
        accept_new: true,
        ..ScriptedPrompt::default()
    };
    let f = fixture(FakeExecutor::with_fingerprint("AA:BB"), prompt);
    let a = f.local_dir("a");
    f.orch
        .onboard(SyncTarget::new(&a, "/r", "h", "u"))
        .await
        .unwrap();

    f.executor.set_fingerprint("CC:DD");
    let report = f.orch.perform_sync().await;
    let key = format!("{}:/r", a);
    assert!(matches!(
        report.outcome_for(&key),
        Some(TargetOutcome::TrustFailed { .. })
    ));
    assert_eq!(f.hosts.lookup("h:22").as_deref(), Some("AA:BB"));
    assert_eq!(f.executor.run_count(), 0);
    assert_eq!(f.prompt.changed_prompts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rejected_key_change_is_asked_once_per_cycle() {
    let f = fixture(FakeExecutor::with_fingerprint("CC:DD"), ScriptedPrompt::default());
    f.trust("h:22", "AA:BB");
    let a = f.local_dir("a");
    let b = f.local_dir("b");
    f.orch.targets().add(SyncTarget::new(&a, "/r", "h", "u")).unwrap();
    f.orch.targets().add(SyncTarget::new(&b, "/r", "h", "u")).unwrap();

    let report = f.orch.perform_sync().await;
    assert_eq!(report.targets.len(), 2);
    for target in &report.targets {
        assert!(matches!(target.outcome, TargetOutcome::TrustFailed { .. }));
    }
    assert_eq!(f.prompt.changed_prompts.load(Ordering::SeqCst), 1);
    assert_eq!(f.executor.run_count(), 0);

    // The next cycle asks again.
    f.orch.perform_sync().await;
    assert_eq!(f.prompt.changed_prompts.load(Ordering::SeqCst), 2);
    assert_eq!(f.hosts.lookup("h:22").as_deref(), Some("AA:BB"));
}

// ── Cycle scenarios ──────────────────────────────────────────────────

#[tokio::test]
async fn missing_local_directory_is_skipped_and_next_target_runs() {
    let f = fixture(FakeExecutor::with_fingerprint("AA:BB"), ScriptedPrompt::accepting());
    f.trust("h:22", "AA:BB");
    let missing = f.dir.path().join("gone").to_string_lossy().into_owned();
    let present = f.local_dir("present");
    f.orch
        .targets()
        .add(SyncTarget::new(&missing, "/r1", "h", "u"))
        .unwrap();
    f.orch
        .targets()
        .add(SyncTarget::new(&present, "/r2", "h", "u"))
        .unwrap();

    let report = f.orch.perform_sync().await;
    assert_eq!(
        report.outcome_for(&format!("{}:/r1", missing)),
        Some(&TargetOutcome::LocalDirectoryMissing)
    );
    assert_eq!(
        report.outcome_for(&format!("{}:/r2", present)),
        Some(&TargetOutcome::Synced)
    );
    assert_eq!(f.executor.run_count(), 1);
    // The skipped target stays registered.
    assert_eq!(f.orch.targets().len(), 2);
}

#[tokio::test]
async fn invocation_carries_fingerprint_and_hashed_state_file() {
    let f = fixture(FakeExecutor::with_fingerprint("AA:BB"), ScriptedPrompt::accepting());
    f.trust("h:2222", "AA:BB");
    let a = f.local_dir("a");
    let target = SyncTarget::new(&a, "/remote", "h", "u")
        .with_port(2222)
        .with_password("pw");
    f.orch.targets().add(target.clone()).unwrap();

    f.orch.perform_sync().await;
    let runs = f.executor.runs.lock().unwrap();
    let inv = &runs[0];
    assert_eq!(inv.fingerprint, "AA:BB");
    assert_eq!(inv.port, 2222);
    assert_eq!(inv.password, "pw");
    assert_eq!(
        inv.state_file,
        f.dir
            .path()
            .join(STATE_DIR_NAME)
            .join(orchestrator::state_file_name(&target.identity_key()))
    );
}

#[tokio::test]
async fn non_zero_exit_is_a_target_failure() {
    let executor = FakeExecutor {
        exit_code: 3,
        ..FakeExecutor::with_fingerprint("AA:BB")
    };
    let f = fixture(executor, ScriptedPrompt::accepting());
    f.trust("h:22", "AA:BB");
    let a = f.local_dir("a");
    let b = f.local_dir("b");
    f.orch.targets().add(SyncTarget::new(&a, "/r", "h", "u")).unwrap();
    f.orch.targets().add(SyncTarget::new(&b, "/r", "h", "u")).unwrap();

    let report = f.orch.perform_sync().await;
    assert_eq!(report.failed_count(), 2);
    assert_eq!(f.executor.run_count(), 2);
    assert_eq!(f.orch.state(), RunState::Idle);
}

#[tokio::test]
async fn executor_output_is_broadcast() {
    let f = fixture(FakeExecutor::with_fingerprint("AA:BB"), ScriptedPrompt::accepting());
    f.trust("h:22", "AA:BB");
    let a = f.local_dir("a");
    f.orch.targets().add(SyncTarget::new(&a, "/r", "h", "u")).unwrap();
    let mut events = f.orch.subscribe();

    f.orch.perform_sync().await;
    let mut lines = Vec::new();
    let mut finished = false;
    while let Ok(event) = events.try_recv() {
        match event {
            SyncEvent::Output { line } => lines.push(line.line),
            SyncEvent::CycleFinished { .. } => finished = true,
            _ => {}
        }
    }
    assert_eq!(lines, vec![format!("Comparing {}", a)]);
    assert!(finished);
}

// ── Mutual exclusion & cancellation ──────────────────────────────────

#[tokio::test]
async fn at_most_one_cycle_and_no_onboarding_during_sync() {
    let gate = Arc::new(Notify::new());
    let f = fixture(FakeExecutor::gated("AA:BB", gate.clone()), ScriptedPrompt::accepting());
    f.trust("h:22", "AA:BB");
    let a = f.local_dir("a");
    f.orch.targets().add(SyncTarget::new(&a, "/r", "h", "u")).unwrap();

    let started = f.executor.started.clone();
    let running = f.orch.spawn_force_sync();
    started.notified().await;
    assert_eq!(f.orch.state(), RunState::Synchronizing);

    assert!(!f.orch.perform_sync().await.ran);
    assert!(f.orch.begin_adding().is_none());
    let b = f.local_dir("b");
    let err = f
        .orch
        .onboard(SyncTarget::new(&b, "/r", "h", "u"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, SyncErrorKind::Busy);

    gate.notify_one();
    let report = running.await.unwrap();
    assert!(report.ran);
    assert_eq!(report.synced_count(), 1);
    assert_eq!(f.orch.state(), RunState::Idle);
    assert_eq!(f.executor.run_count(), 1);
}

#[tokio::test]
async fn quit_kills_running_executor_and_abandons_rest() {
    let gate = Arc::new(Notify::new());
    let f = fixture(FakeExecutor::gated("AA:BB", gate), ScriptedPrompt::accepting());
    f.trust("h:22", "AA:BB");
    let a = f.local_dir("a");
    let b = f.local_dir("b");
    f.orch.targets().add(SyncTarget::new(&a, "/r", "h", "u")).unwrap();
    f.orch.targets().add(SyncTarget::new(&b, "/r", "h", "u")).unwrap();

    let started = f.executor.started.clone();
    let running = f.orch.spawn_force_sync();
    started.notified().await;
    f.orch.quit();

    let report = running.await.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.targets.len(), 1);
    assert_eq!(report.targets[0].outcome, TargetOutcome::Cancelled);
    assert_eq!(f.executor.run_count(), 1);
    assert_eq!(f.orch.state(), RunState::Idle);
}

#[tokio::test]
async fn quit_during_changed_key_question_cancels_cycle() {
    let f = fixture(FakeExecutor::with_fingerprint("CC:DD"), ScriptedPrompt::silent());
    f.trust("h:22", "AA:BB");
    let a = f.local_dir("a");
    let b = f.local_dir("b");
    f.orch.targets().add(SyncTarget::new(&a, "/r", "h", "u")).unwrap();
    f.orch.targets().add(SyncTarget::new(&b, "/r", "h", "u")).unwrap();

    let asked = f.prompt.asked.clone();
    let running = f.orch.spawn_force_sync();
    asked.notified().await;
    f.orch.quit();

    let report = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("cycle must end once quit is requested")
        .unwrap();
    assert!(report.cancelled);
    assert_eq!(report.targets.len(), 1);
    assert_eq!(report.targets[0].outcome, TargetOutcome::Cancelled);
    assert_eq!(f.hosts.lookup("h:22").as_deref(), Some("AA:BB"));
    assert_eq!(f.executor.run_count(), 0);
    assert_eq!(f.orch.state(), RunState::Idle);
}

#[tokio::test]
async fn quit_during_first_contact_question_aborts_onboarding() {
    let f = fixture(FakeExecutor::with_fingerprint("AA:BB"), ScriptedPrompt::silent());
    let a = f.local_dir("a");

    let asked = f.prompt.asked.clone();
    let orch = f.orch.clone();
    let adding = tokio::spawn(async move { orch.onboard(SyncTarget::new(&a, "/r", "h", "u")).await });
    asked.notified().await;
    f.orch.quit();

    let err = tokio::time::timeout(Duration::from_secs(5), adding)
        .await
        .expect("onboarding must end once quit is requested")
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kind, SyncErrorKind::Cancelled);
    assert!(f.orch.targets().is_empty());
    assert!(f.hosts.is_empty());
    assert_eq!(f.orch.state(), RunState::Idle);
}

#[tokio::test]
async fn pause_does_not_block_forced_sync() {
    let f = fixture(FakeExecutor::with_fingerprint("AA:BB"), ScriptedPrompt::accepting());
    f.orch.set_paused(true);
    assert!(f.orch.force_sync().await.ran);
}

// ── Scheduler ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn scheduler_runs_after_grace_period_and_stops_on_quit() {
    let f = fixture(FakeExecutor::with_fingerprint("AA:BB"), ScriptedPrompt::accepting());
    let mut events = f.orch.subscribe();
    let scheduler = f.orch.spawn_scheduler();

    loop {
        if let SyncEvent::CycleFinished { report } = events.recv().await.unwrap() {
            assert!(report.ran);
            break;
        }
    }

    f.orch.quit();
    tokio::time::timeout(Duration::from_secs(5), scheduler)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn paused_scheduler_skips_cycles() {
    let f = fixture(FakeExecutor::with_fingerprint("AA:BB"), ScriptedPrompt::accepting());
    f.orch.set_interval_minutes(1).unwrap();
    f.orch.set_paused(true);
    let mut events = f.orch.subscribe();
    let scheduler = f.orch.spawn_scheduler();

    tokio::time::sleep(Duration::from_secs(5 * 60)).await;
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, SyncEvent::CycleFinished { .. }));
    }
    assert!(!f.prefs.has_key(LAST_SYNC_TIMESTAMP_UTC));

    f.orch.quit();
    scheduler.await.unwrap();
}
