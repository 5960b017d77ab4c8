//! Startup: data directory layout, key material, preference defaults and
//! executor discovery.

use dsync_prefs::prefs::protect::PBKDF2_ITERATIONS;
use dsync_prefs::prefs::{JsonPrefs, PrefsRegistry, Protector};
use dsync_sync::sync::keys::*;
use dsync_sync::sync::tools::{library_path, locate_executor};
use dsync_sync::sync::{
    KnownHosts, OrchestratorConfig, ProcessExecutor, SyncError, SyncExecutor, SyncOrchestrator,
    SyncResult, TargetRegistry, TrustPrompt,
};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Environment variable that switches key material to a passphrase.
pub const PASSPHRASE_ENV: &str = "DIRSYNC_PASSPHRASE";

// ── Paths ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub base_dir: PathBuf,
    pub config_file: PathBuf,
    pub known_hosts_file: PathBuf,
    pub state_dir: PathBuf,
    pub key_file: PathBuf,
    pub salt_file: PathBuf,
}

impl AppPaths {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            config_file: base_dir.join(CONFIG_FILE_NAME),
            known_hosts_file: base_dir.join(KNOWN_HOSTS_FILE_NAME),
            state_dir: base_dir.join(STATE_DIR_NAME),
            key_file: base_dir.join(KEY_FILE_NAME),
            salt_file: base_dir.join(SALT_FILE_NAME),
            base_dir,
        }
    }

    /// `--data-dir` / `DIRSYNC_HOME` if given, else the per-user data directory.
    pub fn resolve(explicit: Option<PathBuf>) -> SyncResult<Self> {
        if let Some(dir) = explicit {
            return Ok(Self::new(dir));
        }
        dirs::data_local_dir()
            .map(|d| Self::new(d.join(APP_DIR_NAME)))
            .ok_or_else(|| {
                SyncError::invalid_config("No per-user data directory; pass --data-dir")
            })
    }

    fn create_dirs(&self) -> SyncResult<()> {
        for dir in [&self.base_dir, &self.state_dir] {
            fs::create_dir_all(dir).map_err(|e| {
                SyncError::io(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }
}

fn open_protector(paths: &AppPaths, passphrase: Option<&str>) -> SyncResult<Protector> {
    let protector = match passphrase.filter(|p| !p.is_empty()) {
        Some(pass) => Protector::from_passphrase(pass, &paths.salt_file, PBKDF2_ITERATIONS)?,
        None => Protector::load_or_create_key_file(&paths.key_file)?,
    };
    Ok(protector)
}

// ── App ──────────────────────────────────────────────────────────────

/// Everything opened at startup, handed to the commands and the daemon.
pub struct App {
    pub paths: AppPaths,
    pub prefs: Arc<JsonPrefs>,
    pub known_hosts: Arc<KnownHosts>,
    pub targets: Arc<TargetRegistry>,
}

impl App {
    /// Open the data directory and bring the preferences up to date.
    pub fn open(paths: AppPaths, passphrase: Option<&str>) -> SyncResult<Self> {
        paths.create_dirs()?;

        let known_hosts = Arc::new(KnownHosts::new(&paths.known_hosts_file));
        known_hosts.load();

        let protector = Arc::new(open_protector(&paths, passphrase)?);
        let registry = PrefsRegistry::new(&paths.base_dir, Some(protector));
        let prefs = registry.open(CONFIG_STORE_NAME);
        seed_defaults(&prefs)?;
        prefs.save()?;

        let targets = Arc::new(TargetRegistry::new(prefs.clone()));
        targets.load()?;

        info!("Data directory: {}", paths.base_dir.display());
        Ok(Self {
            paths,
            prefs,
            known_hosts,
            targets,
        })
    }

    /// Locate the executor binary, remembering a newly discovered location.
    pub fn resolve_executor(&self, cli_override: Option<&Path>) -> SyncResult<ProcessExecutor> {
        let configured = self.prefs.get_string(EXECUTOR_PATH);
        let program = locate_executor(Some(configured.as_str()), cli_override)?;
        let resolved = program.to_string_lossy().into_owned();
        if resolved != configured {
            self.prefs.set(EXECUTOR_PATH, resolved)?;
            self.prefs.save()?;
            info!("Executor location stored: {}", program.display());
        }
        let library = library_path(&self.prefs.get_string(EXECUTOR_LIBRARY_PATH));
        Ok(ProcessExecutor::new(program, library))
    }

    pub fn set_executor(&self, path: &Path, library: Option<&str>) -> SyncResult<()> {
        if !path.is_file() {
            return Err(SyncError::tool_not_found(format!(
                "Executor {} does not exist",
                path.display()
            )));
        }
        self.prefs
            .set(EXECUTOR_PATH, path.to_string_lossy().into_owned())?;
        if let Some(lib) = library {
            self.prefs.set(EXECUTOR_LIBRARY_PATH, lib.trim().to_string())?;
        }
        self.prefs.save()?;
        Ok(())
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig::new(&self.paths.state_dir)
    }

    pub fn orchestrator(
        &self,
        executor: Arc<dyn SyncExecutor>,
        prompt: Arc<dyn TrustPrompt>,
        config: OrchestratorConfig,
    ) -> Arc<SyncOrchestrator> {
        SyncOrchestrator::new(
            self.prefs.clone(),
            self.targets.clone(),
            self.known_hosts.clone(),
            executor,
            prompt,
            config,
        )
    }

    pub fn max_console_lines(&self) -> u32 {
        self.prefs.get(
            MAX_CONSOLE_OUTPUT_LINE_COUNT,
            DEFAULT_MAX_CONSOLE_OUTPUT_LINE_COUNT,
        )
    }
}

fn version_part(raw: &str) -> i32 {
    raw.parse().unwrap_or(0)
}

fn seed_defaults(prefs: &JsonPrefs) -> SyncResult<()> {
    prefs.set(VERSION_NUMBER_MAJOR, version_part(env!("CARGO_PKG_VERSION_MAJOR")))?;
    prefs.set(VERSION_NUMBER_MINOR, version_part(env!("CARGO_PKG_VERSION_MINOR")))?;
    prefs.set(VERSION_NUMBER_PATCH, version_part(env!("CARGO_PKG_VERSION_PATCH")))?;

    if prefs.get_string(CLIENT_ID).trim().is_empty() {
        let id = uuid::Uuid::new_v4().to_string().to_uppercase();
        info!("Generated client id {}", id);
        prefs.set(CLIENT_ID, id)?;
    }
    if !prefs.has_key(MAX_CONSOLE_OUTPUT_LINE_COUNT) {
        prefs.set(MAX_CONSOLE_OUTPUT_LINE_COUNT, DEFAULT_MAX_CONSOLE_OUTPUT_LINE_COUNT)?;
    }
    if !prefs.has_key(SYNCHRONIZED_DIRECTORIES) {
        prefs.set_protected(SYNCHRONIZED_DIRECTORIES, "[]")?;
    }

    let stored = prefs.get::<i64>(SYNC_INTERVAL_MINUTES, DEFAULT_SYNC_INTERVAL_MINUTES as i64);
    let clamped = clamp_interval_minutes(stored);
    if i64::from(clamped) != stored {
        warn!("Sync interval {} out of range; using {}", stored, clamped);
    }
    prefs.set(SYNC_INTERVAL_MINUTES, clamped)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_hang_off_base_dir() {
        let p = AppPaths::new("/data/DirSyncSFTP");
        assert_eq!(p.config_file, PathBuf::from("/data/DirSyncSFTP/Config.json"));
        assert_eq!(p.known_hosts_file, PathBuf::from("/data/DirSyncSFTP/KnownHosts.json"));
        assert_eq!(p.state_dir, PathBuf::from("/data/DirSyncSFTP/SynchronizedDirectories"));
    }

    #[test]
    fn explicit_dir_wins() {
        let p = AppPaths::resolve(Some(PathBuf::from("/x"))).unwrap();
        assert_eq!(p.base_dir, PathBuf::from("/x"));
    }

    #[test]
    fn version_parts_parse() {
        assert_eq!(version_part("3"), 3);
        assert_eq!(version_part("x"), 0);
    }
}
