//! Preference keys, file names and defaults shared by every component.

use std::time::Duration;

// ── Preference keys (Config.json) ────────────────────────────────────

pub const CLIENT_ID: &str = "ClientId";
pub const LAST_SYNC_TIMESTAMP_UTC: &str = "LastSyncTimestampUTC";
pub const SYNCHRONIZED_DIRECTORIES: &str = "SynchronizedDirectories";
pub const SYNC_INTERVAL_MINUTES: &str = "SyncIntervalMinutes";
pub const EXECUTOR_PATH: &str = "ExecutorPath";
pub const EXECUTOR_LIBRARY_PATH: &str = "ExecutorLibraryPath";
pub const VERSION_NUMBER_MAJOR: &str = "VersionNumberMajor";
pub const VERSION_NUMBER_MINOR: &str = "VersionNumberMinor";
pub const VERSION_NUMBER_PATCH: &str = "VersionNumberPatch";
pub const MAX_CONSOLE_OUTPUT_LINE_COUNT: &str = "MaxConsoleOutputLineCount";

// ── Files under the data directory ───────────────────────────────────

pub const APP_DIR_NAME: &str = "DirSyncSFTP";
pub const CONFIG_STORE_NAME: &str = "Config";
pub const CONFIG_FILE_NAME: &str = "Config.json";
pub const KNOWN_HOSTS_FILE_NAME: &str = "KnownHosts.json";
pub const STATE_DIR_NAME: &str = "SynchronizedDirectories";
pub const KEY_FILE_NAME: &str = "Config.key";
pub const SALT_FILE_NAME: &str = "Config.salt";

// ── Defaults ─────────────────────────────────────────────────────────

pub const DEFAULT_PORT: u16 = 22;
pub const DEFAULT_SYNC_INTERVAL_MINUTES: u32 = 15;
pub const MIN_SYNC_INTERVAL_MINUTES: u32 = 1;
pub const MAX_SYNC_INTERVAL_MINUTES: u32 = 60;
pub const DEFAULT_MAX_CONSOLE_OUTPUT_LINE_COUNT: u32 = 1024;

/// Grace period before the first scheduled cycle, and before the follow-up
/// cycle after a target is added.
pub const INITIAL_SYNC_DELAY: Duration = Duration::from_millis(1024);

/// Clamp a configured interval into the supported range.
pub fn clamp_interval_minutes(minutes: i64) -> u32 {
    minutes.clamp(
        MIN_SYNC_INTERVAL_MINUTES as i64,
        MAX_SYNC_INTERVAL_MINUTES as i64,
    ) as u32
}
