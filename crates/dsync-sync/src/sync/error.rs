//! Sync-specific error type.

use dsync_prefs::prefs::PrefsError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Categorised synchronization error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncError {
    pub kind: SyncErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncErrorKind {
    /// A required target field is missing or malformed.
    InvalidConfig,
    /// A target with the same identity key already exists.
    DuplicateTarget,
    /// The local directory nests with another target's local directory.
    OverlappingTarget,
    /// The local directory does not exist.
    LocalDirectoryMissing,
    /// The endpoint produced no fingerprint.
    FingerprintScanFailed,
    /// The operator declined to trust the endpoint.
    TrustRejected,
    /// The executor ran but reported failure.
    ExecutorFailed,
    /// The executor process could not be started.
    ProcessSpawnFailed,
    /// Another onboarding or cycle is in progress.
    Busy,
    /// Shutdown was requested while the operation was running.
    Cancelled,
    /// Target not found.
    NotFound,
    /// Local I/O error.
    IoError,
    /// Preference or known-hosts persistence failed.
    Persistence,
    /// The executor binary could not be located.
    ToolNotFound,
}

pub type SyncResult<T> = Result<T, SyncError>;

// ── Construction helpers ─────────────────────────────────────────────

impl SyncError {
    pub fn new(kind: SyncErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
        }
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::InvalidConfig, msg)
    }

    pub fn duplicate(msg: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::DuplicateTarget, msg)
    }

    pub fn overlapping(msg: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::OverlappingTarget, msg)
    }

    pub fn local_directory_missing(msg: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::LocalDirectoryMissing, msg)
    }

    pub fn scan_failed(msg: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::FingerprintScanFailed, msg)
    }

    pub fn trust_rejected(msg: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::TrustRejected, msg)
    }

    pub fn executor_failed(msg: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::ExecutorFailed, msg)
    }

    pub fn spawn_failed(msg: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::ProcessSpawnFailed, msg)
    }

    pub fn busy(msg: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::Busy, msg)
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::Cancelled, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::NotFound, msg)
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::IoError, msg)
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::Persistence, msg)
    }

    pub fn tool_not_found(msg: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::ToolNotFound, msg)
    }

    /// Validation failures are reported to the caller and never partially applied.
    pub fn is_validation(&self) -> bool {
        matches!(
            self.kind,
            SyncErrorKind::InvalidConfig
                | SyncErrorKind::DuplicateTarget
                | SyncErrorKind::OverlappingTarget
                | SyncErrorKind::LocalDirectoryMissing
        )
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for SyncError {}

impl From<SyncError> for String {
    fn from(e: SyncError) -> String {
        e.message
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        SyncError::io(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::persistence(e.to_string())
    }
}

impl From<PrefsError> for SyncError {
    fn from(e: PrefsError) -> Self {
        SyncError::persistence(e.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let e = SyncError::duplicate("/a:/r already exists");
        assert_eq!(e.to_string(), "DuplicateTarget: /a:/r already exists");
        let s: String = e.into();
        assert_eq!(s, "/a:/r already exists");
    }

    #[test]
    fn validation_kinds() {
        assert!(SyncError::overlapping("x").is_validation());
        assert!(!SyncError::trust_rejected("x").is_validation());
    }
}
