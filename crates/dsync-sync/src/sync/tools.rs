//! Executor binary discovery.

use crate::sync::error::*;
use log::{debug, info};
use std::path::{Path, PathBuf};

/// Name looked up on `PATH` when nothing is configured.
pub const EXECUTOR_BINARY: &str = "dirsync-executor";

/// Resolve the executor binary.
///
/// Tried in order: the path given on the command line, the path stored in
/// the preferences, then `dirsync-executor` on `PATH`. A command-line path
/// that does not exist is an error rather than a reason to fall back.
pub fn locate_executor(configured: Option<&str>, cli_override: Option<&Path>) -> SyncResult<PathBuf> {
    if let Some(path) = cli_override {
        if path.is_file() {
            debug!("Using executor {} from the command line", path.display());
            return Ok(path.to_path_buf());
        }
        return Err(SyncError::tool_not_found(format!(
            "Executor {} does not exist",
            path.display()
        )));
    }

    if let Some(path) = configured.map(str::trim).filter(|p| !p.is_empty()) {
        let path = PathBuf::from(path);
        if path.is_file() {
            debug!("Using configured executor {}", path.display());
            return Ok(path);
        }
        info!("Configured executor {} no longer exists", path.display());
    }

    which::which(EXECUTOR_BINARY).map_err(|e| {
        SyncError::tool_not_found(format!(
            "Could not locate '{}' ({}). Install it or pass --executor <path>",
            EXECUTOR_BINARY, e
        ))
    })
}

/// Library location passed through to the executor; blank means none.
pub fn library_path(configured: &str) -> Option<String> {
    let trimmed = configured.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
