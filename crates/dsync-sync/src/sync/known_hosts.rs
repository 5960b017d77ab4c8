//! Persisted `host:port` → fingerprint records.

use crate::sync::error::*;
use log::{info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Registry key for an endpoint.
pub fn endpoint_key(host: &str, port: u16) -> String {
    format!("{}:{}", host, port)
}

pub struct KnownHosts {
    path: PathBuf,
    entries: RwLock<Records>,
    save_lock: Mutex<()>,
}

#[derive(Default)]
struct Records {
    map: BTreeMap<String, String>,
    /// Endpoints accepted or forgotten since the last load or save.
    touched: BTreeSet<String>,
}

impl Records {
    fn replace(&mut self, map: BTreeMap<String, String>) {
        self.map = map;
        self.touched.clear();
    }
}

impl KnownHosts {
    /// Bind to `path` without touching the file; call [`KnownHosts::load`] next.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: RwLock::new(Records::default()),
            save_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file into memory.
    ///
    /// A missing file is created as `{}`; a corrupt one is overwritten with
    /// `{}`. Either way the registry ends up usable and nothing is returned.
    pub fn load(&self) {
        if !self.path.exists() {
            self.write_entries().replace(BTreeMap::new());
            self.reset_file();
            return;
        }
        match self.read_file() {
            Ok(map) => {
                info!("Loaded {} known host(s) from {}", map.len(), self.path.display());
                self.write_entries().replace(map);
            }
            Err(e) => {
                warn!(
                    "Known hosts file {} is unreadable ({}); starting with an empty registry",
                    self.path.display(),
                    e
                );
                self.write_entries().replace(BTreeMap::new());
                self.reset_file();
            }
        }
    }

    fn read_file(&self) -> Result<BTreeMap<String, String>, String> {
        fs::read_to_string(&self.path)
            .map_err(|e| e.to_string())
            .and_then(|json| {
                serde_json::from_str::<BTreeMap<String, String>>(&json).map_err(|e| e.to_string())
            })
    }

    fn reset_file(&self) {
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Err(e) = fs::write(&self.path, "{}") {
            warn!("Failed to initialise {}: {}", self.path.display(), e);
        }
    }

    /// Pretty-print the map over the file. Records another process wrote
    /// since the last load are kept unless this instance changed the same
    /// endpoint.
    pub fn save(&self) -> SyncResult<()> {
        let _serial = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let on_disk = self.read_file().ok();
        let json = {
            let mut records = self.write_entries();
            let records = &mut *records;
            let mut merged = on_disk.unwrap_or_else(|| records.map.clone());
            for endpoint in std::mem::take(&mut records.touched) {
                match records.map.get(&endpoint) {
                    Some(fingerprint) => merged.insert(endpoint, fingerprint.clone()),
                    None => merged.remove(&endpoint),
                };
            }
            records.map = merged;
            serde_json::to_string_pretty(&records.map)?
        };
        fs::write(&self.path, json).map_err(|e| {
            SyncError::persistence(format!("Failed to write {}: {}", self.path.display(), e))
        })
    }

    pub fn lookup(&self, endpoint: &str) -> Option<String> {
        self.read_entries().map.get(endpoint).cloned()
    }

    /// Unconditional upsert. Only the trust verifier calls this, and only
    /// after the operator accepted the fingerprint.
    pub(crate) fn accept(&self, endpoint: &str, fingerprint: &str) {
        let mut records = self.write_entries();
        records
            .map
            .insert(endpoint.to_string(), fingerprint.to_string());
        records.touched.insert(endpoint.to_string());
    }

    /// Drop the record for `endpoint`; the next contact prompts again.
    pub fn forget(&self, endpoint: &str) -> bool {
        let mut records = self.write_entries();
        records.touched.insert(endpoint.to_string());
        records.map.remove(endpoint).is_some()
    }

    pub fn entries(&self) -> Vec<(String, String)> {
        self.read_entries()
            .map
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read_entries().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_entries().map.is_empty()
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, Records> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, Records> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}
