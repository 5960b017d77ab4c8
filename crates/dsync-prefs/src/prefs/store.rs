// ── JsonPrefs – one preference file ──────────────────────────────────────────

use crate::prefs::protect::Protector;
use crate::prefs::types::*;
use crate::prefs::value::PrefValue;
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// String → string preference map bound to a single JSON file.
///
/// Mutations only touch memory; the file is rewritten by [`JsonPrefs::save`]
/// or [`JsonPrefs::save_async`]. Saving re-reads the file first and only
/// overlays the keys this instance changed since its last load or save, so
/// another process sharing the file keeps the keys it wrote in between.
/// Within one process concurrent `set` and `save` calls resolve as last
/// writer wins.
pub struct JsonPrefs {
    path: PathBuf,
    entries: RwLock<Entries>,
    protector: Option<Arc<Protector>>,
    /// Held from the re-read to the write so saves never interleave.
    save_lock: Mutex<()>,
}

#[derive(Default)]
struct Entries {
    values: HashMap<String, String>,
    /// Keys set or deleted since the last load or save.
    touched: HashSet<String>,
    /// `delete_all` ran; the file's keys are not merged back.
    cleared: bool,
}

impl Entries {
    fn replace(&mut self, values: HashMap<String, String>) {
        self.values = values;
        self.touched.clear();
        self.cleared = false;
    }

    /// Overlay local changes on the file's content and adopt the result.
    /// Without a readable file the local map is written as is.
    fn merge(&mut self, on_disk: Option<HashMap<String, String>>) -> BTreeMap<String, String> {
        let mut merged = match on_disk {
            _ if self.cleared => HashMap::new(),
            Some(map) => map,
            None => self.values.clone(),
        };
        for key in self.touched.drain() {
            match self.values.get(&key) {
                Some(value) => merged.insert(key, value.clone()),
                None => merged.remove(&key),
            };
        }
        self.cleared = false;
        self.values = merged;
        self.values.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

fn parse_entries(json: &str) -> Result<HashMap<String, String>, String> {
    serde_json::from_str::<HashMap<String, String>>(json).map_err(|e| e.to_string())
}

impl JsonPrefs {
    /// Open the store at `path`, loading whatever is already there.
    ///
    /// A missing or unreadable file leaves the store empty; load problems are
    /// logged and never returned.
    pub fn open(path: impl Into<PathBuf>, protector: Option<Arc<Protector>>) -> Self {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = fs::create_dir_all(parent) {
                    warn!("Failed to create preference directory {}: {}", parent.display(), e);
                }
            }
        }
        let prefs = Self {
            path,
            entries: RwLock::new(Entries::default()),
            protector,
            save_lock: Mutex::new(()),
        };
        prefs.load();
        prefs
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the backing file, discarding unsaved changes. Returns `true`
    /// when the file was parsed; the in-memory map then mirrors it exactly.
    pub fn load(&self) -> bool {
        if !self.path.exists() {
            return false;
        }
        let parsed = fs::read_to_string(&self.path)
            .map_err(|e| e.to_string())
            .and_then(|json| parse_entries(&json));
        match parsed {
            Ok(map) => {
                self.write_entries().replace(map);
                debug!("Loaded preferences from {}", self.path.display());
                true
            }
            Err(e) => {
                warn!("Ignoring unreadable preference file {}: {}", self.path.display(), e);
                false
            }
        }
    }

    // ── Typed access ─────────────────────────────────────────────────────────

    /// Value under `key` parsed as `T`, or `default` when absent or unparsable.
    pub fn get<T: PrefValue>(&self, key: &str, default: T) -> T {
        self.read_entries()
            .values
            .get(key)
            .and_then(|raw| T::from_pref_str(raw))
            .unwrap_or(default)
    }

    /// Raw string under `key`, or an empty string.
    pub fn get_string(&self, key: &str) -> String {
        self.get(key, String::new())
    }

    /// Upsert `key` with the canonical string form of `value`.
    pub fn set<T: PrefValue>(&self, key: &str, value: T) -> PrefsResult<()> {
        if key.is_empty() {
            return Err(PrefsError::invalid_key("Preference key must not be empty"));
        }
        let mut entries = self.write_entries();
        entries.values.insert(key.to_string(), value.to_pref_string());
        entries.touched.insert(key.to_string());
        Ok(())
    }

    pub fn has_key(&self, key: &str) -> bool {
        !key.is_empty() && self.read_entries().values.contains_key(key)
    }

    /// Remove `key`; `false` when it was not present.
    pub fn delete_key(&self, key: &str) -> bool {
        let mut entries = self.write_entries();
        entries.touched.insert(key.to_string());
        entries.values.remove(key).is_some()
    }

    pub fn delete_all(&self) {
        let mut entries = self.write_entries();
        entries.values.clear();
        entries.touched.clear();
        entries.cleared = true;
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read_entries().values.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.read_entries().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_entries().values.is_empty()
    }

    // ── Protected values ─────────────────────────────────────────────────────

    pub fn protector(&self) -> Option<&Arc<Protector>> {
        self.protector.as_ref()
    }

    /// Encrypt `plaintext` and store the envelope under `key`.
    pub fn set_protected(&self, key: &str, plaintext: &str) -> PrefsResult<()> {
        let protector = self
            .protector
            .as_ref()
            .ok_or_else(|| PrefsError::key_material("No protector configured for this store"))?;
        let envelope = protector.protect(plaintext)?;
        self.set(key, envelope)
    }

    /// Decrypt the envelope under `key`. `Ok(None)` when the key is absent or empty.
    pub fn get_protected(&self, key: &str) -> PrefsResult<Option<String>> {
        let raw = self.get_string(key);
        if raw.is_empty() {
            return Ok(None);
        }
        let protector = self
            .protector
            .as_ref()
            .ok_or_else(|| PrefsError::key_material("No protector configured for this store"))?;
        protector.unprotect(&raw).map(Some)
    }

    // ── Persistence ──────────────────────────────────────────────────────────

    /// Merge local changes into the file's current content and serialise
    /// the result.
    fn merged_json(&self, on_disk: Option<String>) -> PrefsResult<String> {
        let disk = match on_disk.as_deref().map(parse_entries) {
            Some(Ok(map)) => Some(map),
            Some(Err(e)) => {
                warn!("Overwriting unreadable preference file {}: {}", self.path.display(), e);
                None
            }
            None => None,
        };
        let snapshot = self.write_entries().merge(disk);
        Ok(serde_json::to_string_pretty(&snapshot)?)
    }

    /// Write the current map, keeping keys other writers stored meanwhile.
    pub fn save(&self) -> PrefsResult<()> {
        let _serial = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let json = self.merged_json(fs::read_to_string(&self.path).ok())?;
        fs::write(&self.path, json)
            .map_err(|e| PrefsError::io(format!("Failed to write {}: {}", self.path.display(), e)))
    }

    /// [`JsonPrefs::save`] for async callers. The file is small, so the
    /// merge and write run inline and share the same lock.
    pub async fn save_async(&self) -> PrefsResult<()> {
        self.save()
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for JsonPrefs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonPrefs")
            .field("path", &self.path)
            .field("entries", &self.len())
            .finish()
    }
}
