// ── PrefsRegistry – named stores under one directory ─────────────────────────

use crate::prefs::protect::Protector;
use crate::prefs::store::JsonPrefs;
use log::debug;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Hands out one shared [`JsonPrefs`] per store name.
///
/// `open("Config")` and `open("Config.json")` resolve to the same file and the
/// same instance.
pub struct PrefsRegistry {
    dir: PathBuf,
    protector: Option<Arc<Protector>>,
    stores: Mutex<HashMap<String, Arc<JsonPrefs>>>,
}

impl PrefsRegistry {
    pub fn new(dir: impl Into<PathBuf>, protector: Option<Arc<Protector>>) -> Self {
        Self {
            dir: dir.into(),
            protector,
            stores: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Open (or reuse) the store called `name`.
    pub fn open(&self, name: &str) -> Arc<JsonPrefs> {
        let file_name = if name.ends_with(".json") {
            name.to_string()
        } else {
            format!("{}.json", name)
        };
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        stores
            .entry(file_name.clone())
            .or_insert_with(|| {
                debug!("Opening preference store {}", file_name);
                Arc::new(JsonPrefs::open(self.dir.join(&file_name), self.protector.clone()))
            })
            .clone()
    }

    /// Names of the stores opened so far.
    pub fn open_stores(&self) -> Vec<String> {
        let stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = stores.keys().cloned().collect();
        names.sort();
        names
    }
}
