//! Synchronization target registry.
//!
//! The whole collection lives in one preference entry
//! (`SynchronizedDirectories`) as an encrypted JSON array. Mutations are
//! validated under the write lock and persisted before the lock is released,
//! so a failed add or replace leaves both memory and disk untouched.

use crate::sync::error::*;
use crate::sync::keys::SYNCHRONIZED_DIRECTORIES;
use crate::sync::types::SyncTarget;
use dsync_prefs::prefs::JsonPrefs;
use log::{info, warn};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

type TargetMap = BTreeMap<String, SyncTarget>;

pub struct TargetRegistry {
    prefs: Arc<JsonPrefs>,
    targets: RwLock<TargetMap>,
}

// ── Validation ───────────────────────────────────────────────────────

/// Required fields, in the order they are reported.
pub fn validate_fields(candidate: &SyncTarget) -> SyncResult<()> {
    if candidate.host.trim().is_empty() {
        return Err(SyncError::invalid_config("Host must not be empty"));
    }
    if candidate.username.trim().is_empty() {
        return Err(SyncError::invalid_config("Username must not be empty"));
    }
    if candidate.local_directory.trim().is_empty() {
        return Err(SyncError::invalid_config("Local directory must not be empty"));
    }
    Ok(())
}

/// `true` when one directory equals or contains the other, compared by path component.
pub fn directories_overlap(a: &str, b: &str) -> bool {
    let (a, b) = (Path::new(a), Path::new(b));
    a.starts_with(b) || b.starts_with(a)
}

/// Full validation of `candidate` against `existing`, skipping the entry
/// stored under `replacing` (if any).
fn validate_against(existing: &TargetMap, candidate: &SyncTarget, replacing: Option<&str>) -> SyncResult<()> {
    validate_fields(candidate)?;
    let key = candidate.identity_key();
    if replacing != Some(key.as_str()) && existing.contains_key(&key) {
        return Err(SyncError::duplicate(format!(
            "A synchronization target for {} already exists",
            key
        )));
    }
    for (other_key, other) in existing {
        if Some(other_key.as_str()) == replacing {
            continue;
        }
        if directories_overlap(&candidate.local_directory, &other.local_directory) {
            return Err(SyncError::overlapping(format!(
                "Local directory {} overlaps with {} of target {}",
                candidate.local_directory, other.local_directory, other_key
            )));
        }
    }
    Ok(())
}

/// Accepts either a JSON array of targets or an object keyed by identity key.
/// Entries that do not decode are skipped with a warning.
fn parse_targets(json: &str) -> SyncResult<TargetMap> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let items: Vec<serde_json::Value> = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
        serde_json::Value::Null => Vec::new(),
        other => {
            return Err(SyncError::persistence(format!(
                "Unexpected target collection type: {}",
                other
            )))
        }
    };

    let mut map = TargetMap::new();
    for item in items {
        match serde_json::from_value::<SyncTarget>(item) {
            Ok(target) => {
                map.insert(target.identity_key(), target);
            }
            Err(e) => warn!("Skipping undecodable synchronization target: {}", e),
        }
    }
    Ok(map)
}

impl TargetRegistry {
    pub fn new(prefs: Arc<JsonPrefs>) -> Self {
        Self {
            prefs,
            targets: RwLock::new(TargetMap::new()),
        }
    }

    /// Decrypt and decode the persisted collection.
    ///
    /// An absent or empty entry, or a collection that decrypts but does not
    /// parse, yields an empty registry. A value that cannot be decrypted is
    /// returned as an error and leaves the registry untouched, so a wrong key
    /// never leads to the stored targets being overwritten.
    pub fn load(&self) -> SyncResult<usize> {
        let plaintext = self.prefs.get_protected(SYNCHRONIZED_DIRECTORIES).map_err(|e| {
            SyncError::persistence(format!(
                "Stored synchronization targets could not be decrypted: {}",
                e.message
            ))
        })?;

        let map = match plaintext.as_deref().map(str::trim) {
            None | Some("") => TargetMap::new(),
            Some(json) => parse_targets(json).unwrap_or_else(|e| {
                warn!("Stored synchronization targets are corrupt ({}); starting empty", e.message);
                TargetMap::new()
            }),
        };
        let count = map.len();
        *self.write_targets() = map;
        info!("Loaded {} synchronization target(s)", count);
        Ok(count)
    }

    /// Encrypt the current collection into the preference entry and flush the store.
    pub fn save(&self) -> SyncResult<()> {
        let targets = self.read_targets();
        self.persist(&targets)
    }

    fn persist(&self, targets: &TargetMap) -> SyncResult<()> {
        let list: Vec<&SyncTarget> = targets.values().collect();
        let json = serde_json::to_string(&list)?;
        self.prefs.set_protected(SYNCHRONIZED_DIRECTORIES, &json)?;
        self.prefs.save()?;
        Ok(())
    }

    /// Check `candidate` against the registry without changing anything.
    pub fn validate(&self, candidate: &SyncTarget) -> SyncResult<()> {
        validate_against(&self.read_targets(), candidate, None)
    }

    /// Validate, insert and persist.
    pub fn add(&self, candidate: SyncTarget) -> SyncResult<()> {
        let mut targets = self.write_targets();
        validate_against(&targets, &candidate, None)?;
        let key = candidate.identity_key();
        targets.insert(key.clone(), candidate);
        if let Err(e) = self.persist(&targets) {
            targets.remove(&key);
            return Err(e);
        }
        info!("Added synchronization target {}", key);
        Ok(())
    }

    /// Replace an existing target wholesale. The replacement must keep the
    /// identity key and still satisfy the overlap invariant.
    pub fn replace(&self, target: SyncTarget) -> SyncResult<()> {
        let mut targets = self.write_targets();
        let key = target.identity_key();
        if !targets.contains_key(&key) {
            return Err(SyncError::not_found(format!("No synchronization target {}", key)));
        }
        validate_against(&targets, &target, Some(&key))?;
        let previous = targets.insert(key.clone(), target);
        if let Err(e) = self.persist(&targets) {
            if let Some(previous) = previous {
                targets.insert(key, previous);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Remove and persist. `Ok(false)` when nothing was stored under `key`.
    pub fn remove(&self, key: &str) -> SyncResult<bool> {
        let mut targets = self.write_targets();
        let Some(removed) = targets.remove(key) else {
            return Ok(false);
        };
        if let Err(e) = self.persist(&targets) {
            targets.insert(key.to_string(), removed);
            return Err(e);
        }
        info!("Removed synchronization target {}", key);
        Ok(true)
    }

    pub fn get(&self, key: &str) -> Option<SyncTarget> {
        self.read_targets().get(key).cloned()
    }

    /// Snapshot of all targets, ordered by identity key.
    pub fn list(&self) -> Vec<SyncTarget> {
        self.read_targets().values().cloned().collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.read_targets().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read_targets().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_targets().is_empty()
    }

    fn read_targets(&self) -> RwLockReadGuard<'_, TargetMap> {
        self.targets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_targets(&self) -> RwLockWriteGuard<'_, TargetMap> {
        self.targets.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsync_prefs::prefs::protect::KEY_LEN;
    use dsync_prefs::prefs::Protector;

    fn registry(dir: &tempfile::TempDir) -> TargetRegistry {
        let prefs = Arc::new(JsonPrefs::open(
            dir.path().join("Config.json"),
            Some(Arc::new(Protector::from_key([5u8; KEY_LEN]))),
        ));
        TargetRegistry::new(prefs)
    }

    #[test]
    fn overlap_is_component_wise() {
        assert!(directories_overlap("/a", "/a/b"));
        assert!(directories_overlap("/a/b", "/a"));
        assert!(directories_overlap("/a", "/a/"));
        assert!(!directories_overlap("/a", "/ab"));
        assert!(!directories_overlap("/a/b", "/a/c"));
    }

    #[test]
    fn field_validation_order() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(&dir);
        let err = reg.add(SyncTarget::new("", "/r", "", "")).unwrap_err();
        assert!(err.message.contains("Host"));
        let err = reg.add(SyncTarget::new("", "/r", "h", "")).unwrap_err();
        assert!(err.message.contains("Username"));
        let err = reg.add(SyncTarget::new("", "/r", "h", "u")).unwrap_err();
        assert!(err.message.contains("Local directory"));
        assert!(reg.is_empty());
    }

    #[test]
    fn duplicate_is_rejected_before_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(&dir);
        reg.add(SyncTarget::new("/a", "/r", "h", "u")).unwrap();
        let err = reg.add(SyncTarget::new("/a", "/r", "h2", "u2")).unwrap_err();
        assert_eq!(err.kind, SyncErrorKind::DuplicateTarget);
    }

    #[test]
    fn nested_local_directories_are_rejected_both_ways() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(&dir);
        reg.add(SyncTarget::new("/a/b", "/r", "h", "u")).unwrap();

        let err = reg.add(SyncTarget::new("/a", "/r2", "h", "u")).unwrap_err();
        assert_eq!(err.kind, SyncErrorKind::OverlappingTarget);
        let err = reg.add(SyncTarget::new("/a/b/c", "/r3", "h", "u")).unwrap_err();
        assert_eq!(err.kind, SyncErrorKind::OverlappingTarget);
        let err = reg.add(SyncTarget::new("/a/b", "/other", "h", "u")).unwrap_err();
        assert_eq!(err.kind, SyncErrorKind::OverlappingTarget);

        reg.add(SyncTarget::new("/a/bc", "/r4", "h", "u")).unwrap();
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn remove_reports_presence() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(&dir);
        reg.add(SyncTarget::new("/a", "/r", "h", "u")).unwrap();
        assert!(reg.remove("/a:/r").unwrap());
        assert!(!reg.remove("/a:/r").unwrap());
    }

    #[test]
    fn replace_requires_existing_key() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(&dir);
        reg.add(SyncTarget::new("/a", "/r", "h", "u")).unwrap();
        reg.add(SyncTarget::new("/b", "/r", "h", "u")).unwrap();

        reg.replace(SyncTarget::new("/a", "/r", "h", "u").with_port(2222)).unwrap();
        assert_eq!(reg.get("/a:/r").unwrap().port, 2222);

        let err = reg.replace(SyncTarget::new("/c", "/r", "h", "u")).unwrap_err();
        assert_eq!(err.kind, SyncErrorKind::NotFound);
    }

    #[test]
    fn persisted_value_is_encrypted() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(&dir);
        reg.add(SyncTarget::new("/a", "/r", "h", "u").with_password("hunter2"))
            .unwrap();
        let on_disk = std::fs::read_to_string(dir.path().join("Config.json")).unwrap();
        assert!(on_disk.contains(SYNCHRONIZED_DIRECTORIES));
        assert!(!on_disk.contains("hunter2"));
        assert!(!on_disk.contains("localDirectory"));
    }

    #[test]
    fn object_keyed_collection_is_accepted() {
        let json = r#"{"/a:/r":{"localDirectory":"/a","remoteDirectory":"/r","host":"h","port":"x","username":"u"}}"#;
        let map = parse_targets(json).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["/a:/r"].port, 22);
    }

    #[test]
    fn undecodable_entries_are_skipped() {
        let json = r#"[{"localDirectory":"/a","remoteDirectory":"/r","host":"h","username":"u"},{"bogus":true}]"#;
        assert_eq!(parse_targets(json).unwrap().len(), 1);
    }

    #[test]
    fn corrupt_plaintext_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(&dir);
        reg.prefs.set_protected(SYNCHRONIZED_DIRECTORIES, "not json").unwrap();
        assert_eq!(reg.load().unwrap(), 0);
    }

    #[test]
    fn undecryptable_value_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(&dir);
        reg.prefs
            .set(SYNCHRONIZED_DIRECTORIES, "garbage".to_string())
            .unwrap();
        let err = reg.load().unwrap_err();
        assert_eq!(err.kind, SyncErrorKind::Persistence);
    }
}
