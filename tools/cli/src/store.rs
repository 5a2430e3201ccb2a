//! JSON files under the user's config directory.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

use capshare_common::{DestinationId, DestinationSettings, SettingValue};
use capshare_destinations::{DestinationsConfig, HistoryEntry, SettingsStore};

/// `<config_dir>/capshare`, or `./.capshare` when there is no config dir.
pub fn data_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("capshare"))
        .unwrap_or_else(|| PathBuf::from(".capshare"))
}

/// Read `path` as JSON, or `T::default()` when it does not exist.
fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match std::fs::read(path) {
        Ok(data) => serde_json::from_slice(&data)
            .with_context(|| format!("Failed to parse {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

fn save<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let data = serde_json::to_vec_pretty(value)?;
    std::fs::write(path, data).with_context(|| format!("Failed to write {}", path.display()))
}

/// Destination configuration from `config.json`, defaults when absent.
pub fn load_config(dir: &Path) -> Result<DestinationsConfig> {
    let path = dir.join("config.json");
    if !path.exists() {
        return Ok(DestinationsConfig::default());
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(DestinationsConfig::from_json(&raw)?)
}

pub fn load_history(dir: &Path) -> Result<Vec<HistoryEntry>> {
    load_or_default(&dir.join("history.json"))
}

pub fn save_history(dir: &Path, history: &[HistoryEntry]) -> Result<()> {
    save(&dir.join("history.json"), &history)
}

/// Settings store persisted to `settings.json` after every change.
///
/// A failed write keeps the change in memory and is held for the caller,
/// see [`JsonFileSettingsStore::take_write_failure`].
pub struct JsonFileSettingsStore {
    path: PathBuf,
    records: RwLock<BTreeMap<String, DestinationSettings>>,
    write_failure: Mutex<Option<String>>,
}

impl JsonFileSettingsStore {
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join("settings.json");
        let records = load_or_default(&path)?;
        Ok(Self {
            path,
            records: RwLock::new(records),
            write_failure: Mutex::new(None),
        })
    }

    /// Most recent failure to write `settings.json`, if any, clearing it.
    pub fn take_write_failure(&self) -> Option<String> {
        self.write_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl SettingsStore for JsonFileSettingsStore {
    fn get(&self, id: &DestinationId) -> DestinationSettings {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id.as_str())
            .cloned()
            .unwrap_or_default()
    }

    fn set(&self, id: &DestinationId, key: &str, value: Option<SettingValue>) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records
            .entry(id.as_str().to_string())
            .or_default()
            .set(key, value);

        if let Err(e) = save(&self.path, &*records) {
            tracing::error!(error = %e, path = %self.path.display(), "Failed to persist settings");
            *self
                .write_failure
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(format!("{:#}", e));
        }
    }
}
