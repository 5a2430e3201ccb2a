//! Credential store boundary.
//!
//! The store itself is owned by the application shell; destinations only see
//! a [`SettingsHandle`] scoped to their own id.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use capshare_common::{DestinationId, DestinationSettings, SettingValue};

/// Durable key/value settings, namespaced per destination.
pub trait SettingsStore: Send + Sync {
    /// Current settings of `id`; empty when nothing was stored yet.
    fn get(&self, id: &DestinationId) -> DestinationSettings;

    /// Set `key` for `id`, removing it when `value` is `None`.
    fn set(&self, id: &DestinationId, key: &str, value: Option<SettingValue>);
}

/// Getter/setter pair bound to one destination.
#[derive(Clone)]
pub struct SettingsHandle<'a> {
    store: &'a dyn SettingsStore,
    id: DestinationId,
}

impl<'a> SettingsHandle<'a> {
    pub fn new(store: &'a dyn SettingsStore, id: DestinationId) -> Self {
        Self { store, id }
    }

    pub fn id(&self) -> &DestinationId {
        &self.id
    }

    /// Fresh snapshot of the destination's settings.
    pub fn get(&self) -> DestinationSettings {
        self.store.get(&self.id)
    }

    pub fn set(&self, key: &str, value: impl Into<SettingValue>) {
        self.store.set(&self.id, key, Some(value.into()));
    }

    pub fn remove(&self, key: &str) {
        self.store.set(&self.id, key, None);
    }
}

/// In-memory store, used by tests and by shells that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    records: RwLock<HashMap<DestinationId, DestinationSettings>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole record of `id`.
    pub fn with_settings(self, id: DestinationId, settings: DestinationSettings) -> Self {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, settings);
        self
    }

    /// Copy of all records.
    pub fn snapshot(&self) -> HashMap<DestinationId, DestinationSettings> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, id: &DestinationId) -> DestinationSettings {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    fn set(&self, id: &DestinationId, key: &str, value: Option<SettingValue>) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.clone())
            .or_default()
            .set(key, value);
    }
}
