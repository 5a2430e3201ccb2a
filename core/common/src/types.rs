//! Common types shared by the destination layer and its callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Stable identifier of a sharing destination (e.g. "dropbox").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DestinationId(String);

impl DestinationId {
    /// Create a new DestinationId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty or contains characters other than
    ///   lowercase ASCII letters, digits and '-'
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::Error::host("Destination id cannot be empty"));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(crate::Error::host(format!(
                "Invalid destination id '{}'",
                id
            )));
        }
        Ok(Self(id))
    }

    /// Create an id from a compile-time constant.
    ///
    /// Meant for built-in destination ids, which are validated by tests.
    pub fn from_static(id: &'static str) -> Self {
        debug_assert!(Self::new(id).is_ok(), "invalid built-in destination id");
        Self(id.to_string())
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single persisted setting value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl SettingValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SettingValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        SettingValue::String(value)
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        SettingValue::String(value.to_string())
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        SettingValue::Bool(value)
    }
}

impl From<f64> for SettingValue {
    fn from(value: f64) -> Self {
        SettingValue::Number(value)
    }
}

/// Settings of one destination: an open string-keyed record.
///
/// Only the owning adapter interprets its keys; stores namespace records by
/// [`DestinationId`], so key names never collide across destinations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationSettings(BTreeMap<String, SettingValue>);

impl DestinationSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.0.get(key)
    }

    /// String value for `key`, treating blank strings as absent.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(SettingValue::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(SettingValue::as_bool)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(SettingValue::as_f64)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Set `key`, or remove it when `value` is `None`.
    pub fn set(&mut self, key: impl Into<String>, value: Option<SettingValue>) {
        let key = key.into();
        match value {
            Some(value) => {
                self.0.insert(key, value);
            }
            None => {
                self.0.remove(&key);
            }
        }
    }

    /// Builder-style insert, used for default settings.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<SettingValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SettingValue)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Pixel dimensions of a captured image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Local file handed to a destination for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareFile {
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    pub dimensions: Dimensions,
}

impl ShareFile {
    /// File name used as the remote name.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "capture.png".to_string())
    }
}

/// Optional per-share metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareOptions {
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Normalized result of a successful share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareResponse {
    pub destination_id: DestinationId,
    pub path: PathBuf,
    pub size: u64,
    pub dimensions: Dimensions,
    pub date: DateTime<Utc>,
    /// Public link to the shared item.
    pub link: String,
    /// Provider-side identifier of the shared item.
    pub share_id: String,
    /// Provider-side handle used for deletion, when it differs from `share_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_id: Option<String>,
    /// Uploaded without an account.
    pub anon: bool,
}
