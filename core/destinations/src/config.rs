//! Client credentials and endpoints of every destination.

use serde::{Deserialize, Serialize};

use capshare_common::{Result, ResultExt};

use crate::destination::DestinationKind;

/// Default custom-scheme base of OAuth redirect URIs.
pub const DEFAULT_REDIRECT_BASE: &str = "capshare://oauth";

/// Configuration injected into the registry at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationsConfig {
    /// Redirect URIs are `{redirect_base}/{destination id}`.
    pub redirect_base: String,
    pub dropbox: DropboxConfig,
    pub gyazo: GyazoConfig,
    pub imgur: ImgurConfig,
    pub onedrive: OneDriveConfig,
    pub imgbb: ImgBBConfig,
}

impl Default for DestinationsConfig {
    fn default() -> Self {
        Self {
            redirect_base: DEFAULT_REDIRECT_BASE.to_string(),
            dropbox: DropboxConfig::default(),
            gyazo: GyazoConfig::default(),
            imgur: ImgurConfig::default(),
            onedrive: OneDriveConfig::default(),
            imgbb: ImgBBConfig::default(),
        }
    }
}

impl DestinationsConfig {
    /// Parse a JSON configuration; missing sections take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).host_context("Invalid destinations configuration")
    }

    pub fn redirect_uri(&self, kind: DestinationKind) -> String {
        format!("{}/{}", self.redirect_base.trim_end_matches('/'), kind.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DropboxConfig {
    pub client_id: String,
    pub auth_url: String,
    pub token_url: String,
    pub api_url: String,
    pub content_url: String,
}

impl Default for DropboxConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            auth_url: "https://www.dropbox.com/oauth2/authorize".to_string(),
            token_url: "https://api.dropboxapi.com/oauth2/token".to_string(),
            api_url: "https://api.dropboxapi.com".to_string(),
            content_url: "https://content.dropboxapi.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GyazoConfig {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    pub api_url: String,
    pub upload_url: String,
}

impl Default for GyazoConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            auth_url: "https://gyazo.com/oauth/authorize".to_string(),
            token_url: "https://gyazo.com/oauth/token".to_string(),
            api_url: "https://api.gyazo.com".to_string(),
            upload_url: "https://upload.gyazo.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImgurConfig {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    pub api_url: String,
}

impl Default for ImgurConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            auth_url: "https://api.imgur.com/oauth2/authorize".to_string(),
            token_url: "https://api.imgur.com/oauth2/token".to_string(),
            api_url: "https://api.imgur.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OneDriveConfig {
    pub client_id: String,
    pub auth_url: String,
    pub token_url: String,
    pub graph_url: String,
    pub scopes: String,
}

impl Default for OneDriveConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            auth_url: "https://login.microsoftonline.com/common/oauth2/v2.0/authorize".to_string(),
            token_url: "https://login.microsoftonline.com/common/oauth2/v2.0/token".to_string(),
            graph_url: "https://graph.microsoft.com/v1.0".to_string(),
            scopes: "files.readwrite offline_access user.read".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImgBBConfig {
    pub api_url: String,
}

impl Default for ImgBBConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.imgbb.com".to_string(),
        }
    }
}
