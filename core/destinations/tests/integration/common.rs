//! Shared helpers for destination integration tests.
//!
//! Every provider endpoint is pointed at one wiremock server, each provider
//! under its own path prefix.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tempfile::TempDir;
use url::Url;
use wiremock::MockServer;

use capshare_common::{DestinationSettings, Dimensions, Error, ErrorSink, Result, ShareFile};
use capshare_destinations::token::{ACCESS_TOKEN, EXPIRY, REFRESH_TOKEN};
use capshare_destinations::{
    DestinationRegistry, DestinationsConfig, LocalFileSource, MemorySettingsStore, UrlOpener,
};

pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake image data";

pub struct Harness {
    pub server: MockServer,
    pub registry: Arc<DestinationRegistry>,
    pub store: Arc<MemorySettingsStore>,
    pub dir: TempDir,
}

pub fn config_for(uri: &str) -> DestinationsConfig {
    let mut config = DestinationsConfig::default();

    config.dropbox.client_id = "dropbox-client".to_string();
    config.dropbox.token_url = format!("{}/dropbox/oauth2/token", uri);
    config.dropbox.api_url = format!("{}/dropbox", uri);
    config.dropbox.content_url = format!("{}/dropbox-content", uri);

    config.gyazo.client_id = "gyazo-client".to_string();
    config.gyazo.client_secret = "gyazo-secret".to_string();
    config.gyazo.token_url = format!("{}/gyazo/oauth/token", uri);
    config.gyazo.api_url = format!("{}/gyazo", uri);
    config.gyazo.upload_url = format!("{}/gyazo-upload", uri);

    config.imgur.client_id = "imgur-client".to_string();
    config.imgur.client_secret = "imgur-secret".to_string();
    config.imgur.token_url = format!("{}/imgur/oauth2/token", uri);
    config.imgur.api_url = format!("{}/imgur", uri);

    config.onedrive.client_id = "graph-client".to_string();
    config.onedrive.token_url = format!("{}/onedrive/token", uri);
    config.onedrive.graph_url = format!("{}/graph", uri);

    config.imgbb.api_url = format!("{}/imgbb", uri);

    config
}

pub async fn setup() -> Harness {
    let server = MockServer::start().await;
    let config = config_for(&server.uri());
    let registry = DestinationRegistry::new(&config, Arc::new(LocalFileSource))
        .expect("registry construction failed");

    Harness {
        server,
        registry: Arc::new(registry),
        store: Arc::new(MemorySettingsStore::new()),
        dir: tempfile::tempdir().expect("tempdir"),
    }
}

/// Write a capture file and describe it.
pub fn capture(dir: &Path, name: &str) -> ShareFile {
    let path = dir.join(name);
    std::fs::write(&path, PNG_BYTES).expect("write capture");
    ShareFile {
        path,
        size: PNG_BYTES.len() as u64,
        dimensions: Dimensions::new(640, 480),
    }
}

/// Settings of a logged-in OAuth destination.
pub fn token_settings(access: &str, refresh: &str, expires_in: Duration) -> DestinationSettings {
    DestinationSettings::new()
        .with(ACCESS_TOKEN, access)
        .with(REFRESH_TOKEN, refresh)
        .with(EXPIRY, (Utc::now() + expires_in).to_rfc3339())
}

/// Records opened URLs instead of launching a browser.
#[derive(Default)]
pub struct RecordingOpener {
    pub opened: Mutex<Vec<Url>>,
}

impl RecordingOpener {
    /// `state` parameter of the most recently opened URL.
    pub fn last_state(&self) -> String {
        let opened = self.opened.lock().unwrap();
        let url = opened.last().expect("no URL opened");
        url.query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .expect("no state parameter")
    }
}

#[async_trait]
impl UrlOpener for RecordingOpener {
    async fn open_url(&self, url: &Url) -> Result<()> {
        self.opened.lock().unwrap().push(url.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct CollectingSink {
    pub errors: Mutex<Vec<Error>>,
}

impl ErrorSink for CollectingSink {
    fn handle_error(&self, error: &Error) {
        self.errors.lock().unwrap().push(error.clone());
    }
}
