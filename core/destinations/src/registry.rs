//! Destination registry.
//!
//! Holds one adapter per [`DestinationKind`], in registration order, together
//! with the authorization state of a login in progress for each of them.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use capshare_common::{
    DestinationId, DestinationSettings, Error, Result, ShareFile, ShareOptions, ShareResponse,
};

use crate::auth::{AuthState, CallbackParams};
use crate::config::DestinationsConfig;
use crate::destination::{Destination, DestinationKind, PanelAction, UrlOpener};
use crate::file::FileSource;
use crate::http::build_client;
use crate::providers::{
    DropboxDestination, GyazoDestination, ImgBBDestination, ImgurDestination,
    OneDriveDestination,
};
use crate::settings::{SettingsHandle, SettingsStore};
use crate::token::TOKEN_KEYS;

struct RegistryEntry {
    destination: Box<dyn Destination>,
    /// Login in progress. A new login replaces it; a callback takes it.
    auth_slot: Mutex<Option<AuthState>>,
}

/// Registry of all sharing destinations.
pub struct DestinationRegistry {
    entries: Vec<RegistryEntry>,
}

impl DestinationRegistry {
    /// Build the registry with every built-in destination.
    ///
    /// # Errors
    /// - HTTP client construction failure (host error)
    pub fn new(config: &DestinationsConfig, files: Arc<dyn FileSource>) -> Result<Self> {
        let http = build_client()?;
        let destinations: Vec<Box<dyn Destination>> = DestinationKind::ALL
            .into_iter()
            .map(|kind| -> Box<dyn Destination> {
                match kind {
                    DestinationKind::Dropbox => {
                        Box::new(DropboxDestination::new(http.clone(), config, files.clone()))
                    }
                    DestinationKind::Gyazo => {
                        Box::new(GyazoDestination::new(http.clone(), config, files.clone()))
                    }
                    DestinationKind::Imgur => {
                        Box::new(ImgurDestination::new(http.clone(), config, files.clone()))
                    }
                    DestinationKind::OneDrive => {
                        Box::new(OneDriveDestination::new(http.clone(), config, files.clone()))
                    }
                    DestinationKind::ImgBB => {
                        Box::new(ImgBBDestination::new(http.clone(), config, files.clone()))
                    }
                }
            })
            .collect();

        Self::with_destinations(destinations)
    }

    /// Build the registry from explicit adapters.
    ///
    /// # Preconditions
    /// - One adapter per kind, in [`DestinationKind::ALL`] order
    ///
    /// # Errors
    /// - Missing, duplicate or misplaced adapter (host error)
    pub fn with_destinations(destinations: Vec<Box<dyn Destination>>) -> Result<Self> {
        if destinations.len() != DestinationKind::ALL.len() {
            return Err(Error::host(format!(
                "Expected {} destinations, got {}",
                DestinationKind::ALL.len(),
                destinations.len()
            )));
        }
        for (expected, destination) in DestinationKind::ALL.into_iter().zip(&destinations) {
            if destination.kind() != expected {
                return Err(Error::host(format!(
                    "Destination '{}' registered where '{}' was expected",
                    destination.kind(),
                    expected
                )));
            }
        }

        let entries = destinations
            .into_iter()
            .map(|destination| RegistryEntry {
                destination,
                auth_slot: Mutex::new(None),
            })
            .collect();
        Ok(Self { entries })
    }

    fn entry(&self, kind: DestinationKind) -> &RegistryEntry {
        &self.entries[kind.index()]
    }

    pub fn get(&self, kind: DestinationKind) -> &dyn Destination {
        self.entry(kind).destination.as_ref()
    }

    /// Resolve an external destination id.
    ///
    /// # Errors
    /// - Unknown id (host error)
    pub fn lookup(&self, id: &str) -> Result<&dyn Destination> {
        let kind: DestinationKind = id.parse()?;
        Ok(self.get(kind))
    }

    /// All destinations in registration order.
    pub fn destinations(&self) -> impl Iterator<Item = &dyn Destination> {
        self.entries.iter().map(|e| e.destination.as_ref())
    }

    /// Settings handle scoped to `kind`.
    pub fn settings<'a>(
        &self,
        kind: DestinationKind,
        store: &'a dyn SettingsStore,
    ) -> SettingsHandle<'a> {
        SettingsHandle::new(store, kind.id())
    }

    /// Destinations usable right now, in registration order.
    pub fn list_available(
        &self,
        include_unavailable: bool,
        store: &dyn SettingsStore,
    ) -> Vec<DestinationKind> {
        self.destinations()
            .filter(|d| include_unavailable || d.is_available(&store.get(&d.kind().id())))
            .map(|d| d.kind())
            .collect()
    }

    pub fn default_settings_for_all(&self) -> HashMap<DestinationId, DestinationSettings> {
        self.destinations()
            .map(|d| (d.kind().id(), d.default_settings()))
            .collect()
    }

    /// Write default settings for keys not stored yet.
    pub fn seed_defaults(&self, store: &dyn SettingsStore) {
        for (id, defaults) in self.default_settings_for_all() {
            let current = store.get(&id);
            let mut seeded = 0;
            for (key, value) in defaults.iter() {
                if !current.contains(key) {
                    store.set(&id, key, Some(value.clone()));
                    seeded += 1;
                }
            }
            if seeded > 0 {
                tracing::debug!(destination = %id, seeded = seeded, "Seeded default settings");
            }
        }
    }

    /// Start a login: store fresh authorization state and open the provider.
    ///
    /// A login already in progress for `kind` is discarded, so its callback
    /// will fail the state check.
    pub async fn begin_login(&self, kind: DestinationKind, opener: &dyn UrlOpener) -> Result<()> {
        let entry = self.entry(kind);
        if !entry.destination.capabilities().oauth_callback {
            return Err(Error::destination(
                kind.as_str(),
                "This destination does not support logging in",
            ));
        }

        let request = entry.destination.begin_authorization()?;
        if entry.auth_slot.lock().await.replace(request.state).is_some() {
            tracing::debug!(destination = %kind, "Replacing login in progress");
        }

        if let Err(e) = opener.open_url(&request.url).await {
            entry.auth_slot.lock().await.take();
            return Err(e);
        }

        tracing::info!(destination = %kind, "Waiting for authorization callback");
        Ok(())
    }

    /// Whether a login is waiting for its callback.
    pub async fn auth_pending(&self, kind: DestinationKind) -> bool {
        self.entry(kind).auth_slot.lock().await.is_some()
    }

    /// Complete a login from redirect parameters.
    ///
    /// The authorization state is taken before validation, so it is cleared
    /// whatever the outcome.
    pub async fn complete_authorization(
        &self,
        kind: DestinationKind,
        params: &CallbackParams,
        store: &dyn SettingsStore,
    ) -> Result<()> {
        let entry = self.entry(kind);
        let auth_state = entry.auth_slot.lock().await.take();
        let settings = self.settings(kind, store);

        match entry
            .destination
            .on_oauth_request(auth_state, params, &settings)
            .await
        {
            Ok(()) => {
                tracing::info!(destination = %kind, "Authorization completed");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(destination = %kind, error = %e, "Authorization failed");
                Err(e)
            }
        }
    }

    /// Forget stored credentials and any login in progress.
    pub async fn logout(&self, kind: DestinationKind, store: &dyn SettingsStore) {
        self.entry(kind).auth_slot.lock().await.take();
        let settings = self.settings(kind, store);
        for key in TOKEN_KEYS {
            settings.remove(key);
        }
        tracing::info!(destination = %kind, "Logged out");
    }

    /// Run an action triggered from a settings panel.
    pub async fn apply_panel_action(
        &self,
        kind: DestinationKind,
        action: PanelAction,
        store: &dyn SettingsStore,
        opener: &dyn UrlOpener,
    ) -> Result<()> {
        match action {
            PanelAction::Login => self.begin_login(kind, opener).await,
            PanelAction::Logout => {
                self.logout(kind, store).await;
                Ok(())
            }
            PanelAction::SetField { key, value } => {
                let settings = self.settings(kind, store);
                match value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
                    Some(value) => settings.set(&key, value),
                    None => settings.remove(&key),
                }
                Ok(())
            }
            PanelAction::OpenLink(link) => {
                let url = url::Url::parse(&link)
                    .map_err(|e| Error::host(format!("Invalid link '{}'", link)).with_cause(e))?;
                opener.open_url(&url).await
            }
        }
    }

    /// Share a file through `kind`.
    pub async fn share(
        &self,
        kind: DestinationKind,
        file: &ShareFile,
        options: &ShareOptions,
        store: &dyn SettingsStore,
    ) -> Result<ShareResponse> {
        tracing::debug!(destination = %kind, path = %file.path.display(), "Sharing file");
        let settings = self.settings(kind, store);
        self.get(kind).share(file, options, &settings).await
    }

    /// Delete a shared item through the destination that created it.
    pub async fn delete(
        &self,
        share: &ShareResponse,
        store: &dyn SettingsStore,
        opener: &dyn UrlOpener,
    ) -> Result<()> {
        let kind: DestinationKind = share.destination_id.as_str().parse()?;
        tracing::debug!(destination = %kind, id = %share.share_id, "Deleting shared item");
        let settings = self.settings(kind, store);
        self.get(kind).delete(share, &settings, opener).await
    }
}
