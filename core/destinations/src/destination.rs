//! Destination contract every provider adapter implements.

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use url::Url;

use capshare_common::{
    DestinationId, DestinationSettings, Error, Result, ShareFile, ShareOptions, ShareResponse,
};

use crate::auth::{AuthState, AuthorizationRequest, CallbackParams};
use crate::settings::SettingsHandle;

/// Closed set of built-in destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DestinationKind {
    Dropbox,
    Gyazo,
    Imgur,
    OneDrive,
    ImgBB,
}

impl DestinationKind {
    /// Registration order. UI listings follow this order.
    pub const ALL: [DestinationKind; 5] = [
        DestinationKind::Dropbox,
        DestinationKind::Gyazo,
        DestinationKind::Imgur,
        DestinationKind::OneDrive,
        DestinationKind::ImgBB,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dropbox => "dropbox",
            Self::Gyazo => "gyazo",
            Self::Imgur => "imgur",
            Self::OneDrive => "onedrive",
            Self::ImgBB => "imgbb",
        }
    }

    pub fn id(self) -> DestinationId {
        DestinationId::from_static(self.as_str())
    }

    /// Position in [`DestinationKind::ALL`].
    pub fn index(self) -> usize {
        match self {
            Self::Dropbox => 0,
            Self::Gyazo => 1,
            Self::Imgur => 2,
            Self::OneDrive => 3,
            Self::ImgBB => 4,
        }
    }
}

impl fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DestinationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let id = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == id)
            .ok_or_else(|| Error::host(format!("Unknown destination '{}'", id)))
    }
}

/// Immutable description of a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationConfiguration {
    pub id: DestinationId,
    /// Display name.
    pub name: &'static str,
    /// Usable without prior authorization.
    pub always_available: bool,
}

/// Optional capabilities, checked by callers instead of probing methods.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub settings_panel: bool,
    pub tool_bar: bool,
    pub oauth_callback: bool,
}

/// Opens URLs in the system browser.
#[async_trait]
pub trait UrlOpener: Send + Sync {
    async fn open_url(&self, url: &Url) -> Result<()>;
}

/// One affordance of a settings panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelItem {
    /// Read-only status line.
    Status(String),
    /// Start the authorization flow.
    Login,
    /// Forget stored credentials.
    Logout,
    /// Editable setting.
    TextField {
        key: &'static str,
        label: &'static str,
        secret: bool,
        value: Option<String>,
    },
    /// External page, opened through the [`UrlOpener`].
    Link { label: &'static str, url: String },
}

/// Action triggered from a settings panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelAction {
    Login,
    Logout,
    SetField { key: String, value: Option<String> },
    OpenLink(String),
}

/// Settings panel descriptor. Rendering is up to the shell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsPanel {
    pub items: Vec<PanelItem>,
}

/// Toolbar button opening a provider page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolBarItem {
    pub label: &'static str,
    pub url: String,
}

/// Toolbar descriptor shown next to shared items of a destination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolBar {
    pub items: Vec<ToolBarItem>,
}

/// Contract implemented by every sharing destination.
///
/// Settings are only reached through the [`SettingsHandle`] passed in;
/// adapters keep no credentials of their own. Per-flow authorization state
/// lives in the registry and is handed to [`Destination::on_oauth_request`]
/// by value.
#[async_trait]
pub trait Destination: Send + Sync {
    fn kind(&self) -> DestinationKind;

    /// Static configuration. Pure.
    fn configuration(&self) -> DestinationConfiguration;

    /// Settings written on first run. Pure.
    fn default_settings(&self) -> DestinationSettings {
        DestinationSettings::new()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Whether the destination can be used with these settings.
    ///
    /// Local check only; never performs I/O and never fails.
    fn is_available(&self, settings: &DestinationSettings) -> bool;

    /// Upload `file` and return the normalized response.
    ///
    /// May persist refreshed tokens through `settings` before returning.
    ///
    /// # Errors
    /// - Missing or rejected credentials (destination error)
    /// - File or network failures (user error)
    async fn share(
        &self,
        file: &ShareFile,
        options: &ShareOptions,
        settings: &SettingsHandle<'_>,
    ) -> Result<ShareResponse>;

    /// Remove a previously shared item.
    ///
    /// Destinations without a delete API open the provider's delete page
    /// through `opener` instead.
    async fn delete(
        &self,
        share: &ShareResponse,
        settings: &SettingsHandle<'_>,
        opener: &dyn UrlOpener,
    ) -> Result<()>;

    fn settings_panel(&self, _settings: &DestinationSettings) -> Option<SettingsPanel> {
        None
    }

    fn tool_bar(&self) -> Option<ToolBar> {
        None
    }

    /// Create the authorization state and provider URL for a new login.
    fn begin_authorization(&self) -> Result<AuthorizationRequest> {
        Err(Error::destination(
            self.kind().as_str(),
            "This destination does not support logging in",
        ))
    }

    /// Complete a login from the redirect parameters.
    ///
    /// `auth_state` has already been removed from the registry; it is `None`
    /// when no login was in progress.
    async fn on_oauth_request(
        &self,
        _auth_state: Option<AuthState>,
        _params: &CallbackParams,
        _settings: &SettingsHandle<'_>,
    ) -> Result<()> {
        Err(Error::destination(
            self.kind().as_str(),
            "This destination does not accept authorization callbacks",
        ))
    }
}
