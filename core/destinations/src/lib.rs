//! Sharing destinations for Capshare.
//!
//! This crate provides the destination contract, the built-in provider
//! adapters (Dropbox, Gyazo, Imgur, OneDrive, ImgBB) and the registry that
//! owns them.
//!
//! # Design Principles
//! - Adapters keep no credentials: settings are read and written through a
//!   [`SettingsHandle`] scoped to the destination
//! - Per-login authorization state lives in the registry and is consumed
//!   exactly once by the callback
//! - Tokens are refreshed and persisted before use when expired
//! - Every failure maps to one [`capshare_common::ErrorKind`]

pub mod auth;
pub mod config;
pub mod destination;
pub mod file;
pub mod history;
pub mod http;
pub mod pkce;
pub mod providers;
pub mod registry;
pub mod router;
pub mod settings;
pub mod token;

pub use auth::{AuthState, AuthorizationGrant, AuthorizationRequest, CallbackParams, GrantFlow};
pub use config::DestinationsConfig;
pub use destination::{
    Capabilities, Destination, DestinationConfiguration, DestinationKind, PanelAction, PanelItem,
    SettingsPanel, ToolBar, ToolBarItem, UrlOpener,
};
pub use file::{FileSource, LocalFileSource};
pub use history::{delete_history_entry, DeleteTarget, HistoryEntry};
pub use registry::DestinationRegistry;
pub use router::{OAuthCallbackRouter, OAuthRedirect};
pub use settings::{MemorySettingsStore, SettingsHandle, SettingsStore};
pub use token::{ExpiryPolicy, TokenMaterial, TokenRefresher};
