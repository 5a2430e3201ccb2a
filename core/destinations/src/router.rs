//! Routing of inbound OAuth redirects to the addressed destination.

use std::sync::Arc;
use url::Url;

use capshare_common::{Error, ErrorSink, Result, ResultExt};

use crate::auth::CallbackParams;
use crate::destination::DestinationKind;
use crate::registry::DestinationRegistry;
use crate::settings::SettingsStore;

/// A decoded redirect `{redirect_base}/{destination id}?query#fragment`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthRedirect {
    pub kind: DestinationKind,
    pub params: CallbackParams,
}

impl OAuthRedirect {
    /// Decode a redirect URL.
    ///
    /// # Errors
    /// - Malformed URL, foreign base or unknown destination (host error)
    pub fn parse(raw: &str, redirect_base: &str) -> Result<Self> {
        let url = Url::parse(raw.trim()).host_context("Malformed authorization redirect")?;

        let mut target = url.clone();
        target.set_query(None);
        target.set_fragment(None);

        let base = redirect_base.trim_end_matches('/');
        let id = target
            .as_str()
            .trim_end_matches('/')
            .strip_prefix(base)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| {
                Error::host(format!(
                    "Redirect '{}' is not addressed to this application",
                    target
                ))
            })?;

        Ok(Self {
            kind: id.parse()?,
            params: CallbackParams::from_url(&url),
        })
    }
}

/// Delivers redirects to the registry; failures go to the error sink.
pub struct OAuthCallbackRouter {
    registry: Arc<DestinationRegistry>,
    store: Arc<dyn SettingsStore>,
    sink: Arc<dyn ErrorSink>,
    redirect_base: String,
}

impl OAuthCallbackRouter {
    pub fn new(
        registry: Arc<DestinationRegistry>,
        store: Arc<dyn SettingsStore>,
        sink: Arc<dyn ErrorSink>,
        redirect_base: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            store,
            sink,
            redirect_base: redirect_base.into(),
        }
    }

    /// Route one redirect. Returns the destination that completed a login.
    pub async fn deliver(&self, raw: &str) -> Option<DestinationKind> {
        match self.route(raw).await {
            Ok(kind) => Some(kind),
            Err(e) => {
                self.sink.handle_error(&e);
                None
            }
        }
    }

    async fn route(&self, raw: &str) -> Result<DestinationKind> {
        let redirect = OAuthRedirect::parse(raw, &self.redirect_base)?;
        tracing::debug!(destination = %redirect.kind, "Routing authorization redirect");
        self.registry
            .complete_authorization(redirect.kind, &redirect.params, self.store.as_ref())
            .await?;
        Ok(redirect.kind)
    }
}
