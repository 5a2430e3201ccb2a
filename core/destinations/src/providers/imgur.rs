//! Imgur: implicit grant, anonymous uploads when not logged in.
//!
//! Imgur declares a short `expires_in` but honors access tokens for much
//! longer, so a fixed 30 day lifetime is applied instead.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::multipart::Form;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;

use capshare_common::{
    DestinationSettings, Error, Result, ShareFile, ShareOptions, ShareResponse,
};

use crate::auth::{
    self, validate_callback, AuthState, AuthorizationGrant, AuthorizationRequest, CallbackParams,
    GrantFlow,
};
use crate::config::{DestinationsConfig, ImgurConfig};
use crate::destination::{
    Capabilities, Destination, DestinationConfiguration, DestinationKind, SettingsPanel,
    UrlOpener,
};
use crate::file::FileSource;
use crate::http::{expect_success, read_json, transport_error};
use crate::settings::SettingsHandle;
use crate::token::{
    bearer_header, ExpiryPolicy, OAuthTokenClient, TokenEndpoint, TokenMaterial, ACCESS_TOKEN,
};

use super::{account_panel, endpoint, file_part, require_client_id, share_response};

const KIND: DestinationKind = DestinationKind::Imgur;

/// Client-side lifetime of Imgur access tokens.
pub const TOKEN_LIFETIME_DAYS: i64 = 30;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct Image {
    id: String,
    link: String,
    #[serde(default)]
    deletehash: Option<String>,
}

pub struct ImgurDestination {
    http: Client,
    config: ImgurConfig,
    tokens: OAuthTokenClient,
    files: Arc<dyn FileSource>,
}

impl ImgurDestination {
    pub fn new(http: Client, config: &DestinationsConfig, files: Arc<dyn FileSource>) -> Self {
        let tokens = OAuthTokenClient::new(
            http.clone(),
            KIND,
            TokenEndpoint {
                url: config.imgur.token_url.clone(),
                client_id: config.imgur.client_id.clone(),
                client_secret: Some(config.imgur.client_secret.clone()),
            },
            Self::expiry_policy(),
        );
        Self {
            http,
            config: config.imgur.clone(),
            tokens,
            files,
        }
    }

    pub fn expiry_policy() -> ExpiryPolicy {
        ExpiryPolicy::Fixed(Duration::days(TOKEN_LIFETIME_DAYS))
    }

    /// `Authorization` header and whether the request is anonymous.
    async fn authorization(&self, settings: &SettingsHandle<'_>) -> Result<(String, bool)> {
        if settings.get().get_str(ACCESS_TOKEN).is_some() {
            return Ok((bearer_header(&self.tokens, settings).await?, false));
        }
        Ok((self.client_id_header()?, true))
    }

    fn client_id_header(&self) -> Result<String> {
        let client_id = require_client_id(KIND, &self.config.client_id)?;
        Ok(format!("Client-ID {}", client_id))
    }
}

#[async_trait]
impl Destination for ImgurDestination {
    fn kind(&self) -> DestinationKind {
        KIND
    }

    fn configuration(&self) -> DestinationConfiguration {
        DestinationConfiguration {
            id: KIND.id(),
            name: "Imgur",
            always_available: true,
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            settings_panel: true,
            tool_bar: false,
            oauth_callback: true,
        }
    }

    fn is_available(&self, _settings: &DestinationSettings) -> bool {
        true
    }

    async fn share(
        &self,
        file: &ShareFile,
        options: &ShareOptions,
        settings: &SettingsHandle<'_>,
    ) -> Result<ShareResponse> {
        let (auth, anon) = self.authorization(settings).await?;
        let data = self.files.read(&file.path).await?;

        let mut form = Form::new()
            .part("image", file_part(data, file)?)
            .text("type", "file");
        if let Some(title) = &options.title {
            form = form.text("title", title.clone());
        }
        if let Some(description) = &options.description {
            form = form.text("description", description.clone());
        }

        let response = self
            .http
            .post(endpoint(&self.config.api_url, &["3", "image"])?)
            .header(header::AUTHORIZATION, auth)
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error("Upload to Imgur", e))?;

        let image: Envelope<Image> = read_json(KIND.as_str(), "Upload to Imgur", response).await?;
        let image = image.data;
        tracing::info!(id = %image.id, anon = anon, "Uploaded to Imgur");
        Ok(share_response(
            KIND,
            file,
            image.link,
            image.id,
            image.deletehash,
            anon,
        ))
    }

    async fn delete(
        &self,
        share: &ShareResponse,
        settings: &SettingsHandle<'_>,
        _opener: &dyn UrlOpener,
    ) -> Result<()> {
        // Anonymous images are deleted by hash with the application's client id.
        let auth = if share.anon {
            self.client_id_header()?
        } else {
            bearer_header(&self.tokens, settings).await?
        };
        let handle = share.delete_id.as_deref().unwrap_or(&share.share_id);

        let response = self
            .http
            .delete(endpoint(&self.config.api_url, &["3", "image", handle])?)
            .header(header::AUTHORIZATION, auth)
            .send()
            .await
            .map_err(|e| transport_error("Deleting from Imgur", e))?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(id = %share.share_id, "Imgur image already gone");
            return Ok(());
        }
        expect_success(KIND.as_str(), "Deleting from Imgur", response).await?;
        Ok(())
    }

    fn settings_panel(&self, settings: &DestinationSettings) -> Option<SettingsPanel> {
        Some(account_panel(settings))
    }

    fn begin_authorization(&self) -> Result<AuthorizationRequest> {
        let client_id = require_client_id(KIND, &self.config.client_id)?;
        let state = AuthState::nonce_only();

        let params = [
            ("client_id", client_id),
            ("response_type", "token"),
            ("state", state.random.as_str()),
        ];
        let url = auth::authorization_url(&self.config.auth_url, &params)?;

        Ok(AuthorizationRequest { state, url })
    }

    async fn on_oauth_request(
        &self,
        auth_state: Option<AuthState>,
        params: &CallbackParams,
        settings: &SettingsHandle<'_>,
    ) -> Result<()> {
        let AuthorizationGrant::Token { access_token } =
            validate_callback(KIND, auth_state, params, GrantFlow::Implicit)?
        else {
            return Err(Error::destination(KIND.as_str(), "Unexpected authorization grant"));
        };

        let refresh_token = params.get("refresh_token").ok_or_else(|| {
            Error::destination(KIND.as_str(), "Missing refresh token in callback")
        })?;

        let material = TokenMaterial {
            access_token,
            refresh_token: Some(refresh_token.to_string()),
            expiry: Some(Self::expiry_policy().expiry_from(None, Utc::now())),
            account_id: params.get("account_id").map(str::to_string),
            username: params.get("account_username").map(str::to_string),
        };

        material.replace(settings);
        tracing::info!("Logged in to Imgur");
        Ok(())
    }
}
