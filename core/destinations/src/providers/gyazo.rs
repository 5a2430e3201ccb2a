//! Gyazo: authorization code without PKCE, long-lived access token.

use async_trait::async_trait;
use reqwest::multipart::Form;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;

use capshare_common::{
    DestinationSettings, Error, Result, ShareFile, ShareOptions, ShareResponse,
};

use crate::auth::{
    self, validate_callback, AuthState, AuthorizationGrant, AuthorizationRequest, CallbackParams,
    GrantFlow,
};
use crate::config::{DestinationsConfig, GyazoConfig};
use crate::destination::{
    Capabilities, Destination, DestinationConfiguration, DestinationKind, SettingsPanel, ToolBar,
    ToolBarItem, UrlOpener,
};
use crate::file::FileSource;
use crate::http::{expect_success, read_json, transport_error};
use crate::settings::SettingsHandle;
use crate::token::{
    stored_access_token, ExpiryPolicy, OAuthTokenClient, TokenEndpoint, ACCESS_TOKEN,
};

use super::{account_panel, endpoint, file_part, require_client_id, share_response};

const KIND: DestinationKind = DestinationKind::Gyazo;

#[derive(Debug, Deserialize)]
struct UploadedImage {
    image_id: String,
    permalink_url: String,
}

#[derive(Debug, Deserialize)]
struct Me {
    user: GyazoUser,
}

#[derive(Debug, Deserialize)]
struct GyazoUser {
    name: String,
    #[serde(default)]
    uid: Option<String>,
}

pub struct GyazoDestination {
    http: Client,
    config: GyazoConfig,
    redirect_uri: String,
    tokens: OAuthTokenClient,
    files: Arc<dyn FileSource>,
}

impl GyazoDestination {
    pub fn new(http: Client, config: &DestinationsConfig, files: Arc<dyn FileSource>) -> Self {
        let tokens = OAuthTokenClient::new(
            http.clone(),
            KIND,
            TokenEndpoint {
                url: config.gyazo.token_url.clone(),
                client_id: config.gyazo.client_id.clone(),
                client_secret: Some(config.gyazo.client_secret.clone()),
            },
            ExpiryPolicy::ServerDeclared,
        );
        Self {
            http,
            config: config.gyazo.clone(),
            redirect_uri: config.redirect_uri(KIND),
            tokens,
            files,
        }
    }

    async fn me(&self, access_token: &str) -> Result<GyazoUser> {
        let response = self
            .http
            .get(endpoint(&self.config.api_url, &["api", "users", "me"])?)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| transport_error("Gyazo account lookup", e))?;

        let me: Me = read_json(KIND.as_str(), "Gyazo account lookup", response).await?;
        Ok(me.user)
    }
}

#[async_trait]
impl Destination for GyazoDestination {
    fn kind(&self) -> DestinationKind {
        KIND
    }

    fn configuration(&self) -> DestinationConfiguration {
        DestinationConfiguration {
            id: KIND.id(),
            name: "Gyazo",
            always_available: false,
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            settings_panel: true,
            tool_bar: true,
            oauth_callback: true,
        }
    }

    fn is_available(&self, settings: &DestinationSettings) -> bool {
        settings.get_str(ACCESS_TOKEN).is_some()
    }

    async fn share(
        &self,
        file: &ShareFile,
        options: &ShareOptions,
        settings: &SettingsHandle<'_>,
    ) -> Result<ShareResponse> {
        let token = stored_access_token(KIND, &settings.get())?;
        let data = self.files.read(&file.path).await?;

        let mut form = Form::new()
            .text("access_token", token)
            .part("imagedata", file_part(data, file)?);
        if let Some(title) = &options.title {
            form = form.text("title", title.clone());
        }
        if let Some(desc) = &options.description {
            form = form.text("desc", desc.clone());
        }

        let response = self
            .http
            .post(endpoint(&self.config.upload_url, &["api", "upload"])?)
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error("Upload to Gyazo", e))?;

        let image: UploadedImage = read_json(KIND.as_str(), "Upload to Gyazo", response).await?;
        tracing::info!(id = %image.image_id, "Uploaded to Gyazo");
        Ok(share_response(
            KIND,
            file,
            image.permalink_url,
            image.image_id,
            None,
            false,
        ))
    }

    async fn delete(
        &self,
        share: &ShareResponse,
        settings: &SettingsHandle<'_>,
        _opener: &dyn UrlOpener,
    ) -> Result<()> {
        let token = stored_access_token(KIND, &settings.get())?;
        let response = self
            .http
            .delete(endpoint(&self.config.api_url, &["api", "images", share.share_id.as_str()])?)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| transport_error("Deleting from Gyazo", e))?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(id = %share.share_id, "Gyazo image already gone");
            return Ok(());
        }
        expect_success(KIND.as_str(), "Deleting from Gyazo", response).await?;
        Ok(())
    }

    fn settings_panel(&self, settings: &DestinationSettings) -> Option<SettingsPanel> {
        Some(account_panel(settings))
    }

    fn tool_bar(&self) -> Option<ToolBar> {
        Some(ToolBar {
            items: vec![ToolBarItem {
                label: "Open Gyazo",
                url: "https://gyazo.com/captures".to_string(),
            }],
        })
    }

    fn begin_authorization(&self) -> Result<AuthorizationRequest> {
        let client_id = require_client_id(KIND, &self.config.client_id)?;
        let state = AuthState::nonce_only();

        let params = auth::base_params("code", client_id, &self.redirect_uri, &state);
        let url = auth::authorization_url(&self.config.auth_url, &params)?;

        Ok(AuthorizationRequest { state, url })
    }

    async fn on_oauth_request(
        &self,
        auth_state: Option<AuthState>,
        params: &CallbackParams,
        settings: &SettingsHandle<'_>,
    ) -> Result<()> {
        let AuthorizationGrant::Code { code, .. } =
            validate_callback(KIND, auth_state, params, GrantFlow::AuthorizationCode)?
        else {
            return Err(Error::destination(KIND.as_str(), "Unexpected authorization grant"));
        };

        let mut material = self
            .tokens
            .exchange_code(&code, &self.redirect_uri, None)
            .await?;
        // Gyazo tokens do not expire and cannot be refreshed.
        material.refresh_token = None;
        material.expiry = None;

        match self.me(&material.access_token).await {
            Ok(user) => {
                material.account_id = user.uid;
                material.username = Some(user.name);
            }
            Err(e) => tracing::warn!(error = %e, "Gyazo account lookup failed"),
        }

        material.replace(settings);
        tracing::info!("Logged in to Gyazo");
        Ok(())
    }
}
