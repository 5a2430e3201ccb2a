//! OneDrive through Microsoft Graph: authorization code + PKCE, refresh
//! tokens rotate on every refresh.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use capshare_common::{
    DestinationSettings, Error, Result, ShareFile, ShareOptions, ShareResponse,
};

use crate::auth::{
    self, validate_callback, AuthState, AuthorizationGrant, AuthorizationRequest, CallbackParams,
    GrantFlow,
};
use crate::config::{DestinationsConfig, OneDriveConfig};
use crate::destination::{
    Capabilities, Destination, DestinationConfiguration, DestinationKind, SettingsPanel,
    UrlOpener,
};
use crate::file::{mime_type_for, FileSource};
use crate::http::{expect_success, read_json, transport_error};
use crate::pkce::ChallengeMethod;
use crate::settings::SettingsHandle;
use crate::token::{
    bearer_header, has_refreshable_login, ExpiryPolicy, OAuthTokenClient, TokenEndpoint,
};

use super::{account_panel, endpoint, require_client_id, share_response};

const KIND: DestinationKind = DestinationKind::OneDrive;

#[derive(Debug, Deserialize)]
struct DriveItem {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Permission {
    link: SharingLink,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SharingLink {
    web_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphUser {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    user_principal_name: Option<String>,
}

pub struct OneDriveDestination {
    http: Client,
    config: OneDriveConfig,
    redirect_uri: String,
    tokens: OAuthTokenClient,
    files: Arc<dyn FileSource>,
}

impl OneDriveDestination {
    pub fn new(http: Client, config: &DestinationsConfig, files: Arc<dyn FileSource>) -> Self {
        let tokens = OAuthTokenClient::new(
            http.clone(),
            KIND,
            TokenEndpoint {
                url: config.onedrive.token_url.clone(),
                client_id: config.onedrive.client_id.clone(),
                client_secret: None,
            },
            ExpiryPolicy::ServerDeclared,
        );
        Self {
            http,
            config: config.onedrive.clone(),
            redirect_uri: config.redirect_uri(KIND),
            tokens,
            files,
        }
    }

    async fn create_link(&self, auth: &str, item_id: &str) -> Result<String> {
        let response = self
            .http
            .post(endpoint(
                &self.config.graph_url,
                &["me", "drive", "items", item_id, "createLink"],
            )?)
            .header(header::AUTHORIZATION, auth)
            .json(&json!({ "type": "view", "scope": "anonymous" }))
            .send()
            .await
            .map_err(|e| transport_error("Creating a OneDrive link", e))?;

        let permission: Permission =
            read_json(KIND.as_str(), "Creating a OneDrive link", response).await?;
        Ok(permission.link.web_url)
    }

    async fn me(&self, access_token: &str) -> Result<GraphUser> {
        let response = self
            .http
            .get(endpoint(&self.config.graph_url, &["me"])?)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| transport_error("OneDrive account lookup", e))?;

        read_json(KIND.as_str(), "OneDrive account lookup", response).await
    }
}

#[async_trait]
impl Destination for OneDriveDestination {
    fn kind(&self) -> DestinationKind {
        KIND
    }

    fn configuration(&self) -> DestinationConfiguration {
        DestinationConfiguration {
            id: KIND.id(),
            name: "OneDrive",
            always_available: false,
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            settings_panel: true,
            tool_bar: false,
            oauth_callback: true,
        }
    }

    fn is_available(&self, settings: &DestinationSettings) -> bool {
        has_refreshable_login(settings)
    }

    async fn share(
        &self,
        file: &ShareFile,
        _options: &ShareOptions,
        settings: &SettingsHandle<'_>,
    ) -> Result<ShareResponse> {
        let auth = bearer_header(&self.tokens, settings).await?;
        let data = self.files.read(&file.path).await?;

        let target = format!("{}:", file.file_name());
        let response = self
            .http
            .put(endpoint(
                &self.config.graph_url,
                &["me", "drive", "special", "approot:", target.as_str(), "content"],
            )?)
            .header(header::AUTHORIZATION, auth.as_str())
            .header(header::CONTENT_TYPE, mime_type_for(&file.path))
            .body(data)
            .send()
            .await
            .map_err(|e| transport_error("Upload to OneDrive", e))?;

        let item: DriveItem = read_json(KIND.as_str(), "Upload to OneDrive", response).await?;
        let link = self.create_link(&auth, &item.id).await?;

        tracing::info!(id = %item.id, "Uploaded to OneDrive");
        Ok(share_response(KIND, file, link, item.id, None, false))
    }

    async fn delete(
        &self,
        share: &ShareResponse,
        settings: &SettingsHandle<'_>,
        _opener: &dyn UrlOpener,
    ) -> Result<()> {
        let auth = bearer_header(&self.tokens, settings).await?;
        let response = self
            .http
            .delete(endpoint(
                &self.config.graph_url,
                &["me", "drive", "items", share.share_id.as_str()],
            )?)
            .header(header::AUTHORIZATION, auth)
            .send()
            .await
            .map_err(|e| transport_error("Deleting from OneDrive", e))?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(id = %share.share_id, "OneDrive item already gone");
            return Ok(());
        }
        expect_success(KIND.as_str(), "Deleting from OneDrive", response).await?;
        Ok(())
    }

    fn settings_panel(&self, settings: &DestinationSettings) -> Option<SettingsPanel> {
        Some(account_panel(settings))
    }

    fn begin_authorization(&self) -> Result<AuthorizationRequest> {
        let client_id = require_client_id(KIND, &self.config.client_id)?;
        let state = AuthState::with_pkce(ChallengeMethod::S256);

        let mut params = auth::base_params("code", client_id, &self.redirect_uri, &state);
        params.push(("scope", self.config.scopes.as_str()));
        let url = auth::authorization_url(&self.config.auth_url, &params)?;

        Ok(AuthorizationRequest { state, url })
    }

    async fn on_oauth_request(
        &self,
        auth_state: Option<AuthState>,
        params: &CallbackParams,
        settings: &SettingsHandle<'_>,
    ) -> Result<()> {
        let AuthorizationGrant::Code { code, verifier } =
            validate_callback(KIND, auth_state, params, GrantFlow::AuthorizationCode)?
        else {
            return Err(Error::destination(KIND.as_str(), "Unexpected authorization grant"));
        };

        let mut material = self
            .tokens
            .exchange_code(&code, &self.redirect_uri, verifier.as_deref())
            .await?;
        if material.refresh_token.is_none() {
            return Err(Error::destination(
                KIND.as_str(),
                "No refresh token received; offline_access was not granted",
            ));
        }

        match self.me(&material.access_token).await {
            Ok(user) => {
                material.account_id = Some(user.id);
                material.username = user.user_principal_name.or(user.display_name);
            }
            Err(e) => tracing::warn!(error = %e, "OneDrive account lookup failed"),
        }

        material.replace(settings);
        tracing::info!("Logged in to OneDrive");
        Ok(())
    }
}
