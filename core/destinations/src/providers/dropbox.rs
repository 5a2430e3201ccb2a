//! Dropbox: authorization code + PKCE with offline (refreshable) tokens.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use capshare_common::{
    DestinationSettings, Error, Result, ShareFile, ShareOptions, ShareResponse,
};

use crate::auth::{
    self, validate_callback, AuthState, AuthorizationGrant, AuthorizationRequest, CallbackParams,
    GrantFlow,
};
use crate::config::{DestinationsConfig, DropboxConfig};
use crate::destination::{
    Capabilities, Destination, DestinationConfiguration, DestinationKind, SettingsPanel, ToolBar,
    ToolBarItem, UrlOpener,
};
use crate::file::FileSource;
use crate::http::{expect_success, read_json, transport_error};
use crate::pkce::ChallengeMethod;
use crate::settings::SettingsHandle;
use crate::token::{
    bearer_header, has_refreshable_login, ExpiryPolicy, OAuthTokenClient, TokenEndpoint,
};

use super::{account_panel, endpoint, require_client_id, share_response};

const KIND: DestinationKind = DestinationKind::Dropbox;

#[derive(Debug, Deserialize)]
struct FileMetadata {
    id: String,
    path_lower: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SharedLink {
    url: String,
}

#[derive(Debug, Deserialize)]
struct Account {
    account_id: String,
    name: AccountName,
}

#[derive(Debug, Deserialize)]
struct AccountName {
    display_name: String,
}

pub struct DropboxDestination {
    http: Client,
    config: DropboxConfig,
    redirect_uri: String,
    tokens: OAuthTokenClient,
    files: Arc<dyn FileSource>,
}

impl DropboxDestination {
    pub fn new(http: Client, config: &DestinationsConfig, files: Arc<dyn FileSource>) -> Self {
        let tokens = OAuthTokenClient::new(
            http.clone(),
            KIND,
            TokenEndpoint {
                url: config.dropbox.token_url.clone(),
                client_id: config.dropbox.client_id.clone(),
                client_secret: None,
            },
            ExpiryPolicy::ServerDeclared,
        );
        Self {
            http,
            config: config.dropbox.clone(),
            redirect_uri: config.redirect_uri(KIND),
            tokens,
            files,
        }
    }

    async fn upload(&self, auth: &str, data: bytes::Bytes, name: &str) -> Result<FileMetadata> {
        let arg = json!({
            "path": format!("/{}", name),
            "mode": "add",
            "autorename": true,
            "mute": false,
        });
        let response = self
            .http
            .post(endpoint(&self.config.content_url, &["2", "files", "upload"])?)
            .header(header::AUTHORIZATION, auth)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header("Dropbox-API-Arg", api_arg_header(&arg))
            .body(data)
            .send()
            .await
            .map_err(|e| transport_error("Upload to Dropbox", e))?;

        read_json(KIND.as_str(), "Upload to Dropbox", response).await
    }

    async fn shared_link(&self, auth: &str, path: &str) -> Result<String> {
        let response = self
            .http
            .post(endpoint(
                &self.config.api_url,
                &["2", "sharing", "create_shared_link_with_settings"],
            )?)
            .header(header::AUTHORIZATION, auth)
            .json(&json!({
                "path": path,
                "settings": { "requested_visibility": "public" },
            }))
            .send()
            .await
            .map_err(|e| transport_error("Creating a Dropbox link", e))?;

        // An existing link is reported as a conflict carrying that link.
        if response.status() == StatusCode::CONFLICT {
            let body: Value = response.json().await.unwrap_or_default();
            return body
                .pointer("/error/shared_link_already_exists/metadata/url")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::user("Creating a Dropbox link failed"));
        }

        let link: SharedLink =
            read_json(KIND.as_str(), "Creating a Dropbox link", response).await?;
        Ok(link.url)
    }

    async fn current_account(&self, access_token: &str) -> Result<Account> {
        let response = self
            .http
            .post(endpoint(&self.config.api_url, &["2", "users", "get_current_account"])?)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| transport_error("Dropbox account lookup", e))?;

        read_json(KIND.as_str(), "Dropbox account lookup", response).await
    }
}

/// Whether a `delete_v2` conflict reports that the path does not exist.
fn is_missing_path(body: &Value) -> bool {
    body.pointer("/error/.tag").and_then(Value::as_str) == Some("path_lookup")
        && body.pointer("/error/path_lookup/.tag").and_then(Value::as_str) == Some("not_found")
}

/// `Dropbox-API-Arg` must be ASCII; other characters are sent as `\uXXXX`.
fn api_arg_header(arg: &Value) -> String {
    let mut out = String::new();
    for c in arg.to_string().chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut buf = [0u16; 2];
            for unit in c.encode_utf16(&mut buf) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

#[async_trait]
impl Destination for DropboxDestination {
    fn kind(&self) -> DestinationKind {
        KIND
    }

    fn configuration(&self) -> DestinationConfiguration {
        DestinationConfiguration {
            id: KIND.id(),
            name: "Dropbox",
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

        let name = file.file_name();
        let metadata = self.upload(&auth, data, &name).await?;
        let path = metadata
            .path_lower
            .unwrap_or_else(|| format!("/{}", name.to_lowercase()));
        let link = self.shared_link(&auth, &path).await?;

        tracing::info!(id = %metadata.id, "Uploaded to Dropbox");
        Ok(share_response(KIND, file, link, metadata.id, None, false))
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
            .post(endpoint(&self.config.api_url, &["2", "files", "delete_v2"])?)
            .header(header::AUTHORIZATION, auth)
            .json(&json!({ "path": share.share_id }))
            .send()
            .await
            .map_err(|e| transport_error("Deleting from Dropbox", e))?;

        if response.status() == StatusCode::CONFLICT {
            let body: Value = response.json().await.unwrap_or_default();
            if is_missing_path(&body) {
                tracing::debug!(id = %share.share_id, "Dropbox file already gone");
                return Ok(());
            }
            let summary = body
                .get("error_summary")
                .and_then(Value::as_str)
                .unwrap_or("conflict");
            return Err(Error::user(format!("Deleting from Dropbox failed: {}", summary)));
        }

        expect_success(KIND.as_str(), "Deleting from Dropbox", response).await?;
        Ok(())
    }

    fn settings_panel(&self, settings: &DestinationSettings) -> Option<SettingsPanel> {
        Some(account_panel(settings))
    }

    fn tool_bar(&self) -> Option<ToolBar> {
        Some(ToolBar {
            items: vec![ToolBarItem {
                label: "Open Dropbox",
                url: "https://www.dropbox.com/home".to_string(),
            }],
        })
    }

    fn begin_authorization(&self) -> Result<AuthorizationRequest> {
        let client_id = require_client_id(KIND, &self.config.client_id)?;
        let state = AuthState::with_pkce(ChallengeMethod::S256);

        let mut params = auth::base_params("code", client_id, &self.redirect_uri, &state);
        params.push(("token_access_type", "offline"));
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

        match self.current_account(&material.access_token).await {
            Ok(account) => {
                material.account_id = Some(account.account_id);
                material.username = Some(account.name.display_name);
            }
            Err(e) => tracing::warn!(error = %e, "Dropbox account lookup failed"),
        }

        material.replace(settings);
        tracing::info!("Logged in to Dropbox");
        Ok(())
    }
}
