//! Token lifecycle: token endpoint exchanges, expiry policy and the
//! refresh-before-use check every authenticated request goes through.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use oauth2::basic::{BasicClient, BasicErrorResponse, BasicErrorResponseType, BasicTokenResponse};
use oauth2::{
    AuthType, AuthorizationCode, ClientId, ClientSecret, EndpointNotSet, EndpointSet,
    PkceCodeVerifier, RedirectUrl, RefreshToken, RequestTokenError, TokenResponse as _, TokenUrl,
};
use reqwest::Client;
use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;

use capshare_common::{DestinationSettings, Error, Result, ResultExt};

use crate::destination::DestinationKind;
use crate::settings::SettingsHandle;

pub const ACCESS_TOKEN: &str = "accessToken";
pub const REFRESH_TOKEN: &str = "refreshToken";
pub const EXPIRY: &str = "expiry";
pub const ACCOUNT_ID: &str = "id";
pub const USERNAME: &str = "username";

/// Every key owned by the token lifecycle, cleared on logout.
pub const TOKEN_KEYS: [&str; 5] = [ACCESS_TOKEN, REFRESH_TOKEN, EXPIRY, ACCOUNT_ID, USERNAME];

/// Lifetime used when the provider does not declare one.
const FALLBACK_LIFETIME_SECS: i64 = 3600;

/// Longest declared lifetime taken at face value.
const MAX_LIFETIME_DAYS: i64 = 365;

/// How the expiry of a new access token is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryPolicy {
    /// Use the provider's `expires_in`.
    ServerDeclared,
    /// Ignore `expires_in` and apply a fixed lifetime.
    Fixed(Duration),
}

impl ExpiryPolicy {
    /// Expiry instant for a token issued at `now`. Always after `now`.
    ///
    /// Declared lifetimes are capped at a year, so provider input cannot
    /// overflow the instant.
    pub fn expiry_from(self, expires_in: Option<i64>, now: DateTime<Utc>) -> DateTime<Utc> {
        let fallback = Duration::seconds(FALLBACK_LIFETIME_SECS);
        let max = Duration::days(MAX_LIFETIME_DAYS);

        let lifetime = match self {
            ExpiryPolicy::Fixed(lifetime) if lifetime > Duration::zero() => lifetime,
            ExpiryPolicy::Fixed(_) => fallback,
            ExpiryPolicy::ServerDeclared => match expires_in {
                Some(secs) if secs > 0 => Duration::try_seconds(secs).map_or(max, |d| d.min(max)),
                _ => fallback,
            },
        };
        now.checked_add_signed(lifetime)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Expired when the expiry is at or before `now`.
pub fn is_expired(expiry: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    expiry <= now
}

/// Token material as stored in a destination's settings.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenMaterial {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
    pub account_id: Option<String>,
    pub username: Option<String>,
}

impl fmt::Debug for TokenMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenMaterial")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expiry", &self.expiry)
            .field("account_id", &self.account_id)
            .field("username", &self.username)
            .finish()
    }
}

impl TokenMaterial {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expiry: None,
            account_id: None,
            username: None,
        }
    }

    /// Read stored material; `None` without an access token.
    pub fn from_settings(settings: &DestinationSettings) -> Option<Self> {
        let access_token = settings.get_str(ACCESS_TOKEN)?;
        Some(Self {
            access_token: access_token.to_string(),
            refresh_token: settings.get_str(REFRESH_TOKEN).map(str::to_string),
            expiry: settings.get_str(EXPIRY).and_then(parse_instant),
            account_id: settings.get_str(ACCOUNT_ID).map(str::to_string),
            username: settings.get_str(USERNAME).map(str::to_string),
        })
    }

    /// Replace every stored token key with this material, as after a login.
    pub fn replace(&self, settings: &SettingsHandle<'_>) {
        for key in TOKEN_KEYS {
            settings.remove(key);
        }
        self.persist(settings);
    }

    /// Write the material. Absent optional fields leave stored values alone.
    pub fn persist(&self, settings: &SettingsHandle<'_>) {
        settings.set(ACCESS_TOKEN, self.access_token.as_str());
        if let Some(refresh_token) = &self.refresh_token {
            settings.set(REFRESH_TOKEN, refresh_token.as_str());
        }
        if let Some(expiry) = self.expiry {
            settings.set(EXPIRY, expiry.to_rfc3339());
        }
        if let Some(account_id) = &self.account_id {
            settings.set(ACCOUNT_ID, account_id.as_str());
        }
        if let Some(username) = &self.username {
            settings.set(USERNAME, username.as_str());
        }
    }
}

fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Token endpoint of a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEndpoint {
    pub url: String,
    pub client_id: String,
    pub client_secret: Option<String>,
}

/// OAuth2 client that only knows the token endpoint.
type TokenClient =
    BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

impl TokenEndpoint {
    /// Client credentials travel in the form body, which every supported
    /// provider accepts.
    fn client(&self) -> Result<TokenClient> {
        let token_url = TokenUrl::new(self.url.clone())
            .host_context(format!("Invalid token URL '{}'", self.url))?;

        let mut client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_token_uri(token_url)
            .set_auth_type(AuthType::RequestBody);
        if let Some(secret) = self.client_secret.as_deref().map(str::trim) {
            if !secret.is_empty() {
                client = client.set_client_secret(ClientSecret::new(secret.to_string()));
            }
        }
        Ok(client)
    }
}

/// Storable material from a token endpoint response.
///
/// When no new refresh token is returned `previous_refresh` is kept.
fn material_from(
    response: &BasicTokenResponse,
    policy: ExpiryPolicy,
    previous_refresh: Option<&str>,
    now: DateTime<Utc>,
) -> TokenMaterial {
    let expires_in = response
        .expires_in()
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX));

    TokenMaterial {
        access_token: response.access_token().secret().trim().to_string(),
        refresh_token: response
            .refresh_token()
            .map(|t| t.secret().trim().to_string())
            .filter(|t| !t.is_empty())
            .or_else(|| previous_refresh.map(str::to_string)),
        expiry: Some(policy.expiry_from(expires_in, now)),
        account_id: None,
        username: None,
    }
}

/// Map a failed token request onto the error taxonomy.
///
/// OAuth error bodies are the provider refusing the grant; everything else
/// is a transport or protocol failure.
fn token_error<RE>(
    kind: DestinationKind,
    action: &str,
    err: RequestTokenError<RE, BasicErrorResponse>,
) -> Error
where
    RE: StdError + Send + Sync + 'static,
{
    match err {
        RequestTokenError::ServerResponse(response) => {
            let detail = response
                .error_description()
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| response.error().to_string());

            match response.error() {
                BasicErrorResponseType::InvalidGrant
                | BasicErrorResponseType::InvalidClient
                | BasicErrorResponseType::UnauthorizedClient => Error::destination(
                    kind.as_str(),
                    format!("Authorization expired or was revoked ({}); log in again", detail),
                ),
                _ => Error::destination(
                    kind.as_str(),
                    format!("{} was rejected: {}", action, detail),
                ),
            }
        }
        RequestTokenError::Request(e) => {
            Error::user(format!("{} request failed", action)).with_cause(e)
        }
        RequestTokenError::Parse(e, _) => {
            Error::user(format!("{} returned an unreadable response", action)).with_cause(e)
        }
        RequestTokenError::Other(detail) => {
            Error::user(format!("{} failed: {}", action, detail))
        }
    }
}

/// Provider-specific refresh exchange.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    fn destination(&self) -> DestinationKind;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenMaterial>;
}

/// Token endpoint client of one provider.
#[derive(Debug, Clone)]
pub struct OAuthTokenClient {
    http: Client,
    kind: DestinationKind,
    endpoint: TokenEndpoint,
    policy: ExpiryPolicy,
}

impl OAuthTokenClient {
    pub fn new(
        http: Client,
        kind: DestinationKind,
        endpoint: TokenEndpoint,
        policy: ExpiryPolicy,
    ) -> Self {
        Self {
            http,
            kind,
            endpoint,
            policy,
        }
    }

    /// Exchange a code and return the material to persist.
    ///
    /// # Errors
    /// - Invalid token or redirect URL (host error)
    /// - Grant refused by the provider (destination error)
    /// - Transport failure or unreadable response (user error)
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        verifier: Option<&str>,
    ) -> Result<TokenMaterial> {
        let client = self.endpoint.client()?;
        let redirect_uri = RedirectUrl::new(redirect_uri.to_string())
            .host_context(format!("Invalid redirect URI '{}'", redirect_uri))?;

        let mut request = client
            .exchange_code(AuthorizationCode::new(code.trim().to_string()))
            .set_redirect_uri(Cow::Owned(redirect_uri));
        if let Some(verifier) = verifier {
            request = request.set_pkce_verifier(PkceCodeVerifier::new(verifier.to_string()));
        }

        let response = request
            .request_async(&self.http)
            .await
            .map_err(|e| token_error(self.kind, "Token exchange", e))?;
        Ok(material_from(&response, self.policy, None, Utc::now()))
    }
}

#[async_trait]
impl TokenRefresher for OAuthTokenClient {
    fn destination(&self) -> DestinationKind {
        self.kind
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenMaterial> {
        let client = self.endpoint.client()?;
        let response = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.trim().to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| token_error(self.kind, "Token refresh", e))?;
        Ok(material_from(&response, self.policy, Some(refresh_token), Utc::now()))
    }
}

/// Stored access token without any refresh handling, for long-lived tokens.
pub fn stored_access_token(
    kind: DestinationKind,
    settings: &DestinationSettings,
) -> Result<String> {
    settings
        .get_str(ACCESS_TOKEN)
        .map(str::to_string)
        .ok_or_else(|| Error::destination(kind.as_str(), "Missing access token; log in first"))
}

/// Refresh token and expiry of a refreshable login, or what is missing.
fn refreshable_credentials(
    settings: &DestinationSettings,
) -> std::result::Result<(&str, DateTime<Utc>), &'static str> {
    if settings.get_str(ACCESS_TOKEN).is_none() {
        return Err("Missing access token; log in first");
    }
    let refresh_token = settings
        .get_str(REFRESH_TOKEN)
        .ok_or("Missing refresh token; log in again")?;
    let expiry = settings
        .get_str(EXPIRY)
        .and_then(parse_instant)
        .ok_or("Missing token expiry; log in again")?;
    Ok((refresh_token, expiry))
}

/// Whether `settings` hold everything [`valid_access_token`] needs.
pub fn has_refreshable_login(settings: &DestinationSettings) -> bool {
    refreshable_credentials(settings).is_ok()
}

/// A valid access token, refreshing and persisting first when expired.
///
/// # Errors
/// - Missing access token, refresh token or expiry (destination error)
/// - Refresh rejected by the provider (destination error)
pub async fn valid_access_token(
    refresher: &dyn TokenRefresher,
    settings: &SettingsHandle<'_>,
) -> Result<String> {
    let destination = refresher.destination().as_str();
    let current = settings.get();
    let (refresh_token, expiry) = refreshable_credentials(&current)
        .map_err(|missing| Error::destination(destination, missing))?;

    if is_expired(expiry, Utc::now()) {
        tracing::info!(destination = %destination, "Refreshing expired access token");
        let material = refresher.refresh(refresh_token).await?;
        material.persist(settings);
    }

    stored_access_token(refresher.destination(), &settings.get())
}

/// `Authorization` header value for the current access token.
pub async fn bearer_header(
    refresher: &dyn TokenRefresher,
    settings: &SettingsHandle<'_>,
) -> Result<String> {
    let token = valid_access_token(refresher, settings).await?;
    Ok(format!("Bearer {}", token))
}
