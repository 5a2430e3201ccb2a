//! Authorization state machine shared by all OAuth destinations.
//!
//! A login goes `Idle -> AwaitingCallback -> (Resolved | Failed)`. The
//! registry keeps the [`AuthState`] of the flow in progress and hands it to
//! the adapter by value when the redirect arrives, so a flow is consumed
//! exactly once whatever its outcome.

use std::collections::HashMap;
use std::fmt;
use url::Url;

use capshare_common::{Error, Result, ResultExt};

use crate::destination::DestinationKind;
use crate::pkce::{self, ChallengeMethod};

/// Ephemeral data correlating a login request with its callback.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthState {
    pub verifier: Option<String>,
    pub challenge: Option<String>,
    pub method: Option<ChallengeMethod>,
    /// Nonce sent as the `state` parameter.
    pub random: String,
}

impl AuthState {
    /// New state with a fresh PKCE pair and nonce.
    pub fn with_pkce(method: ChallengeMethod) -> Self {
        let pair = pkce::generate_pair(method);
        Self {
            verifier: Some(pair.verifier),
            challenge: Some(pair.challenge),
            method: Some(pair.method),
            random: pkce::generate_nonce(),
        }
    }

    /// New state carrying only a nonce, for flows without PKCE.
    pub fn nonce_only() -> Self {
        Self {
            verifier: None,
            challenge: None,
            method: None,
            random: pkce::generate_nonce(),
        }
    }
}

impl fmt::Debug for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthState")
            .field("verifier", &self.verifier.as_ref().map(|_| "<redacted>"))
            .field("challenge", &self.challenge)
            .field("method", &self.method)
            .field("random", &"<redacted>")
            .finish()
    }
}

/// Which OAuth2 grant a provider uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantFlow {
    /// `code` in the query, exchanged at the token endpoint.
    AuthorizationCode,
    /// Tokens delivered directly in the URL fragment.
    Implicit,
}

/// A login ready to be opened in the browser.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub state: AuthState,
    pub url: Url,
}

/// Parameters of an inbound authorization redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub query: HashMap<String, String>,
    pub fragment: HashMap<String, String>,
}

impl CallbackParams {
    pub fn new(query: HashMap<String, String>, fragment: HashMap<String, String>) -> Self {
        Self { query, fragment }
    }

    /// Decode query and fragment of a redirect URL.
    pub fn from_url(url: &Url) -> Self {
        let query = url.query_pairs().into_owned().collect();
        let fragment = url
            .fragment()
            .map(|f| {
                url::form_urlencoded::parse(f.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();
        Self { query, fragment }
    }

    /// Value of `key`, query first, then fragment. Blank values are absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.query
            .get(key)
            .or_else(|| self.fragment.get(key))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// Validated outcome of a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationGrant {
    Code {
        code: String,
        verifier: Option<String>,
    },
    Token {
        access_token: String,
    },
}

/// Validate a callback against the state of the login in progress.
///
/// Checks, in order: a login is in progress; the provider reported no error;
/// `state` matches the stored nonce; the code (or access token for the
/// implicit grant) is present.
///
/// # Errors
/// Every failure is a destination error for `kind`.
pub fn validate_callback(
    kind: DestinationKind,
    auth_state: Option<AuthState>,
    params: &CallbackParams,
    flow: GrantFlow,
) -> Result<AuthorizationGrant> {
    let destination = kind.as_str();

    let auth_state = auth_state.ok_or_else(|| {
        Error::destination(destination, "No login in progress; start the login again")
    })?;

    if params.get("error").is_some() || params.get("error_description").is_some() {
        let reason = params
            .get("error_description")
            .or_else(|| params.get("error"))
            .unwrap_or("unknown error");
        return Err(Error::destination(
            destination,
            format!("Authorization was denied: {}", reason),
        ));
    }

    match params.get("state") {
        Some(state) if state == auth_state.random => {}
        _ => {
            return Err(Error::destination(
                destination,
                "Authorization state mismatch; start the login again",
            ))
        }
    }

    match flow {
        GrantFlow::AuthorizationCode => {
            let code = params.get("code").ok_or_else(|| {
                Error::destination(destination, "Missing authorization code in callback")
            })?;
            Ok(AuthorizationGrant::Code {
                code: code.to_string(),
                verifier: auth_state.verifier,
            })
        }
        GrantFlow::Implicit => {
            let access_token = params.get("access_token").ok_or_else(|| {
                Error::destination(destination, "Missing access token in callback")
            })?;
            Ok(AuthorizationGrant::Token {
                access_token: access_token.to_string(),
            })
        }
    }
}

/// Provider authorization URL with the given query parameters.
pub fn authorization_url(base: &str, params: &[(&str, &str)]) -> Result<Url> {
    Url::parse_with_params(base, params)
        .host_context(format!("Invalid authorization URL '{}'", base))
}

/// Query parameters common to every code/implicit request.
pub(crate) fn base_params<'a>(
    response_type: &'a str,
    client_id: &'a str,
    redirect_uri: &'a str,
    state: &'a AuthState,
) -> Vec<(&'a str, &'a str)> {
    let mut params = vec![
        ("response_type", response_type),
        ("client_id", client_id),
        ("redirect_uri", redirect_uri),
        ("state", state.random.as_str()),
    ];
    if let (Some(challenge), Some(method)) = (state.challenge.as_deref(), state.method) {
        params.push(("code_challenge", challenge));
        params.push(("code_challenge_method", method.as_str()));
    }
    params
}
