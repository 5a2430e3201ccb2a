//! Shared HTTP plumbing for provider adapters.

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

use capshare_common::{Error, Result, ResultExt};

const USER_AGENT: &str = "Capshare/0.1";

/// Non-success response from a provider API.
#[derive(Debug, Clone, Error)]
#[error("HTTP {status}: {body}")]
pub struct HttpStatusError {
    pub status: StatusCode,
    pub body: String,
}

/// Build the HTTP client used by all adapters.
pub fn build_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .host_context("Failed to create HTTP client")
}

/// Map a transport failure to a user error.
pub(crate) fn transport_error(action: &str, error: reqwest::Error) -> Error {
    Error::user(format!("{} failed", action)).with_cause(error)
}

/// Check the response status.
///
/// Rejected credentials (401/403) are destination errors, any other failure
/// status is a user error. The response body is kept as the cause.
pub(crate) async fn expect_success(
    destination: &str,
    action: &str,
    response: Response,
) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let cause = HttpStatusError {
        status,
        body: truncate(&body, 512),
    };

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Err(Error::destination(
            destination,
            format!("{} was rejected; log in again", action),
        )
        .with_cause(cause))
    } else {
        Err(Error::user(format!("{} failed ({})", action, status)).with_cause(cause))
    }
}

/// [`expect_success`] and decode the JSON body.
pub(crate) async fn read_json<T: DeserializeOwned>(
    destination: &str,
    action: &str,
    response: Response,
) -> Result<T> {
    expect_success(destination, action, response)
        .await?
        .json()
        .await
        .user_context(format!("{}: unexpected response", action))
}

fn truncate(body: &str, max: usize) -> String {
    body.chars().take(max).collect()
}
