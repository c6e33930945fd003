//! Shared HTTP plumbing for the provider drivers.

use reqwest::{Client, Response, StatusCode};
use serde_json::{Map, Value};
use std::time::Duration;

use parley_core::error::{AgentError, Result};

/// Request timeout when the provider config sets none.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Client honoring an optional `timeout_secs` provider setting.
pub fn client(extra: &Map<String, Value>) -> Result<Client> {
    let timeout = extra
        .get("timeout_secs")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);

    Client::builder()
        .timeout(Duration::from_secs(timeout))
        .build()
        .map_err(|e| AgentError::Config(format!("failed to build HTTP client: {e}")))
}

/// Connection-level failure, cause kept in the message.
pub fn transport_error(provider: &str, err: &reqwest::Error) -> AgentError {
    AgentError::ProviderUnavailable {
        reason: format!("{provider}: {err}"),
        status: err.status().map(|s| s.as_u16()),
    }
}

/// Pass successful responses through; turn everything else into an error
/// carrying the status and body.
pub async fn check_status(provider: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let reason = format!("{provider} returned {status}: {body}");
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AgentError::Auth(reason),
        StatusCode::TOO_MANY_REQUESTS => AgentError::RateLimited(reason),
        _ => AgentError::ProviderUnavailable {
            reason,
            status: Some(status.as_u16()),
        },
    })
}

/// Parse a JSON body.
pub async fn json_body(provider: &str, response: Response) -> Result<Value> {
    response
        .json::<Value>()
        .await
        .map_err(|e| AgentError::Parse(format!("{provider}: invalid JSON response: {e}")))
}
