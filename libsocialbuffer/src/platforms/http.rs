//! HTTP plumbing shared by the live publishers
//!
//! Every call is authenticated with the account's bearer token. Responses
//! are mapped onto [`PlatformError`] by status code:
//!
//! | status        | error            | retry? |
//! |---------------|------------------|--------|
//! | 401, 403      | `Authentication` | no     |
//! | 400, 422      | `Validation`     | no     |
//! | 429           | `RateLimit`      | yes    |
//! | 5xx           | `Network`        | yes    |
//! | other non-2xx | `Posting`        | no     |
//!
//! Connection failures become `Network`, client timeouts `Timeout`.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::error::{PlatformError, Result};
use crate::types::Platform;

/// Longest error body excerpt kept in an error message.
const MAX_ERROR_EXCERPT: usize = 200;

#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    platform: Platform,
}

impl ApiClient {
    pub fn new(platform: Platform, base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("socialbuffer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PlatformError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            platform,
        })
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// POST a JSON body and return the decoded JSON response.
    pub async fn post_json(&self, path: &str, token: &str, body: &Value) -> Result<Value> {
        let url = self.url(path);
        tracing::debug!(platform = %self.platform, url = %url, "POST");

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(self.platform, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(self.platform, e))?;

        if !status.is_success() {
            let error = map_status(status, &text);
            tracing::debug!(
                platform = %self.platform,
                status = status.as_u16(),
                error = %error,
                "Platform rejected request"
            );
            return Err(error.into());
        }

        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

/// Map a non-success status and its body to a platform error.
pub fn map_status(status: StatusCode, body: &str) -> PlatformError {
    let message = format!("HTTP {}: {}", status.as_u16(), error_excerpt(body));
    match status.as_u16() {
        401 | 403 => PlatformError::Authentication(message),
        400 | 422 => PlatformError::Validation(message),
        429 => PlatformError::RateLimit(message),
        500..=599 => PlatformError::Network(message),
        _ => PlatformError::Posting(message),
    }
}

fn transport_error(platform: Platform, error: reqwest::Error) -> PlatformError {
    if error.is_timeout() {
        PlatformError::Timeout(format!("{} request timed out", platform))
    } else {
        PlatformError::Network(format!("{} request failed: {}", platform, error))
    }
}

/// Best human-readable message from an error body.
fn error_excerpt(body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|value| {
        [
            "/error/message",
            "/error_description",
            "/message",
            "/detail",
            "/error",
        ]
        .iter()
        .find_map(|pointer| value.pointer(pointer).and_then(Value::as_str).map(String::from))
    });

    let message = from_json.unwrap_or_else(|| body.trim().to_string());
    if message.chars().count() > MAX_ERROR_EXCERPT {
        let cut: String = message.chars().take(MAX_ERROR_EXCERPT).collect();
        format!("{}...", cut)
    } else {
        message
    }
}

/// First string or number found at any of the JSON `pointers`.
pub fn extract_id(value: &Value, pointers: &[&str]) -> Option<String> {
    pointers.iter().find_map(|pointer| match value.pointer(pointer) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Like [`extract_id`], failing with `Posting` when nothing matches.
pub fn require_id(platform: Platform, value: &Value, pointers: &[&str]) -> Result<String> {
    extract_id(value, pointers).ok_or_else(|| {
        PlatformError::Posting(format!("{} response did not include a post id", platform)).into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (401, "auth"),
            (403, "auth"),
            (400, "validation"),
            (422, "validation"),
            (429, "rate"),
            (500, "network"),
            (503, "network"),
            (404, "posting"),
            (409, "posting"),
        ];
        for (code, expected) in cases {
            let status = StatusCode::from_u16(code).unwrap();
            let error = map_status(status, "");
            let kind = match error {
                PlatformError::Authentication(_) => "auth",
                PlatformError::Validation(_) => "validation",
                PlatformError::RateLimit(_) => "rate",
                PlatformError::Network(_) => "network",
                PlatformError::Posting(_) => "posting",
                PlatformError::Timeout(_) => "timeout",
            };
            assert_eq!(kind, expected, "status {}", code);
        }
    }

    #[test]
    fn test_error_excerpt_prefers_json_message() {
        let body = r#"{"error": {"message": "Invalid OAuth access token", "code": 190}}"#;
        let error = map_status(StatusCode::UNAUTHORIZED, body);
        assert_eq!(
            error.to_string(),
            "Authentication failed: HTTP 401: Invalid OAuth access token"
        );
    }

    #[test]
    fn test_error_excerpt_truncates_plain_bodies() {
        let body = "x".repeat(1000);
        let excerpt = error_excerpt(&body);
        assert_eq!(excerpt.chars().count(), MAX_ERROR_EXCERPT + 3);
    }

    #[test]
    fn test_extract_id() {
        let value = json!({"data": {"id": "1445880"}, "post_id": 77});
        assert_eq!(extract_id(&value, &["/id", "/data/id"]), Some("1445880".to_string()));
        assert_eq!(extract_id(&value, &["/post_id"]), Some("77".to_string()));
        assert_eq!(extract_id(&value, &["/missing"]), None);
        assert!(require_id(Platform::Twitter, &value, &["/nope"]).is_err());
    }

    #[test]
    fn test_url_joining() {
        let client = ApiClient::new(
            Platform::Facebook,
            "https://graph.example.com/v19.0/",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.url("/123/feed"), "https://graph.example.com/v19.0/123/feed");
        assert_eq!(client.url("123/photos"), "https://graph.example.com/v19.0/123/photos");
    }
}
