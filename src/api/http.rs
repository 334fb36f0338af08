//! HTTP utilities for control-plane REST calls

use super::client::ClientError;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and drops non-printable characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let cut = (0..=MAX_LOG_BODY_LENGTH)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Pull the human-readable message out of an error envelope.
/// Accepts both `{"message": ..}` and `{"error": {"message": ..}}`.
fn extract_error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return sanitize_for_log(body);
    };

    value
        .get("message")
        .or_else(|| value.get("error").and_then(|e| e.get("message")))
        .and_then(|v| v.as_str())
        .map(sanitize_for_log)
        .unwrap_or_else(|| sanitize_for_log(body))
}

/// HTTP client wrapper for control-plane API calls
#[derive(Clone)]
pub struct ApiHttpClient {
    client: Client,
}

impl ApiHttpClient {
    /// Create a new HTTP client
    pub fn new() -> Result<Self, ClientError> {
        let client = Client::builder()
            .user_agent(concat!("assessctl/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    pub async fn get(&self, url: &str, token: &str) -> Result<Value, ClientError> {
        self.send(Method::GET, url, token, None).await
    }

    pub async fn post(&self, url: &str, token: &str, body: &Value) -> Result<Value, ClientError> {
        self.send(Method::POST, url, token, Some(body)).await
    }

    pub async fn put(&self, url: &str, token: &str, body: &Value) -> Result<Value, ClientError> {
        self.send(Method::PUT, url, token, Some(body)).await
    }

    pub async fn delete(&self, url: &str, token: &str) -> Result<Value, ClientError> {
        self.send(Method::DELETE, url, token, None).await
    }

    /// Issue one request. A 404 is reported as [`ClientError::NotFound`],
    /// any other non-success status as [`ClientError::Api`].
    async fn send(
        &self,
        method: Method,
        url: &str,
        token: &str,
        body: Option<&Value>,
    ) -> Result<Value, ClientError> {
        tracing::debug!("{} {}", method, url);

        let mut request = self.client.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let response_body = response.text().await?;

        if status == StatusCode::NOT_FOUND {
            tracing::debug!("API reported not found: {}", url);
            return Err(ClientError::NotFound);
        }

        if !status.is_success() {
            // Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&response_body));
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: extract_error_message(&response_body),
            });
        }

        if response_body.is_empty() {
            return Ok(Value::Null);
        }

        Ok(serde_json::from_str(&response_body)?)
    }
}

/// Format a client error for display
/// Keeps messages generic to avoid leaking API details
pub fn format_api_error(error: &ClientError) -> String {
    match error {
        ClientError::NotFound => "Resource not found.".to_string(),
        ClientError::Auth(_) => {
            "Authentication failed. Set ASSESSCTL_TOKEN or configure Application Default Credentials."
                .to_string()
        }
        ClientError::Api { status, .. } => match status {
            401 => "Authentication failed. Check your credentials.".to_string(),
            403 => "Permission denied. Check your IAM permissions.".to_string(),
            400 => "Invalid request. Check your parameters.".to_string(),
            409 => "Resource conflict. The resource may already exist or be in use.".to_string(),
            429 => "Rate limit exceeded. Please try again later.".to_string(),
            500..=599 => "Service temporarily unavailable. Please try again.".to_string(),
            _ => "Request failed. Check your network connection and try again.".to_string(),
        },
        ClientError::Request(_) => {
            "Request failed. Check your network connection and try again.".to_string()
        }
        ClientError::Decode(_) => "Unexpected response from the control plane.".to_string(),
    }
}
