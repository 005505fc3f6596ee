//! HTTP execution abstraction for testing.
//!
//! The client sends every call through an [`HttpExecutor`], so tests can
//! swap the network for canned responses.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use url::Url;

use crate::error::ClientError;

/// One outbound call: a JSON body POSTed to the function's URL.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    pub url: Url,
    pub body: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallResponse {
    pub status: u16,
    pub status_text: String,
    pub body_text: String,
}

impl CallResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait HttpExecutor: Send + Sync {
    /// Perform the request once. No retries.
    async fn execute(&self, request: &CallRequest) -> Result<CallResponse, ClientError>;
}

/// Client options.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    /// Sent with every call, e.g. `Authorization`.
    pub headers: Vec<(String, String)>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            headers: Vec::new(),
        }
    }
}

impl ClientConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Production executor using reqwest.
pub struct ReqwestExecutor {
    client: Client,
}

impl ReqwestExecutor {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        for (name, value) in &config.headers {
            let invalid = |message: String| ClientError::InvalidHeader {
                name: name.clone(),
                message,
            };
            let header_name =
                HeaderName::try_from(name.as_str()).map_err(|e| invalid(e.to_string()))?;
            let header_value =
                HeaderValue::try_from(value.as_str()).map_err(|e| invalid(e.to_string()))?;
            headers.insert(header_name, header_value);
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_default_timeout() -> Result<Self, ClientError> {
        Self::new(&ClientConfig::default())
    }
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    async fn execute(&self, request: &CallRequest) -> Result<CallResponse, ClientError> {
        let response = self
            .client
            .post(request.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&request.body)?)
            .send()
            .await?;

        let status = response.status();
        let status_text = status.canonical_reason().unwrap_or("Unknown").to_string();
        let body_text = response.text().await?;

        Ok(CallResponse {
            status: status.as_u16(),
            status_text,
            body_text,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reqwest_executor_creation() {
        assert!(ReqwestExecutor::with_default_timeout().is_ok());
    }

    #[test]
    fn invalid_default_header_is_reported() {
        let config = ClientConfig::default().with_header("bad header", "x");
        assert!(matches!(
            ReqwestExecutor::new(&config),
            Err(ClientError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn config_builders() {
        let config = ClientConfig::default()
            .with_timeout(Duration::from_secs(5))
            .with_header("Authorization", "Bearer token");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.headers.len(), 1);
        assert_eq!(ClientConfig::default().timeout, Duration::from_secs(30));
    }

    #[test]
    fn success_range() {
        assert!(mock::MockExecutor::success_response(serde_json::Value::Null).is_success());
        assert!(!mock::MockExecutor::error_response(403, "Forbidden").is_success());
    }
}
