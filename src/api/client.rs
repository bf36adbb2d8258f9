use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::debug;

use super::stream::{ByteStream, DeltaStream};
use super::ModelClient;
use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::types::{ApiErrorBody, ChatRequest};

/// Client for OpenAI-compatible `/chat/completions` endpoints.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl ApiClient {
    /// Build a client from resolved API configuration.
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let http = reqwest::Client::builder().connect_timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.trim().to_string(),
            timeout,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ModelClient for ApiClient {
    async fn stream_chat(&self, request: &ChatRequest) -> Result<DeltaStream, ApiError> {
        let url = self.endpoint();
        let mut req = self.http.post(&url).json(request);
        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }

        debug!(url = %url, model = %request.model, messages = request.messages.len(), "dispatching completion");
        let response = tokio::time::timeout(self.timeout, req.send())
            .await
            .map_err(|_| {
                ApiError::Stream(format!(
                    "no response within {}s",
                    self.timeout.as_secs()
                ))
            })??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                code: status.as_u16(),
                message: error_message(&body),
            });
        }

        let bytes: ByteStream = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(ApiError::from)),
        );
        Ok(DeltaStream::spawn(bytes, Some(self.timeout)))
    }
}

/// Pull the provider's message out of an error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => match parsed.error.kind {
            Some(kind) => format!("{} ({kind})", parsed.error.message),
            None => parsed.error.message,
        },
        Err(_) if body.trim().is_empty() => "empty response body".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_config(base_url: &str) -> ApiConfig {
        ApiConfig {
            base_url: base_url.to_string(),
            api_key: " sk-test ".to_string(),
            ..ApiConfig::default()
        }
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let client = ApiClient::new(&api_config("http://localhost:8080/v1/")).unwrap();
        assert_eq!(client.endpoint(), "http://localhost:8080/v1/chat/completions");
        assert_eq!(client.api_key, "sk-test");
    }

    #[test]
    fn error_message_prefers_provider_message() {
        let body = r#"{"error":{"message":"Incorrect API key","type":"invalid_request_error","code":"invalid_api_key"}}"#;
        assert_eq!(
            error_message(body),
            "Incorrect API key (invalid_request_error)"
        );
    }

    #[test]
    fn error_message_falls_back_to_raw_body() {
        assert_eq!(error_message("Bad Gateway\n"), "Bad Gateway");
        assert_eq!(error_message(""), "empty response body");
    }
}
