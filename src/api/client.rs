//! HTTP client for the OpenAI-compatible completion API

use super::models::*;
use crate::config::ApiConfig;
use crate::error::{ChatError, RequestError, Result};
use crate::metrics::METRICS;
use moka::future::Cache;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Completion API client
#[derive(Clone)]
pub struct CompletionClient {
    http: Client,
    config: ApiConfig,
    models_cache: Cache<String, Arc<Vec<ModelInfo>>>,
}

impl CompletionClient {
    /// Create a new client.
    ///
    /// No client-level timeout is set: a streamed reply may legitimately run
    /// longer than the wait for its headers.
    pub fn new(config: ApiConfig) -> Result<Self> {
        let http = Client::builder()
            .build()
            .map_err(|e| ChatError::Configuration(e.to_string()))?;

        let models_cache = Cache::builder()
            .max_capacity(16)
            .time_to_live(config.models_cache_ttl())
            .build();

        Ok(Self {
            http,
            config,
            models_cache,
        })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => req.bearer_auth(key.expose_secret()),
            None => req,
        }
    }

    /// Send a request, bounding the wait for response headers
    async fn send(&self, req: RequestBuilder, timeout: Option<Duration>) -> Result<Response> {
        let start = Instant::now();
        let sent = match timeout.or_else(|| self.config.request_timeout()) {
            Some(limit) => match tokio::time::timeout(limit, req.send()).await {
                Ok(sent) => sent,
                Err(_) => {
                    METRICS.record_completion_request("timeout");
                    warn!("No response within {:?}", limit);
                    return Err(RequestError::timeout(limit).into());
                }
            },
            None => req.send().await,
        };
        METRICS
            .completion_request_duration
            .observe(start.elapsed().as_secs_f64());

        let response = sent.map_err(|e| {
            METRICS.record_completion_request("transport_error");
            RequestError::transport(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            METRICS.record_completion_request("http_error");
            let body = response.text().await.unwrap_or_default();
            warn!("Upstream returned {}: {}", status, body);
            return Err(RequestError::from_status(status, body).into());
        }

        METRICS.record_completion_request("success");
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T> {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| RequestError::transport(e.to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Open a streamed chat completion.
    ///
    /// Resolves once the response headers arrive; the body is left unread.
    pub async fn stream_chat(
        &self,
        request: &ChatCompletionRequest,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        debug!(
            "Requesting completion: model={}, {} messages, max_tokens={}",
            request.model,
            request.messages.len(),
            request.max_tokens
        );

        let req = self.authorize(self.http.post(self.config.chat_url()).json(request));
        self.send(req, timeout).await
    }

    /// List the models offered by the server, cached for the configured TTL
    pub async fn list_models(&self) -> Result<Arc<Vec<ModelInfo>>> {
        let url = self.config.models_url();
        if let Some(models) = self.models_cache.get(&url).await {
            debug!("Model list served from cache");
            return Ok(models);
        }

        let req = self.authorize(self.http.get(&url));
        let list: ModelList = Self::json(self.send(req, None).await?).await?;
        let models = Arc::new(list.data);
        info!("Fetched {} models", models.len());

        self.models_cache.insert(url, models.clone()).await;
        Ok(models)
    }

    /// Generate images, returning their URLs
    pub async fn create_images(&self, prompt: &str, count: u32, size: &str) -> Result<Vec<String>> {
        let request = ImageRequest {
            prompt: prompt.to_string(),
            n: count,
            size: size.to_string(),
        };

        let req = self.authorize(self.http.post(self.config.images_url()).json(&request));
        let response: ImageResponse = Self::json(self.send(req, None).await?).await?;
        Ok(response.data.into_iter().map(|image| image.url).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn client_for(server: &mockito::ServerGuard) -> CompletionClient {
        CompletionClient::new(ApiConfig {
            base_url: server.url(),
            api_key: Some(SecretString::new("sk-test".to_string())),
            ..ApiConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_list_models_is_cached() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/models")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data":[{"id":"gpt-4"},{"id":"gpt-3.5-turbo"}]}"#)
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server);
        let first = client.list_models().await.unwrap();
        let second = client.list_models().await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(second[0].id, "gpt-4");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_images_returns_urls() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/images/generations")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "prompt": "a cat",
                "n": 2,
                "size": "256x256"
            })))
            .with_status(200)
            .with_body(r#"{"created":1,"data":[{"url":"http://img/1"},{"url":"http://img/2"}]}"#)
            .create_async()
            .await;

        let urls = client_for(&server)
            .create_images("a cat", 2, "256x256")
            .await
            .unwrap();
        assert_eq!(urls, vec!["http://img/1", "http://img/2"]);
    }

    #[tokio::test]
    async fn test_error_status_keeps_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/models")
            .with_status(401)
            .with_body("invalid key")
            .create_async()
            .await;

        match client_for(&server).list_models().await {
            Err(ChatError::Request(err)) => {
                assert_eq!(err.status, Some(401));
                assert_eq!(err.reason, "Unauthorized");
                assert_eq!(err.body, "invalid key");
            }
            other => panic!("unexpected result: {:?}", other.map(|m| m.len())),
        }
    }
}
