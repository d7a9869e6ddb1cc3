//! Clients for the external model services.
//!
//! Both services sit behind small synchronous traits so the pipeline worker
//! can call them inline and tests can swap in deterministic fakes:
//!
//! - [`EmbeddingClient`]: list of strings in, one vector per string out
//! - [`TextGenerator`]: prompt in, a single cleaned string out
//!
//! The HTTP implementations drive `reqwest` on a private current-thread
//! tokio runtime and carry a per-request timeout, so a hung service fails
//! the call instead of stalling the worker.

pub mod embedding;
pub mod generation;

pub use embedding::{create_embedding_client, EmbeddingClient};
pub use generation::{clean_response, create_text_generator, TextGenerator};

use crate::config::LlmProvider;
use crate::error::{Error, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use std::time::Duration;

/// Blocking JSON-over-HTTP transport shared by the service clients.
struct HttpTransport {
    service: &'static str,
    provider: LlmProvider,
    endpoint: String,
    api_key: Option<String>,
    runtime: tokio::runtime::Runtime,
    http: reqwest::Client,
}

impl HttpTransport {
    fn new(
        service: &'static str,
        provider: LlmProvider,
        endpoint: String,
        api_key: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        if provider.api_key_env().is_some() && api_key.is_none() {
            return Err(Error::Config(format!(
                "{}.api_key (or provider env var) is required for {}",
                service,
                provider.as_str()
            )));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| service_error(service, format!("failed to build tokio runtime: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .map_err(|e| service_error(service, format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            service,
            provider,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
            runtime,
            http,
        })
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let key = self.api_key.as_deref().unwrap_or_default();
        match self.provider {
            LlmProvider::Ollama => {}
            LlmProvider::Claude => {
                headers.insert(
                    "x-api-key",
                    HeaderValue::from_str(key).map_err(|e| {
                        service_error(self.service, format!("invalid claude api key header: {e}"))
                    })?,
                );
                headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
            }
            LlmProvider::OpenAI => {
                headers.insert(
                    AUTHORIZATION,
                    HeaderValue::from_str(&format!("Bearer {}", key)).map_err(|e| {
                        service_error(self.service, format!("invalid auth header: {e}"))
                    })?,
                );
            }
        }
        Ok(headers)
    }

    /// POST `body` to `<endpoint><path>` and return the decoded JSON.
    ///
    /// Non-2xx statuses, transport failures and timeouts all come back as
    /// [`Error::ExternalService`].
    fn post_json(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.endpoint, path);
        let provider = self.provider.as_str();
        let headers = self.headers()?;

        self.runtime.block_on(async {
            let resp = self
                .http
                .post(&url)
                .headers(headers)
                .json(body)
                .send()
                .await
                .map_err(|e| service_error(self.service, format!("{provider} request failed: {e}")))?;
            let status = resp.status();
            let text = resp.text().await.map_err(|e| {
                service_error(self.service, format!("{provider} read body failed: {e}"))
            })?;
            if !status.is_success() {
                return Err(service_error(
                    self.service,
                    format!("{} returned {}: {}", provider, status.as_u16(), text),
                ));
            }
            serde_json::from_str(&text).map_err(|e| {
                service_error(self.service, format!("{provider} returned invalid JSON: {e}"))
            })
        })
    }
}

fn service_error(service: &str, message: String) -> Error {
    Error::ExternalService {
        service: service.to_string(),
        message,
    }
}
