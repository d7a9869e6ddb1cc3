//! Embedding service client.

use super::HttpTransport;
use crate::config::{EmbeddingConfig, LlmProvider};
use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::json;

/// Turns a batch of texts into vectors, one per text, in input order.
pub trait EmbeddingClient: Send + Sync {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Create the HTTP-backed embedding client for the configured provider.
pub fn create_embedding_client(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingClient>> {
    Ok(Box::new(HttpEmbeddingClient::new(config)?))
}

/// Check the shape of an embedding response.
///
/// One non-empty vector per input, all the same length, no NaNs.
pub fn validate_embeddings(vectors: &[Vec<f32>], expected: usize) -> Result<()> {
    if vectors.len() != expected {
        return Err(Error::embedding(format!(
            "expected {} vectors, got {}",
            expected,
            vectors.len()
        )));
    }
    let Some(dim) = vectors.first().map(Vec::len) else {
        return Ok(());
    };
    if dim == 0 {
        return Err(Error::embedding("service returned empty vectors"));
    }
    if let Some((idx, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dim) {
        return Err(Error::embedding(format!(
            "vector {} has {} dimensions, expected {}",
            idx,
            v.len(),
            dim
        )));
    }
    if vectors.iter().flatten().any(|x| !x.is_finite()) {
        return Err(Error::embedding("service returned non-finite values"));
    }
    Ok(())
}

struct HttpEmbeddingClient {
    model: String,
    transport: HttpTransport,
}

/// Ollama `/api/embed` response
#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// OpenAI `/v1/embeddings` response
#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl HttpEmbeddingClient {
    fn new(config: &EmbeddingConfig) -> Result<Self> {
        if config.provider == LlmProvider::Claude {
            return Err(Error::Config(
                "embedding.provider must be ollama or openai".to_string(),
            ));
        }
        Ok(Self {
            model: config.model.clone(),
            transport: HttpTransport::new(
                "embedding",
                config.provider,
                config.endpoint(),
                config.api_key(),
                config.timeout_secs,
            )?,
        })
    }
}

impl EmbeddingClient for HttpEmbeddingClient {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = json!({ "model": self.model, "input": texts });
        let vectors = match self.transport.provider {
            LlmProvider::OpenAI => {
                let json = self.transport.post_json("/v1/embeddings", &body)?;
                let mut parsed: OpenAiEmbedResponse = serde_json::from_value(json)
                    .map_err(|e| Error::embedding(format!("unexpected openai response: {e}")))?;
                parsed.data.sort_by_key(|d| d.index);
                parsed.data.into_iter().map(|d| d.embedding).collect()
            }
            _ => {
                let json = self.transport.post_json("/api/embed", &body)?;
                let parsed: OllamaEmbedResponse = serde_json::from_value(json)
                    .map_err(|e| Error::embedding(format!("unexpected ollama response: {e}")))?;
                parsed.embeddings
            }
        };

        validate_embeddings(&vectors, texts.len())?;
        tracing::debug!(
            model = %self.model,
            count = vectors.len(),
            "Embedding complete"
        );
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_embeddings_accepts_uniform_batch() {
        let vectors = vec![vec![0.1, 0.2], vec![0.3, 0.4]];
        assert!(validate_embeddings(&vectors, 2).is_ok());
        assert!(validate_embeddings(&[], 0).is_ok());
    }

    #[test]
    fn test_validate_embeddings_rejects_bad_shapes() {
        assert!(validate_embeddings(&[vec![0.1]], 2).is_err());
        assert!(validate_embeddings(&[vec![0.1, 0.2], vec![0.3]], 2).is_err());
        assert!(validate_embeddings(&[vec![], vec![]], 2).is_err());
        assert!(validate_embeddings(&[vec![f32::NAN]], 1).is_err());
    }

    #[test]
    fn test_openai_response_is_reordered_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [2.0]},
                {"index": 0, "embedding": [1.0]}
            ]
        });
        let mut parsed: OpenAiEmbedResponse = serde_json::from_value(json).unwrap();
        parsed.data.sort_by_key(|d| d.index);
        assert_eq!(parsed.data[0].embedding, vec![1.0]);
    }

    #[test]
    fn test_claude_is_not_an_embedding_provider() {
        let config = EmbeddingConfig {
            provider: LlmProvider::Claude,
            api_key: Some("k".to_string()),
            ..Default::default()
        };
        assert!(create_embedding_client(&config).is_err());
    }

    #[test]
    fn test_unreachable_service_is_an_external_error() {
        let config = EmbeddingConfig {
            endpoint: Some("http://127.0.0.1:9".to_string()),
            timeout_secs: 2,
            ..Default::default()
        };
        let client = create_embedding_client(&config).unwrap();
        match client.embed(&["hello".to_string()]) {
            Err(Error::ExternalService { service, .. }) => assert_eq!(service, "embedding"),
            other => panic!("expected ExternalService error, got {:?}", other.map(|v| v.len())),
        }
    }
}
