//! Text generation client.

use super::HttpTransport;
use crate::config::{GenerationConfig, LlmProvider};
use crate::error::{Error, Result};
use serde_json::{json, Value};

/// Single-shot text completion.
pub trait TextGenerator: Send + Sync {
    /// Returns the raw completion; callers clean it with [`clean_response`].
    fn generate(&self, prompt: &str, temperature: f32) -> Result<String>;
}

/// Create the HTTP-backed generator for the configured provider.
pub fn create_text_generator(config: &GenerationConfig) -> Result<Box<dyn TextGenerator>> {
    Ok(Box::new(HttpTextGenerator::new(config)?))
}

/// Trim surrounding whitespace and double quotes from a completion.
pub fn clean_response(raw: &str) -> String {
    raw.trim().trim_matches('"').trim().to_string()
}

const MAX_TOKENS: u32 = 100;

struct HttpTextGenerator {
    model: String,
    transport: HttpTransport,
}

impl HttpTextGenerator {
    fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            transport: HttpTransport::new(
                "generation",
                config.provider,
                config.endpoint(),
                config.api_key(),
                config.timeout_secs,
            )?,
        })
    }
}

impl TextGenerator for HttpTextGenerator {
    fn generate(&self, prompt: &str, temperature: f32) -> Result<String> {
        let text = match self.transport.provider {
            LlmProvider::Ollama => {
                let json = self.transport.post_json(
                    "/api/generate",
                    &json!({
                        "model": self.model,
                        "prompt": prompt,
                        "stream": false,
                        "options": { "temperature": temperature },
                    }),
                )?;
                json.get("response")
                    .and_then(Value::as_str)
                    .map(ToString::to_string)
                    .ok_or_else(|| {
                        Error::generation("ollama response missing string field `response`")
                    })?
            }
            LlmProvider::Claude => {
                let json = self.transport.post_json(
                    "/v1/messages",
                    &json!({
                        "model": self.model,
                        "max_tokens": MAX_TOKENS,
                        "temperature": temperature,
                        "messages": [{ "role": "user", "content": prompt }],
                    }),
                )?;
                json.get("content")
                    .and_then(Value::as_array)
                    .and_then(|arr| arr.first())
                    .and_then(|v| v.get("text"))
                    .and_then(Value::as_str)
                    .map(ToString::to_string)
                    .ok_or_else(|| Error::generation("claude response missing content[0].text"))?
            }
            LlmProvider::OpenAI => {
                let json = self.transport.post_json(
                    "/v1/chat/completions",
                    &json!({
                        "model": self.model,
                        "temperature": temperature,
                        "max_tokens": MAX_TOKENS,
                        "messages": [{ "role": "user", "content": prompt }],
                    }),
                )?;
                json.get("choices")
                    .and_then(Value::as_array)
                    .and_then(|arr| arr.first())
                    .and_then(|v| v.get("message"))
                    .and_then(|v| v.get("content"))
                    .and_then(Value::as_str)
                    .map(ToString::to_string)
                    .ok_or_else(|| {
                        Error::generation("openai response missing choices[0].message.content")
                    })?
            }
        };

        tracing::debug!(model = %self.model, chars = text.len(), "Generation complete");
        Ok(text)
    }
}
