//! Ollama chat provider.
//!
//! Talks to a local Ollama runtime through `/api/chat`, which accepts the
//! system instruction and history as a message list and streams
//! newline-delimited JSON.
//! Ollama API: https://github.com/ollama/ollama/blob/main/docs/api.md

use crate::client::{ChatRequest, LlmClient, LlmStream, LlmStreamChunk, LlmUsage};
use crate::providers::{lines::line_stream, status_error};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use threadwise_core::{AppError, AppResult};

/// Ollama chat message.
#[derive(Debug, Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

/// Sampling options.
#[derive(Debug, Serialize, Default)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

/// Ollama API request format.
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    options: OllamaOptions,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
}

/// One line of the streamed response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<OllamaResponseMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

/// Ollama chat client.
pub struct OllamaClient {
    /// Base URL for Ollama API
    base_url: String,

    /// HTTP client
    client: reqwest::Client,
}

impl OllamaClient {
    /// Create a new Ollama client with default settings.
    ///
    /// Default URL: http://localhost:11434
    pub fn new() -> Self {
        Self::with_base_url("http://localhost:11434")
    }

    /// Create a new Ollama client with a custom base URL.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Convert a ChatRequest to Ollama format.
    fn to_ollama_request(&self, request: &ChatRequest) -> OllamaChatRequest {
        let mut messages = Vec::with_capacity(request.history.len() + 2);

        if let Some(ref system) = request.system {
            messages.push(OllamaMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }

        messages.extend(request.history.iter().map(|turn| OllamaMessage {
            role: turn.role.as_str().to_string(),
            content: turn.content.clone(),
        }));

        messages.push(OllamaMessage {
            role: "user".to_string(),
            content: request.message.clone(),
        });

        OllamaChatRequest {
            model: request.model.clone(),
            messages,
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
            stream: true,
        }
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse one NDJSON line into a stream chunk.
fn parse_line(line: &str) -> AppResult<LlmStreamChunk> {
    let response: OllamaChatResponse = serde_json::from_str(line)
        .map_err(|e| AppError::Llm(format!("Failed to parse chunk: {}", e)))?;

    if let Some(error) = response.error {
        return Err(AppError::FatalService(format!("Ollama error: {}", error)));
    }

    Ok(LlmStreamChunk {
        content: response.message.map(|m| m.content).unwrap_or_default(),
        done: response.done,
        usage: if response.done {
            Some(LlmUsage::new(
                response.prompt_eval_count.unwrap_or(0),
                response.eval_count.unwrap_or(0),
            ))
        } else {
            None
        },
    })
}

#[async_trait::async_trait]
impl LlmClient for OllamaClient {
    fn provider_name(&self) -> &str {
        "ollama"
    }

    async fn stream_chat(&self, request: &ChatRequest) -> AppResult<LlmStream> {
        tracing::info!("Starting streaming chat request to Ollama");
        tracing::debug!(
            model = %request.model,
            history_turns = request.history.len(),
            "Ollama chat request"
        );

        let ollama_request = self.to_ollama_request(request);
        let url = format!("{}/api/chat", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&ollama_request)
            .send()
            .await
            .map_err(|e| AppError::FatalService(format!("Failed to reach Ollama: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(status_error("Ollama", status, &error_text));
        }

        let stream = line_stream(response.bytes_stream()).map(|line| parse_line(&line?));

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatTurn;

    #[test]
    fn test_ollama_client_creation() {
        let client = OllamaClient::with_base_url("http://localhost:11434/");
        assert_eq!(client.provider_name(), "ollama");
        assert_eq!(client.base_url, "http://localhost:11434");
    }

    #[test]
    fn test_ollama_request_conversion() {
        let client = OllamaClient::new();
        let request = ChatRequest::new("And the deadline?", "llama3.2")
            .with_system("Use the forum context")
            .with_history(vec![
                ChatTurn::user("When does NYSC registration open?"),
                ChatTurn::assistant("Usually in March."),
            ])
            .with_temperature(0.3);

        let ollama_req = client.to_ollama_request(&request);
        let roles: Vec<&str> = ollama_req.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(ollama_req.messages[3].content, "And the deadline?");
        assert_eq!(ollama_req.options.temperature, Some(0.3));
        assert!(ollama_req.stream);
    }

    #[test]
    fn test_parse_line() {
        let chunk =
            parse_line(r#"{"model":"llama3.2","message":{"role":"assistant","content":"Hi"},"done":false}"#)
                .unwrap();
        assert_eq!(chunk.content, "Hi");
        assert!(!chunk.done);

        let last = parse_line(
            r#"{"model":"llama3.2","message":{"role":"assistant","content":""},"done":true,"prompt_eval_count":12,"eval_count":30}"#,
        )
        .unwrap();
        assert!(last.done);
        assert_eq!(last.usage, Some(LlmUsage::new(12, 30)));
    }

    #[test]
    fn test_parse_error_line() {
        let result = parse_line(r#"{"error":"model 'nope' not found"}"#);
        assert!(matches!(result, Err(AppError::FatalService(_))));
    }
}
