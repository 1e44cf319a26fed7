//! Gemini chat provider.
//!
//! Uses `models/{model}:streamGenerateContent?alt=sse`, which streams
//! server-sent events whose `data:` lines each carry a partial response.

use crate::client::{ChatRequest, LlmClient, LlmStream, LlmStreamChunk, LlmUsage};
use crate::providers::{lines::line_stream, status_error};
use crate::types::ChatRole;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use threadwise_core::{AppError, AppResult};

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

/// Gemini chat client.
pub struct GeminiClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_GEMINI_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn stream_url(&self, model: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, model
        )
    }

    fn to_gemini_request(&self, request: &ChatRequest) -> GeminiRequest {
        let mut contents: Vec<Content> = request
            .history
            .iter()
            .map(|turn| Content {
                role: Some(match turn.role {
                    ChatRole::User => "user",
                    ChatRole::Assistant => "model",
                }),
                parts: vec![Part {
                    text: turn.content.clone(),
                }],
            })
            .collect();

        contents.push(Content {
            role: Some("user"),
            parts: vec![Part {
                text: request.message.clone(),
            }],
        });

        GeminiRequest {
            system_instruction: request.system.as_ref().map(|system| Content {
                role: None,
                parts: vec![Part {
                    text: system.clone(),
                }],
            }),
            contents,
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            },
        }
    }
}

/// Parse one SSE line. Non-data lines yield `None`.
fn parse_event(line: &str) -> Option<AppResult<LlmStreamChunk>> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }

    let response: GeminiResponse = match serde_json::from_str(data) {
        Ok(response) => response,
        Err(e) => {
            return Some(Err(AppError::Llm(format!(
                "Failed to parse Gemini event: {}",
                e
            ))))
        }
    };

    let candidate = response.candidates.into_iter().next();
    let done = candidate
        .as_ref()
        .and_then(|c| c.finish_reason.as_ref())
        .is_some();
    let content = candidate
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().map(|p| p.text).collect::<String>())
        .unwrap_or_default();

    Some(Ok(LlmStreamChunk {
        content,
        done,
        usage: if done {
            response
                .usage_metadata
                .map(|u| LlmUsage::new(u.prompt_token_count, u.candidates_token_count))
        } else {
            None
        },
    }))
}

#[async_trait::async_trait]
impl LlmClient for GeminiClient {
    fn provider_name(&self) -> &str {
        "gemini"
    }

    async fn stream_chat(&self, request: &ChatRequest) -> AppResult<LlmStream> {
        tracing::info!("Starting streaming chat request to Gemini");
        tracing::debug!(
            model = %request.model,
            history_turns = request.history.len(),
            "Gemini chat request"
        );

        let body = self.to_gemini_request(request);
        let response = self
            .client
            .post(self.stream_url(&request.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::FatalService(format!("Failed to reach Gemini: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(status_error("Gemini", status, &error_text));
        }

        let stream = line_stream(response.bytes_stream()).filter_map(|line| async move {
            match line {
                Ok(line) => parse_event(&line),
                Err(e) => Some(Err(e)),
            }
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatTurn;

    #[test]
    fn test_stream_url_strips_models_prefix() {
        let client = GeminiClient::with_base_url("key", "http://localhost:9999/");
        assert_eq!(
            client.stream_url("models/gemini-flash-latest"),
            "http://localhost:9999/v1beta/models/gemini-flash-latest:streamGenerateContent?alt=sse"
        );
        assert_eq!(
            client.stream_url("gemini-flash-latest"),
            client.stream_url("models/gemini-flash-latest")
        );
    }

    #[test]
    fn test_request_body_maps_roles() {
        let client = GeminiClient::new("key");
        let request = ChatRequest::new("What about the fee?", "gemini-flash-latest")
            .with_system("Context goes here")
            .with_history(vec![
                ChatTurn::user("How do I register?"),
                ChatTurn::assistant("Through the portal."),
            ]);

        let body = serde_json::to_value(client.to_gemini_request(&request)).unwrap();
        assert_eq!(
            body["systemInstruction"]["parts"][0]["text"],
            "Context goes here"
        );
        assert!(body["systemInstruction"].get("role").is_none());
        let roles: Vec<&str> = body["contents"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
        assert_eq!(body["contents"][2]["parts"][0]["text"], "What about the fee?");
    }

    #[test]
    fn test_parse_event() {
        let chunk = parse_event(
            r#"data: {"candidates":[{"content":{"parts":[{"text":"Hel"},{"text":"lo"}],"role":"model"}}]}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(chunk.content, "Hello");
        assert!(!chunk.done);

        let last = parse_event(
            r#"data: {"candidates":[{"content":{"parts":[{"text":"."}]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":20,"candidatesTokenCount":5}}"#,
        )
        .unwrap()
        .unwrap();
        assert!(last.done);
        assert_eq!(last.usage, Some(LlmUsage::new(20, 5)));
    }

    #[test]
    fn test_parse_event_skips_non_data_lines() {
        assert!(parse_event("event: message").is_none());
        assert!(parse_event(": keepalive").is_none());
        assert!(matches!(parse_event("data: {oops"), Some(Err(AppError::Llm(_)))));
    }
}
