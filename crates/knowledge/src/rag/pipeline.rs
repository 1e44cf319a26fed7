//! Per-request chat orchestration.
//!
//! embed → retrieve → assemble → build instruction → generate → encode.
//! The sidecar depends only on retrieval; generation starts once the caller
//! has taken the sidecar frame off the returned stream.

use crate::embeddings::{create_provider, EmbeddingProvider, RetryPolicy};
use crate::index::SqliteIndex;
use crate::rag::context::assemble_context;
use crate::rag::retriever::HybridRetriever;
use crate::rag::stream::{Framing, ResponseEncoder, ResponseStream};
use crate::rag::types::Sidecar;
use futures::{stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use threadwise_core::{AppConfig, AppError, AppResult};
use threadwise_llm::{
    create_client, normalize_history, trailing_window, ChatRequest as GenerationRequest,
    LlmClient, RawTurn,
};
use threadwise_prompt::{build_system_instruction, resolve_prompt, PromptDefinition, GROUNDING_PROMPT_ID};

/// Inbound chat request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub history: Vec<RawTurn>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            history: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<RawTurn>) -> Self {
        self.history = history;
        self
    }
}

/// Per-pipeline tuning.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub model: String,
    pub site_name: String,
    pub history_window: usize,
    pub top_k: usize,
    pub framing: Framing,
    /// Applied to opening the generation stream
    pub retry: RetryPolicy,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.model.clone(),
            site_name: config.rag.site_name.clone(),
            history_window: config.rag.history_window,
            top_k: config.rag.top_k,
            framing: Framing::default(),
            retry: RetryPolicy::from_settings(&config.rag),
        }
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }
}

/// Answers questions over the corpus index.
pub struct ChatPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    retriever: HybridRetriever,
    llm: Arc<dyn LlmClient>,
    prompt: PromptDefinition,
    settings: PipelineSettings,
}

impl ChatPipeline {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        retriever: HybridRetriever,
        llm: Arc<dyn LlmClient>,
        prompt: PromptDefinition,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            embedder,
            retriever,
            llm,
            prompt,
            settings,
        }
    }

    /// Wire the configured providers around an opened index.
    pub fn from_config(
        config: &AppConfig,
        index: Arc<SqliteIndex>,
        framing: Framing,
    ) -> AppResult<Self> {
        let embedder = create_provider(config)?;
        let retriever = HybridRetriever::from_settings(index, &config.rag);

        let endpoint = config.endpoint_for(&config.provider);
        let api_key = config.resolve_api_key(&config.provider);
        let llm = create_client(&config.provider, endpoint.as_deref(), api_key.as_deref())?;

        let prompt = resolve_prompt(&config.workspace, GROUNDING_PROMPT_ID)?;

        tracing::debug!(
            provider = %config.provider,
            model = %config.model,
            embedding_provider = embedder.provider_name(),
            "Chat pipeline ready"
        );

        Ok(Self::new(
            embedder,
            retriever,
            llm,
            prompt,
            PipelineSettings::from_config(config).with_framing(framing),
        ))
    }

    pub fn framing(&self) -> Framing {
        self.settings.framing
    }

    /// Run one request and return the response byte stream.
    ///
    /// Failures before the sidecar is produced (validation, embedding,
    /// configuration) are returned as errors. A busy generation backend is
    /// retried with the same policy as embeddings; any generation failure
    /// that remains ends the stream with an apology.
    pub async fn respond(&self, request: ChatRequest) -> AppResult<ResponseStream> {
        let message = request.message.trim();
        if message.is_empty() {
            return Err(AppError::Validation("Message is required".to_string()));
        }

        tracing::info!("Answering question ({} history turns)", request.history.len());

        let embedding = self.embedder.embed(message).await?;
        let items = self
            .retriever
            .search(&embedding, message, self.settings.top_k)
            .await?;

        let sidecar = Sidecar::from_items(&items);
        let context = assemble_context(&items);
        let built = build_system_instruction(&self.prompt, &self.settings.site_name, &context)?;

        let history = normalize_history(trailing_window(
            &request.history,
            self.settings.history_window,
        ));

        tracing::debug!(
            sources = sidecar.sources.len(),
            context_included = built.metadata.context_included,
            history_turns = history.len(),
            "Prepared generation request"
        );

        let generation = GenerationRequest::new(message, self.settings.model.as_str())
            .with_system(built.system)
            .with_history(history);

        let llm = Arc::clone(&self.llm);
        let retry = self.settings.retry;
        let tokens = stream::once(async move {
            retry
                .run("Generation request", || llm.stream_chat(&generation))
                .await
        })
            .try_flatten()
            .map_ok(|chunk| chunk.content)
            .boxed();

        ResponseEncoder::new(self.settings.framing).encode(&sidecar, tokens)
    }
}
