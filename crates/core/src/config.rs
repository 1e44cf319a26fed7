//! Configuration management for threadwise.
//!
//! This module handles loading and merging configuration from multiple sources:
//! - Config files (.threadwise/config.yaml)
//! - Environment variables
//! - Command-line flags
//!
//! Later sources win. Workspace state (the corpus index, prompt overrides)
//! lives under `.threadwise/`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};

/// Generation providers understood by the factories.
pub const KNOWN_PROVIDERS: [&str; 2] = ["ollama", "gemini"];

/// Embedding providers understood by the factories.
pub const KNOWN_EMBEDDING_PROVIDERS: [&str; 3] = ["ollama", "gemini", "mock"];

/// Generation model used when a provider is selected without a model.
pub fn default_model(provider: &str) -> &'static str {
    match provider {
        "gemini" => "gemini-flash-latest",
        _ => "llama3.2",
    }
}

/// Embedding model used when an embedding provider is selected without one.
pub fn default_embedding_model(provider: &str) -> &'static str {
    match provider {
        "gemini" => "gemini-embedding-001",
        "mock" => "trigram-v1",
        _ => "nomic-embed-text",
    }
}

/// Environment variables consulted for Gemini credentials, in order.
const GEMINI_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "GOOGLE_API_KEY"];

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the workspace root (contains .threadwise/)
    pub workspace: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Generation provider ("ollama", "gemini")
    pub provider: String,

    /// Generation model identifier
    pub model: String,

    /// Embedding provider ("ollama", "gemini", "mock")
    pub embedding_provider: String,

    /// Embedding model identifier
    pub embedding_model: String,

    /// Explicit API key override
    pub api_key: Option<String>,

    /// Log level override
    pub log_level: Option<String>,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,

    /// Retrieval and generation tuning
    pub rag: RagSettings,

    /// Provider configurations from config.yaml
    pub llm: Option<LlmConfig>,
}

/// LLM configuration from config.yaml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(rename = "activeProvider")]
    pub active_provider: String,

    #[serde(rename = "activeEmbeddingProvider")]
    pub active_embedding_provider: String,

    pub providers: HashMap<String, ProviderConfig>,
}

/// Provider-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProviderConfig {
    Gemini {
        #[serde(rename = "apiKeyEnv")]
        api_key_env: String,
        model: String,
        #[serde(rename = "embeddingModel")]
        embedding_model: Option<String>,
        endpoint: Option<String>,
    },
    Ollama {
        endpoint: String,
        model: String,
        #[serde(rename = "embeddingModel")]
        embedding_model: Option<String>,
        timeout: Option<u64>,
    },
}

impl ProviderConfig {
    /// Generation model configured for this provider.
    pub fn model(&self) -> &str {
        match self {
            Self::Gemini { model, .. } => model,
            Self::Ollama { model, .. } => model,
        }
    }

    /// Embedding model configured for this provider, if any.
    pub fn embedding_model(&self) -> Option<&str> {
        match self {
            Self::Gemini {
                embedding_model, ..
            } => embedding_model.as_deref(),
            Self::Ollama {
                embedding_model, ..
            } => embedding_model.as_deref(),
        }
    }

    /// Custom endpoint, if any.
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Self::Gemini { endpoint, .. } => endpoint.as_deref(),
            Self::Ollama { endpoint, .. } => Some(endpoint.as_str()),
        }
    }
}

/// Tuning for chunking, retrieval, retry and prompting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RagSettings {
    /// Number of chunks retrieved per question
    pub top_k: usize,

    /// Minimum vector similarity for a chunk to be returned at all
    pub similarity_threshold: f32,

    /// Most recent conversation turns forwarded to the model
    pub history_window: usize,

    /// Soft cap on chunk length, in characters
    pub chunk_max_length: usize,

    /// Chunks shorter than this are not embedded
    pub min_chunk_length: usize,

    /// Dimensionality the corpus index is built with
    pub embedding_dimensions: usize,

    /// Delay between embedding calls during ingestion
    pub pacing_ms: u64,

    /// Attempts per embedding call (first try included)
    pub retry_attempts: u32,

    /// First backoff delay; doubles on every retry
    pub retry_base_delay_ms: u64,

    /// Answer without grounding when the ranking backend fails
    pub degrade_on_retrieval_failure: bool,

    /// Community name used in the system instruction
    pub site_name: String,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            similarity_threshold: 0.1,
            history_window: 6,
            chunk_max_length: 1000,
            min_chunk_length: 50,
            embedding_dimensions: 768,
            pacing_ms: 500,
            retry_attempts: 3,
            retry_base_delay_ms: 1000,
            degrade_on_retrieval_failure: true,
            site_name: "CareersNG".to_string(),
        }
    }
}

/// Full configuration file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
    llm: Option<LlmConfig>,
    rag: Option<RagSettings>,
    workspace: Option<WorkspaceConfig>,
    logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkspaceConfig {
    path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggingConfig {
    level: Option<String>,
    color: Option<bool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_file: None,
            provider: "ollama".to_string(), // Local-first default
            model: "llama3.2".to_string(),
            embedding_provider: "ollama".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            api_key: None,
            log_level: None,
            verbose: false,
            no_color: false,
            rag: RagSettings::default(),
            llm: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, the YAML file and environment variables.
    ///
    /// Environment variables:
    /// - `THREADWISE_WORKSPACE`: Override workspace path
    /// - `THREADWISE_CONFIG`: Path to config file
    /// - `THREADWISE_PROVIDER` / `THREADWISE_MODEL`: Generation backend
    /// - `THREADWISE_EMBEDDING_PROVIDER` / `THREADWISE_EMBEDDING_MODEL`: Embedding backend
    /// - `THREADWISE_API_KEY`: API key
    /// - `RUST_LOG`: Log level
    /// - `NO_COLOR`: Disable colored output
    ///
    /// # Example
    /// ```no_run
    /// use threadwise_core::config::AppConfig;
    ///
    /// let config = AppConfig::load().expect("Failed to load config");
    /// println!("Workspace: {:?}", config.workspace);
    /// ```
    pub fn load() -> AppResult<Self> {
        Self::load_from(None, None)
    }

    /// Like [`AppConfig::load`], but an explicit workspace or config file
    /// wins over the environment. The YAML file is read from the resulting
    /// location.
    pub fn load_from(workspace: Option<PathBuf>, config_file: Option<PathBuf>) -> AppResult<Self> {
        let mut config = Self::default();

        let workspace =
            workspace.or_else(|| std::env::var_os("THREADWISE_WORKSPACE").map(PathBuf::from));
        if let Some(workspace) = workspace {
            config.workspace = workspace;
        }

        config.config_file =
            config_file.or_else(|| std::env::var_os("THREADWISE_CONFIG").map(PathBuf::from));

        if !config.workspace.exists() {
            return Err(AppError::Config(format!(
                "Workspace directory does not exist: {:?}",
                config.workspace
            )));
        }

        let config_path = config
            .config_file
            .clone()
            .unwrap_or_else(|| config.threadwise_dir().join("config.yaml"));

        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        }

        // Environment variables override YAML config
        if let Ok(provider) = std::env::var("THREADWISE_PROVIDER") {
            config.model = default_model(&provider).to_string();
            config.provider = provider;
        }

        if let Ok(model) = std::env::var("THREADWISE_MODEL") {
            config.model = model;
        }

        if let Ok(provider) = std::env::var("THREADWISE_EMBEDDING_PROVIDER") {
            config.embedding_model = default_embedding_model(&provider).to_string();
            config.embedding_provider = provider;
        }

        if let Ok(model) = std::env::var("THREADWISE_EMBEDDING_MODEL") {
            config.embedding_model = model;
        }

        if let Ok(api_key) = std::env::var("THREADWISE_API_KEY") {
            config.api_key = Some(api_key);
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            config.log_level = Some(level);
        }

        if std::env::var("NO_COLOR").is_ok() {
            config.no_color = true;
        }

        Ok(config)
    }

    /// Merge YAML configuration file into this config.
    fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config_file: ConfigFile = serde_yaml::from_str(&contents).map_err(|e| {
            AppError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;

        let mut result = self.clone();

        if let Some(ws) = config_file.workspace {
            if let Some(path) = ws.path {
                result.workspace = PathBuf::from(path);
            }
        }

        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
        }

        if let Some(rag) = config_file.rag {
            result.rag = rag;
        }

        if let Some(llm) = config_file.llm {
            result.provider = llm.active_provider.clone();
            result.embedding_provider = llm.active_embedding_provider.clone();

            if let Some(provider_config) = llm.providers.get(&llm.active_provider) {
                result.model = provider_config.model().to_string();
            }

            if let Some(embedding_model) = llm
                .providers
                .get(&llm.active_embedding_provider)
                .and_then(|pc| pc.embedding_model())
            {
                result.embedding_model = embedding_model.to_string();
            }

            result.llm = Some(llm);
        }

        Ok(result)
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// CLI flags take precedence over environment variables and the YAML file.
    #[allow(clippy::too_many_arguments)]
    pub fn with_overrides(
        mut self,
        workspace: Option<PathBuf>,
        config_file: Option<PathBuf>,
        provider: Option<String>,
        model: Option<String>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
    ) -> Self {
        if let Some(workspace) = workspace {
            self.workspace = workspace;
        }

        if let Some(config_file) = config_file {
            self.config_file = Some(config_file);
        }

        if let Some(provider) = provider {
            if provider != self.provider {
                self.model = default_model(&provider).to_string();
            }
            self.provider = provider;
        }

        if let Some(model) = model {
            self.model = model;
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            // Verbose mode implies debug logging
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        self
    }

    /// Get the path to the .threadwise directory.
    pub fn threadwise_dir(&self) -> PathBuf {
        self.workspace.join(".threadwise")
    }

    /// Get the path to the corpus index.
    pub fn index_path(&self) -> PathBuf {
        self.threadwise_dir().join("index.sqlite")
    }

    /// Ensure the .threadwise directory exists.
    pub fn ensure_threadwise_dir(&self) -> AppResult<()> {
        let dir = self.threadwise_dir();
        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| {
                AppError::Config(format!("Failed to create .threadwise directory: {}", e))
            })?;
        }
        Ok(())
    }

    /// Get a provider configuration by name.
    pub fn get_provider_config(&self, provider: &str) -> Option<&ProviderConfig> {
        self.llm.as_ref().and_then(|llm| llm.providers.get(provider))
    }

    /// Custom endpoint configured for a provider, if any.
    pub fn endpoint_for(&self, provider: &str) -> Option<String> {
        self.get_provider_config(provider)
            .and_then(|pc| pc.endpoint())
            .map(str::to_string)
    }

    /// Resolve the API key for a provider.
    ///
    /// Order: `THREADWISE_API_KEY`, the provider's `apiKeyEnv`, then the
    /// conventional Gemini variables.
    pub fn resolve_api_key(&self, provider: &str) -> Option<String> {
        if let Some(ref key) = self.api_key {
            return Some(key.clone());
        }

        if let Some(ProviderConfig::Gemini { api_key_env, .. }) = self.get_provider_config(provider)
        {
            if let Ok(key) = std::env::var(api_key_env) {
                return Some(key);
            }
        }

        if provider == "gemini" {
            return GEMINI_KEY_VARS
                .iter()
                .find_map(|var| std::env::var(var).ok())
                .filter(|key| !key.trim().is_empty());
        }

        None
    }

    /// Validate configuration for the active providers.
    pub fn validate(&self) -> AppResult<()> {
        if !KNOWN_PROVIDERS.contains(&self.provider.as_str()) {
            return Err(AppError::Config(format!(
                "Unknown provider: {}. Supported: {}",
                self.provider,
                KNOWN_PROVIDERS.join(", ")
            )));
        }

        if !KNOWN_EMBEDDING_PROVIDERS.contains(&self.embedding_provider.as_str()) {
            return Err(AppError::Config(format!(
                "Unknown embedding provider: {}. Supported: {}",
                self.embedding_provider,
                KNOWN_EMBEDDING_PROVIDERS.join(", ")
            )));
        }

        for provider in [&self.provider, &self.embedding_provider] {
            if provider == "gemini" && self.resolve_api_key(provider).is_none() {
                return Err(AppError::Config(format!(
                    "API key missing for provider '{}'. Set {} or THREADWISE_API_KEY",
                    provider,
                    GEMINI_KEY_VARS.join(" or ")
                )));
            }
        }

        if self.rag.embedding_dimensions == 0 {
            return Err(AppError::Config(
                "rag.embeddingDimensions must be greater than zero".to_string(),
            ));
        }

        if self.rag.retry_attempts == 0 {
            return Err(AppError::Config(
                "rag.retryAttempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.provider, "ollama");
        assert_eq!(config.model, "llama3.2");
        assert_eq!(config.rag.top_k, 5);
        assert_eq!(config.rag.similarity_threshold, 0.1);
        assert_eq!(config.rag.history_window, 6);
        assert!(config.rag.degrade_on_retrieval_failure);
        assert!(!config.verbose);
    }

    #[test]
    fn test_index_path() {
        let config = AppConfig::default();
        assert!(config.index_path().ends_with(".threadwise/index.sqlite"));
    }

    #[test]
    fn test_with_overrides() {
        let config = AppConfig::default();
        let overridden = config.with_overrides(
            None,
            None,
            Some("gemini".to_string()),
            Some("gemini-flash-latest".to_string()),
            None,
            true,
            false,
        );

        assert_eq!(overridden.provider, "gemini");
        assert_eq!(overridden.model, "gemini-flash-latest");
        assert!(overridden.verbose);
        assert_eq!(overridden.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_provider_override_picks_its_default_model() {
        let overridden = AppConfig::default().with_overrides(
            None,
            None,
            Some("gemini".to_string()),
            None,
            None,
            false,
            false,
        );
        assert_eq!(overridden.model, "gemini-flash-latest");
        assert_eq!(default_embedding_model("gemini"), "gemini-embedding-001");
    }

    #[test]
    fn test_merge_yaml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
llm:
  activeProvider: gemini
  activeEmbeddingProvider: gemini
  providers:
    gemini:
      apiKeyEnv: MY_GEMINI_KEY
      model: gemini-flash-latest
      embeddingModel: models/gemini-embedding-001
rag:
  topK: 3
  embeddingDimensions: 3072
logging:
  level: warn
  color: false
"#,
        )
        .unwrap();

        let config = AppConfig::default().merge_yaml(&path).unwrap();
        assert_eq!(config.provider, "gemini");
        assert_eq!(config.model, "gemini-flash-latest");
        assert_eq!(config.embedding_model, "models/gemini-embedding-001");
        assert_eq!(config.rag.top_k, 3);
        assert_eq!(config.rag.embedding_dimensions, 3072);
        // Unset fields keep their defaults
        assert_eq!(config.rag.min_chunk_length, 50);
        assert_eq!(config.log_level, Some("warn".to_string()));
        assert!(config.no_color);
    }

    #[test]
    fn test_load_from_reads_workspace_config() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(".threadwise");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("config.yaml"), "rag:\n  topK: 2\n  pacingMs: 0\n").unwrap();

        let config = AppConfig::load_from(Some(temp.path().to_path_buf()), None).unwrap();
        assert_eq!(config.workspace, temp.path());
        assert_eq!(config.rag.top_k, 2);
        assert_eq!(config.rag.pacing_ms, 0);
    }

    #[test]
    fn test_load_from_missing_workspace() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope");
        assert!(matches!(
            AppConfig::load_from(Some(missing), None),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_validate_unknown_provider() {
        let config = AppConfig {
            provider: "unknown".to_string(),
            ..AppConfig::default()
        };
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_validate_ollama() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_gemini_with_explicit_key() {
        let config = AppConfig {
            provider: "gemini".to_string(),
            api_key: Some("secret".to_string()),
            ..AppConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
