//! Prompt types for Threadwise.
//!
//! A prompt definition describes how the grounding system instruction is
//! rendered from the assembled forum context.

use serde::{Deserialize, Serialize};

/// A prompt definition, built in or loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDefinition {
    /// Unique prompt identifier
    pub id: String,

    /// Human-readable title
    pub title: String,

    /// API version for schema evolution
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Creator identifier
    #[serde(rename = "createdBy", default)]
    pub created_by: String,

    /// Behavioral settings
    #[serde(default)]
    pub behavior: PromptBehavior,

    /// Handlebars template. Receives `siteName`, `context`, `noInformation`,
    /// `tone` and `style`; `context` is empty when nothing was retrieved.
    pub template: String,
}

/// Behavioral settings for the assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptBehavior {
    /// Tone (e.g., "friendly", "professional")
    pub tone: String,

    /// Style (e.g., "concise", "detailed")
    pub style: String,
}

impl Default for PromptBehavior {
    fn default() -> Self {
        Self {
            tone: "helpful".to_string(),
            style: "concise".to_string(),
        }
    }
}

/// A rendered system instruction ready for the generation backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltPrompt {
    /// System instruction text
    pub system: String,

    /// Metadata about the built prompt
    pub metadata: BuiltPromptMetadata,
}

/// Metadata about a built prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltPromptMetadata {
    /// Source prompt ID
    #[serde(rename = "sourcePromptId")]
    pub source_prompt_id: String,

    /// Whether retrieved forum context was injected
    #[serde(rename = "contextIncluded")]
    pub context_included: bool,

    /// Site the assistant speaks for
    #[serde(rename = "siteName")]
    pub site_name: String,
}
