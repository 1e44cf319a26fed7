//! Prompt system for Threadwise.
//!
//! Renders the grounding system instruction that carries retrieved forum
//! context to the generation backend:
//! - built-in grounding template with an explicit no-context path
//! - YAML overrides in `.threadwise/prompts/`
//! - Handlebars template rendering

pub mod builder;
pub mod defaults;
pub mod loader;
pub mod types;

// Re-export main types
pub use builder::build_system_instruction;
pub use defaults::{grounding_definition, GROUNDING_PROMPT_ID, NO_INFORMATION_MESSAGE};
pub use loader::{load_prompt, resolve_prompt};
pub use types::{BuiltPrompt, BuiltPromptMetadata, PromptBehavior, PromptDefinition};
