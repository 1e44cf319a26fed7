//! Built-in grounding prompt.

use crate::types::{PromptBehavior, PromptDefinition};

/// Identifier of the built-in grounding prompt.
pub const GROUNDING_PROMPT_ID: &str = "rag.grounding.default";

/// Sentence the assistant uses when the archives do not cover a question.
pub const NO_INFORMATION_MESSAGE: &str =
    "I don't have information about that in the forum archives.";

const GROUNDING_TEMPLATE: &str = r#"You are a {{tone}} assistant for {{siteName}}, answering questions from its archived forum discussions. Keep answers {{style}}.
{{#if context}}
Answer questions based ONLY on the provided forum context. If the answer is not in the context, say "{{noInformation}}"
Identify original authors and dates for credit.
Context:
{{context}}
{{else}}
No forum discussions matched this question. Reply with "{{noInformation}}" and do not answer from general knowledge.
{{/if}}"#;

/// The grounding prompt used when the workspace does not override it.
pub fn grounding_definition() -> PromptDefinition {
    PromptDefinition {
        id: GROUNDING_PROMPT_ID.to_string(),
        title: "Forum archive grounding".to_string(),
        api_version: "1.0".to_string(),
        created_by: "threadwise".to_string(),
        behavior: PromptBehavior::default(),
        template: GROUNDING_TEMPLATE.to_string(),
    }
}
