//! Builds the grounding system instruction from a prompt definition.

use crate::defaults::NO_INFORMATION_MESSAGE;
use crate::types::{BuiltPrompt, BuiltPromptMetadata, PromptDefinition};
use handlebars::Handlebars;
use std::collections::HashMap;
use threadwise_core::{AppError, AppResult};

/// Render the system instruction for one request.
///
/// `context` is the assembled context block. An empty block renders the
/// template's "no context" path, so the model is told explicitly that the
/// archives had nothing relevant.
///
/// # Example
/// ```
/// use threadwise_prompt::{build_system_instruction, grounding_definition};
///
/// let built = build_system_instruction(&grounding_definition(), "CareersNG", "").unwrap();
/// assert!(!built.metadata.context_included);
/// ```
pub fn build_system_instruction(
    definition: &PromptDefinition,
    site_name: &str,
    context: &str,
) -> AppResult<BuiltPrompt> {
    tracing::debug!("Building system instruction: {}", definition.id);

    let context_included = !context.trim().is_empty();
    if !context_included {
        tracing::debug!("No retrieved context, rendering no-context instruction");
    }

    let mut variables = HashMap::new();
    variables.insert("siteName".to_string(), site_name.to_string());
    variables.insert(
        "context".to_string(),
        if context_included {
            context.to_string()
        } else {
            String::new()
        },
    );
    variables.insert(
        "noInformation".to_string(),
        NO_INFORMATION_MESSAGE.to_string(),
    );
    variables.insert("tone".to_string(), definition.behavior.tone.clone());
    variables.insert("style".to_string(), definition.behavior.style.clone());

    let system = render_template(&definition.template, &variables)?;

    Ok(BuiltPrompt {
        system: system.trim().to_string(),
        metadata: BuiltPromptMetadata {
            source_prompt_id: definition.id.clone(),
            context_included,
            site_name: site_name.to_string(),
        },
    })
}

/// Render a Handlebars template with variables.
fn render_template(template: &str, variables: &HashMap<String, String>) -> AppResult<String> {
    let mut handlebars = Handlebars::new();

    // Disable HTML escaping for plain text
    handlebars.register_escape_fn(handlebars::no_escape);

    handlebars
        .register_template_string("prompt", template)
        .map_err(|e| AppError::Prompt(format!("Failed to register template: {}", e)))?;

    handlebars
        .render("prompt", &variables)
        .map_err(|e| AppError::Prompt(format!("Failed to render template: {}", e)))
}
