// Centralized defaults for LLM provider models.
//
// These are used when the configuration does not name a model.
// Keep these in sync with the provider implementations' DEFAULT_MODEL constants.

/// Returns the default text model id for a given LLM provider id.
pub fn default_llm_model_for_provider(provider: &str) -> Option<&'static str> {
    match provider {
        "groq" => Some("meta-llama/llama-4-scout-17b-16e-instruct"),
        "openai" => Some("gpt-4o-mini"),
        "anthropic" => Some("claude-3-haiku-20240307"),
        _ => None,
    }
}

/// Returns the default vision-capable model id for a given LLM provider id.
pub fn default_vision_model_for_provider(provider: &str) -> Option<&'static str> {
    match provider {
        "groq" => Some("meta-llama/llama-4-scout-17b-16e-instruct"),
        "openai" => Some("gpt-4o"),
        "anthropic" => Some("claude-3-5-sonnet-20241022"),
        _ => None,
    }
}
