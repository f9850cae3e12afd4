//! Model credential lookup
//!
//! Keys come from the environment only (`.env` is loaded by the binary).

use crate::error::PipelineError;

/// Variables consulted in order
pub const API_KEY_VARS: [&str; 2] = ["DILIGENCE_API_KEY", "OPENAI_API_KEY"];

/// Resolve the model API key. Blank values count as missing.
pub fn resolve_api_key() -> Result<String, PipelineError> {
    resolve_with(|name| std::env::var(name).ok())
}

fn resolve_with<F>(lookup: F) -> Result<String, PipelineError>
where
    F: Fn(&str) -> Option<String>,
{
    for name in API_KEY_VARS {
        if let Some(value) = lookup(name) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                tracing::debug!("[Credentials] Using API key from {}", name);
                return Ok(trimmed.to_string());
            }
        }
    }

    Err(PipelineError::MissingCredential(API_KEY_VARS.join(" or ")))
}

/// Mask a key for logs: first 4 characters, then asterisks
pub fn mask_key(key: &str) -> String {
    let prefix: String = key.chars().take(4).collect();
    format!("{}****", prefix)
}
