//! Helpers for sanitizing data before it enters tracing span attributes.
//!
//! Prompts carry customer product copy and object paths can carry user
//! identifiers, so neither goes into spans verbatim.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

const PROMPT_PREVIEW_CHARS: usize = 32;

/// First few characters of a prompt plus its length and a short hash.
pub fn redact_prompt(prompt: &str) -> String {
    let total = prompt.chars().count();
    let preview: String = prompt.chars().take(PROMPT_PREVIEW_CHARS).collect();
    let preview = preview.replace(['\n', '\r'], " ");
    if total <= PROMPT_PREVIEW_CHARS {
        format!("{} [{} chars, {}]", preview, total, short_hash(prompt))
    } else {
        format!("{}… [{} chars, {}]", preview, total, short_hash(prompt))
    }
}

/// Returns only the last path segment of an object path.
pub fn redact_object_path(path: &str) -> String {
    path.rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Short deterministic hash for correlating values without exposing them.
pub fn short_hash(value: &str) -> String {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    format!("{:08x}", hasher.finish() as u32)
}
