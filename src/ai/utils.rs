//! Helpers for handling model replies

/// Pull the JSON object out of a reply that may wrap it in prose or a
/// markdown fence.
///
/// Fenced blocks are preferred; otherwise the span from the first `{` to the
/// last `}` is returned. Returns `None` when no object-looking span exists.
pub fn extract_json_object(reply: &str) -> Option<&str> {
    if let Some(fenced) = fenced_block(reply) {
        if fenced.starts_with('{') {
            return Some(fenced);
        }
    }

    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (end > start).then(|| &reply[start..=end])
}

/// Contents of the first ``` fence, skipping an optional language tag
fn fenced_block(reply: &str) -> Option<&str> {
    let open = reply.find("```")? + 3;
    let rest = &reply[open..];
    // Language tag runs to the end of the opening line
    let body_start = match rest.find('\n') {
        Some(newline) if !rest[..newline].contains('{') => newline + 1,
        _ => 0,
    };
    let body = &rest[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

/// Whitespace-delimited word count
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Strip a fence around prose replies; models sometimes wrap narrative text
/// in ```markdown blocks.
pub fn strip_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    if trimmed.starts_with("```") && trimmed.ends_with("```") && trimmed.len() > 6 {
        fenced_block(trimmed).unwrap_or(trimmed)
    } else {
        trimmed
    }
}
