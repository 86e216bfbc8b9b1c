//! `?step=N` query helpers. Steps are zero-based template indices.

/// Reads the step index out of a query string, with or without the leading
/// `?`. Missing or malformed values yield `None`.
pub fn parse_step_query(query: &str) -> Option<usize> {
    url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
        .find(|(key, _)| key == "step")
        .and_then(|(_, value)| value.trim().parse().ok())
}

pub fn format_step_query(step_index: usize) -> String {
    format!("?step={}", step_index)
}
