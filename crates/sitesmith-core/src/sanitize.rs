/// Strip markdown code fences a model may wrap around a document: a leading
/// ```` ```lang ```` line and a trailing ```` ``` ````. Surrounding whitespace is
/// trimmed before and after. Output without fences passes through trimmed.
pub fn strip_fences(raw: &str) -> String {
    let mut code = raw.trim();

    if let Some(rest) = code.strip_prefix("```") {
        code = match rest.find('\n') {
            Some(newline) => &rest[newline + 1..],
            // Single-line fence: drop the language tag if any.
            None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric() || c == '-'),
        };
    }

    let code = code.trim_end();
    let code = code.strip_suffix("```").unwrap_or(code);
    code.trim().to_string()
}
