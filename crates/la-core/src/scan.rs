//! Scanning helpers for structured payloads embedded in model output.
//!
//! Models emit JSON either inside fenced ```json blocks or inline; both
//! forms must be tolerated and malformed payloads must never be fatal.

/// Extract the contents of every fenced ```json block, in order.
/// The language tag is matched case-insensitively.
pub fn fenced_json_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find("```") {
        let after_fence = &rest[open + 3..];
        let Some(newline) = after_fence.find('\n') else {
            break;
        };
        let tag = after_fence[..newline].trim();
        let body_start = newline + 1;

        let Some(close) = after_fence[body_start..].find("```") else {
            break;
        };

        if tag.eq_ignore_ascii_case("json") {
            blocks.push(after_fence[body_start..body_start + close].trim());
        }

        rest = &after_fence[body_start + close + 3..];
    }

    blocks
}

/// First fenced ```json block, if any.
pub fn first_fenced_json(text: &str) -> Option<&str> {
    fenced_json_blocks(text).into_iter().next()
}

/// Scan a balanced JSON object starting at `start` (which must point at a
/// `{`). Respects string literals and backslash escapes. Returns the object
/// slice including both braces.
pub fn balanced_object(text: &str, start: usize) -> Option<&str> {
    let bytes = text.as_bytes();
    if bytes.get(start) != Some(&b'{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Find an inline `{"questions" ...}` object via a balanced-brace scan.
pub fn find_questions_object(text: &str) -> Option<&str> {
    let start = text.find(r#"{"questions""#)?;
    balanced_object(text, start)
}
