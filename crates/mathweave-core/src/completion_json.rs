//! JSON recovery for reasoner completions.
//!
//! Models often wrap the requested JSON in prose or markdown fences, leave a
//! trailing comma, forget to quote a key, or stop before the closing brace.
//! [`parse_completion`] runs a light repair pass over the text before handing
//! it to `serde_json`:
//!
//! 1. strip markdown fences
//! 2. cut out the outermost `{ ... }` object
//! 3. drop trailing commas before `]` and `}`
//! 4. quote bare object keys
//! 5. close truncated strings, arrays and objects
//!
//! It is not a JSON parser; it only fixes the failure modes seen in practice.

use serde::de::DeserializeOwned;

use mathweave_types::ReasonerError;

/// Parse a completion into `T`, repairing it first if the raw text is not
/// valid JSON. Anything that still fails is [`ReasonerError::Malformed`].
pub fn parse_completion<T: DeserializeOwned>(content: &str) -> Result<T, ReasonerError> {
    let value = parse_with_repair(content)
        .map_err(|e| ReasonerError::Malformed(format!("not json: {e}")))?;
    serde_json::from_value(value)
        .map_err(|e| ReasonerError::Malformed(format!("unexpected shape: {e}")))
}

/// Try to parse JSON, falling back to repair if the first parse fails.
pub fn parse_with_repair(input: &str) -> Result<serde_json::Value, serde_json::Error> {
    if let Ok(val) = serde_json::from_str(input) {
        return Ok(val);
    }
    serde_json::from_str(&repair_json(input))
}

/// Apply every repair step in order.
pub fn repair_json(input: &str) -> String {
    let stripped = strip_markdown_fences(input);
    let object = extract_object(&stripped);
    let no_trailing = fix_trailing_commas(object);
    let quoted_keys = fix_unquoted_keys(&no_trailing);
    close_truncated(&quoted_keys)
}

// ── Step 1: fences ──────────────────────────────────────────────────────

fn strip_markdown_fences(input: &str) -> String {
    let trimmed = input.trim();

    let after_open = if let Some(stripped) = trimmed.strip_prefix("```json") {
        stripped
    } else if let Some(stripped) = trimmed.strip_prefix("```") {
        stripped
    } else {
        return trimmed.to_string();
    };

    let after_open = after_open.strip_prefix('\n').unwrap_or(after_open);

    let before_close = if let Some(stripped) = after_open.trim_end().strip_suffix("```") {
        stripped.trim_end()
    } else {
        after_open
    };

    before_close.to_string()
}

// ── Step 2: outermost object ────────────────────────────────────────────

/// Slice from the first `{` to its matching `}` (or to the end when the
/// object is truncated). Text without a `{` is returned unchanged.
fn extract_object(input: &str) -> &str {
    let Some(start) = input.find('{') else {
        return input;
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (offset, c) in input[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        if c == '\\' && in_string {
            escape_next = true;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match c {
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return &input[start..start + offset + 1];
                }
            }
            _ => {}
        }
    }

    &input[start..]
}

// ── Step 3: trailing commas ─────────────────────────────────────────────

fn fix_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let len = chars.len();
    let mut result = String::with_capacity(len);
    let mut in_string = false;
    let mut escape_next = false;
    let mut i = 0;

    while i < len {
        let c = chars[i];

        if escape_next {
            result.push(c);
            escape_next = false;
            i += 1;
            continue;
        }
        if c == '\\' && in_string {
            result.push(c);
            escape_next = true;
            i += 1;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            result.push(c);
            i += 1;
            continue;
        }
        if in_string {
            result.push(c);
            i += 1;
            continue;
        }

        if c == ',' {
            let mut j = i + 1;
            while j < len && chars[j].is_whitespace() {
                j += 1;
            }
            if j < len && (chars[j] == ']' || chars[j] == '}') {
                i += 1;
                continue;
            }
        }

        result.push(c);
        i += 1;
    }

    result
}

// ── Step 4: bare keys ───────────────────────────────────────────────────

fn fix_unquoted_keys(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let len = chars.len();
    let mut result = String::with_capacity(len + 32);
    let mut in_string = false;
    let mut escape_next = false;
    let mut i = 0;

    while i < len {
        let c = chars[i];

        if escape_next {
            result.push(c);
            escape_next = false;
            i += 1;
            continue;
        }
        if c == '\\' && in_string {
            result.push(c);
            escape_next = true;
            i += 1;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            result.push(c);
            i += 1;
            continue;
        }
        if in_string {
            result.push(c);
            i += 1;
            continue;
        }

        if is_key_start_char(c) {
            let start = i;
            while i < len && is_key_char(chars[i]) {
                i += 1;
            }
            let key = &chars[start..i];

            let mut j = i;
            while j < len && chars[j].is_whitespace() {
                j += 1;
            }

            if j < len && chars[j] == ':' {
                result.push('"');
                result.extend(key);
                result.push('"');
            } else {
                // true / false / null
                result.extend(key);
            }
            continue;
        }

        result.push(c);
        i += 1;
    }

    result
}

fn is_key_start_char(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

// ── Step 5: truncation ──────────────────────────────────────────────────

fn close_truncated(input: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escape_next = false;

    for c in input.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        if c == '\\' && in_string {
            escape_next = true;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match c {
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&c) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    if !in_string && stack.is_empty() {
        return input.to_string();
    }

    let mut result = input.to_string();
    if in_string {
        result.push('"');
    }
    for closer in stack.into_iter().rev() {
        result.push(closer);
    }
    result
}
