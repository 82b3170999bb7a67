//! Tool-call argument sanitizer (spec.md §4.4.3 step 6, Design Notes "JSON
//! sanitization heuristics"). The model's raw `function.arguments` is noisy;
//! this module tries a fixed, deterministic fallback hierarchy:
//!
//!   strict parse → trailing-comma strip → unterminated-string close +
//!   brace/bracket balance → truncate to the last balanced region
//!
//! Each stage only ever narrows the input (never invents content), so a
//! string that fails every stage fails honestly rather than producing a
//! plausible-looking but wrong object.

use serde_json::Value;

/// Runs the full fallback hierarchy against `raw`, returning the first
/// stage that parses. `None` means every stage failed — the caller writes a
/// `ToolArgumentsInvalid` error message (spec.md §7).
pub fn sanitize_tool_arguments(raw: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str::<Value>(raw) {
        return Some(v);
    }
    let no_trailing_commas = strip_trailing_commas(raw);
    if let Ok(v) = serde_json::from_str::<Value>(&no_trailing_commas) {
        return Some(v);
    }
    let balanced = close_unterminated_and_balance(&no_trailing_commas);
    if let Ok(v) = serde_json::from_str::<Value>(&balanced) {
        return Some(v);
    }
    let truncated = truncate_to_last_balanced(&no_trailing_commas);
    serde_json::from_str::<Value>(&truncated).ok()
}

/// Removes a comma immediately before a closing `}`/`]` (skipping
/// whitespace between them), the single most common LLM JSON mistake.
/// String-aware: a comma inside a string literal is left untouched.
fn strip_trailing_commas(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    let mut out = String::with_capacity(raw.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        if c == '"' {
            in_string = true;
            out.push(c);
            i += 1;
            continue;
        }
        if c == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Closes an unterminated string literal with a `"`, then appends the
/// closing brackets for any still-open `{`/`[` in the order needed to
/// balance them (last opened, first closed).
fn close_unterminated_and_balance(raw: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in raw.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
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

    let mut out = raw.to_string();
    if in_string {
        out.push('"');
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

/// Scans for the last position where bracket depth returns to zero after
/// having opened at least once, and truncates there. A payload that never
/// balances (e.g. no opening brace at all) is returned unchanged, so the
/// caller's final parse attempt fails rather than silently succeeding on
/// an empty object.
fn truncate_to_last_balanced(raw: &str) -> String {
    let mut depth: i32 = 0;
    let mut opened = false;
    let mut in_string = false;
    let mut escaped = false;
    let mut last_balanced_end: Option<usize> = None;

    for (idx, c) in raw.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => {
                depth += 1;
                opened = true;
            }
            '}' | ']' => {
                depth -= 1;
                if opened && depth == 0 {
                    last_balanced_end = Some(idx + c.len_utf8());
                }
            }
            _ => {}
        }
    }

    match last_balanced_end {
        Some(end) => raw[..end].to_string(),
        None => raw.to_string(),
    }
}
