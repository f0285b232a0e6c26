//! Pulling a JSON object out of an agent's free-text reply
//!
//! Agents are asked for JSON but routinely wrap it in prose or Markdown
//! fences. Lookup order: the whole reply, then a fenced block, then the first
//! brace-balanced object.

use serde_json::{Map, Value};

/// Find the first JSON object in `text`
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    let trimmed = text.trim();

    if let Some(obj) = parse_object(trimmed) {
        return Some(obj);
    }

    if let Some(obj) = fenced_blocks(trimmed).find_map(parse_object) {
        return Some(obj);
    }

    balanced_objects(trimmed).find_map(parse_object)
}

fn parse_object(candidate: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(candidate.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Bodies of ```-fenced blocks, with an optional language tag stripped
fn fenced_blocks(text: &str) -> impl Iterator<Item = &str> {
    text.split("```").skip(1).step_by(2).map(|block| {
        let block = block.trim_start();
        match block.split_once('\n') {
            Some((tag, body)) if !tag.trim_start().starts_with('{') => body,
            _ => block,
        }
    })
}

/// Every top-level `{...}` span, honouring string literals and escapes
fn balanced_objects(text: &str) -> impl Iterator<Item = &str> {
    let bytes = text.as_bytes();
    let mut cursor = 0;

    std::iter::from_fn(move || {
        while cursor < bytes.len() {
            let start = cursor + text[cursor..].find('{')?;
            let mut depth = 0usize;
            let mut in_string = false;
            let mut escaped = false;

            for (offset, &b) in bytes[start..].iter().enumerate() {
                if in_string {
                    match b {
                        _ if escaped => escaped = false,
                        b'\\' => escaped = true,
                        b'"' => in_string = false,
                        _ => {}
                    }
                    continue;
                }
                match b {
                    b'"' => in_string = true,
                    b'{' => depth += 1,
                    b'}' => {
                        depth -= 1;
                        if depth == 0 {
                            let end = start + offset + 1;
                            cursor = end;
                            return Some(&text[start..end]);
                        }
                    }
                    _ => {}
                }
            }
            // this brace never closes; a later one still might
            cursor = start + 1;
        }
        None
    })
}
