//! JSON recovery for model output.
//!
//! Models wrap JSON in code fences, stop mid-object, leave trailing commas,
//! or bury the object in prose. `JsonRepairer` tries progressively more
//! invasive fixes and reports whether any were needed.

use serde_json::Value;
use tracing::debug;

use crate::types::{ErrorCategory, LlmError, Result};

/// Parse the first JSON document found in `content`, repairing if needed
pub fn extract_json(content: &str) -> Result<Value> {
    JsonRepairer::new().parse_or_repair(content).map(|(value, _)| value)
}

/// Bracket and string state after scanning a prefix of JSON text
#[derive(Debug, Default)]
struct ScanState {
    /// Open `{` / `[` in nesting order
    open: Vec<char>,
    in_string: bool,
    escape: bool,
}

impl ScanState {
    fn feed(&mut self, ch: char) {
        if self.escape {
            self.escape = false;
            return;
        }
        match ch {
            '\\' if self.in_string => self.escape = true,
            '"' => self.in_string = !self.in_string,
            '{' | '[' if !self.in_string => self.open.push(ch),
            '}' | ']' if !self.in_string => {
                self.open.pop();
            }
            _ => {}
        }
    }

    fn at_top_level(&self) -> bool {
        self.open.is_empty() && !self.in_string
    }
}

pub struct JsonRepairer {
    max_repair_level: u8,
}

impl Default for JsonRepairer {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonRepairer {
    pub fn new() -> Self {
        Self { max_repair_level: 3 }
    }

    /// Returns `(value, was_repaired)`
    pub fn parse_or_repair(&self, raw: &str) -> Result<(Value, bool)> {
        let cleaned = strip_code_fences(raw.trim().trim_start_matches('\u{feff}'));

        if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
            return Ok((value, false));
        }

        // Prose around the object is the most common failure; isolate it first
        let candidate = embedded_json(cleaned).unwrap_or(cleaned);
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            debug!("JSON isolated from surrounding text");
            return Ok((value, true));
        }

        for level in 1..=self.max_repair_level {
            let repaired = repair(candidate, level);
            if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
                debug!(level, "JSON repaired");
                return Ok((value, true));
            }
        }

        Err(LlmError::new(
            ErrorCategory::Malformed,
            format!(
                "no parseable JSON in response: {}",
                cleaned.chars().take(120).collect::<String>()
            ),
        )
        .into())
    }
}

fn strip_code_fences(s: &str) -> &str {
    let mut body = s;
    if body.starts_with("```") {
        body = match body.find('\n') {
            Some(newline) => &body[newline + 1..],
            None => body.trim_start_matches('`'),
        };
    }
    body.trim_end().trim_end_matches("```").trim()
}

/// Slice from the first `{`/`[` to its matching closer, or to the end when
/// the structure never closes
fn embedded_json(s: &str) -> Option<&str> {
    let start = s.find(['{', '['])?;
    let mut state = ScanState::default();
    for (offset, ch) in s[start..].char_indices() {
        state.feed(ch);
        if state.at_top_level() && offset > 0 {
            return Some(&s[start..start + offset + ch.len_utf8()]);
        }
    }
    Some(&s[start..])
}

fn repair(s: &str, level: u8) -> String {
    let mut text = remove_trailing_commas(s);
    if level >= 2 {
        text = close_strings_at_newline(&text);
    }
    if level >= 3 {
        text = text
            .chars()
            .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
            .collect();
        text = remove_dangling_tail(&text);
    }
    close_open_structures(&text)
}

fn remove_trailing_commas(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut state = ScanState::default();
    for (i, &ch) in chars.iter().enumerate() {
        if ch == ',' && !state.in_string {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some(']') | Some('}')) {
                continue;
            }
        }
        state.feed(ch);
        out.push(ch);
    }
    out
}

fn close_strings_at_newline(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    let mut state = ScanState::default();
    for ch in s.chars() {
        if state.in_string && !state.escape && matches!(ch, '\n' | '\r') {
            out.push('"');
            state.in_string = false;
        }
        state.feed(ch);
        out.push(ch);
    }
    out
}

/// Drop a half-written trailing member like `, "key": ` or `, "ke`
fn remove_dangling_tail(s: &str) -> String {
    let trimmed = s.trim_end();
    let mut state = ScanState::default();
    let mut last_separator = None;
    for (i, ch) in trimmed.char_indices() {
        if !state.in_string && matches!(ch, ',' | '{' | '[') {
            last_separator = Some((i, ch));
        }
        state.feed(ch);
    }

    let ends_cleanly = trimmed.ends_with(['}', ']', '"'])
        || trimmed.ends_with(|c: char| c.is_ascii_digit())
        || trimmed.ends_with("true")
        || trimmed.ends_with("false")
        || trimmed.ends_with("null");
    if ends_cleanly && !state.in_string {
        return trimmed.to_string();
    }

    match last_separator {
        Some((i, ',')) => trimmed[..i].to_string(),
        Some((i, _)) => trimmed[..=i].to_string(),
        None => trimmed.to_string(),
    }
}

fn close_open_structures(s: &str) -> String {
    let mut state = ScanState::default();
    s.chars().for_each(|c| state.feed(c));

    let mut out = s.to_string();
    if state.in_string {
        out.push('"');
    }
    for opener in state.open.iter().rev() {
        out.push(if *opener == '{' { '}' } else { ']' });
    }
    out
}
