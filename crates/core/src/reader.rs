// crates/core/src/reader.rs
//! Line-oriented transcript reader.
//!
//! Parses the agent's JSONL session format into typed records, skipping
//! malformed lines instead of failing the read. The writer appends whole
//! lines, but that is a practical assumption rather than a guarantee, so a
//! trailing line with no `\n` terminator is treated as possibly mid-write:
//! it is excluded from the output and from the consumed-line count, and the
//! next read starts at that line again.

use crate::error::ReadError;
use crate::types::*;
use chrono::{DateTime, Utc};
use memchr::{memchr_iter, memrchr};
use regex_lite::Regex;
use std::path::Path;
use tracing::debug;

/// Length of the complete (terminated) region of `bytes`: everything up to
/// and including the last newline, or 0 when no newline exists yet.
pub fn complete_len(bytes: &[u8]) -> usize {
    memrchr(b'\n', bytes).map(|pos| pos + 1).unwrap_or(0)
}

/// Count newline terminators in `bytes`.
pub fn count_lines(bytes: &[u8]) -> u64 {
    memchr_iter(b'\n', bytes).count() as u64
}

/// Regexes for stripping slash-command markup from user lines.
/// Dotall because command args can span multiple lines.
struct CommandTags {
    name: Regex,
    args: Regex,
    message: Regex,
}

impl CommandTags {
    fn new() -> Self {
        Self {
            name: Regex::new(r"(?s)<command-name>.*?</command-name>\s*").unwrap(),
            args: Regex::new(r"(?s)<command-args>(.*?)</command-args>").unwrap(),
            message: Regex::new(r"(?s)<command-message>.*?</command-message>\s*").unwrap(),
        }
    }

    /// If `<command-args>` is present its inner content becomes the message;
    /// otherwise the other tags are stripped and the remainder kept.
    fn clean(&self, content: &str) -> String {
        if let Some(caps) = self.args.captures(content) {
            if let Some(args) = caps.get(1) {
                let extracted = args.as_str().trim();
                if !extracted.is_empty() {
                    return extracted.to_string();
                }
            }
        }
        let cleaned = self.name.replace_all(content, "");
        let cleaned = self.message.replace_all(&cleaned, "");
        cleaned.trim().to_string()
    }
}

/// Parse the complete lines of `bytes` into transcript records.
///
/// Every terminated line is consumed exactly once: blank lines and lines of
/// unknown entry type are consumed without producing a record, undecodable
/// lines are consumed and counted in `parse_errors`, and the trailing
/// unterminated line (if any) is left for the next read.
pub fn read_records(bytes: &[u8]) -> RecordBatch {
    let complete = &bytes[..complete_len(bytes)];
    let tags = CommandTags::new();
    let mut batch = RecordBatch::default();

    let mut start = 0;
    for pos in memchr_iter(b'\n', complete) {
        let raw = &complete[start..pos];
        start = pos + 1;
        batch.lines_consumed += 1;

        let line = match std::str::from_utf8(raw) {
            Ok(text) => text.trim(),
            Err(_) => {
                debug!(line = batch.lines_consumed, "skipping non-UTF-8 line");
                batch.parse_errors += 1;
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }

        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                debug!(line = batch.lines_consumed, error = %e, "skipping malformed line");
                batch.parse_errors += 1;
                continue;
            }
        };

        match parse_line(&value, &tags) {
            LineOutcome::Record(record) => batch.records.push(record),
            LineOutcome::Skipped => {}
            LineOutcome::Malformed => batch.parse_errors += 1,
        }
    }

    batch
}

/// Read a whole transcript file and parse its complete lines.
pub async fn read_transcript(path: &Path) -> Result<RecordBatch, ReadError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ReadError::io(path, e))?;
    Ok(read_records(&bytes))
}

enum LineOutcome {
    Record(TranscriptRecord),
    Skipped,
    Malformed,
}

fn parse_line(value: &serde_json::Value, tags: &CommandTags) -> LineOutcome {
    let entry_type = match value.get("type").and_then(|t| t.as_str()) {
        Some(t) => t,
        // A self-describing record must carry a type tag.
        None => return LineOutcome::Malformed,
    };

    let timestamp = value
        .get("timestamp")
        .and_then(|t| t.as_str())
        .and_then(parse_timestamp);

    let record = match entry_type {
        "user" => {
            if value.get("isMeta").and_then(|v| v.as_bool()) == Some(true) {
                return LineOutcome::Skipped;
            }
            parse_user_line(value, tags)
        }
        "assistant" => parse_assistant_line(value),
        "system" => {
            let subtype = value
                .get("subtype")
                .and_then(|v| v.as_str())
                .unwrap_or("system");
            Some(TranscriptRecord::system(subtype))
        }
        // Unknown entry types are ignored for forward compatibility.
        _ => None,
    };

    match record {
        Some(mut record) => {
            record.timestamp = timestamp;
            LineOutcome::Record(record)
        }
        None => LineOutcome::Skipped,
    }
}

fn parse_user_line(value: &serde_json::Value, tags: &CommandTags) -> Option<TranscriptRecord> {
    let message = value.get("message")?;

    // Array content carrying tool_result blocks is the agent feeding tool
    // output back in; everything else is an actual user prompt.
    if let Some(serde_json::Value::Array(blocks)) = message.get("content") {
        let has_tool_result = blocks
            .iter()
            .any(|b| b.get("type").and_then(|t| t.as_str()) == Some("tool_result"));
        if has_tool_result {
            return Some(TranscriptRecord::tool_result(extract_tool_result_text(blocks)));
        }
    }

    let msg: JsonlMessage = serde_json::from_value(message.clone()).ok()?;
    let content = tags.clean(&extract_text(&msg.content)).replace("\\\n", "\n");
    Some(TranscriptRecord::user(content))
}

fn parse_assistant_line(value: &serde_json::Value) -> Option<TranscriptRecord> {
    let message = value.get("message")?;
    let msg: JsonlMessage = serde_json::from_value(message.clone()).ok()?;

    let (content, tool_calls) = extract_assistant_text(&msg.content);
    let mut record = TranscriptRecord::assistant(content).with_tool_calls(tool_calls);
    if let Some(model) = msg.model {
        record = record.with_model(model);
    }
    if let Some(usage) = msg.usage {
        record = record.with_tokens(usage.into());
    }
    Some(record)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Extract plain text from string-or-blocks content.
fn extract_text(content: &JsonlContent) -> String {
    match content {
        JsonlContent::Text(text) => text.clone(),
        JsonlContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Extract text and count tool_use blocks from assistant content.
fn extract_assistant_text(content: &JsonlContent) -> (String, u32) {
    match content {
        JsonlContent::Text(text) => (text.clone(), 0),
        JsonlContent::Blocks(blocks) => {
            let mut parts: Vec<&str> = Vec::new();
            let mut tool_calls = 0u32;
            for block in blocks {
                match block {
                    ContentBlock::Text { text } => parts.push(text),
                    ContentBlock::ToolUse { .. } => tool_calls += 1,
                    _ => {}
                }
            }
            (parts.join("\n"), tool_calls)
        }
    }
}

/// Extract readable text from raw tool_result blocks.
fn extract_tool_result_text(blocks: &[serde_json::Value]) -> String {
    let mut parts: Vec<String> = Vec::new();
    for block in blocks {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("tool_result") => match block.get("content") {
                Some(serde_json::Value::String(s)) => parts.push(s.clone()),
                Some(serde_json::Value::Array(items)) => {
                    for item in items {
                        if item.get("type").and_then(|t| t.as_str()) == Some("text") {
                            if let Some(text) = item.get("text").and_then(|t| t.as_str()) {
                                parts.push(text.to_string());
                            }
                        }
                    }
                }
                _ => {}
            },
            Some("text") => {
                if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                    parts.push(text.to_string());
                }
            }
            _ => {}
        }
    }
    parts.join("\n")
}
