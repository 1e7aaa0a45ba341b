// crates/core/src/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Record role in a transcript. Closed set so every consumer handles all
/// four cases exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// Token counts reported by the agent for a single turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCounts {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
}

impl TokenCounts {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_read_tokens + self.cache_creation_tokens
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// One parsed transcript line. Immutable once produced by the reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptRecord {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenCounts>,
    /// Number of tool_use blocks carried by this line (assistant lines only).
    #[serde(default)]
    pub tool_calls: u32,
}

impl TranscriptRecord {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: None,
            model: None,
            tokens: None,
            tool_calls: 0,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn tool_result(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_tokens(mut self, tokens: TokenCounts) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn with_tool_calls(mut self, count: u32) -> Self {
        self.tool_calls = count;
        self
    }
}

/// Reader output for one contiguous byte range of a transcript.
///
/// `lines_consumed` counts every terminated physical line, including blank,
/// malformed, and skipped-type lines. A trailing line with no terminator is
/// never consumed.
#[derive(Debug, Clone, Default)]
pub struct RecordBatch {
    pub records: Vec<TranscriptRecord>,
    pub lines_consumed: u64,
    pub parse_errors: u64,
}

/// Result of tailing a session from a line cursor.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TailResult {
    pub messages: Vec<TranscriptRecord>,
    /// Terminated line count of the whole file. When this comes back smaller
    /// than the cursor the caller passed, the file was truncated or replaced
    /// and the cursor must be reset to zero.
    pub total_lines: u64,
}

/// Lightweight summary of one transcript file. Recreated on every scan.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandle {
    pub session_id: String,
    pub project: String,
    pub file_path: PathBuf,
    /// Unix seconds of the file's last modification.
    pub last_modified: i64,
    /// Terminated line count; an approximation of the record count that is
    /// exact whenever the writer emits one record per line.
    pub message_count: u64,
    pub preview: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

// ============================================================================
// JSONL wire types (for deserializing the agent's transcript format)
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct JsonlMessage {
    pub role: Option<String>,
    pub content: JsonlContent,
    pub model: Option<String>,
    pub usage: Option<JsonlUsage>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct JsonlUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default, rename = "cache_read_input_tokens")]
    pub cache_read_tokens: u64,
    #[serde(default, rename = "cache_creation_input_tokens")]
    pub cache_creation_tokens: u64,
}

impl From<JsonlUsage> for TokenCounts {
    fn from(u: JsonlUsage) -> Self {
        Self {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            cache_read_tokens: u.cache_read_tokens,
            cache_creation_tokens: u.cache_creation_tokens,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum JsonlContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: Option<serde_json::Value>,
    },
    ToolResult {
        #[serde(default)]
        content: Option<serde_json::Value>,
    },
    #[serde(other)]
    Other,
}
