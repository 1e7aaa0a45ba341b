// crates/stats/src/model.rs
//! Versioned usage-statistics aggregate.
//!
//! The cache is a pure projection of the transcript corpus: per-day activity,
//! per-model token totals, the longest session on record, and an hour-of-day
//! histogram. All bucketing is UTC so the aggregate is deterministic across
//! machines. A version tag gates deserialization; any change to the field set
//! bumps [`STATS_SCHEMA_VERSION`] and forces a full recompute instead of a
//! field-by-field migration.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current schema version of the persisted cache.
pub const STATS_SCHEMA_VERSION: u32 = 1;

/// Bucket key for records that carry no model identifier.
pub const UNKNOWN_MODEL: &str = "unknown";

/// Aggregated usage statistics over the whole transcript corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsCache {
    pub version: u32,
    /// Timestamp of the newest record folded in; incremental updates fold
    /// only records strictly newer than this.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_computed: Option<DateTime<Utc>>,
    /// Per-day activity, ordered by date ascending.
    pub daily_activity: Vec<DayActivity>,
    /// Token totals per model identifier; records without a model land in
    /// the [`UNKNOWN_MODEL`] bucket.
    pub model_usage: BTreeMap<String, ModelUsage>,
    pub total_sessions: u64,
    pub total_messages: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longest_session: Option<LongestSession>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_session_date: Option<NaiveDate>,
    /// Record count per UTC hour of day (0-23).
    pub hourly_distribution: BTreeMap<u8, u64>,
}

impl StatsCache {
    /// A valid, empty aggregate at the current schema version.
    pub fn empty() -> Self {
        Self {
            version: STATS_SCHEMA_VERSION,
            last_computed: None,
            daily_activity: Vec::new(),
            model_usage: BTreeMap::new(),
            total_sessions: 0,
            total_messages: 0,
            longest_session: None,
            first_session_date: None,
            hourly_distribution: BTreeMap::new(),
        }
    }

    /// Sum of all token counts across every model bucket.
    pub fn total_tokens(&self) -> u64 {
        self.model_usage.values().map(ModelUsage::total_tokens).sum()
    }
}

/// Activity rollup for one UTC calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayActivity {
    pub date: NaiveDate,
    pub message_count: u64,
    /// Sessions whose first record fell on this day.
    pub session_count: u64,
    pub tool_call_count: u64,
}

impl DayActivity {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            message_count: 0,
            session_count: 0,
            tool_call_count: 0,
        }
    }
}

/// Token totals for one model identifier.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    /// Estimated spend in USD; absent when the model has no known rates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    /// Largest per-turn input total observed for this model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_context_tokens: Option<u64>,
}

impl ModelUsage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_read_tokens + self.cache_creation_tokens
    }
}

/// The longest session on record, by wall-clock span of its timestamps.
/// Equal spans are broken toward the lexicographically smaller session id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LongestSession {
    pub session_id: String,
    pub duration_seconds: i64,
    pub message_count: u64,
    pub started_at: DateTime<Utc>,
}
