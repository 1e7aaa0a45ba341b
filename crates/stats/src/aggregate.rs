// crates/stats/src/aggregate.rs
//! Folds the transcript corpus into a [`StatsCache`].
//!
//! One folding core serves both entry modes: a full recompute over every
//! record, and an incremental update that seeds the folder from a prior cache
//! and folds only records strictly newer than its `last_computed` stamp.
//! Incremental folding is sound only while transcripts are append-only with
//! per-file non-decreasing timestamps; callers that cannot assume that pass
//! [`AggregateMode::Full`], since a fold can never retract data.

use crate::model::{
    DayActivity, LongestSession, ModelUsage, StatsCache, STATS_SCHEMA_VERSION, UNKNOWN_MODEL,
};
use crate::pricing;
use chrono::{DateTime, NaiveDate, Timelike, Utc};
use claude_scope_core::error::ScanError;
use claude_scope_core::reader::read_transcript;
use claude_scope_core::scan::transcript_files;
use claude_scope_core::types::{Role, TranscriptRecord};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("Aggregation cancelled")]
    Cancelled,
}

/// Caller-selected aggregation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateMode {
    /// Fold every record of every session from scratch.
    Full,
    /// Fold only records newer than the prior cache's `last_computed`.
    /// Degrades to a full recompute when no usable prior cache exists.
    Incremental,
}

/// Compute the usage aggregate for the transcript tree under `root`.
///
/// Cancellation is checked between files; a cancelled run returns an error
/// and never a partial aggregate.
pub async fn compute_stats(
    root: &Path,
    prior: Option<&StatsCache>,
    mode: AggregateMode,
    cancel: &CancellationToken,
) -> Result<StatsCache, AggregateError> {
    let cutoff = match (mode, prior) {
        (AggregateMode::Incremental, Some(p)) if p.version == STATS_SCHEMA_VERSION => {
            p.last_computed
        }
        _ => None,
    };

    let mut folder = match (cutoff, prior) {
        (Some(_), Some(p)) => StatsFolder::from_prior(p.clone()),
        _ => StatsFolder::new(),
    };

    for (_project, path) in transcript_files(root).await? {
        if cancel.is_cancelled() {
            return Err(AggregateError::Cancelled);
        }

        // Files untouched since the cutoff cannot hold newer records.
        if let Some(cutoff) = cutoff {
            let mtime = tokio::fs::metadata(&path)
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from);
            if matches!(mtime, Some(m) if m < cutoff) {
                continue;
            }
        }

        let batch = match read_transcript(&path).await {
            Ok(b) => b,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable session");
                continue;
            }
        };

        let session_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        folder.fold_session(&session_id, &batch.records, cutoff);
    }

    Ok(folder.finish())
}

/// Accumulator shared by the full and incremental paths.
struct StatsFolder {
    days: BTreeMap<NaiveDate, DayActivity>,
    models: BTreeMap<String, ModelUsage>,
    hourly: BTreeMap<u8, u64>,
    longest: Option<LongestSession>,
    first_session_date: Option<NaiveDate>,
    last_computed: Option<DateTime<Utc>>,
}

impl StatsFolder {
    fn new() -> Self {
        Self {
            days: BTreeMap::new(),
            models: BTreeMap::new(),
            hourly: BTreeMap::new(),
            longest: None,
            first_session_date: None,
            last_computed: None,
        }
    }

    fn from_prior(cache: StatsCache) -> Self {
        Self {
            days: cache
                .daily_activity
                .into_iter()
                .map(|d| (d.date, d))
                .collect(),
            models: cache.model_usage,
            hourly: cache.hourly_distribution,
            longest: cache.longest_session,
            first_session_date: cache.first_session_date,
            last_computed: cache.last_computed,
        }
    }

    /// Fold one session's records. The whole file is always presented so the
    /// session span stays exact; `cutoff` limits which records contribute to
    /// the day/hour/model buckets.
    fn fold_session(
        &mut self,
        session_id: &str,
        records: &[TranscriptRecord],
        cutoff: Option<DateTime<Utc>>,
    ) {
        let first_ts = records.iter().filter_map(|r| r.timestamp).min();
        let last_ts = records.iter().filter_map(|r| r.timestamp).max();

        if let (Some(first), Some(last)) = (first_ts, last_ts) {
            self.consider_longest(LongestSession {
                session_id: session_id.to_string(),
                duration_seconds: (last - first).num_seconds(),
                message_count: records.len() as u64,
                started_at: first,
            });

            // A session is counted on the day it started, exactly once:
            // sessions that began before the cutoff were counted by the run
            // that folded their first record.
            if cutoff.map_or(true, |c| first > c) {
                let start_date = first.date_naive();
                self.days
                    .entry(start_date)
                    .or_insert_with(|| DayActivity::new(start_date))
                    .session_count += 1;
                self.first_session_date = Some(match self.first_session_date {
                    Some(existing) => existing.min(start_date),
                    None => start_date,
                });
            }
        }

        for record in records {
            let Some(ts) = record.timestamp else {
                debug!(session_id, "record without timestamp excluded from aggregate");
                continue;
            };
            if cutoff.is_some_and(|c| ts <= c) {
                continue;
            }
            self.fold_record(record, ts);
        }
    }

    fn fold_record(&mut self, record: &TranscriptRecord, ts: DateTime<Utc>) {
        let date = ts.date_naive();
        let day = self
            .days
            .entry(date)
            .or_insert_with(|| DayActivity::new(date));
        day.message_count += 1;
        day.tool_call_count += record.tool_calls as u64;

        *self.hourly.entry(ts.hour() as u8).or_insert(0) += 1;

        let model_key = record
            .model
            .clone()
            .unwrap_or_else(|| UNKNOWN_MODEL.to_string());
        let usage = self.models.entry(model_key).or_default();
        if let Some(tokens) = record.tokens {
            usage.input_tokens += tokens.input_tokens;
            usage.output_tokens += tokens.output_tokens;
            usage.cache_read_tokens += tokens.cache_read_tokens;
            usage.cache_creation_tokens += tokens.cache_creation_tokens;

            if record.role == Role::Assistant {
                let context = tokens.input_tokens
                    + tokens.cache_read_tokens
                    + tokens.cache_creation_tokens;
                if context > 0 && usage.max_context_tokens.map_or(true, |m| context > m) {
                    usage.max_context_tokens = Some(context);
                }
            }
        }

        if self.last_computed.map_or(true, |prev| ts > prev) {
            self.last_computed = Some(ts);
        }
    }

    fn consider_longest(&mut self, candidate: LongestSession) {
        let better = match &self.longest {
            None => true,
            Some(best) => {
                candidate.duration_seconds > best.duration_seconds
                    || (candidate.duration_seconds == best.duration_seconds
                        && candidate.session_id < best.session_id)
            }
        };
        if better {
            self.longest = Some(candidate);
        }
    }

    fn finish(mut self) -> StatsCache {
        let total_messages = self.days.values().map(|d| d.message_count).sum();
        let total_sessions = self.days.values().map(|d| d.session_count).sum();

        for (model, usage) in self.models.iter_mut() {
            let cost = pricing::estimate_cost(model, usage);
            usage.cost_usd = cost;
        }

        StatsCache {
            version: STATS_SCHEMA_VERSION,
            last_computed: self.last_computed,
            daily_activity: self.days.into_values().collect(),
            model_usage: self.models,
            total_sessions,
            total_messages,
            longest_session: self.longest,
            first_session_date: self.first_session_date,
            hourly_distribution: self.hourly,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use std::path::PathBuf;

    fn record_line(ts: &str, model: Option<&str>, tokens_out: u64) -> String {
        match model {
            Some(m) => format!(
                r#"{{"type":"assistant","message":{{"content":"a","model":"{m}","usage":{{"input_tokens":10,"output_tokens":{tokens_out}}}}},"timestamp":"{ts}"}}"#
            ),
            None => format!(
                r#"{{"type":"user","message":{{"content":"q"}},"timestamp":"{ts}"}}"#
            ),
        }
    }

    fn write_session(root: &Path, project: &str, session: &str, lines: &[String]) -> PathBuf {
        let dir = root.join(project);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{session}.jsonl"));
        let mut f = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
        path
    }

    fn append_lines(path: &Path, lines: &[String]) {
        let mut f = std::fs::File::options().append(true).open(path).unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
    }

    #[tokio::test]
    async fn totals_match_daily_breakdown() {
        let dir = tempfile::tempdir().unwrap();
        write_session(
            dir.path(),
            "-p-a",
            "s1",
            &[
                record_line("2026-08-01T09:00:00Z", None, 0),
                record_line("2026-08-01T09:01:00Z", Some("claude-sonnet-4-20250514"), 5),
                record_line("2026-08-02T10:00:00Z", None, 0),
            ],
        );
        write_session(
            dir.path(),
            "-p-b",
            "s2",
            &[record_line("2026-08-02T11:00:00Z", None, 0)],
        );

        let stats = compute_stats(dir.path(), None, AggregateMode::Full, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.total_messages, 4);
        assert_eq!(
            stats.total_messages,
            stats.daily_activity.iter().map(|d| d.message_count).sum::<u64>()
        );
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(
            stats.total_sessions,
            stats.daily_activity.iter().map(|d| d.session_count).sum::<u64>()
        );
        assert_eq!(stats.daily_activity.len(), 2);
        assert_eq!(
            stats.first_session_date,
            chrono::NaiveDate::from_ymd_opt(2026, 8, 1)
        );
    }

    #[tokio::test]
    async fn records_without_model_land_in_unknown_bucket() {
        let dir = tempfile::tempdir().unwrap();
        write_session(
            dir.path(),
            "-p-a",
            "s1",
            &[r#"{"type":"assistant","message":{"content":"a","usage":{"input_tokens":3,"output_tokens":4}},"timestamp":"2026-08-01T09:00:00Z"}"#
                .to_string()],
        );

        let stats = compute_stats(dir.path(), None, AggregateMode::Full, &CancellationToken::new())
            .await
            .unwrap();

        let unknown = stats.model_usage.get(UNKNOWN_MODEL).unwrap();
        assert_eq!(unknown.input_tokens, 3);
        assert_eq!(unknown.output_tokens, 4);
        assert!(unknown.cost_usd.is_none());
    }

    #[tokio::test]
    async fn longest_session_wins_by_duration() {
        let dir = tempfile::tempdir().unwrap();
        // 10-minute session vs 25-minute session.
        write_session(
            dir.path(),
            "-p-a",
            "short",
            &[
                record_line("2026-08-01T09:00:00Z", None, 0),
                record_line("2026-08-01T09:10:00Z", None, 0),
            ],
        );
        write_session(
            dir.path(),
            "-p-a",
            "long",
            &[
                record_line("2026-08-01T12:00:00Z", None, 0),
                record_line("2026-08-01T12:25:00Z", None, 0),
            ],
        );

        let stats = compute_stats(dir.path(), None, AggregateMode::Full, &CancellationToken::new())
            .await
            .unwrap();

        let longest = stats.longest_session.unwrap();
        assert_eq!(longest.session_id, "long");
        assert_eq!(longest.duration_seconds, 25 * 60);
        assert_eq!(longest.message_count, 2);
    }

    #[tokio::test]
    async fn longest_session_tie_breaks_lexicographically() {
        let dir = tempfile::tempdir().unwrap();
        for id in ["bbb", "aaa"] {
            write_session(
                dir.path(),
                "-p-a",
                id,
                &[
                    record_line("2026-08-01T09:00:00Z", None, 0),
                    record_line("2026-08-01T09:10:00Z", None, 0),
                ],
            );
        }

        let stats = compute_stats(dir.path(), None, AggregateMode::Full, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(stats.longest_session.unwrap().session_id, "aaa");
    }

    #[tokio::test]
    async fn hourly_histogram_buckets_by_utc_hour() {
        let dir = tempfile::tempdir().unwrap();
        write_session(
            dir.path(),
            "-p-a",
            "s1",
            &[
                record_line("2026-08-01T09:05:00Z", None, 0),
                record_line("2026-08-01T09:55:00Z", None, 0),
                record_line("2026-08-01T23:15:00Z", None, 0),
            ],
        );

        let stats = compute_stats(dir.path(), None, AggregateMode::Full, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(stats.hourly_distribution.get(&9), Some(&2));
        assert_eq!(stats.hourly_distribution.get(&23), Some(&1));
    }

    #[tokio::test]
    async fn incremental_update_matches_full_recompute() {
        let dir = tempfile::tempdir().unwrap();
        let s1 = write_session(
            dir.path(),
            "-p-a",
            "s1",
            &[
                record_line("2026-08-01T09:00:00Z", None, 0),
                record_line("2026-08-01T09:05:00Z", Some("claude-sonnet-4-20250514"), 7),
            ],
        );

        let cancel = CancellationToken::new();
        let first = compute_stats(dir.path(), None, AggregateMode::Full, &cancel)
            .await
            .unwrap();
        assert_eq!(first.total_messages, 2);

        // Append to the existing session and add a brand-new one.
        append_lines(
            &s1,
            &[record_line("2026-08-02T08:00:00Z", Some("claude-sonnet-4-20250514"), 9)],
        );
        write_session(
            dir.path(),
            "-p-b",
            "s2",
            &[
                record_line("2026-08-02T09:00:00Z", None, 0),
                record_line("2026-08-02T09:30:00Z", None, 0),
            ],
        );

        let incremental = compute_stats(
            dir.path(),
            Some(&first),
            AggregateMode::Incremental,
            &cancel,
        )
        .await
        .unwrap();
        let full = compute_stats(dir.path(), None, AggregateMode::Full, &cancel)
            .await
            .unwrap();

        assert_eq!(incremental, full);
        assert_eq!(incremental.total_messages, 5);
        assert_eq!(incremental.total_sessions, 2);
    }

    #[tokio::test]
    async fn incremental_without_prior_degrades_to_full() {
        let dir = tempfile::tempdir().unwrap();
        write_session(
            dir.path(),
            "-p-a",
            "s1",
            &[record_line("2026-08-01T09:00:00Z", None, 0)],
        );

        let stats = compute_stats(
            dir.path(),
            None,
            AggregateMode::Incremental,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(stats.total_messages, 1);
    }

    #[tokio::test]
    async fn records_without_timestamps_are_excluded() {
        let dir = tempfile::tempdir().unwrap();
        write_session(
            dir.path(),
            "-p-a",
            "s1",
            &[
                r#"{"type":"user","message":{"content":"no clock"}}"#.to_string(),
                record_line("2026-08-01T09:00:00Z", None, 0),
            ],
        );

        let stats = compute_stats(dir.path(), None, AggregateMode::Full, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(stats.total_messages, 1);
        assert_eq!(
            stats.total_messages,
            stats.daily_activity.iter().map(|d| d.message_count).sum::<u64>()
        );
    }

    #[tokio::test]
    async fn cancelled_aggregation_returns_no_partial_result() {
        let dir = tempfile::tempdir().unwrap();
        write_session(
            dir.path(),
            "-p-a",
            "s1",
            &[record_line("2026-08-01T09:00:00Z", None, 0)],
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = compute_stats(dir.path(), None, AggregateMode::Full, &cancel).await;
        assert!(matches!(result, Err(AggregateError::Cancelled)));
    }

    #[tokio::test]
    async fn missing_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let result = compute_stats(
            &dir.path().join("gone"),
            None,
            AggregateMode::Full,
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(AggregateError::Scan(_))));
    }

    #[tokio::test]
    async fn cost_is_populated_for_known_models() {
        let dir = tempfile::tempdir().unwrap();
        write_session(
            dir.path(),
            "-p-a",
            "s1",
            &[record_line("2026-08-01T09:00:00Z", Some("claude-sonnet-4-20250514"), 1000)],
        );

        let stats = compute_stats(dir.path(), None, AggregateMode::Full, &CancellationToken::new())
            .await
            .unwrap();
        let usage = stats.model_usage.get("claude-sonnet-4-20250514").unwrap();
        assert!(usage.cost_usd.unwrap() > 0.0);
        assert_eq!(usage.max_context_tokens, Some(10));
    }
}
