// crates/core/src/scan.rs
//! Session discovery across the transcript tree.
//!
//! Scans the agent's per-project transcript directories and produces a
//! lightweight [`SessionHandle`] per file without parsing full history:
//! preview and model come from the last few raw lines, the message count is
//! the terminated-line count. Transcript files live exactly two levels below
//! the root (`{project}/{session}.jsonl`); deeper trees hold sub-agent and
//! tool output and are ignored.

use crate::error::ScanError;
use crate::reader;
use crate::tail::tail_lines;
use crate::types::{Role, SessionHandle};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How many raw lines to inspect for the preview and model of a session.
const PREVIEW_LINES: usize = 20;

/// Maximum preview length in characters.
const PREVIEW_MAX_CHARS: usize = 200;

/// Returns the transcript root (`~/.claude/projects`).
pub fn projects_root() -> Result<PathBuf, ScanError> {
    crate::paths::projects_dir().ok_or(ScanError::HomeDirNotFound)
}

/// Enumerate sessions under `root`, most recently modified first.
///
/// `threshold_secs` filters to sessions whose file was modified within the
/// last N seconds; `None` or `0` returns everything. A missing or unreadable
/// root is a hard error; individual unreadable or empty session files are
/// skipped. Cancellation is honored between files and discards all partial
/// results.
pub async fn list_sessions(
    root: &Path,
    threshold_secs: Option<u64>,
    cancel: &CancellationToken,
) -> Result<Vec<SessionHandle>, ScanError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let threshold = threshold_secs.filter(|&t| t > 0);

    let mut sessions = Vec::new();

    for (project, file_path) in transcript_files(root).await? {
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        let metadata = match fs::metadata(&file_path).await {
            Ok(m) => m,
            Err(_) => continue,
        };
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        if let Some(t) = threshold {
            if now.saturating_sub(modified) > t as i64 {
                continue;
            }
        }

        match summarize_session(&file_path, &project, modified).await {
            Ok(Some(handle)) => sessions.push(handle),
            Ok(None) => {} // empty file
            Err(e) => {
                debug!(path = %file_path.display(), error = %e, "skipping unreadable session");
            }
        }
    }

    sessions.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
    Ok(sessions)
}

/// List every transcript file under `root` with its resolved project name.
///
/// Shared by the scanner and the usage aggregator. Only depth-2
/// `{project}/{session}.jsonl` files qualify.
pub async fn transcript_files(root: &Path) -> Result<Vec<(String, PathBuf)>, ScanError> {
    if !root.exists() {
        return Err(ScanError::RootNotFound {
            path: root.to_path_buf(),
        });
    }

    let mut entries = fs::read_dir(root)
        .await
        .map_err(|e| ScanError::io(root, e))?;

    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_err(|e| ScanError::io(root, e))? {
        let project_path = entry.path();
        if !project_path.is_dir() {
            continue;
        }

        let encoded = project_path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let project = resolve_project_name(&encoded);

        let mut project_entries = match fs::read_dir(&project_path).await {
            Ok(e) => e,
            Err(e) => {
                debug!(path = %project_path.display(), error = %e, "skipping unreadable project dir");
                continue;
            }
        };

        while let Ok(Some(file_entry)) = project_entries.next_entry().await {
            let path = file_entry.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            files.push((project.clone(), path));
        }
    }

    Ok(files)
}

/// Build a handle for one session file, or `None` when the file has no
/// complete lines yet.
async fn summarize_session(
    path: &Path,
    project: &str,
    modified: i64,
) -> io::Result<Option<SessionHandle>> {
    let message_count = count_complete_lines(path).await?;
    if message_count == 0 {
        return Ok(None);
    }

    let session_id = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let recent = tail_lines(path, PREVIEW_LINES).await?;
    let mut text = recent.join("\n");
    text.push('\n');
    let batch = reader::read_records(text.as_bytes());

    let mut preview = String::new();
    let mut model = None;
    for record in batch.records.iter().rev() {
        if preview.is_empty()
            && matches!(record.role, Role::User | Role::Assistant)
            && !record.content.trim().is_empty()
        {
            preview = truncate_preview(&record.content, PREVIEW_MAX_CHARS);
        }
        if model.is_none() {
            model = record.model.clone();
        }
        if !preview.is_empty() && model.is_some() {
            break;
        }
    }

    Ok(Some(SessionHandle {
        session_id,
        project: project.to_string(),
        file_path: path.to_path_buf(),
        last_modified: modified,
        message_count,
        preview,
        model,
    }))
}

/// Count terminated lines without materializing the file in memory.
async fn count_complete_lines(path: &Path) -> io::Result<u64> {
    let mut file = fs::File::open(path).await?;
    let mut buf = vec![0u8; 64 * 1024];
    let mut count = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        count += reader::count_lines(&buf[..n]);
    }
    Ok(count)
}

/// Resolve an encoded project directory name to a display name.
///
/// The agent encodes `/Users/foo/my-project` as `-Users-foo-my-project`,
/// which makes hyphens in real directory names ambiguous. Candidate joins are
/// tried against the filesystem, preferring one that actually exists; the
/// all-separators variant is the fallback.
pub fn resolve_project_name(encoded: &str) -> String {
    if encoded.is_empty() {
        return String::new();
    }

    let variants = join_variants(encoded);
    let chosen = variants
        .iter()
        .find(|v| Path::new(v).exists())
        .unwrap_or(&variants[0]);

    Path::new(chosen)
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| chosen.clone())
}

/// Candidate filesystem paths for an encoded name, most likely first:
/// every hyphen as a separator, then variants keeping the last one, two, or
/// three components hyphenated (common for project directory names).
fn join_variants(encoded: &str) -> Vec<String> {
    let name = encoded.strip_prefix('-').unwrap_or(encoded);
    if name.is_empty() {
        return vec!["/".to_string()];
    }

    let parts: Vec<&str> = name.split('-').collect();
    let mut variants = vec![format!("/{}", parts.join("/"))];

    for keep in 2..=4usize {
        if parts.len() >= keep {
            let tail = parts[parts.len() - (keep - 1)..].join("-");
            let rest = &parts[..parts.len() - (keep - 1)];
            let variant = format!("/{}/{}", rest.join("/"), tail);
            if !variants.contains(&variant) {
                variants.push(variant);
            }
        }
    }

    variants
}

/// Truncate to `max_len` characters, preferring a word boundary, with an
/// ellipsis when anything was cut. Multi-byte safe.
pub fn truncate_preview(text: &str, max_len: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_len {
        return trimmed.to_string();
    }

    let truncated: String = trimmed.chars().take(max_len).collect();
    if let Some(space_idx) = truncated.rfind(' ') {
        let chars_before_space = truncated[..space_idx].chars().count();
        if chars_before_space > max_len / 2 {
            let cut: String = truncated.chars().take(chars_before_space).collect();
            return format!("{}...", cut.trim_end());
        }
    }

    format!("{}...", truncated.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use std::time::Duration;

    fn write_session(dir: &Path, project: &str, session: &str, lines: &[String]) -> PathBuf {
        let project_dir = dir.join(project);
        std::fs::create_dir_all(&project_dir).unwrap();
        let path = project_dir.join(format!("{session}.jsonl"));
        let mut f = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
        path
    }

    fn set_mtime(path: &Path, age: Duration) {
        let f = std::fs::File::options().write(true).open(path).unwrap();
        f.set_modified(SystemTime::now() - age).unwrap();
    }

    fn user(text: &str) -> String {
        format!(r#"{{"type":"user","message":{{"content":"{text}"}}}}"#)
    }

    fn assistant(text: &str, model: &str) -> String {
        format!(
            r#"{{"type":"assistant","message":{{"content":"{text}","model":"{model}"}}}}"#
        )
    }

    #[test]
    fn projects_root_lives_under_claude_dir() {
        let root = projects_root().unwrap();
        assert!(root.ends_with(".claude/projects"));
    }

    #[tokio::test]
    async fn missing_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let result = list_sessions(&missing, None, &CancellationToken::new()).await;
        assert!(matches!(result, Err(ScanError::RootNotFound { .. })));
    }

    #[tokio::test]
    async fn scan_produces_handles_sorted_by_recency() {
        let dir = tempfile::tempdir().unwrap();
        let old = write_session(
            dir.path(),
            "-home-u-alpha",
            "older",
            &[user("old question"), assistant("old answer", "claude-sonnet-4-20250514")],
        );
        let new = write_session(
            dir.path(),
            "-home-u-beta",
            "newer",
            &[user("new question")],
        );
        set_mtime(&old, Duration::from_secs(3600));
        set_mtime(&new, Duration::from_secs(60));

        let sessions = list_sessions(dir.path(), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_id, "newer");
        assert_eq!(sessions[1].session_id, "older");
        assert_eq!(sessions[1].message_count, 2);
        assert_eq!(
            sessions[1].model.as_deref(),
            Some("claude-sonnet-4-20250514")
        );
        assert_eq!(sessions[1].preview, "old answer");
    }

    #[tokio::test]
    async fn threshold_filters_stale_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let stale = write_session(dir.path(), "-p-one", "stale", &[user("zzz")]);
        write_session(dir.path(), "-p-two", "fresh", &[user("yyy")]);
        set_mtime(&stale, Duration::from_secs(7200));

        let active = list_sessions(dir.path(), Some(300), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].session_id, "fresh");

        // Zero threshold means "return all".
        let all = list_sessions(dir.path(), Some(0), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn empty_files_and_deep_trees_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write_session(dir.path(), "-p-real", "ok", &[user("hi")]);
        write_session(dir.path(), "-p-real", "empty", &[]);

        // Sub-agent file three levels down must not appear.
        let deep = dir.path().join("-p-real").join("ok").join("subagents");
        std::fs::create_dir_all(&deep).unwrap();
        std::fs::write(deep.join("agent-1.jsonl"), user("nested") + "\n").unwrap();

        let sessions = list_sessions(dir.path(), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id, "ok");
    }

    #[tokio::test]
    async fn cancelled_scan_returns_no_partial_results() {
        let dir = tempfile::tempdir().unwrap();
        write_session(dir.path(), "-p-x", "a", &[user("hi")]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = list_sessions(dir.path(), None, &cancel).await;
        assert!(matches!(result, Err(ScanError::Cancelled)));
    }

    #[tokio::test]
    async fn preview_skips_meta_and_junk_lines() {
        let dir = tempfile::tempdir().unwrap();
        write_session(
            dir.path(),
            "-p-y",
            "s",
            &[
                user("the real preview"),
                r#"{"type":"user","isMeta":true,"message":{"content":"noise"}}"#.to_string(),
                "not json".to_string(),
            ],
        );

        let sessions = list_sessions(dir.path(), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(sessions[0].preview, "the real preview");
        // All three physical lines still count.
        assert_eq!(sessions[0].message_count, 3);
    }

    #[test]
    fn join_variants_cover_hyphenated_tails() {
        let variants = join_variants("-Users-foo-my-project");
        assert!(variants.contains(&"/Users/foo/my/project".to_string()));
        assert!(variants.contains(&"/Users/foo/my-project".to_string()));
        assert!(variants.contains(&"/Users/foo-my-project".to_string()));
    }

    #[test]
    fn resolve_name_falls_back_to_last_segment() {
        // No such path exists, so the all-separator variant wins.
        assert_eq!(resolve_project_name("-tmp-nonexistent-proj"), "proj");
        assert_eq!(resolve_project_name(""), "");
    }

    #[test]
    fn truncate_preview_short_text_unchanged() {
        assert_eq!(truncate_preview("  hello  ", 10), "hello");
    }

    #[test]
    fn truncate_preview_prefers_word_boundary() {
        let text = "one two three four five six seven eight";
        let result = truncate_preview(text, 20);
        assert!(result.ends_with("..."));
        assert!(result.len() <= 24);
        assert!(!result.contains("seven"));
    }

    #[test]
    fn truncate_preview_multibyte_safe() {
        let text = "日本語のテキストがとても長い場合でも安全に切り詰める";
        let result = truncate_preview(text, 5);
        assert_eq!(result, "日本語のテ...");
    }
}
