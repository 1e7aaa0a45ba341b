// crates/core/src/tail.rs
//! Incremental tail reads over a caller-owned line cursor.
//!
//! The cursor is a plain `(path, from_line)` pair held by the caller; this
//! module keeps no per-session state, so concurrent callers with independent
//! cursors are safe. Skipping already-consumed lines is a newline scan over
//! raw bytes, never a re-parse of their JSON content.

use crate::error::ReadError;
use crate::reader;
use crate::types::TailResult;
use memchr::memchr_iter;
use std::io;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Chunk size for backward reads: 8KB.
const CHUNK_SIZE: u64 = 8 * 1024;

/// Return the records appended at or after `from_line`, plus the file's
/// current terminated-line count.
///
/// If `from_line` exceeds the current count (the file was truncated or
/// replaced), the result is empty and `total_lines` carries the new, smaller
/// count; the caller notices `total_lines < from_line` and resets its cursor
/// to zero. A trailing unterminated line is invisible to both the messages
/// and the count.
pub async fn tail_session(path: &Path, from_line: u64) -> Result<TailResult, ReadError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ReadError::io(path, e))?;
    Ok(tail_bytes(&bytes, from_line))
}

fn tail_bytes(bytes: &[u8], from_line: u64) -> TailResult {
    let complete = &bytes[..reader::complete_len(bytes)];
    let total_lines = reader::count_lines(complete);

    if from_line >= total_lines {
        return TailResult {
            messages: Vec::new(),
            total_lines,
        };
    }

    // Find the byte offset just past the from_line-th newline.
    let mut offset = 0;
    if from_line > 0 {
        let mut seen = 0u64;
        for pos in memchr_iter(b'\n', complete) {
            seen += 1;
            if seen == from_line {
                offset = pos + 1;
                break;
            }
        }
    }

    let batch = reader::read_records(&complete[offset..]);
    TailResult {
        messages: batch.records,
        total_lines,
    }
}

/// Read the last `n` raw lines of a file without loading the whole file.
///
/// Seeks to EOF and walks backward in 8KB chunks until enough newlines have
/// been seen, then splits and keeps the last `n` lines in file order. A
/// trailing newline does not produce an empty last line; lines longer than
/// one chunk are assembled across chunks.
pub async fn tail_lines(path: &Path, n: usize) -> io::Result<Vec<String>> {
    if n == 0 {
        return Ok(Vec::new());
    }

    let mut file = tokio::fs::File::open(path).await?;
    let file_len = file.metadata().await?.len();
    if file_len == 0 {
        return Ok(Vec::new());
    }

    // n + 1 newlines guarantee the start boundary of the nth-from-last line
    // even when the file ends with a terminator.
    let target_newlines = n + 1;
    let mut newline_count = 0usize;
    let mut collected: Vec<u8> = Vec::new();
    let mut remaining = file_len;

    while remaining > 0 && newline_count < target_newlines {
        let chunk_len = remaining.min(CHUNK_SIZE);
        let offset = remaining - chunk_len;

        file.seek(io::SeekFrom::Start(offset)).await?;
        let mut chunk = vec![0u8; chunk_len as usize];
        file.read_exact(&mut chunk).await?;

        newline_count += memchr_iter(b'\n', &chunk).count();

        chunk.append(&mut collected);
        collected = chunk;
        remaining = offset;
    }

    let text = String::from_utf8_lossy(&collected);
    let text = text.strip_suffix('\n').unwrap_or(&text);
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let lines: Vec<&str> = text.split('\n').collect();
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].iter().map(|s| s.to_string()).collect())
}
