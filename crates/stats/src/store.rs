// crates/stats/src/store.rs
//! Persistence for the stats cache.
//!
//! A missing file, a version tag that does not match
//! [`STATS_SCHEMA_VERSION`], or undecodable content all load as `None`: the
//! normal "needs full recompute" signal, never an error. Writes go to a
//! sibling temp file and are renamed into place so a concurrent reader only
//! ever observes a complete cache (single writer assumed; the rename is the
//! only cross-process guarantee provided).

use crate::model::{StatsCache, STATS_SCHEMA_VERSION};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error on stats cache {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize stats cache: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Load the cache, or `None` when it is absent, stale-schema, or unreadable.
pub async fn load(path: &Path) -> Result<Option<StatsCache>, StoreError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };

    let value: serde_json::Value = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "stats cache unreadable; recompute needed");
            return Ok(None);
        }
    };

    // Probe the version tag before attempting a full decode so a stale
    // schema never produces a decode error.
    let version = value.get("version").and_then(|v| v.as_u64());
    if version != Some(STATS_SCHEMA_VERSION as u64) {
        debug!(
            path = %path.display(),
            found = ?version,
            expected = STATS_SCHEMA_VERSION,
            "stats cache version mismatch; recompute needed"
        );
        return Ok(None);
    }

    match serde_json::from_value(value) {
        Ok(cache) => Ok(Some(cache)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "stats cache decode failed; recompute needed");
            Ok(None)
        }
    }
}

/// Atomically replace the cache file with `cache`.
pub async fn save(path: &Path, cache: &StatsCache) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io(parent, e))?;
    }

    let json = serde_json::to_vec_pretty(cache)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, &json)
        .await
        .map_err(|e| StoreError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::io(path, e))?;

    Ok(())
}
