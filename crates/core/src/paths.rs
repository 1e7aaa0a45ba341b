//! Centralized path functions for app storage locations.
//!
//! Single source of truth so no other module hand-joins cache or home paths.

use std::path::PathBuf;

/// The agent's home directory: `~/.claude`.
pub fn claude_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".claude"))
}

/// The transcript tree: `~/.claude/projects`.
pub fn projects_dir() -> Option<PathBuf> {
    claude_dir().map(|d| d.join("projects"))
}

/// App cache root: `~/Library/Caches/claude-scope/` (macOS) or
/// `~/.cache/claude-scope/` (Linux).
pub fn app_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("claude-scope"))
}

/// The one stats cache file per installation: `<app_cache_dir>/stats-cache.json`.
pub fn stats_cache_path() -> Option<PathBuf> {
    app_cache_dir().map(|d| d.join("stats-cache.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projects_dir() {
        let dir = projects_dir().unwrap();
        assert!(dir.ends_with(".claude/projects"));
    }

    #[test]
    fn test_app_cache_dir() {
        let dir = app_cache_dir().unwrap();
        assert!(dir.to_string_lossy().contains("claude-scope"));
    }

    #[test]
    fn test_stats_cache_path() {
        let path = stats_cache_path().unwrap();
        assert!(path.to_string_lossy().ends_with("stats-cache.json"));
    }
}
