// crates/watch/src/lib.rs
//! Debounced filesystem change notifications for the transcript tree.
//!
//! Watches the configured roots (and the stats cache file's directory) and
//! delivers coalesced [`ChangeEvent`] values to a single subscriber over a
//! bounded channel. An editor or the agent process can emit dozens of raw
//! events per logical change; raw events are classified into categories and
//! each category is forwarded at most once per debounce window. Delivery is
//! at-least-once with duplicates possible; the subscriber must be
//! idempotent. The watcher never blocks on a slow subscriber: a full channel
//! drops the event and counts it.

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

/// How long a burst of raw events is absorbed before one coalesced event per
/// category is forwarded.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(300);

/// Directory names whose contents are entity definitions.
const ENTITY_DIRS: &[&str] = &["agents", "rules", "commands", "skills", "hooks"];

/// A coalesced change notification. Transient, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeEvent {
    /// A `CLAUDE.md` instruction file changed.
    ConfigChanged,
    /// A `settings*.json` file changed.
    SettingsChanged,
    /// An agent/rule/command/skill/hook definition changed.
    EntityChanged,
    /// A transcript file or the derived stats cache changed.
    HistoryChanged,
}

/// What to watch and how aggressively to coalesce.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Directory roots watched recursively.
    pub roots: Vec<PathBuf>,
    /// The stats cache file; its parent directory is watched non-recursively
    /// because the cache is replaced by rename, which breaks a direct watch
    /// on the file itself.
    pub cache_file: Option<PathBuf>,
    pub debounce: Duration,
    /// Subscriber channel capacity.
    pub capacity: usize,
}

impl WatchConfig {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            cache_file: None,
            debounce: DEBOUNCE_WINDOW,
            capacity: 64,
        }
    }

    pub fn with_cache_file(mut self, path: PathBuf) -> Self {
        self.cache_file = Some(path);
        self
    }
}

/// Handle keeping the watch alive. Dropping it stops the OS watcher and the
/// debounce task; dropping the receiver (unsubscribing) also stops delivery.
pub struct ChangeWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
    dropped: Arc<AtomicU64>,
}

impl ChangeWatcher {
    /// Raw events discarded because the internal channel was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Classify a changed path into an event category.
///
/// Returns `None` for paths that are not interesting (temp files, unrelated
/// extensions). The stats cache file reports as [`ChangeEvent::HistoryChanged`]
/// since the cache is a projection of history and its consumers react the
/// same way.
pub fn classify(path: &Path, cache_file: Option<&Path>) -> Option<ChangeEvent> {
    if cache_file == Some(path) {
        return Some(ChangeEvent::HistoryChanged);
    }

    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if file_name == "CLAUDE.md" {
        return Some(ChangeEvent::ConfigChanged);
    }
    if file_name.starts_with("settings") && file_name.ends_with(".json") {
        return Some(ChangeEvent::SettingsChanged);
    }
    if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
        return Some(ChangeEvent::HistoryChanged);
    }

    let in_entity_dir = path
        .parent()
        .map(|parent| {
            parent.components().any(|c| match c {
                std::path::Component::Normal(name) => name
                    .to_str()
                    .map(|n| ENTITY_DIRS.contains(&n))
                    .unwrap_or(false),
                _ => false,
            })
        })
        .unwrap_or(false);
    if in_entity_dir {
        return Some(ChangeEvent::EntityChanged);
    }

    None
}

/// Start watching. Returns the keep-alive handle and the subscriber channel.
pub fn start(config: WatchConfig) -> notify::Result<(ChangeWatcher, mpsc::Receiver<ChangeEvent>)> {
    let (raw_tx, raw_rx) = mpsc::channel::<ChangeEvent>(256);
    let dropped = Arc::new(AtomicU64::new(0));
    let counter = dropped.clone();
    let cache_file = config.cache_file.clone();

    // The notify callback runs on the watcher's own thread; classification
    // happens there so only interesting events cross into the async side.
    let mut watcher =
        notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) => {
                if !matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    return;
                }
                for path in &event.paths {
                    let Some(change) = classify(path, cache_file.as_deref()) else {
                        continue;
                    };
                    if raw_tx.try_send(change).is_err() {
                        let count = counter.fetch_add(1, Ordering::Relaxed) + 1;
                        if count == 1 || count % 100 == 0 {
                            warn!(
                                dropped_total = count,
                                "watcher channel full; change event dropped"
                            );
                        }
                    }
                }
            }
            Err(e) => error!("file watcher error: {e}"),
        })?;

    for root in &config.roots {
        if root.exists() {
            watcher.watch(root, RecursiveMode::Recursive)?;
        } else {
            warn!(path = %root.display(), "watch root does not exist; skipping");
        }
    }
    if let Some(cache) = &config.cache_file {
        if let Some(parent) = cache.parent() {
            if parent.exists() {
                watcher.watch(parent, RecursiveMode::NonRecursive)?;
            }
        }
    }

    let (tx, rx) = mpsc::channel(config.capacity);
    let task = tokio::spawn(debounce_loop(raw_rx, tx, config.debounce));

    Ok((
        ChangeWatcher {
            _watcher: watcher,
            task,
            dropped,
        },
        rx,
    ))
}

/// Drain raw events, absorbing each burst for one debounce window, then
/// forward at most one event per category. Exits when the watcher side
/// closes (handle dropped) or the subscriber side closes (unsubscribed).
async fn debounce_loop(
    mut raw_rx: mpsc::Receiver<ChangeEvent>,
    tx: mpsc::Sender<ChangeEvent>,
    window: Duration,
) {
    let mut pending: BTreeSet<ChangeEvent> = BTreeSet::new();
    loop {
        if pending.is_empty() {
            match raw_rx.recv().await {
                Some(event) => {
                    pending.insert(event);
                }
                None => return,
            }
        }

        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = raw_rx.recv() => match event {
                    Some(event) => {
                        pending.insert(event);
                    }
                    None => break,
                },
            }
        }

        for event in std::mem::take(&mut pending) {
            match tx.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(event)) => {
                    warn!(?event, "subscriber channel full; coalesced event dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return,
            }
        }
    }
}
