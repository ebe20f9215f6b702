//! File-change feed
//!
//! `notify` delivers events on its own thread; they are bridged into a
//! tokio channel as [`FileChange`]s. Paths under `node_modules` or `.git`
//! never reach the server.

use crate::error::{Error, Result};
use crate::utils::normalize_path;
use notify::event::{EventKind, ModifyKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::mpsc as std_mpsc;
use tokio::sync::mpsc as tokio_mpsc;
use tracing::warn;

/// Directory names whose contents are never reported
const IGNORED_DIRS: &[&str] = &["node_modules", ".git"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    Created,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub kind: FileChangeKind,
}

/// Keeps the OS watcher alive; dropping it stops the feed
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher").finish_non_exhaustive()
    }
}

impl FileWatcher {
    /// Watch `root` recursively; changes arrive on the returned receiver
    pub fn spawn(root: &Path) -> Result<(Self, tokio_mpsc::UnboundedReceiver<FileChange>)> {
        let (raw_tx, raw_rx) = std_mpsc::channel::<notify::Result<notify::Event>>();
        let (change_tx, change_rx) = tokio_mpsc::unbounded_channel();

        std::thread::spawn(move || {
            while let Ok(res) = raw_rx.recv() {
                match res {
                    Ok(event) => {
                        for change in changes_from_event(&event) {
                            if change_tx.send(change).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "watch error"),
                }
            }
        });

        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = raw_tx.send(res);
        })
        .map_err(|e| Error::Config(format!("cannot start file watcher: {}", e)))?;
        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| Error::Config(format!("cannot watch '{}': {}", root.display(), e)))?;

        Ok((Self { _watcher: watcher }, change_rx))
    }
}

/// Whether a path lies in a directory the watcher ignores
pub fn is_ignored(path: &str) -> bool {
    path.split('/').any(|segment| IGNORED_DIRS.contains(&segment))
}

fn changes_from_event(event: &notify::Event) -> Vec<FileChange> {
    let kind = match event.kind {
        EventKind::Create(_) => FileChangeKind::Created,
        // metadata-only changes (touch, chmod) do not alter content
        EventKind::Modify(ModifyKind::Metadata(_)) => return Vec::new(),
        EventKind::Modify(_) => FileChangeKind::Modified,
        EventKind::Remove(_) => FileChangeKind::Removed,
        _ => return Vec::new(),
    };
    event
        .paths
        .iter()
        .map(|p| normalize_path(&p.to_string_lossy()))
        .filter(|p| !is_ignored(p))
        .map(|path| FileChange { path, kind })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind};
    use std::path::PathBuf;

    fn event(kind: EventKind, path: &str) -> notify::Event {
        notify::Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_ignored_directories() {
        assert!(is_ignored("/proj/node_modules/react/index.js"));
        assert!(is_ignored("/proj/.git/HEAD"));
        assert!(!is_ignored("/proj/src/node_modules_helper.ts"));
    }

    #[test]
    fn test_modify_becomes_change() {
        let changes = changes_from_event(&event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            "/proj/src/App.tsx",
        ));
        assert_eq!(
            changes,
            vec![FileChange {
                path: "/proj/src/App.tsx".to_string(),
                kind: FileChangeKind::Modified,
            }]
        );
    }

    #[test]
    fn test_filtered_events() {
        assert!(changes_from_event(&event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any)),
            "/proj/src/App.tsx"
        ))
        .is_empty());
        assert!(changes_from_event(&event(
            EventKind::Create(CreateKind::File),
            "/proj/node_modules/.quickdev/react.js"
        ))
        .is_empty());
    }
}
