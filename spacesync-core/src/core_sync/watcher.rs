//! Collection directory watcher
//!
//! Bridges `notify` into the async world: raw platform events are mapped
//! to coarse [`FsEvent`]s on the watcher's own thread and pushed over an
//! mpsc channel the sync layer drains. Dotfiles, version-control
//! directories, and the engine's own data directory are filtered here so
//! they never become operations.

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{trace, warn};

use super::errors::SyncError;

/// Channel depth between the watch thread and the sync layer
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Directory names that never become operations
const IGNORED_DIRS: &[&str] = &["node_modules", ".git"];

/// A coarse filesystem event within the collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub kind: FsEventKind,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    Add,
    Change,
    Unlink,
    AddDir,
    UnlinkDir,
}

/// Recursive watch over one collection root. Dropping the watcher stops
/// observation.
pub struct CollectionWatcher {
    // Held for its Drop impl; the OS watch ends when this goes away.
    _watcher: RecommendedWatcher,
}

impl CollectionWatcher {
    /// Start watching `root` recursively. Fails with `SyncError::Watch`
    /// when the path is missing or not a directory.
    pub fn start(
        root: &Path,
        data_dir_name: &str,
    ) -> Result<(Self, mpsc::Receiver<FsEvent>), SyncError> {
        if !root.is_dir() {
            return Err(SyncError::Watch(format!(
                "{} does not exist or is not a directory",
                root.display()
            )));
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let root_owned = root.to_path_buf();
        let data_dir_name = data_dir_name.to_string();

        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| {
                let event = match result {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "watch backend error");
                        return;
                    }
                };
                for fs_event in map_event(&root_owned, &data_dir_name, event) {
                    // The notify callback runs on its own thread, never
                    // inside the tokio runtime, so blocking here is fine.
                    if tx.blocking_send(fs_event).is_err() {
                        return;
                    }
                }
            },
            Config::default(),
        )
        .map_err(|e| SyncError::Watch(e.to_string()))?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| SyncError::Watch(e.to_string()))?;

        Ok((Self { _watcher: watcher }, rx))
    }
}

/// True when a path must not produce operations: dotfile components,
/// version-control directories, or the engine's own data directory.
fn is_ignored(root: &Path, path: &Path, data_dir_name: &str) -> bool {
    let relative = match path.strip_prefix(root) {
        Ok(rel) => rel,
        Err(_) => return true,
    };
    relative.components().any(|component| {
        let name = component.as_os_str().to_string_lossy();
        name.starts_with('.') || name == data_dir_name || IGNORED_DIRS.contains(&name.as_ref())
    })
}

fn map_event(root: &Path, data_dir_name: &str, event: Event) -> Vec<FsEvent> {
    let kinds: Vec<(FsEventKind, &Path)> = match event.kind {
        EventKind::Create(CreateKind::Folder) => event
            .paths
            .first()
            .map(|p| vec![(FsEventKind::AddDir, p.as_path())])
            .unwrap_or_default(),
        EventKind::Create(_) => event
            .paths
            .first()
            .map(|p| {
                let kind = if p.is_dir() {
                    FsEventKind::AddDir
                } else {
                    FsEventKind::Add
                };
                vec![(kind, p.as_path())]
            })
            .unwrap_or_default(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // Old path disappears, new path appears
            let mut out = Vec::new();
            if let Some(from) = event.paths.first() {
                out.push((FsEventKind::Unlink, from.as_path()));
            }
            if let Some(to) = event.paths.get(1) {
                let kind = if to.is_dir() {
                    FsEventKind::AddDir
                } else {
                    FsEventKind::Add
                };
                out.push((kind, to.as_path()));
            }
            out
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => event
            .paths
            .first()
            .map(|p| vec![(FsEventKind::Unlink, p.as_path())])
            .unwrap_or_default(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .first()
            .map(|p| {
                let kind = if p.is_dir() {
                    FsEventKind::AddDir
                } else {
                    FsEventKind::Add
                };
                vec![(kind, p.as_path())]
            })
            .unwrap_or_default(),
        EventKind::Modify(_) => event
            .paths
            .first()
            .filter(|p| !p.is_dir())
            .map(|p| vec![(FsEventKind::Change, p.as_path())])
            .unwrap_or_default(),
        EventKind::Remove(RemoveKind::Folder) => event
            .paths
            .first()
            .map(|p| vec![(FsEventKind::UnlinkDir, p.as_path())])
            .unwrap_or_default(),
        EventKind::Remove(_) => event
            .paths
            .first()
            .map(|p| vec![(FsEventKind::Unlink, p.as_path())])
            .unwrap_or_default(),
        other => {
            trace!(kind = ?other, "ignoring watch event kind");
            Vec::new()
        }
    };

    kinds
        .into_iter()
        .filter(|(_, path)| !is_ignored(root, path, data_dir_name))
        .map(|(kind, path)| FsEvent {
            kind,
            path: path.to_path_buf(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_dotfiles_and_vcs_dirs() {
        let root = Path::new("/col");
        assert!(is_ignored(root, Path::new("/col/.DS_Store"), ".spacesync"));
        assert!(is_ignored(root, Path::new("/col/.git/HEAD"), ".spacesync"));
        assert!(is_ignored(
            root,
            Path::new("/col/node_modules/pkg/index.js"),
            ".spacesync"
        ));
        assert!(is_ignored(
            root,
            Path::new("/col/.spacesync/space.key"),
            ".spacesync"
        ));
        assert!(!is_ignored(
            root,
            Path::new("/col/requests/get.http"),
            ".spacesync"
        ));
    }

    #[test]
    fn paths_outside_root_are_ignored() {
        assert!(is_ignored(
            Path::new("/col"),
            Path::new("/elsewhere/file"),
            ".spacesync"
        ));
    }

    #[test]
    fn maps_create_and_remove() {
        let root = Path::new("/col");
        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/col/a.http"));
        let mapped = map_event(root, ".spacesync", event);
        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped[0].kind, FsEventKind::Add);

        let event = Event::new(EventKind::Remove(RemoveKind::Folder))
            .add_path(PathBuf::from("/col/dir"));
        let mapped = map_event(root, ".spacesync", event);
        assert_eq!(mapped[0].kind, FsEventKind::UnlinkDir);
    }

    #[test]
    fn missing_path_fails_start() {
        let result = CollectionWatcher::start(Path::new("/definitely/missing"), ".spacesync");
        assert!(matches!(result, Err(SyncError::Watch(_))));
    }

    #[tokio::test]
    async fn watch_emits_add_for_new_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let (_watcher, mut rx) = CollectionWatcher::start(dir.path(), ".spacesync").unwrap();

        std::fs::write(dir.path().join("new.http"), b"GET /").unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .expect("watcher should emit within 5s")
            .expect("channel open");
        assert!(matches!(event.kind, FsEventKind::Add | FsEventKind::Change));
        assert!(event.path.ends_with("new.http"));
    }
}
