//! Publishes `FileModified` for files changed under a vault root

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, info};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::event_bus::{EventBus, HostEvent};

/// Watches a directory tree for as long as it is alive
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl FileWatcher {
    /// Start watching `root`. Published paths are relative to it.
    pub fn new(root: impl AsRef<Path>, bus: Arc<EventBus>) -> notify::Result<Self> {
        let root = root
            .as_ref()
            .canonicalize()
            .unwrap_or_else(|_| root.as_ref().to_path_buf());
        let event_root = root.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for path in changed_paths(&event, &event_root) {
                    debug!("Source modified: {path:?}");
                    bus.publish(HostEvent::FileModified(path));
                }
            }
            Err(e) => error!("File watch error: {e}"),
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;
        info!("Watching {root:?} for source changes");

        Ok(Self {
            _watcher: watcher,
            root,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Paths whose content changed, relative to `root` where possible
fn changed_paths(event: &Event, root: &Path) -> Vec<PathBuf> {
    if !matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
    ) {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .map(|path| {
            path.strip_prefix(root)
                .map_or_else(|_| path.clone(), Path::to_path_buf)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind};
    use std::time::Duration;

    #[test]
    fn modify_events_become_relative_paths() {
        let root = Path::new("/vault");
        let event = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/vault/slides/deck.pdf"))
            .add_path(PathBuf::from("/elsewhere/x.pdf"));
        assert_eq!(
            changed_paths(&event, root),
            vec![
                PathBuf::from("slides/deck.pdf"),
                PathBuf::from("/elsewhere/x.pdf")
            ]
        );

        let created = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/vault/new.pdf"));
        assert_eq!(changed_paths(&created, root), vec![PathBuf::from("new.pdf")]);
    }

    #[test]
    fn access_events_are_ignored() {
        let event = Event::new(EventKind::Access(AccessKind::Any))
            .add_path(PathBuf::from("/vault/deck.pdf"));
        assert!(changed_paths(&event, Path::new("/vault")).is_empty());
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn publishes_writes_under_root() {
        let dir = tempfile::TempDir::new().unwrap();
        let bus = Arc::new(EventBus::new());
        let events = bus.subscribe();
        let _watcher = FileWatcher::new(dir.path(), Arc::clone(&bus)).unwrap();

        std::fs::write(dir.path().join("deck.pdf"), b"v1").unwrap();

        let seen = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(event) = events.recv().await {
                if event == HostEvent::FileModified(PathBuf::from("deck.pdf")) {
                    return true;
                }
            }
            false
        })
        .await;
        assert_eq!(seen, Ok(true));
    }
}
