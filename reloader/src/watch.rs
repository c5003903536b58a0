use std::path::{Path, PathBuf};

use notify::{Config as NotifyConfig, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::event::ReloaderEvent;
use crate::paths;

/// Watches the work tree recursively and sends a `FilesTouched` event whenever
/// something outside `.git/` is created, modified or removed.
///
/// The events only make the controller snapshot sooner; git status still
/// decides whether anything actually changed.
pub async fn watch_tree(root: PathBuf, tx: mpsc::Sender<ReloaderEvent>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(64);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                // A full channel already guarantees an early snapshot.
                let _ = watch_tx.try_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            warn!("Failed to create file watcher: {e}");
            return;
        }
    };

    if let Err(e) = watcher.watch(&root, RecursiveMode::Recursive) {
        warn!("Failed to watch {}: {e}", root.display());
        return;
    }
    debug!(root = %root.display(), "Watching for filesystem events");

    while let Some(event) = watch_rx.recv().await {
        if is_relevant(&root, &event) && tx.send(ReloaderEvent::FilesTouched).await.is_err() {
            break;
        }
    }
}

fn is_relevant(root: &Path, event: &notify::Event) -> bool {
    let is_write = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    is_write && event.paths.iter().any(|p| !paths::is_git_internal(root, p))
}
