use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use super::ManagerHandle;

const STATE_SUFFIX: &str = ".state.json";
const SETTLE: Duration = Duration::from_millis(300);

/// Poll-based hot-reload for the file credential source.
///
/// The retrieval pack carries no filesystem-watch crate, so directory changes are detected by
/// comparing the newest mtime among `*.json` credential files on each tick rather than via
/// inotify/kqueue. A changed mtime must hold steady for one more tick (`SETTLE`) before
/// triggering a reload, so a writer still mid-save doesn't cause a reload against a half-written
/// file.
pub fn spawn(handle: ManagerHandle, watch_dir: PathBuf, poll_interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_seen: Option<SystemTime> = newest_mtime(&watch_dir).await;
        let mut pending_since: Option<SystemTime> = None;
        let mut ticker = tokio::time::interval(poll_interval);

        loop {
            ticker.tick().await;
            let current = newest_mtime(&watch_dir).await;
            if current == last_seen {
                pending_since = None;
                continue;
            }

            match pending_since {
                Some(seen_at) if seen_at.elapsed().unwrap_or_default() >= SETTLE => {
                    debug!(dir = %watch_dir.display(), "detected settled credential directory change, reloading");
                    handle.reload_now();
                    last_seen = current;
                    pending_since = None;
                }
                Some(_) => {}
                None => pending_since = Some(SystemTime::now()),
            }
        }
    })
}

/// Newest mtime among `*.json` files directly under `dir`, ignoring `*.state.json` siblings.
/// `None` if the directory is missing or empty, so a first-ever write is detected as a change.
async fn newest_mtime(dir: &Path) -> Option<SystemTime> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut newest: Option<SystemTime> = None;

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let name = path.file_name()?.to_str()?;
        if !name.ends_with(".json") || name.ends_with(STATE_SUFFIX) {
            continue;
        }
        let Ok(meta) = entry.metadata().await else {
            warn!(path = %path.display(), "failed to stat credential file during reload poll");
            continue;
        };
        if let Ok(modified) = meta.modified() {
            newest = Some(newest.map_or(modified, |n| n.max(modified)));
        }
    }

    newest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_directory_has_no_mtime() {
        let missing = PathBuf::from("/nonexistent/credpool-reload-test-dir");
        assert_eq!(newest_mtime(&missing).await, None);
    }

    #[tokio::test]
    async fn ignores_state_siblings_and_non_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        tokio::fs::write(dir.path().join("a.state.json"), b"{}").await.unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), b"hi").await.unwrap();
        assert_eq!(newest_mtime(dir.path()).await, None);

        tokio::fs::write(dir.path().join("a.json"), b"{}").await.unwrap();
        assert!(newest_mtime(dir.path()).await.is_some());
    }
}
