use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs;
use tracing::{info, warn};

use crate::staging::STAGED_PREFIX;

/// Background task that removes orphaned staged files.
///
/// Staged files normally disappear when their upload attempt ends; anything
/// older than `max_age` was left behind by a crash or a killed task.
pub async fn run_staging_janitor(dir: PathBuf, max_age: Duration, interval: Duration) {
    let mut interval = tokio::time::interval(interval);

    loop {
        // First tick fires immediately, so startup gets a sweep too.
        interval.tick().await;

        match sweep_staging(&dir, max_age).await {
            Ok(count) => {
                if count > 0 {
                    info!("Staging janitor: removed {} orphaned files", count);
                }
            }
            Err(e) => {
                warn!("Staging janitor error: {}", e);
            }
        }
    }
}

pub async fn sweep_staging(dir: &Path, max_age: Duration) -> std::io::Result<usize> {
    let now = SystemTime::now();
    let mut entries = fs::read_dir(dir).await?;
    let mut removed = 0;

    while let Some(entry) = entries.next_entry().await? {
        let is_staged = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(STAGED_PREFIX));
        if !is_staged {
            continue;
        }

        let modified = match entry.metadata().await.and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(e) => {
                warn!("Cannot stat {}: {}", entry.path().display(), e);
                continue;
            }
        };
        let age = now.duration_since(modified).unwrap_or_default();
        if age < max_age {
            continue;
        }

        match fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", entry.path().display(), e),
        }
    }

    Ok(removed)
}
