use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

/// Local holding area for uploaded files on their way to the media host.
///
/// Each staged file lives at `{dir}/{uuid}.{ext}`. Nothing here is meant to
/// survive a request; `sweep_stale` catches anything a crash left behind.
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Upload staging directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `data` to a fresh file, keeping the client's extension when it
    /// looks sane. Returns the path.
    pub async fn stage(&self, original_name: Option<&str>, data: &[u8]) -> Result<PathBuf> {
        let mut name = Uuid::new_v4().to_string();
        if let Some(ext) = original_name.and_then(safe_extension) {
            name.push('.');
            name.push_str(&ext);
        }

        let path = self.dir.join(name);
        let mut file = fs::File::create(&path).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(path)
    }

    /// Remove a staged file. Already-gone files are fine.
    pub async fn discard(&self, path: &Path) -> Result<()> {
        remove_quietly(path).await
    }

    /// Delete staged files whose modification time is at least `max_age` old.
    pub async fn sweep_stale(&self, max_age: Duration) -> Result<usize> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let age = metadata
                .modified()?
                .elapsed()
                .unwrap_or(Duration::ZERO);
            if age >= max_age {
                remove_quietly(&entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Background task that sweeps orphaned staged files on an interval.
pub async fn run_sweep_loop(staging: Arc<StagingArea>, max_age: Duration, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        match staging.sweep_stale(max_age).await {
            Ok(count) => {
                if count > 0 {
                    info!("Staging sweep: removed {} stale files", count);
                }
            }
            Err(e) => {
                warn!("Staging sweep error: {}", e);
            }
        }
    }
}

pub(crate) async fn remove_quietly(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn safe_extension(name: &str) -> Option<String> {
    let ext = Path::new(name).extension()?.to_str()?;
    if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stage_and_discard() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path().join("temp")).await.unwrap();

        let path = staging.stage(Some("me.PNG"), b"pixels").await.unwrap();
        assert!(path.starts_with(staging.dir()));
        assert_eq!(path.extension().unwrap(), "png");
        assert_eq!(std::fs::read(&path).unwrap(), b"pixels");

        staging.discard(&path).await.unwrap();
        assert!(!path.exists());
        // second discard is a no-op
        staging.discard(&path).await.unwrap();
    }

    #[tokio::test]
    async fn hostile_names_lose_their_extension() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path().to_path_buf()).await.unwrap();

        let path = staging.stage(Some("../../etc/passwd"), b"x").await.unwrap();
        assert!(path.starts_with(dir.path()));
        assert!(path.extension().is_none());

        let path = staging.stage(Some("a.p/ng"), b"x").await.unwrap();
        assert!(path.starts_with(dir.path()));
    }

    #[tokio::test]
    async fn sweep_honours_max_age() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path().to_path_buf()).await.unwrap();
        staging.stage(None, b"a").await.unwrap();
        staging.stage(None, b"b").await.unwrap();

        assert_eq!(staging.sweep_stale(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(staging.sweep_stale(Duration::ZERO).await.unwrap(), 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
