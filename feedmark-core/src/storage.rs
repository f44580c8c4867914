use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::StoreError;

const STORE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    // feed url -> epoch seconds of the newest handled entry
    feeds: BTreeMap<String, i64>,
}

/// What [`WatermarkStore::flush`] actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Written,
    SkippedDryRun,
    SkippedInMemory,
}

/// Durable `feed url -> watermark` mapping.
///
/// Loaded once, mutated in memory while feeds are processed and written back
/// with a single [`flush`](Self::flush) at the end of a run. Clones share the
/// same map.
#[derive(Debug, Clone)]
pub struct WatermarkStore {
    inner: Arc<RwLock<BTreeMap<String, i64>>>,
    path: Option<PathBuf>,
    dry_run: bool,
}

impl WatermarkStore {
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(RwLock::new(BTreeMap::new())),
            path: None,
            dry_run: false,
        }
    }

    /// Loads the store from `path`. Never fails: a missing file gives an empty
    /// store, a corrupt one is logged and replaced by the leftover temp file
    /// from an interrupted flush, or by an empty store.
    pub async fn load_from(path: impl AsRef<Path>, dry_run: bool) -> Self {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                warn!(error = %err, path = %parent.display(), "failed to create store directory");
            }
        }

        let feeds = match tokio::fs::read(&path).await {
            Ok(bytes) => match decode(&bytes) {
                Ok(feeds) => feeds,
                Err(err) => {
                    warn!(error = %err, path = %path.display(), "watermark store is corrupt, trying tmp fallback");
                    let tmp = tmp_path(&path);
                    match tokio::fs::read(&tmp).await {
                        Ok(tmp_bytes) => decode(&tmp_bytes).unwrap_or_else(|err| {
                            warn!(error = %err, path = %tmp.display(), "tmp fallback is corrupt too, starting empty");
                            BTreeMap::new()
                        }),
                        Err(_) => BTreeMap::new(),
                    }
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no watermark store yet, starting empty");
                BTreeMap::new()
            }
            Err(err) => {
                warn!(error = %err, path = %path.display(), "failed to read watermark store, starting empty");
                BTreeMap::new()
            }
        };

        Self {
            inner: Arc::new(RwLock::new(feeds)),
            path: Some(path),
            dry_run,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Watermark for `url`; 0 when the feed was never seen.
    pub async fn get(&self, url: &str) -> i64 {
        self.inner.read().await.get(url).copied().unwrap_or(0)
    }

    pub async fn set(&self, url: &str, timestamp: i64) {
        self.inner
            .write()
            .await
            .insert(url.to_owned(), timestamp.max(0));
    }

    /// Forgets a feed entirely. Returns whether it was present.
    pub async fn delete(&self, url: &str) -> bool {
        self.inner.write().await.remove(url).is_some()
    }

    pub async fn contains(&self, url: &str) -> bool {
        self.inner.read().await.contains_key(url)
    }

    pub async fn snapshot(&self) -> BTreeMap<String, i64> {
        self.inner.read().await.clone()
    }

    /// Writes the whole mapping through a temp file and a rename, so a crash
    /// mid-write leaves the previous file intact. No-op in dry-run mode.
    pub async fn flush(&self) -> Result<FlushOutcome, StoreError> {
        if self.dry_run {
            debug!("dry run; watermark store not written");
            return Ok(FlushOutcome::SkippedDryRun);
        }
        let Some(path) = &self.path else {
            debug!("watermark store is in-memory only; skipping flush");
            return Ok(FlushOutcome::SkippedInMemory);
        };

        let bytes = {
            let inner = self.inner.read().await;
            let file = StoreFile {
                version: STORE_VERSION,
                feeds: inner.clone(),
            };
            serde_json::to_vec_pretty(&file)?
        };

        let tmp = tmp_path(path);
        if let Err(err) = write_and_rename(&tmp, path, &bytes).await {
            // Never leave a tmp behind for the corrupt-file fallback to load.
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err.into());
        }

        info!(path = %path.display(), "watermark store saved");
        Ok(FlushOutcome::Written)
    }
}

async fn write_and_rename(tmp: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut out = tokio::fs::File::create(tmp).await?;
    out.write_all(bytes).await?;
    out.write_all(b"\n").await?;
    out.sync_all().await?;
    drop(out);
    tokio::fs::rename(tmp, path).await
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn decode(bytes: &[u8]) -> Result<BTreeMap<String, i64>, StoreError> {
    let file: StoreFile = serde_json::from_slice(bytes)?;
    if file.version != STORE_VERSION {
        return Err(StoreError::UnsupportedVersion(file.version));
    }
    let mut feeds = file.feeds;
    feeds.retain(|url, ts| {
        if *ts < 0 {
            warn!(url = %url, timestamp = *ts, "dropping negative watermark");
        }
        *ts >= 0
    });
    Ok(feeds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_unknown_version() {
        let err = decode(br#"{"version": 7, "feeds": {}}"#).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedVersion(7)));
    }

    #[test]
    fn decode_drops_negative_watermarks() {
        let feeds = decode(br#"{"version": 1, "feeds": {"a": 5, "b": -3}}"#).unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds.get("a"), Some(&5));
    }

    #[test]
    fn tmp_path_appends_suffix() {
        assert_eq!(
            tmp_path(Path::new("/data/rss/latest.json")),
            PathBuf::from("/data/rss/latest.json.tmp")
        );
    }

    #[tokio::test]
    async fn missing_key_reads_as_zero() {
        let store = WatermarkStore::in_memory();
        assert_eq!(store.get("http://nowhere").await, 0);
        store.set("http://a", 10).await;
        store.set("http://a", 7).await;
        assert_eq!(store.get("http://a").await, 7);
        assert!(store.delete("http://a").await);
        assert!(!store.delete("http://a").await);
        assert_eq!(store.flush().await.unwrap(), FlushOutcome::SkippedInMemory);
    }
}
