use std::path::PathBuf;

use feedmark_core::{
    Entry, FeedProcessor, FeedSnapshot, FeedSource, FetchError, FlushOutcome, ProcessOptions,
    WatermarkStore,
};

fn temp_dir(tag: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    dir.push(format!(
        "feedmark_{}_{}",
        tag,
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    dir
}

struct Fixed(FeedSnapshot);

impl FeedSource for Fixed {
    async fn fetch(&self, _url: &str) -> Result<FeedSnapshot, FetchError> {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn flush_then_reload_round_trips() {
    let dir = temp_dir("roundtrip");
    let path = dir.join("rss").join("latest.json");

    // Parent directories are created on load.
    let store = WatermarkStore::load_from(&path, false).await;
    assert!(path.parent().unwrap().is_dir());

    store.set("http://a/feed", 100).await;
    store.set("http://b/feed", 200).await;
    store.delete("http://b/feed").await;
    assert_eq!(store.flush().await.unwrap(), FlushOutcome::Written);
    assert!(!dir.join("rss").join("latest.json.tmp").exists());

    let reloaded = WatermarkStore::load_from(&path, false).await;
    assert_eq!(reloaded.get("http://a/feed").await, 100);
    assert!(!reloaded.contains("http://b/feed").await);

    let raw: serde_json::Value =
        serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
    assert_eq!(raw["version"], 1);
    assert_eq!(raw["feeds"]["http://a/feed"], 100);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn corrupt_file_starts_empty() {
    let dir = temp_dir("corrupt");
    tokio::fs::create_dir_all(&dir).await.unwrap();
    let path = dir.join("latest.json");
    tokio::fs::write(&path, b"{'http://a': 12.0,\n}").await.unwrap();

    let store = WatermarkStore::load_from(&path, false).await;
    assert!(store.snapshot().await.is_empty());

    // The next flush replaces the corrupt file.
    store.set("http://a", 12).await;
    store.flush().await.unwrap();
    let reloaded = WatermarkStore::load_from(&path, false).await;
    assert_eq!(reloaded.get("http://a").await, 12);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn corrupt_file_falls_back_to_tmp() {
    let dir = temp_dir("tmpfallback");
    tokio::fs::create_dir_all(&dir).await.unwrap();
    let path = dir.join("latest.json");
    tokio::fs::write(&path, b"{ truncated").await.unwrap();
    tokio::fs::write(
        dir.join("latest.json.tmp"),
        br#"{"version": 1, "feeds": {"http://a": 77}}"#,
    )
    .await
    .unwrap();

    let store = WatermarkStore::load_from(&path, false).await;
    assert_eq!(store.get("http://a").await, 77);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn dry_run_never_writes() {
    let dir = temp_dir("dryrun");
    let path = dir.join("latest.json");

    let seed = WatermarkStore::load_from(&path, false).await;
    seed.set("http://example.com/feed", 100).await;
    seed.flush().await.unwrap();
    let before = tokio::fs::read(&path).await.unwrap();

    let store = WatermarkStore::load_from(&path, true).await;
    let snapshot = FeedSnapshot::with_status(
        200,
        vec![Entry::new("http://example.com/feed", "new").updated_at(500)],
    );
    let mut processor = FeedProcessor::new(
        Fixed(snapshot),
        |_: &Entry| true,
        ProcessOptions::default(),
    );
    processor
        .process_feed(&store, "http://example.com/feed")
        .await
        .unwrap();
    processor
        .process_feed(&store, "http://example.com/other")
        .await
        .unwrap();
    assert_eq!(store.get("http://example.com/feed").await, 500);

    assert_eq!(store.flush().await.unwrap(), FlushOutcome::SkippedDryRun);
    assert_eq!(tokio::fs::read(&path).await.unwrap(), before);

    let reloaded = WatermarkStore::load_from(&path, false).await;
    assert_eq!(reloaded.get("http://example.com/feed").await, 100);
    assert!(!reloaded.contains("http://example.com/other").await);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn flush_failure_is_reported_not_fatal() {
    let dir = temp_dir("readonly");
    tokio::fs::create_dir_all(&dir).await.unwrap();
    // A directory where the store file should be makes the final rename fail.
    let path = dir.join("latest.json");
    tokio::fs::create_dir_all(path.join("occupied")).await.unwrap();

    let store = WatermarkStore::load_from(&path, false).await;
    store.set("http://a", 1).await;
    assert!(store.flush().await.is_err());
    assert_eq!(store.get("http://a").await, 1);
    assert!(!dir.join("latest.json.tmp").exists());

    let _ = tokio::fs::remove_dir_all(&dir).await;
}
