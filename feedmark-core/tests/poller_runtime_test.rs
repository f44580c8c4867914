use std::collections::HashMap;
use std::time::Duration;

use feedmark_core::{
    run_once, spawn_watch, Entry, FeedProcessor, FeedSnapshot, FeedSource, FetchError,
    FlushOutcome, ProcessOptions, WatermarkStore,
};
use tokio::sync::mpsc;

struct MapSource(HashMap<String, FeedSnapshot>);

impl FeedSource for MapSource {
    async fn fetch(&self, url: &str) -> Result<FeedSnapshot, FetchError> {
        self.0
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Parse("unreachable".into()))
    }
}

fn feeds() -> MapSource {
    MapSource(HashMap::from([
        (
            "http://a/feed".to_string(),
            FeedSnapshot::with_status(200, vec![Entry::new("http://a/feed", "a1").updated_at(10)]),
        ),
        (
            "http://c/feed".to_string(),
            FeedSnapshot::with_status(200, vec![Entry::new("http://c/feed", "c1").updated_at(30)]),
        ),
    ]))
}

#[tokio::test]
async fn one_broken_feed_does_not_block_the_others() {
    let store = WatermarkStore::in_memory();
    let mut titles = Vec::new();
    let urls = vec![
        "http://a/feed".to_string(),
        "http://b/feed".to_string(),
        "http://c/feed".to_string(),
    ];

    let report = {
        let mut processor = FeedProcessor::new(
            feeds(),
            |entry: &Entry| {
                titles.push(entry.title.clone());
                true
            },
            ProcessOptions::default(),
        );
        run_once(&mut processor, &store, &urls).await
    };

    assert_eq!(titles, vec!["a1", "c1"]);
    assert_eq!(report.feeds.len(), 3);
    let failed: Vec<_> = report.failed_feeds().map(|r| r.url.as_str()).collect();
    assert_eq!(failed, vec!["http://b/feed"]);
    assert_eq!(report.handled_entries(), 2);
    assert!(!report.is_success());
    assert!(matches!(report.flush, Ok(FlushOutcome::SkippedInMemory)));
    assert_eq!(store.get("http://a/feed").await, 10);
    assert!(!store.contains("http://b/feed").await);
    assert_eq!(store.get("http://c/feed").await, 30);
}

#[tokio::test]
async fn watch_runs_passes_until_stopped() {
    let store = WatermarkStore::in_memory();
    let processor = FeedProcessor::new(feeds(), |_: &Entry| true, ProcessOptions::default());
    let (tx, mut rx) = mpsc::channel(8);

    let handle = spawn_watch(
        processor,
        store.clone(),
        vec!["http://a/feed".to_string()],
        Duration::from_millis(20),
        tx,
    );

    let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out")
        .expect("channel closed");
    assert!(first.is_success());
    assert_eq!(first.handled_entries(), 1);

    let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out")
        .expect("channel closed");
    assert_eq!(second.handled_entries(), 0);

    handle.stop().await.expect("stop watch");
    assert_eq!(store.get("http://a/feed").await, 10);
}
