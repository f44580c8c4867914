use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{FetchError, StoreError};
use crate::fetch::FeedSource;
use crate::processor::{EntryHandler, FeedProcessor, ProcessingOutcome};
use crate::storage::{FlushOutcome, WatermarkStore};

#[derive(Debug)]
pub struct FeedReport {
    pub url: String,
    pub result: Result<ProcessingOutcome, FetchError>,
}

/// Everything one pass over the configured feeds produced.
#[derive(Debug)]
pub struct RunReport {
    pub feeds: Vec<FeedReport>,
    pub flush: Result<FlushOutcome, StoreError>,
}

impl RunReport {
    pub fn failed_feeds(&self) -> impl Iterator<Item = &FeedReport> {
        self.feeds.iter().filter(|report| report.result.is_err())
    }

    pub fn handled_entries(&self) -> usize {
        self.feeds
            .iter()
            .filter_map(|report| report.result.as_ref().ok())
            .map(|outcome| outcome.handled.len())
            .sum()
    }

    pub fn is_success(&self) -> bool {
        self.flush.is_ok() && self.failed_feeds().next().is_none()
    }
}

/// Processes `urls` one after another, then flushes the store once.
///
/// A feed that fails to fetch is reported and skipped; the others still run.
pub async fn run_once<S, H>(
    processor: &mut FeedProcessor<S, H>,
    store: &WatermarkStore,
    urls: &[String],
) -> RunReport
where
    S: FeedSource,
    H: EntryHandler,
{
    let mut feeds = Vec::with_capacity(urls.len());
    for url in urls {
        let result = processor.process_feed(store, url).await;
        if let Err(err) = &result {
            warn!(feed = %url, error = %err, "failed to process feed");
        }
        feeds.push(FeedReport {
            url: url.clone(),
            result,
        });
    }

    let flush = store.flush().await;
    if let Err(err) = &flush {
        warn!(error = %err, "failed to save watermark store; this run's progress is lost");
    }

    RunReport { feeds, flush }
}

pub struct WatchHandle {
    cancel_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

impl WatchHandle {
    /// Stops after the pass in progress, if any, has flushed.
    pub async fn stop(self) -> Result<(), tokio::task::JoinError> {
        let _ = self.cancel_tx.send(());
        self.join.await
    }
}

/// Repeats [`run_once`] every `interval` until stopped, sending each report
/// to `report_tx`.
pub fn spawn_watch<S, H>(
    mut processor: FeedProcessor<S, H>,
    store: WatermarkStore,
    urls: Vec<String>,
    interval: Duration,
    report_tx: mpsc::Sender<RunReport>,
) -> WatchHandle
where
    S: FeedSource + Send + Sync + 'static,
    H: EntryHandler + Send + 'static,
{
    let (cancel_tx, mut cancel_rx) = broadcast::channel(1);
    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel_rx.recv() => {
                    info!("watch shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    let report = run_once(&mut processor, &store, &urls).await;
                    if report_tx.send(report).await.is_err() {
                        warn!("report receiver dropped; stopping watch");
                        break;
                    }
                }
            }
        }
    });

    WatchHandle { cancel_tx, join }
}
