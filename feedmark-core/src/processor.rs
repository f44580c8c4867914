use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::error::FetchError;
use crate::feed::{Entry, FeedSnapshot, STATUS_GONE, STATUS_MOVED_PERMANENTLY, STATUS_OK};
use crate::fetch::FeedSource;
use crate::storage::WatermarkStore;

/// Caller-supplied consumer of new entries.
///
/// Returning `true` marks the entry as handled, which lets the feed's
/// watermark move past it. Returning `false` leaves it eligible for the next
/// run, subject to the [`AdvancePolicy`].
pub trait EntryHandler {
    fn handle_entry(&mut self, entry: &Entry) -> bool;
}

impl<F> EntryHandler for F
where
    F: FnMut(&Entry) -> bool,
{
    fn handle_entry(&mut self, entry: &Entry) -> bool {
        self(entry)
    }
}

/// How a failed entry interacts with newer, successfully handled entries of
/// the same batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvancePolicy {
    /// The watermark becomes the newest handled entry, even if an older entry
    /// of the batch failed. That failed entry is not offered again.
    #[default]
    Supersede,
    /// The watermark stops below the oldest failed entry, so failures are
    /// retried on later runs. Handled entries above it are offered again too.
    HoldAtFailure,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessOptions {
    /// Dispatch every fetched entry regardless of the stored watermark.
    pub force: bool,
    pub advance_policy: AdvancePolicy,
}

/// What happened to the feed's record in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// No usable status; the store was not touched.
    Untouched,
    /// Feed reported gone; its record was removed.
    Removed,
    Committed(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingOutcome {
    pub url: String,
    pub status: Option<u16>,
    pub previous_watermark: i64,
    pub disposition: Disposition,
    pub handled: Vec<Entry>,
    pub failed: Vec<Entry>,
    pub skipped: usize,
    pub undated: usize,
}

impl ProcessingOutcome {
    fn new(url: &str, status: Option<u16>, previous_watermark: i64) -> Self {
        Self {
            url: url.to_owned(),
            status,
            previous_watermark,
            disposition: Disposition::Untouched,
            handled: Vec::new(),
            failed: Vec::new(),
            skipped: 0,
            undated: 0,
        }
    }

    pub fn dispatched(&self) -> usize {
        self.handled.len() + self.failed.len()
    }

    pub fn committed_watermark(&self) -> Option<i64> {
        match self.disposition {
            Disposition::Committed(ts) => Some(ts),
            _ => None,
        }
    }
}

/// Accumulates handler results for one batch and decides the new watermark.
#[derive(Debug)]
struct Advance {
    policy: AdvancePolicy,
    previous: i64,
    handled: Vec<i64>,
    oldest_failure: Option<i64>,
}

impl Advance {
    fn new(policy: AdvancePolicy, previous: i64) -> Self {
        Self {
            policy,
            previous,
            handled: Vec::new(),
            oldest_failure: None,
        }
    }

    fn handled(&mut self, timestamp: i64) {
        self.handled.push(timestamp);
    }

    /// Failures at or below the previous watermark (force mode) hold nothing back.
    fn failed(&mut self, timestamp: i64) {
        if timestamp <= self.previous {
            return;
        }
        self.oldest_failure = Some(self.oldest_failure.map_or(timestamp, |ts| ts.min(timestamp)));
    }

    fn commit(&self) -> i64 {
        let limit = match (self.policy, self.oldest_failure) {
            (AdvancePolicy::HoldAtFailure, Some(failure)) => failure,
            _ => i64::MAX,
        };
        self.handled
            .iter()
            .copied()
            .filter(|ts| *ts < limit)
            .fold(self.previous, i64::max)
    }
}

/// Runs one polling pass over a feed: fetch, status dispatch, filter against
/// the stored watermark, hand new entries to the handler, commit.
pub struct FeedProcessor<S, H> {
    source: S,
    handler: H,
    options: ProcessOptions,
}

impl<S, H> FeedProcessor<S, H>
where
    S: FeedSource,
    H: EntryHandler,
{
    pub fn new(source: S, handler: H, options: ProcessOptions) -> Self {
        Self {
            source,
            handler,
            options,
        }
    }

    pub fn options(&self) -> &ProcessOptions {
        &self.options
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    pub async fn process_feed(
        &mut self,
        store: &WatermarkStore,
        url: &str,
    ) -> Result<ProcessingOutcome, FetchError> {
        let span = info_span!("feed", url = %url);
        self.process_inner(store, url).instrument(span).await
    }

    async fn process_inner(
        &mut self,
        store: &WatermarkStore,
        url: &str,
    ) -> Result<ProcessingOutcome, FetchError> {
        let previous = store.get(url).await;
        let snapshot = self.source.fetch(url).await?;

        let Some(status) = snapshot.status else {
            warn!("feed has no status; leaving it for the next run");
            trace!(snapshot = ?snapshot);
            return Ok(ProcessingOutcome::new(url, None, previous));
        };
        trace!(snapshot = ?snapshot);

        let mut outcome = ProcessingOutcome::new(url, Some(status), previous);
        match status {
            STATUS_MOVED_PERMANENTLY => {
                let location = snapshot.href.as_deref().unwrap_or("<unknown>");
                info!(location = %location, "feed permanently redirected; keeping the old url as key");
            }
            STATUS_GONE => {
                warn!("feed is gone; forgetting it");
                store.delete(url).await;
                outcome.disposition = Disposition::Removed;
                return Ok(outcome);
            }
            STATUS_OK => {}
            other => info!(status = other, "unexpected status"),
        }

        let watermark = self.dispatch(&snapshot, previous, &mut outcome);
        store.set(url, watermark).await;
        outcome.disposition = Disposition::Committed(watermark);
        Ok(outcome)
    }

    fn dispatch(
        &mut self,
        snapshot: &FeedSnapshot,
        previous: i64,
        outcome: &mut ProcessingOutcome,
    ) -> i64 {
        let mut advance = Advance::new(self.options.advance_policy, previous);

        for entry in &snapshot.entries {
            let Some(timestamp) = entry.timestamp() else {
                warn!(title = %entry.title, "entry has no update time; not dispatching it");
                outcome.undated += 1;
                continue;
            };

            // Always compared against the watermark read at the start, not the
            // value accumulating over this batch.
            if !self.options.force && timestamp <= previous {
                debug!(title = %entry.title, "old entry, already looked at earlier");
                outcome.skipped += 1;
                continue;
            }

            if self.handler.handle_entry(entry) {
                info!(title = %entry.title, "handled");
                debug!(timestamp, "entry may advance the watermark");
                advance.handled(timestamp);
                outcome.handled.push(entry.clone());
            } else {
                debug!(title = %entry.title, timestamp, "handler declined entry");
                advance.failed(timestamp);
                outcome.failed.push(entry.clone());
            }
        }

        advance.commit()
    }
}
