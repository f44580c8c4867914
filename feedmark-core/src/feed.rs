use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// HTTP-style status codes the processor treats specially.
pub const STATUS_OK: u16 = 200;
pub const STATUS_MOVED_PERMANENTLY: u16 = 301;
pub const STATUS_GONE: u16 = 410;

/// One item of a polled feed, as handed to an [`EntryHandler`](crate::EntryHandler).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entry {
    pub feed_url: String,
    pub title: String,
    pub link: Option<String>,
    pub id: Option<String>,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub updated: Option<DateTime<Utc>>,
}

impl Entry {
    pub fn new(feed_url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            feed_url: feed_url.into(),
            title: title.into(),
            link: None,
            id: None,
            summary: None,
            author: None,
            updated: None,
        }
    }

    pub fn updated_at(mut self, timestamp: i64) -> Self {
        self.updated = DateTime::from_timestamp(timestamp, 0);
        self
    }

    /// Update time in epoch seconds, if the feed supplied one.
    pub fn timestamp(&self) -> Option<i64> {
        self.updated.map(|dt| dt.timestamp())
    }

    pub fn from_rss_item(feed_url: &str, item: &rss::Item) -> Self {
        // RSS has no separate "updated" element: pubDate first, Dublin Core date second
        let updated = item.pub_date().and_then(parse_date).or_else(|| {
            item.dublin_core_ext()
                .and_then(|dc| dc.dates().iter().find_map(|value| parse_date(value)))
        });

        let author = item.author().map(ToOwned::to_owned).or_else(|| {
            item.dublin_core_ext()
                .and_then(|dc| dc.creators().first().map(|s| s.to_string()))
        });

        Self {
            feed_url: feed_url.to_owned(),
            title: item.title().unwrap_or_default().to_owned(),
            link: item.link().map(ToOwned::to_owned),
            id: item.guid().map(|guid| guid.value().to_owned()),
            summary: item.description().map(ToOwned::to_owned),
            author,
            updated,
        }
    }

    pub fn from_atom_entry(feed_url: &str, entry: &atom_syndication::Entry) -> Self {
        let link = entry
            .links()
            .iter()
            .find(|link| link.rel() == "alternate")
            .or_else(|| entry.links().first())
            .map(|link| link.href().to_owned());

        let id = Some(entry.id().trim())
            .filter(|id| !id.is_empty())
            .map(ToOwned::to_owned);

        Self {
            feed_url: feed_url.to_owned(),
            title: entry.title().value.clone(),
            link,
            id,
            summary: entry.summary().map(|text| text.value.clone()),
            author: entry.authors().first().map(|person| person.name().to_owned()),
            updated: atom_timestamp(entry),
        }
    }
}

/// Result of fetching one feed URL.
///
/// `status` is `None` when the source could not produce a usable status
/// indicator (for example a feed read from the local filesystem).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedSnapshot {
    pub status: Option<u16>,
    pub href: Option<String>,
    pub entries: Vec<Entry>,
}

impl FeedSnapshot {
    pub fn with_status(status: u16, entries: Vec<Entry>) -> Self {
        Self {
            status: Some(status),
            href: None,
            entries,
        }
    }
}

/// Parses a feed document, trying RSS 2.0 first and Atom second.
pub fn parse_entries(feed_url: &str, bytes: &[u8]) -> Result<Vec<Entry>, FetchError> {
    let rss_err = match rss::Channel::read_from(bytes) {
        Ok(channel) => {
            return Ok(channel
                .items()
                .iter()
                .map(|item| Entry::from_rss_item(feed_url, item))
                .collect())
        }
        Err(err) => err,
    };

    match atom_syndication::Feed::read_from(bytes) {
        Ok(feed) => Ok(feed
            .entries()
            .iter()
            .map(|entry| Entry::from_atom_entry(feed_url, entry))
            .collect()),
        Err(atom_err) => Err(FetchError::Parse(format!(
            "not an RSS document ({rss_err}) nor an Atom document ({atom_err})"
        ))),
    }
}

// atom_syndication fills a missing <updated> with the Unix epoch
fn atom_timestamp(entry: &atom_syndication::Entry) -> Option<DateTime<Utc>> {
    Some(entry.updated())
        .filter(|updated| updated.timestamp() != 0)
        .or_else(|| entry.published())
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
