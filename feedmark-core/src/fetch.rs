use std::future::Future;
use std::path::Path;
use std::time::Duration;

use reqwest::header::LOCATION;
use reqwest::{redirect, Client, StatusCode};
use tracing::{debug, warn};
use url::Url;

use crate::error::FetchError;
use crate::feed::{parse_entries, FeedSnapshot, STATUS_GONE, STATUS_MOVED_PERMANENTLY};

/// Anything that can turn a feed URL into a [`FeedSnapshot`].
pub trait FeedSource {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<FeedSnapshot, FetchError>> + Send;
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub request_timeout: Duration,
    pub max_redirects: usize,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_redirects: 10,
            user_agent: concat!("feedmark/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Fetches feeds over HTTP(S), or from disk for `file://` URLs and plain paths.
///
/// Redirects are followed here rather than by reqwest so that a permanent hop
/// can be reported as status 301 together with the final location.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    max_redirects: usize,
}

impl HttpSource {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            max_redirects: config.max_redirects,
        })
    }

    async fn fetch_http(&self, start: Url) -> Result<FeedSnapshot, FetchError> {
        let mut current = start;
        let mut hops = 0;
        let mut permanent = false;

        let response = loop {
            let response = self.client.get(current.clone()).send().await?;
            let status = response.status();
            if !status.is_redirection() || status == StatusCode::NOT_MODIFIED {
                break response;
            }
            if hops == self.max_redirects {
                return Err(FetchError::TooManyRedirects(hops));
            }
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .ok_or(FetchError::MissingLocation(status.as_u16()))?;
            let next = current.join(location)?;
            debug!(from = %current, to = %next, status = status.as_u16(), "following redirect");
            permanent |= matches!(
                status,
                StatusCode::MOVED_PERMANENTLY | StatusCode::PERMANENT_REDIRECT
            );
            current = next;
            hops += 1;
        };

        let final_status = response.status();
        // A gone target wins over the redirect that led to it.
        let status = if permanent && final_status.as_u16() != STATUS_GONE {
            STATUS_MOVED_PERMANENTLY
        } else {
            final_status.as_u16()
        };
        let href = (hops > 0).then(|| current.to_string());

        if final_status.as_u16() == STATUS_GONE {
            return Ok(FeedSnapshot {
                status: Some(status),
                href,
                entries: Vec::new(),
            });
        }

        let feed_url = current.to_string();
        let bytes = response.bytes().await?;
        let entries = match parse_entries(&feed_url, &bytes) {
            Ok(entries) => entries,
            Err(err) if !final_status.is_success() => {
                warn!(url = %feed_url, status = final_status.as_u16(), error = %err, "no feed in non-success response");
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        Ok(FeedSnapshot {
            status: Some(status),
            href,
            entries,
        })
    }

    async fn fetch_local(&self, url: &str, path: &Path) -> Result<FeedSnapshot, FetchError> {
        let bytes = tokio::fs::read(path).await?;
        Ok(FeedSnapshot {
            status: None,
            href: None,
            entries: parse_entries(url, &bytes)?,
        })
    }
}

impl FeedSource for HttpSource {
    async fn fetch(&self, url: &str) -> Result<FeedSnapshot, FetchError> {
        match Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {
                self.fetch_http(parsed).await
            }
            Ok(parsed) if parsed.scheme() == "file" => {
                let path = parsed
                    .to_file_path()
                    .map_err(|_| FetchError::UnsupportedScheme(url.to_owned()))?;
                self.fetch_local(url, &path).await
            }
            Ok(parsed) => Err(FetchError::UnsupportedScheme(parsed.scheme().to_owned())),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                self.fetch_local(url, Path::new(url)).await
            }
            Err(err) => Err(err.into()),
        }
    }
}
