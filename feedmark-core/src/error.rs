use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("feed parsing error: {0}")]
    Parse(String),
    #[error("failed to read local feed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid feed url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),
    #[error("gave up after {0} redirects")]
    TooManyRedirects(usize),
    #[error("redirect status {0} without a usable Location header")]
    MissingLocation(u16),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("watermark store i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("watermark store format error: {0}")]
    Format(#[from] serde_json::Error),
    #[error("unsupported watermark store version {0}")]
    UnsupportedVersion(u32),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON in config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no configuration directory available on this platform")]
    NoConfigDir,
}
