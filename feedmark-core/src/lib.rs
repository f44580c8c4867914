pub mod config;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod poller;
pub mod processor;
pub mod storage;

pub use config::{default_store_path, Config};
pub use error::{ConfigError, FetchError, StoreError};
pub use feed::{parse_entries, Entry, FeedSnapshot};
pub use fetch::{FeedSource, FetchConfig, HttpSource};
pub use poller::{run_once, spawn_watch, FeedReport, RunReport, WatchHandle};
pub use processor::{
    AdvancePolicy, Disposition, EntryHandler, FeedProcessor, ProcessOptions, ProcessingOutcome,
};
pub use storage::{FlushOutcome, WatermarkStore};
