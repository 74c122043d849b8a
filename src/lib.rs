//! episcrape: enumerate `#item=N` paginated video episodes with headless Chrome and collect
//! their file ids.

pub mod browser;
pub mod cli;
pub mod config;
pub mod download;
pub mod enumerator;
pub mod report;

// Re-exports for CLI and consumers.
pub use browser::{Browser, BrowserError, ChromeConfig, ChromeSession};
pub use download::{download_all, DownloadError, PoliteClient, PoliteClientBuilder};
pub use enumerator::{
    candidate_url, enumerate_episodes, filename_from_source, is_valid_episode_index,
    run_enumeration, EnumerateError, EnumerateOptions, Enumeration, MissingSourceBehavior,
};
pub use report::{EpisodeReport, ReportError, ReportFormat};
