//! Optional config file loading. Search order: ./episcrape.toml, then
//! $XDG_CONFIG_HOME/episcrape/config.toml (or ~/.config/episcrape/config.toml).

use serde::Deserialize;
use std::path::PathBuf;

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Directory for the report when -o is not set. Relative paths are relative to CWD.
    pub output_dir: Option<PathBuf>,
    /// Report header; `{count}` is replaced with the number of episodes.
    pub header_template: Option<String>,
    /// Seconds to wait for the video source element on each episode page.
    pub wait_timeout_secs: Option<u64>,
    /// Run Chrome headless (default true).
    pub headless: Option<bool>,
    /// CSS selector of the video marker.
    pub marker_selector: Option<String>,
    /// CSS selector of the video source element.
    pub source_selector: Option<String>,
    /// fail (default) or stop when the source element never appears.
    pub missing_source: Option<String>,
    /// Base URL episode ids are downloaded from.
    pub download_base_url: Option<String>,
    /// User-Agent for Chrome and for downloads.
    pub user_agent: Option<String>,
    /// Delay in seconds between download requests.
    pub request_delay_secs: Option<u64>,
    /// Whole-request download timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Attempts per download request.
    pub retry_count: Option<u32>,
    /// Delay in seconds before each retry (e.g. [2, 4]).
    pub retry_backoff_secs: Option<Vec<u64>>,
}

/// Search order: (1) ./episcrape.toml, (2) $XDG_CONFIG_HOME/episcrape/config.toml.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config() -> Result<Option<Config>, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Cannot determine current directory: {}", e))?;
    let mut paths = vec![cwd.join("episcrape.toml")];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join("episcrape").join("config.toml"));
    }
    for path in &paths {
        if path.exists() {
            let s = std::fs::read_to_string(path)
                .map_err(|e| format!("Cannot read config {}: {}", path.display(), e))?;
            let config: Config = toml::from_str(&s)
                .map_err(|e| format!("Invalid config {}: {}", path.display(), e))?;
            log::debug!("Loaded config from {}", path.display());
            return Ok(Some(config));
        }
    }
    Ok(None)
}
