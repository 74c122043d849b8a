//! CLI parsing and orchestration. `enumerate` drives Chrome through the `#item=N` pages and writes
//! the report; `download` fetches the episodes a report lists. Maps errors to exit codes.

use crate::browser::{BrowserError, ChromeConfig, ChromeSession};
use crate::config::{self, Config};
use crate::download::{
    download_all, DownloadError, DownloadStatus, PoliteClient, DEFAULT_DOWNLOAD_BASE_URL,
    DEFAULT_DOWNLOAD_DIR,
};
use crate::enumerator::{
    run_enumeration, EnumerateError, EnumerateOptions, MissingSourceBehavior,
    DEFAULT_MARKER_SELECTOR, DEFAULT_SOURCE_SELECTOR, DEFAULT_WAIT_TIMEOUT_SECS,
};
use crate::report::{EpisodeReport, ReportError, ReportFormat, DEFAULT_HEADER_TEMPLATE};
use clap::{Parser, Subcommand};
use std::cell::RefCell;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const URL_PROMPT: &str = "Insert URL (without #item=...): ";

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Browser(#[from] BrowserError),

    #[error("{0}")]
    Enumerate(#[from] EnumerateError),

    #[error("{0}")]
    Download(#[from] DownloadError),

    #[error("{0}")]
    Report(#[from] ReportError),
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) => 1,
            CliRunError::Browser(_) | CliRunError::Enumerate(_) | CliRunError::Download(_) => 2,
            CliRunError::Report(_) => 3,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "episcrape")]
#[command(about = "Enumerate #item=N paginated video episodes with headless Chrome and collect their file ids")]
#[command(
    after_help = "Config file keys (output_dir, header_template, wait_timeout_secs, headless, marker_selector, source_selector, missing_source, download_base_url, user_agent, request_delay_secs, timeout_secs, retry_count, retry_backoff_secs) are read from ./episcrape.toml or the user config dir. CLI flags override config."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Suppress progress output (errors only).
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Debug logging and the full error chain.
    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Visit #item=0, #item=1, ... and write the collected file ids.
    Enumerate(EnumerateArgs),
    /// Download every episode listed in a report.
    Download(DownloadArgs),
}

#[derive(clap::Args, Debug)]
pub struct EnumerateArgs {
    /// Series URL without the #item=... fragment. Prompted for when omitted.
    pub url: Option<String>,

    /// Report path. Default: id.txt (or id.json) next to the executable, or in output_dir from config.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Report format: text or json.
    #[arg(long, default_value = "text", value_parser = parse_format)]
    pub format: ReportFormat,

    /// Seconds to wait for the video source on each episode page (default 10).
    #[arg(long)]
    pub wait_timeout: Option<u64>,

    /// When a page has the video marker but no source: fail (default) or stop.
    #[arg(long, value_parser = parse_missing_source)]
    pub missing_source: Option<MissingSourceBehavior>,

    /// Show the Chrome window instead of running headless.
    #[arg(long)]
    pub show_browser: bool,

    /// Rewrite the report after every episode so a crash keeps what was collected.
    #[arg(long)]
    pub checkpoint: bool,
}

#[derive(clap::Args, Debug)]
pub struct DownloadArgs {
    /// Report listing the episode ids. Default: id.txt next to the executable, or in output_dir.
    pub report: Option<PathBuf>,

    /// Destination directory. Default: downloaded_episodes beside the report.
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    /// Base URL ids are appended to (overrides config).
    #[arg(long)]
    pub base_url: Option<String>,

    /// Delay between requests in seconds (overrides config; default 2).
    #[arg(long)]
    pub delay: Option<u64>,

    /// Whole-request timeout in seconds (overrides config; default none).
    #[arg(long)]
    pub timeout: Option<u64>,
}

fn parse_format(s: &str) -> Result<ReportFormat, String> {
    match s.to_lowercase().as_str() {
        "text" | "txt" => Ok(ReportFormat::Text),
        "json" => Ok(ReportFormat::Json),
        _ => Err(format!("Invalid --format value: '{}'. Use text or json.", s)),
    }
}

fn parse_missing_source(s: &str) -> Result<MissingSourceBehavior, String> {
    match s.to_lowercase().as_str() {
        "fail" => Ok(MissingSourceBehavior::Fail),
        "stop" => Ok(MissingSourceBehavior::Stop),
        _ => Err(format!(
            "Invalid --missing-source value: '{}'. Use fail or stop.",
            s
        )),
    }
}

/// Print the prompt and read one line. Surrounding whitespace is dropped; empty input is an error.
fn prompt_base_url<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> Result<String, CliRunError> {
    let io_err = |e: std::io::Error| CliRunError::InvalidInput(format!("Cannot read URL: {}", e));
    write!(output, "{}", URL_PROMPT).map_err(io_err)?;
    output.flush().map_err(io_err)?;
    let mut line = String::new();
    input.read_line(&mut line).map_err(io_err)?;
    non_empty_url(&line)
}

fn non_empty_url(s: &str) -> Result<String, CliRunError> {
    let url = s.trim();
    if url.is_empty() {
        return Err(CliRunError::InvalidInput(
            "No URL given. Pass the series URL without #item=..., e.g. https://example.com/saga"
                .to_string(),
        ));
    }
    Ok(url.to_string())
}

/// Directory of the running executable; the current directory when it cannot be determined.
fn default_output_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Explicit path wins, then config output_dir, then the executable's directory.
fn resolve_report_path(
    explicit: Option<&Path>,
    config_dir: Option<&Path>,
    file_name: &str,
) -> PathBuf {
    match (explicit, config_dir) {
        (Some(p), _) => p.to_path_buf(),
        (None, Some(dir)) => dir.join(file_name),
        (None, None) => default_output_dir().join(file_name),
    }
}

/// Report read by `download` when none is given: `id.txt` in the output directory, or `id.json`
/// there when only the JSON report exists.
fn default_download_report(config_dir: Option<&Path>) -> PathBuf {
    let text = resolve_report_path(None, config_dir, ReportFormat::Text.default_file_name());
    if text.exists() {
        return text;
    }
    let json = resolve_report_path(None, config_dir, ReportFormat::Json.default_file_name());
    if json.exists() {
        log::debug!("{} not found, reading {}", text.display(), json.display());
        json
    } else {
        text
    }
}

/// Ensure the output path's parent exists.
fn validate_output_path(path: &Path) -> Result<(), CliRunError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(CliRunError::InvalidInput(format!(
                "Cannot write output: {}: parent directory does not exist.",
                path.display()
            )));
        }
    }
    Ok(())
}

fn spinner(message: &str) -> indicatif::ProgressBar {
    let bar = indicatif::ProgressBar::new_spinner();
    if let Ok(style) = indicatif::ProgressStyle::default_spinner()
        .template("{spinner} {msg} ({elapsed})")
    {
        bar.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "));
    }
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub fn run(args: &Args) -> Result<(), CliRunError> {
    let config = config::load_config()
        .map_err(CliRunError::InvalidInput)?
        .unwrap_or_default();
    match &args.command {
        Command::Enumerate(cmd) => run_enumerate(cmd, &config, args.quiet),
        Command::Download(cmd) => run_download(cmd, &config, args.quiet),
    }
}

fn run_enumerate(cmd: &EnumerateArgs, config: &Config, quiet: bool) -> Result<(), CliRunError> {
    let base_url = match &cmd.url {
        Some(url) => non_empty_url(url)?,
        None => {
            let stdin = std::io::stdin();
            prompt_base_url(&mut stdin.lock(), &mut std::io::stdout())?
        }
    };

    let missing_source = match cmd.missing_source {
        Some(b) => b,
        None => match config.missing_source.as_deref() {
            Some(s) => parse_missing_source(s).map_err(CliRunError::InvalidInput)?,
            None => MissingSourceBehavior::Fail,
        },
    };
    let wait_timeout_secs = cmd
        .wait_timeout
        .or(config.wait_timeout_secs)
        .unwrap_or(DEFAULT_WAIT_TIMEOUT_SECS);
    let template = config
        .header_template
        .as_deref()
        .unwrap_or(DEFAULT_HEADER_TEMPLATE);

    let output_path = resolve_report_path(
        cmd.output.as_deref(),
        config.output_dir.as_deref(),
        cmd.format.default_file_name(),
    );
    validate_output_path(&output_path)?;

    if !quiet {
        println!("Please wait");
    }
    let chrome_config = ChromeConfig {
        headless: !cmd.show_browser && config.headless.unwrap_or(true),
        user_agent: config.user_agent.clone(),
        ..ChromeConfig::default()
    };
    let session = ChromeSession::launch(&chrome_config)?;

    let progress: RefCell<Option<indicatif::ProgressBar>> =
        RefCell::new((!quiet).then(|| spinner("Collecting episodes")));
    let on_episode = |index: u32, filename: &str| {
        if let Some(pb) = progress.borrow().as_ref() {
            pb.set_message(format!("Episode {}: {}", index, filename));
        }
    };
    let on_checkpoint = |filenames: &[String]| {
        let partial = EpisodeReport::new(filenames.to_vec());
        if let Err(e) = partial.write(&output_path, cmd.format, template) {
            log::warn!("Could not write checkpoint: {}", e);
        }
    };
    let options = EnumerateOptions {
        marker_selector: config
            .marker_selector
            .as_deref()
            .unwrap_or(DEFAULT_MARKER_SELECTOR),
        source_selector: config
            .source_selector
            .as_deref()
            .unwrap_or(DEFAULT_SOURCE_SELECTOR),
        wait_timeout: Duration::from_secs(wait_timeout_secs),
        missing_source,
        on_episode: Some(&on_episode),
        on_checkpoint: if cmd.checkpoint {
            Some(&on_checkpoint)
        } else {
            None
        },
    };

    let result = run_enumeration(session, &base_url, &options);
    if let Some(pb) = progress.borrow_mut().take() {
        pb.finish_and_clear();
    }
    let enumeration = result?;

    let report = EpisodeReport::new(enumeration.filenames);
    report.write(&output_path, cmd.format, template)?;
    if !quiet {
        println!(
            "file 'id' created successfully: {} ({} episodes)",
            output_path.display(),
            report.count()
        );
    }
    Ok(())
}

fn run_download(cmd: &DownloadArgs, config: &Config, quiet: bool) -> Result<(), CliRunError> {
    let report_path = match &cmd.report {
        Some(p) => p.clone(),
        None => default_download_report(config.output_dir.as_deref()),
    };
    let template = config
        .header_template
        .as_deref()
        .unwrap_or(DEFAULT_HEADER_TEMPLATE);
    let report = EpisodeReport::read(&report_path, template)?;
    let dir = match &cmd.dir {
        Some(d) => d.clone(),
        None => report_path
            .parent()
            .unwrap_or(Path::new("."))
            .join(DEFAULT_DOWNLOAD_DIR),
    };
    let base_url = cmd
        .base_url
        .as_deref()
        .or(config.download_base_url.as_deref())
        .unwrap_or(DEFAULT_DOWNLOAD_BASE_URL);

    let mut builder = PoliteClient::builder();
    if let Some(delay) = cmd.delay.or(config.request_delay_secs) {
        builder = builder.delay_secs(delay);
    }
    if let Some(timeout) = cmd.timeout.or(config.timeout_secs) {
        builder = builder.timeout_secs(timeout);
    }
    if let Some(n) = config.retry_count {
        builder = builder.retry_count(n);
    }
    if let Some(ref backoff) = config.retry_backoff_secs {
        builder = builder.retry_backoff_secs(backoff.clone());
    }
    if let Some(ref ua) = config.user_agent {
        builder = builder.user_agent(ua.clone());
    }
    let mut client = builder
        .build()
        .map_err(|e| CliRunError::InvalidInput(format!("Failed to create HTTP client: {}", e)))?;

    let bar = (!quiet).then(|| {
        let bar = indicatif::ProgressBar::new(report.count() as u64);
        if let Ok(style) = indicatif::ProgressStyle::default_bar()
            .template("{spinner} {msg} [{bar:40}] {pos}/{len} ({elapsed})")
        {
            bar.set_style(style.progress_chars("█▉▊▋▌▍▎▏ "));
        }
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    });
    let progress_cb = |n: usize, total: usize, id: &str| {
        if let Some(ref pb) = bar {
            pb.set_position(n.saturating_sub(1) as u64);
            pb.set_message(format!("Downloading {} ({}/{})", id, n, total));
        }
    };
    let result = download_all(
        &mut client,
        base_url,
        &report.filenames,
        &dir,
        Some(&progress_cb),
    );
    if let Some(pb) = bar {
        pb.finish_and_clear();
    }
    let statuses = result?;

    if !quiet {
        let skipped = statuses
            .iter()
            .filter(|s| **s == DownloadStatus::Skipped)
            .count();
        eprintln!(
            "Downloaded {} episode(s), skipped {} already present, into {}",
            statuses.len() - skipped,
            skipped,
            dir.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enumerator::Enumeration;
    use std::error::Error;

    #[test]
    fn parse_format_all() {
        assert_eq!(parse_format("text").unwrap(), ReportFormat::Text);
        assert_eq!(parse_format("txt").unwrap(), ReportFormat::Text);
        assert_eq!(parse_format("JSON").unwrap(), ReportFormat::Json);
        assert!(parse_format("csv").is_err());
    }

    #[test]
    fn parse_missing_source_all() {
        assert_eq!(
            parse_missing_source("fail").unwrap(),
            MissingSourceBehavior::Fail
        );
        assert_eq!(
            parse_missing_source("STOP").unwrap(),
            MissingSourceBehavior::Stop
        );
        assert!(parse_missing_source("retry").is_err());
    }

    #[test]
    fn prompt_reads_and_trims_url() {
        let mut input = "  https://example.com/saga  \n".as_bytes();
        let mut output = Vec::new();
        let url = prompt_base_url(&mut input, &mut output).unwrap();
        assert_eq!(url, "https://example.com/saga");
        assert_eq!(String::from_utf8(output).unwrap(), URL_PROMPT);
    }

    #[test]
    fn prompt_rejects_empty_line() {
        let mut input = "\n".as_bytes();
        let mut output = Vec::new();
        let result = prompt_base_url(&mut input, &mut output);
        assert!(matches!(result, Err(CliRunError::InvalidInput(_))));
    }

    #[test]
    fn report_path_explicit_wins() {
        let path = resolve_report_path(
            Some(Path::new("custom/ids.txt")),
            Some(Path::new("out")),
            "id.txt",
        );
        assert_eq!(path, PathBuf::from("custom/ids.txt"));
    }

    #[test]
    fn report_path_uses_config_dir() {
        let path = resolve_report_path(None, Some(Path::new("out")), "id.json");
        assert_eq!(path, PathBuf::from("out/id.json"));
    }

    #[test]
    fn report_path_defaults_next_to_executable() {
        let path = resolve_report_path(None, None, "id.txt");
        assert_eq!(path.file_name().and_then(|n| n.to_str()), Some("id.txt"));
        assert_eq!(path.parent(), Some(default_output_dir().as_path()));
    }

    #[test]
    fn download_report_falls_back_to_json() -> Result<(), Box<dyn Error>> {
        let dir = std::env::temp_dir().join("episcrape_test_download_report_json");
        std::fs::create_dir_all(&dir)?;
        let _ = std::fs::remove_file(dir.join("id.txt"));
        std::fs::write(dir.join("id.json"), "{}")?;
        let picked = default_download_report(Some(&dir));
        std::fs::remove_dir_all(&dir)?;
        assert_eq!(picked, dir.join("id.json"));
        Ok(())
    }

    #[test]
    fn download_report_prefers_text() -> Result<(), Box<dyn Error>> {
        let dir = std::env::temp_dir().join("episcrape_test_download_report_text");
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("id.txt"), "In questa saga ci sono 0 episodi\n\n")?;
        std::fs::write(dir.join("id.json"), "{}")?;
        let picked = default_download_report(Some(&dir));
        std::fs::remove_dir_all(&dir)?;
        assert_eq!(picked, dir.join("id.txt"));
        Ok(())
    }

    #[test]
    fn download_report_defaults_to_text_when_neither_exists() {
        let dir = Path::new("/nonexistent_dir_episcrape_xyz");
        assert_eq!(default_download_report(Some(dir)), dir.join("id.txt"));
    }

    #[test]
    fn validate_output_path_parent_missing() {
        let path = PathBuf::from("/nonexistent_dir_episcrape_xyz/id.txt");
        let result = validate_output_path(&path);
        assert!(matches!(result, Err(CliRunError::InvalidInput(ref msg)) if msg.contains("parent directory does not exist")));
    }

    #[test]
    fn validate_output_path_bare_file_name() {
        assert!(validate_output_path(Path::new("id.txt")).is_ok());
    }

    #[test]
    fn cli_run_error_exit_codes() {
        assert_eq!(CliRunError::InvalidInput("x".into()).exit_code(), 1);
        assert_eq!(
            CliRunError::Browser(BrowserError::Launch("no chrome".into())).exit_code(),
            2
        );
        assert_eq!(
            CliRunError::Enumerate(EnumerateError::MissingSource {
                index: 1,
                collected: Vec::new(),
                source: BrowserError::Session("x".into()),
            })
            .exit_code(),
            2
        );
        assert_eq!(
            CliRunError::Download(DownloadError::InvalidId("..".into())).exit_code(),
            2
        );
        assert_eq!(
            CliRunError::Report(ReportError::Parse {
                path: PathBuf::from("id.txt"),
                reason: "x".into()
            })
            .exit_code(),
            3
        );
    }

    #[test]
    fn args_parse_enumerate_with_flags() {
        let args = Args::try_parse_from([
            "episcrape",
            "enumerate",
            "https://example.com/saga",
            "--format",
            "json",
            "--missing-source",
            "stop",
            "--wait-timeout",
            "5",
            "--checkpoint",
            "-q",
        ])
        .unwrap();
        assert!(args.quiet);
        match args.command {
            Command::Enumerate(cmd) => {
                assert_eq!(cmd.url.as_deref(), Some("https://example.com/saga"));
                assert_eq!(cmd.format, ReportFormat::Json);
                assert_eq!(cmd.missing_source, Some(MissingSourceBehavior::Stop));
                assert_eq!(cmd.wait_timeout, Some(5));
                assert!(cmd.checkpoint);
                assert!(!cmd.show_browser);
            }
            other => panic!("expected enumerate, got {:?}", other),
        }
    }

    #[test]
    fn args_parse_enumerate_without_url_prompts_later() {
        let args = Args::try_parse_from(["episcrape", "enumerate"]).unwrap();
        match args.command {
            Command::Enumerate(cmd) => {
                assert!(cmd.url.is_none());
                assert_eq!(cmd.format, ReportFormat::Text);
            }
            other => panic!("expected enumerate, got {:?}", other),
        }
    }

    #[test]
    fn args_parse_download() {
        let args =
            Args::try_parse_from(["episcrape", "download", "ids.txt", "-d", "eps", "--delay", "0"])
                .unwrap();
        match args.command {
            Command::Download(cmd) => {
                assert_eq!(cmd.report, Some(PathBuf::from("ids.txt")));
                assert_eq!(cmd.dir, Some(PathBuf::from("eps")));
                assert_eq!(cmd.delay, Some(0));
            }
            other => panic!("expected download, got {:?}", other),
        }
    }

    #[test]
    fn enumeration_report_header_matches_count() {
        let enumeration = Enumeration {
            filenames: vec!["a".into(), "b".into()],
        };
        let report = EpisodeReport::new(enumeration.filenames.clone());
        assert_eq!(report.count(), enumeration.count());
        assert!(report
            .render_text(DEFAULT_HEADER_TEMPLATE)
            .starts_with("In questa saga ci sono 2 episodi"));
    }
}
