//! Episode report: the `id.txt` text file and its JSON sibling.
//!
//! Text layout: a header line stating the count, a blank line, then one filename per line.
//! The count is always derived from the list, so the two cannot drift.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default header; `{count}` is replaced with the number of episodes.
pub const DEFAULT_HEADER_TEMPLATE: &str = "In questa saga ci sono {count} episodi";

/// Default report file names.
pub const DEFAULT_TEXT_FILE: &str = "id.txt";
pub const DEFAULT_JSON_FILE: &str = "id.json";

/// Report file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Json,
}

impl ReportFormat {
    pub fn default_file_name(self) -> &'static str {
        match self {
            ReportFormat::Text => DEFAULT_TEXT_FILE,
            ReportFormat::Json => DEFAULT_JSON_FILE,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to write report: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON report {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid report {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

/// Collected filenames in episode order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpisodeReport {
    pub filenames: Vec<String>,
}

/// One entry of the JSON `episodes` map.
#[derive(Debug, Serialize, Deserialize)]
struct EpisodeEntry {
    id: String,
}

/// JSON shape: `{"nepisodes": N, "episodes": {"1": {"id": ...}, ...}}`.
#[derive(Deserialize)]
struct JsonReport {
    nepisodes: usize,
    episodes: BTreeMap<String, EpisodeEntry>,
}

/// Serializes the episodes map with 1-based keys in collection order.
struct OrderedEpisodes<'a>(&'a [String]);

impl Serialize for OrderedEpisodes<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (i, id) in self.0.iter().enumerate() {
            map.serialize_entry(&(i + 1).to_string(), &EpisodeEntry { id: id.clone() })?;
        }
        map.end()
    }
}

impl Serialize for EpisodeReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("nepisodes", &self.count())?;
        map.serialize_entry("episodes", &OrderedEpisodes(&self.filenames))?;
        map.end()
    }
}

impl EpisodeReport {
    pub fn new(filenames: Vec<String>) -> Self {
        Self { filenames }
    }

    pub fn count(&self) -> usize {
        self.filenames.len()
    }

    /// Header line for this report.
    pub fn header(&self, template: &str) -> String {
        template.replace("{count}", &self.count().to_string())
    }

    /// Full text body, every line terminated by `\n`.
    pub fn render_text(&self, template: &str) -> String {
        let mut out = self.header(template);
        out.push_str("\n\n");
        for name in &self.filenames {
            out.push_str(name);
            out.push('\n');
        }
        out
    }

    /// Write the text report, replacing any existing file.
    pub fn write_text(&self, path: &Path, template: &str) -> Result<(), ReportError> {
        std::fs::write(path, self.render_text(template)).map_err(|e| ReportError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Write the JSON report, replacing any existing file.
    pub fn write_json(&self, path: &Path) -> Result<(), ReportError> {
        let f = File::create(path).map_err(|e| ReportError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut w = BufWriter::new(f);
        serde_json::to_writer_pretty(&mut w, self).map_err(|e| ReportError::Json {
            path: path.to_path_buf(),
            source: e,
        })?;
        writeln!(w)
            .and_then(|_| w.flush())
            .map_err(|e| ReportError::Io {
                path: path.to_path_buf(),
                source: e,
            })
    }

    pub fn write(&self, path: &Path, format: ReportFormat, template: &str) -> Result<(), ReportError> {
        match format {
            ReportFormat::Text => self.write_text(path, template),
            ReportFormat::Json => self.write_json(path),
        }
    }

    /// Read a report written by [write_text](Self::write_text) or
    /// [write_json](Self::write_json). JSON is detected by a leading `{`. `template` is the
    /// header template the text report was written with; it locates the declared count.
    pub fn read(path: &Path, template: &str) -> Result<Self, ReportError> {
        let content = std::fs::read_to_string(path).map_err(|e| ReportError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        if content.trim_start().starts_with('{') {
            Self::parse_json(&content, path)
        } else {
            Self::parse_text(&content, path, template)
        }
    }

    fn parse_json(content: &str, path: &Path) -> Result<Self, ReportError> {
        let parsed: JsonReport = serde_json::from_str(content).map_err(|e| ReportError::Json {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut numbered = Vec::with_capacity(parsed.episodes.len());
        for (key, entry) in parsed.episodes {
            let n: usize = key.parse().map_err(|_| ReportError::Parse {
                path: path.to_path_buf(),
                reason: format!("episode key '{}' is not a number", key),
            })?;
            numbered.push((n, entry.id));
        }
        numbered.sort_by_key(|(n, _)| *n);
        let report = Self::new(numbered.into_iter().map(|(_, id)| id).collect());
        check_count(report.count(), parsed.nepisodes, path)?;
        Ok(report)
    }

    fn parse_text(content: &str, path: &Path, template: &str) -> Result<Self, ReportError> {
        let (header, rest) = content.split_once('\n').ok_or_else(|| ReportError::Parse {
            path: path.to_path_buf(),
            reason: "missing header line".to_string(),
        })?;
        // Lines after the blank separator are ids exactly as written, empty ones included.
        let body = rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n')).unwrap_or(rest);
        let filenames: Vec<String> = match body.strip_suffix('\n') {
            None if body.is_empty() => Vec::new(),
            trimmed => trimmed
                .unwrap_or(body)
                .split('\n')
                .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
                .collect(),
        };
        let report = Self::new(filenames);
        if let Some(declared) = header_count(header.trim_end_matches('\r'), template) {
            check_count(report.count(), declared, path)?;
        }
        Ok(report)
    }
}

/// Count in a header rendered from `template`. None when the header does not follow the
/// template, in which case the count cannot be checked.
fn header_count(header: &str, template: &str) -> Option<usize> {
    let (prefix, suffix) = template.split_once("{count}")?;
    header
        .strip_prefix(prefix)?
        .strip_suffix(suffix)?
        .parse()
        .ok()
}

fn check_count(found: usize, declared: usize, path: &Path) -> Result<(), ReportError> {
    if found != declared {
        return Err(ReportError::Parse {
            path: path.to_path_buf(),
            reason: format!("header declares {} episodes but {} ids are listed", declared, found),
        });
    }
    Ok(())
}
