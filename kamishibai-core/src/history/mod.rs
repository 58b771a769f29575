mod store;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::Serialize;
use thiserror::Error;

pub use store::{SqliteHistoryStore, SqliteHistoryStoreBuilder};

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("history store path not configured")]
    MissingStore,
    #[error("failed to open database at {path}: {source}")]
    OpenDatabase {
        path: PathBuf,
        source: rusqlite::Error,
    },
}

pub type HistoryResult<T> = std::result::Result<T, HistoryError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Uploaded and given a video id.
    Published,
    /// Video assembled but not uploaded (test modes, or upload failed).
    Rendered,
    ScriptOnly,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Published => "published",
            RunStatus::Rendered => "rendered",
            RunStatus::ScriptOnly => "script_only",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "published" => Ok(RunStatus::Published),
            "rendered" => Ok(RunStatus::Rendered),
            "script_only" => Ok(RunStatus::ScriptOnly),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// One finished pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub channel: String,
    pub theme: String,
    pub title: String,
    pub mode: String,
    pub video_id: Option<String>,
    pub video_url: Option<String>,
    pub line_count: usize,
    pub silent_lines: usize,
    pub status: RunStatus,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl RunRecord {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: row.get("run_id")?,
            channel: row.get("channel")?,
            theme: row.get("theme")?,
            title: row.get("title")?,
            mode: row.get("mode")?,
            video_id: row.get("video_id")?,
            video_url: row.get("video_url")?,
            line_count: row.get::<_, i64>("line_count")?.max(0) as usize,
            silent_lines: row.get::<_, i64>("silent_lines")?.max(0) as usize,
            status: row
                .get::<_, String>("status")?
                .parse()
                .unwrap_or(RunStatus::Failed),
            error: row.get("error")?,
            finished_at: row.get("finished_at")?,
        })
    }
}
