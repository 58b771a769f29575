use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OpenFlags};

use super::{HistoryError, HistoryResult, RunRecord};

const HISTORY_SCHEMA: &str = include_str!("../../../sql/history.sql");

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;\n\
         PRAGMA synchronous = NORMAL;\n\
         PRAGMA busy_timeout = 5000;\n",
    )
}

#[derive(Debug, Clone)]
pub struct SqliteHistoryStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for SqliteHistoryStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl SqliteHistoryStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> HistoryResult<SqliteHistoryStore> {
        let path = self.path.ok_or(HistoryError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(SqliteHistoryStore { path, flags })
    }
}

/// Append-only log of pipeline runs.
#[derive(Debug, Clone)]
pub struct SqliteHistoryStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteHistoryStore {
    pub fn builder() -> SqliteHistoryStoreBuilder {
        SqliteHistoryStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> HistoryResult<Self> {
        SqliteHistoryStoreBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> HistoryResult<Connection> {
        if self.flags.contains(OpenFlags::SQLITE_OPEN_CREATE) {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            HistoryError::OpenDatabase {
                path: self.path.clone(),
                source,
            }
        })?;
        if !self.flags.contains(OpenFlags::SQLITE_OPEN_READ_ONLY) {
            configure_connection(&conn).map_err(|source| HistoryError::OpenDatabase {
                path: self.path.clone(),
                source,
            })?;
        }
        Ok(conn)
    }

    pub fn initialize(&self) -> HistoryResult<()> {
        let conn = self.open()?;
        conn.execute_batch(HISTORY_SCHEMA)?;
        Ok(())
    }

    /// Inserts or replaces the record keyed by its run id.
    pub fn record(&self, record: &RunRecord) -> HistoryResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT OR REPLACE INTO runs (
                run_id, channel, theme, title, mode, video_id, video_url,
                line_count, silent_lines, status, error, finished_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.run_id,
                record.channel,
                record.theme,
                record.title,
                record.mode,
                record.video_id,
                record.video_url,
                record.line_count as i64,
                record.silent_lines as i64,
                record.status.as_str(),
                record.error,
                record.finished_at,
            ],
        )?;
        Ok(())
    }

    /// Most recent runs first.
    pub fn list(&self, limit: usize) -> HistoryResult<Vec<RunRecord>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM runs
             ORDER BY finished_at DESC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit as i64], |row| RunRecord::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
