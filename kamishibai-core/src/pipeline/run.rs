use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::cleanup::remove_files;
use crate::config::RunMode;
use crate::script::ScriptDraft;

/// State of one invocation. Owns every temporary file it creates.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub id: Uuid,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub draft: Option<ScriptDraft>,
    pub audio: Vec<PathBuf>,
    pub work_dir: PathBuf,
    temp_files: Vec<PathBuf>,
}

impl PipelineRun {
    pub fn new(mode: RunMode, temp_root: &Path) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            mode,
            started_at: Utc::now(),
            draft: None,
            audio: Vec::new(),
            work_dir: temp_root.join(id.simple().to_string()),
            temp_files: Vec::new(),
        }
    }

    pub fn track<I>(&mut self, paths: I)
    where
        I: IntoIterator<Item = PathBuf>,
    {
        self.temp_files.extend(paths);
    }

    pub fn temp_files(&self) -> &[PathBuf] {
        &self.temp_files
    }

    /// Removes tracked files and the run's work directory. Best effort.
    pub async fn cleanup(&mut self) -> usize {
        let files = std::mem::take(&mut self.temp_files);
        let removed = remove_files(&files).await;
        if let Err(err) = tokio::fs::remove_dir(&self.work_dir).await {
            debug!(dir = %self.work_dir.display(), error = %err, "work directory left in place");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cleanup_removes_tracked_files_and_work_dir() {
        let root = tempfile::tempdir().unwrap();
        let mut run = PipelineRun::new(RunMode::Test, root.path());
        tokio::fs::create_dir_all(&run.work_dir).await.unwrap();
        let clip = run.work_dir.join("line_0.wav");
        tokio::fs::write(&clip, b"x").await.unwrap();
        run.track([clip.clone(), run.work_dir.join("never-written.wav")]);

        assert_eq!(run.cleanup().await, 1);
        assert!(!clip.exists());
        assert!(!run.work_dir.exists());
        assert!(run.temp_files().is_empty());
    }
}
