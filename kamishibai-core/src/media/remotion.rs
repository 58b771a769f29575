use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::config::RenderSection;
use crate::executor::{describe, stderr_tail, CommandExecutor, SystemCommandExecutor};

use super::{MediaError, MediaResult};

/// External composition tool. Implementations render one video per call;
/// retrying is the caller's concern.
#[async_trait]
pub trait VideoRenderer: Send + Sync {
    async fn render(&self, props: &Path, audio: &Path, output: &Path) -> MediaResult<PathBuf>;
}

/// `npx remotion render` inside the composition project. The narration is
/// staged into the project's `public/` directory, where the composition
/// resolves `audioPath`.
pub struct RemotionRenderer {
    npx: PathBuf,
    project_dir: PathBuf,
    entry_point: String,
    composition: String,
    concurrency: u32,
    timeout: Duration,
    executor: Arc<dyn CommandExecutor>,
}

impl RemotionRenderer {
    pub fn new(config: &RenderSection, project_dir: PathBuf) -> Self {
        Self {
            npx: PathBuf::from(&config.npx_binary),
            project_dir,
            entry_point: config.entry_point.clone(),
            composition: config.composition.clone(),
            concurrency: config.concurrency,
            timeout: Duration::from_secs(config.timeout_seconds),
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn public_dir(&self) -> PathBuf {
        self.project_dir.join("public")
    }

    async fn stage_audio(&self, audio: &Path) -> MediaResult<()> {
        let Some(name) = audio.file_name() else {
            return Ok(());
        };
        let public = self.public_dir();
        let staged = public.join(name);
        if staged == audio {
            return Ok(());
        }
        tokio::fs::create_dir_all(&public).await?;
        tokio::fs::copy(audio, &staged).await?;
        Ok(())
    }
}

impl fmt::Debug for RemotionRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemotionRenderer")
            .field("project_dir", &self.project_dir)
            .field("composition", &self.composition)
            .field("concurrency", &self.concurrency)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[async_trait]
impl VideoRenderer for RemotionRenderer {
    async fn render(&self, props: &Path, audio: &Path, output: &Path) -> MediaResult<PathBuf> {
        self.stage_audio(audio).await?;
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut command = Command::new(&self.npx);
        command
            .current_dir(&self.project_dir)
            .arg("remotion")
            .arg("render")
            .arg(&self.entry_point)
            .arg(&self.composition)
            .arg(output)
            .arg(format!("--props={}", props.display()))
            .arg(format!("--concurrency={}", self.concurrency));

        info!(composition = %self.composition, output = %output.display(), "render started");
        let result = tokio::time::timeout(self.timeout, self.executor.run(&mut command))
            .await
            .map_err(|_| MediaError::RenderTimeout(self.timeout))??;
        if !result.status.success() {
            return Err(MediaError::CommandFailure {
                command: describe(&command),
                status: result.status.code(),
                stderr: stderr_tail(&result),
            });
        }
        Ok(output.to_path_buf())
    }
}
