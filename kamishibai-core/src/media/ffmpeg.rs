use std::fmt;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::executor::{describe, stderr_tail, CommandExecutor, SystemCommandExecutor};

use super::{MediaError, MediaResult};

/// Joins per-line clips into one narration track.
#[async_trait]
pub trait AudioConcatenator: Send + Sync {
    async fn concatenate(&self, inputs: &[PathBuf], output: &Path) -> MediaResult<PathBuf>;
}

/// ffmpeg driven through the concat demuxer with a temporary list file.
pub struct Ffmpeg {
    binary: PathBuf,
    executor: Arc<dyn CommandExecutor>,
}

impl Ffmpeg {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    async fn run(&self, command: &mut Command) -> MediaResult<()> {
        debug!(command = %describe(command), "running ffmpeg");
        let output = self.executor.run(command).await?;
        if !output.status.success() {
            return Err(MediaError::CommandFailure {
                command: describe(command),
                status: output.status.code(),
                stderr: stderr_tail(&output),
            });
        }
        Ok(())
    }

    /// Concatenates `inputs` with the concat demuxer. `codec_args` selects
    /// re-encoding or stream copy.
    async fn concat(&self, inputs: &[PathBuf], output: &Path, codec_args: &[&str]) -> MediaResult<()> {
        let existing: Vec<&PathBuf> = inputs.iter().filter(|path| path.exists()).collect();
        if existing.len() < inputs.len() {
            warn!(
                missing = inputs.len() - existing.len(),
                "some inputs are missing and were left out of the concatenation"
            );
        }
        if existing.is_empty() {
            return Err(MediaError::NothingToConcatenate);
        }

        let mut list = tempfile::Builder::new()
            .prefix("concat-")
            .suffix(".txt")
            .tempfile()?;
        for path in &existing {
            let absolute = path.canonicalize()?;
            let escaped = absolute.to_string_lossy().replace('\'', r"'\''");
            writeln!(list, "file '{escaped}'")?;
        }
        list.flush()?;

        let mut command = Command::new(&self.binary);
        command
            .arg("-y")
            .arg("-f")
            .arg("concat")
            .arg("-safe")
            .arg("0")
            .arg("-i")
            .arg(list.path())
            .args(codec_args)
            .arg(output);
        self.run(&mut command).await
    }

    /// Lays the narration over the rendered video, ending with the shorter
    /// of the two streams.
    pub async fn mux_narration(&self, video: &Path, audio: &Path, output: &Path) -> MediaResult<PathBuf> {
        let mut command = Command::new(&self.binary);
        command
            .arg("-y")
            .arg("-i")
            .arg(video)
            .arg("-i")
            .arg(audio)
            .arg("-map")
            .arg("0:v:0")
            .arg("-map")
            .arg("1:a:0")
            .arg("-c:v")
            .arg("copy")
            .arg("-c:a")
            .arg("aac")
            .arg("-shortest")
            .arg(output);
        self.run(&mut command).await?;
        Ok(output.to_path_buf())
    }

    /// Appends video segments in order. Segments must share codecs.
    pub async fn concat_videos(&self, segments: &[PathBuf], output: &Path) -> MediaResult<PathBuf> {
        self.concat(segments, output, &["-c", "copy"]).await?;
        Ok(output.to_path_buf())
    }
}

impl fmt::Debug for Ffmpeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ffmpeg").field("binary", &self.binary).finish()
    }
}

#[async_trait]
impl AudioConcatenator for Ffmpeg {
    async fn concatenate(&self, inputs: &[PathBuf], output: &Path) -> MediaResult<PathBuf> {
        self.concat(inputs, output, &["-c:a", "pcm_s16le"]).await?;
        debug!(clips = inputs.len(), output = %output.display(), "narration concatenated");
        Ok(output.to_path_buf())
    }
}
