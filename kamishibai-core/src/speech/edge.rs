use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::cleanup::remove_file;
use crate::config::TtsSection;
use crate::executor::{describe, stderr_tail, CommandExecutor, SystemCommandExecutor};

use super::{Narrator, SpeechError, SpeechProvider, SpeechResult, VoicePair};

/// Free neural voices through the `edge-tts` CLI. Produces MP3, which is
/// converted to 16-bit mono WAV with ffmpeg.
pub struct EdgeTtsProvider {
    binary: PathBuf,
    ffmpeg: PathBuf,
    voices: VoicePair,
    sample_rate: u32,
    executor: Arc<dyn CommandExecutor>,
}

impl EdgeTtsProvider {
    pub fn new(config: &TtsSection) -> Self {
        Self {
            binary: PathBuf::from(&config.edge.binary),
            ffmpeg: PathBuf::from(&config.edge.ffmpeg_binary),
            voices: VoicePair::new(&config.edge.female_voice, &config.edge.male_voice),
            sample_rate: config.sample_rate,
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    async fn run(&self, command: &mut Command) -> SpeechResult<()> {
        let output = self.executor.run(command).await?;
        if !output.status.success() {
            return Err(SpeechError::CommandFailure {
                command: describe(command),
                status: output.status.code(),
                stderr: stderr_tail(&output),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for EdgeTtsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeTtsProvider")
            .field("binary", &self.binary)
            .field("ffmpeg", &self.ffmpeg)
            .field("voices", &self.voices)
            .finish()
    }
}

#[async_trait]
impl SpeechProvider for EdgeTtsProvider {
    fn name(&self) -> &str {
        "edge"
    }

    async fn synthesize(&self, text: &str, voice: Narrator, output: &Path) -> SpeechResult<()> {
        let mp3 = output.with_extension("edge.mp3");
        let voice_name = self.voices.for_narrator(voice);

        let mut tts = Command::new(&self.binary);
        tts.arg("--voice")
            .arg(voice_name)
            .arg("--text")
            .arg(text)
            .arg("--write-media")
            .arg(&mp3);
        let generated = self.run(&mut tts).await;
        if let Err(err) = generated {
            remove_file(&mp3).await;
            return Err(err);
        }
        if !non_empty(&mp3).await {
            remove_file(&mp3).await;
            return Err(SpeechError::EmptyAudio("edge-tts wrote no mp3".into()));
        }

        let mut convert = Command::new(&self.ffmpeg);
        convert
            .arg("-y")
            .arg("-i")
            .arg(&mp3)
            .arg("-ar")
            .arg(self.sample_rate.to_string())
            .arg("-ac")
            .arg("1")
            .arg("-sample_fmt")
            .arg("s16")
            .arg(output);
        let converted = self.run(&mut convert).await;
        remove_file(&mp3).await;
        converted?;

        if !non_empty(output).await {
            return Err(SpeechError::EmptyAudio("wav conversion produced nothing".into()));
        }
        debug!(voice = voice_name, path = %output.display(), "edge synthesis complete");
        Ok(())
    }
}

async fn non_empty(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.len() > 0)
        .unwrap_or(false)
}
