use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::cleanup::remove_files;
use crate::script::Line;

use super::normalize::{normalize, NormalizedText};
use super::wav::{duration_seconds, write_silence};
use super::{Narrator, SpeechError, SpeechProvider, SpeechResult};

/// Fixed silence for lines with nothing to pronounce.
pub const SKIP_SECONDS: f64 = 0.5;
const CHARS_PER_SECOND: f64 = 5.0;

#[derive(Debug, Clone, PartialEq)]
pub enum ClipKind {
    Speech { provider: String },
    Skipped,
    /// Every provider failed; placeholder sized from the text length.
    Silence,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineAudio {
    pub index: usize,
    pub path: PathBuf,
    pub kind: ClipKind,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynthesisReport {
    pub clips: Vec<LineAudio>,
    pub silent_lines: usize,
    pub skipped_lines: usize,
}

impl SynthesisReport {
    /// Placeholder lines over all lines, skipped ones included.
    pub fn silence_fraction(&self) -> f64 {
        if self.clips.is_empty() {
            0.0
        } else {
            self.silent_lines as f64 / self.clips.len() as f64
        }
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.clips.iter().map(|clip| clip.path.clone()).collect()
    }

    pub fn durations(&self) -> Vec<f64> {
        self.clips.iter().map(|clip| clip.duration_seconds).collect()
    }
}

/// Per-line cascade across the configured providers, in order.
pub struct SpeechSynthesizer {
    providers: Vec<Arc<dyn SpeechProvider>>,
    sample_rate: u32,
    silence_limit: f64,
    female_speaker: String,
}

impl fmt::Debug for SpeechSynthesizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpeechSynthesizer")
            .field(
                "providers",
                &self.providers.iter().map(|p| p.name().to_string()).collect::<Vec<_>>(),
            )
            .field("sample_rate", &self.sample_rate)
            .field("silence_limit", &self.silence_limit)
            .finish()
    }
}

impl SpeechSynthesizer {
    pub fn new(
        providers: Vec<Arc<dyn SpeechProvider>>,
        sample_rate: u32,
        silence_limit: f64,
        female_speaker: impl Into<String>,
    ) -> Self {
        Self {
            providers,
            sample_rate,
            silence_limit,
            female_speaker: female_speaker.into(),
        }
    }

    pub fn clip_path(dir: &Path, index: usize) -> PathBuf {
        dir.join(format!("line_{index}.wav"))
    }

    /// Tries each provider in order; `None` when all of them failed.
    pub async fn synthesize_line(
        &self,
        index: usize,
        text: &str,
        voice: Narrator,
        output: &Path,
    ) -> Option<String> {
        for provider in &self.providers {
            match provider.synthesize(text, voice, output).await {
                Ok(()) => return Some(provider.name().to_string()),
                Err(err) => warn!(
                    line = index,
                    provider = provider.name(),
                    error = %err,
                    "speech provider failed, trying next"
                ),
            }
        }
        None
    }

    /// Synthesizes every line into `dir`. Exceeding the silence limit removes
    /// the clips and fails the run.
    pub async fn synthesize_script(&self, lines: &[Line], dir: &Path) -> SpeechResult<SynthesisReport> {
        tokio::fs::create_dir_all(dir).await?;
        info!(lines = lines.len(), providers = self.providers.len(), "speech synthesis started");

        let mut report = SynthesisReport::default();
        for (index, line) in lines.iter().enumerate() {
            let path = Self::clip_path(dir, index);
            let clip = match self.line_clip(index, line, &path).await {
                Ok(clip) => clip,
                Err(err) => {
                    let mut written = report.paths();
                    written.push(path);
                    remove_files(&written).await;
                    return Err(err);
                }
            };
            match clip.kind {
                ClipKind::Silence => report.silent_lines += 1,
                ClipKind::Skipped => report.skipped_lines += 1,
                ClipKind::Speech { .. } => {}
            }
            report.clips.push(clip);
        }

        let fraction = report.silence_fraction();
        if fraction > self.silence_limit {
            warn!(
                silent = report.silent_lines,
                total = report.clips.len(),
                "too many silent lines, aborting before assembly"
            );
            remove_files(&report.paths()).await;
            return Err(SpeechError::SilenceThresholdExceeded {
                silent: report.silent_lines,
                total: report.clips.len(),
                fraction,
            });
        }
        info!(
            clips = report.clips.len(),
            silent = report.silent_lines,
            skipped = report.skipped_lines,
            "speech synthesis complete"
        );
        Ok(report)
    }

    async fn line_clip(&self, index: usize, line: &Line, path: &Path) -> SpeechResult<LineAudio> {
        let text = match normalize(&line.text) {
            NormalizedText::Skip => {
                info!(line = index, "nothing to pronounce, inserting short silence");
                write_silence(path, SKIP_SECONDS, self.sample_rate)?;
                return Ok(LineAudio {
                    index,
                    path: path.to_path_buf(),
                    kind: ClipKind::Skipped,
                    duration_seconds: SKIP_SECONDS,
                });
            }
            NormalizedText::Speak(text) => text,
        };

        let voice = Narrator::resolve(&line.voice, &line.speaker, &self.female_speaker);
        match self.synthesize_line(index, &text, voice, path).await {
            Some(provider) => {
                let seconds = duration_seconds(path)?;
                Ok(LineAudio {
                    index,
                    path: path.to_path_buf(),
                    kind: ClipKind::Speech { provider },
                    duration_seconds: seconds,
                })
            }
            None => {
                let seconds = (line.text.chars().count() as f64 / CHARS_PER_SECOND).max(1.0);
                warn!(line = index, seconds, "every speech provider failed, inserting silence");
                write_silence(path, seconds, self.sample_rate)?;
                Ok(LineAudio {
                    index,
                    path: path.to_path_buf(),
                    kind: ClipKind::Silence,
                    duration_seconds: seconds,
                })
            }
        }
    }
}
