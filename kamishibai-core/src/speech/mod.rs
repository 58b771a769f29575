mod edge;
mod gemini;
pub mod normalize;
mod polly;
mod synthesizer;
pub mod wav;

use std::fmt;
use std::io;
use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use crate::credentials::ProviderKind;
use crate::llm::TransportError;

pub use edge::EdgeTtsProvider;
pub use gemini::GeminiSpeechProvider;
pub use normalize::{normalize, NormalizedText};
pub use polly::PollyProvider;
pub use synthesizer::{ClipKind, LineAudio, SpeechSynthesizer, SynthesisReport, SKIP_SECONDS};

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
    #[error("command failed ({command}): {stderr}")]
    CommandFailure {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("audio payload could not be decoded: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("provider returned no audio: {0}")]
    EmptyAudio(String),
    #[error("no {0} credentials configured")]
    NoCredentials(ProviderKind),
    #[error("{silent} of {total} lines fell back to silence ({:.1}%)", .fraction * 100.0)]
    SilenceThresholdExceeded {
        silent: usize,
        total: usize,
        fraction: f64,
    },
}

impl SpeechError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SpeechError::Transport(err) if err.is_rate_limited())
    }

    /// A rate-limit answer or a missing key ends the retries at once.
    pub fn is_retryable(&self) -> bool {
        !self.is_rate_limited() && !matches!(self, SpeechError::NoCredentials(_))
    }
}

pub type SpeechResult<T> = Result<T, SpeechError>;

/// Which narrator speaks a line; each provider maps it to its own voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Narrator {
    Female,
    Male,
}

impl Narrator {
    /// Resolves a line's voice tag, falling back to who is speaking.
    pub fn resolve(voice: &str, speaker: &str, female_speaker: &str) -> Self {
        match voice {
            "Kazuha" | "Kore" | "Aoede" => Narrator::Female,
            "Takumi" | "Puck" | "Charon" | "Fenrir" => Narrator::Male,
            _ if speaker == female_speaker => Narrator::Female,
            _ => Narrator::Male,
        }
    }
}

impl fmt::Display for Narrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Narrator::Female => f.write_str("female"),
            Narrator::Male => f.write_str("male"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoicePair {
    pub female: String,
    pub male: String,
}

impl VoicePair {
    pub fn new(female: impl Into<String>, male: impl Into<String>) -> Self {
        Self {
            female: female.into(),
            male: male.into(),
        }
    }

    pub fn for_narrator(&self, narrator: Narrator) -> &str {
        match narrator {
            Narrator::Female => &self.female,
            Narrator::Male => &self.male,
        }
    }
}

/// One TTS backend. Writes a 16-bit mono WAV to `output` on success.
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn synthesize(&self, text: &str, voice: Narrator, output: &Path) -> SpeechResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrator_resolution() {
        assert_eq!(Narrator::resolve("Kazuha", "ヒロシ", "カツミ"), Narrator::Female);
        assert_eq!(Narrator::resolve("Puck", "カツミ", "カツミ"), Narrator::Male);
        assert_eq!(Narrator::resolve("Aoede", "ヒロシ", "カツミ"), Narrator::Female);
        assert_eq!(Narrator::resolve("", "カツミ", "カツミ"), Narrator::Female);
        assert_eq!(Narrator::resolve("unknown", "ヒロシ", "カツミ"), Narrator::Male);
    }

    #[test]
    fn retryable_classification() {
        let status = |status| {
            SpeechError::Transport(TransportError::Status {
                status,
                body: String::new(),
            })
        };
        assert!(!status(429).is_retryable());
        assert!(!SpeechError::NoCredentials(ProviderKind::Gemini).is_retryable());
        assert!(status(500).is_retryable());
        assert!(SpeechError::EmptyAudio("nothing".into()).is_retryable());
    }

    #[test]
    fn silence_error_reports_percentage() {
        let err = SpeechError::SilenceThresholdExceeded {
            silent: 6,
            total: 10,
            fraction: 0.6,
        };
        assert_eq!(err.to_string(), "6 of 10 lines fell back to silence (60.0%)");
    }
}
