use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use crate::cleanup::remove_file;
use crate::config::KamishibaiConfig;
use crate::credentials::{AttemptOutcome, CredentialPool, ProviderAttempt, ProviderKind};
use crate::executor::{describe, stderr_tail, CommandExecutor, SystemCommandExecutor};
use crate::llm::{generate_content_url, TransportError};
use crate::retry::{RetryOutcome, RetryPolicy, Sleeper, TokioSleeper};

use super::wav::write_pcm;
use super::{Narrator, SpeechError, SpeechProvider, SpeechResult, VoicePair};

/// Gemini returns 24 kHz PCM; it is resampled to the pipeline rate.
const GEMINI_SAMPLE_RATE: u32 = 24_000;

/// Last-resort TTS on the same key pool as the LLM. Retried with a fixed
/// backoff; a rate-limit answer ends the retries at once.
pub struct GeminiSpeechProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    voices: VoicePair,
    ffmpeg: PathBuf,
    sample_rate: u32,
    pool: Arc<Mutex<CredentialPool>>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    executor: Arc<dyn CommandExecutor>,
}

impl GeminiSpeechProvider {
    pub fn new(config: &KamishibaiConfig, pool: Arc<Mutex<CredentialPool>>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.llm.endpoint.clone(),
            model: config.tts.gemini.model.clone(),
            voices: VoicePair::new(&config.tts.gemini.female_voice, &config.tts.gemini.male_voice),
            ffmpeg: PathBuf::from(&config.tts.edge.ffmpeg_binary),
            sample_rate: config.tts.sample_rate,
            pool,
            retry: RetryPolicy::fixed(
                config.policy.tts_attempts,
                Duration::from_secs(config.policy.tts_backoff_seconds),
            ),
            sleeper: Arc::new(TokioSleeper),
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    async fn fetch_audio<F, Fut>(&self, attempt: F) -> SpeechResult<RetryOutcome<Vec<u8>>>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = SpeechResult<Vec<u8>>>,
    {
        self.retry
            .run("gemini-tts", self.sleeper.as_ref(), SpeechError::is_retryable, attempt)
            .await
            .map_err(|exhausted| exhausted.error)
    }

    async fn attempt(&self, text: &str, voice_name: &str) -> SpeechResult<Vec<u8>> {
        let credential = {
            let mut pool = self.pool.lock().await;
            pool.acquire(ProviderKind::Gemini).await
        };
        let Some(credential) = credential else {
            return Err(SpeechError::NoCredentials(ProviderKind::Gemini));
        };

        let started = Instant::now();
        let result = self.request(&credential.secret, text, voice_name).await;
        let outcome = match &result {
            Ok(_) => AttemptOutcome::Success,
            Err(err) => err.outcome(),
        };
        ProviderAttempt {
            provider: "gemini-tts".to_string(),
            credential_id: Some(credential.id.clone()),
            outcome,
            latency: started.elapsed(),
            error: result.as_ref().err().map(ToString::to_string),
        }
        .log();
        self.pool.lock().await.report(&credential.id, outcome);

        let encoded = result?;
        Ok(STANDARD.decode(encoded)?)
    }

    async fn request(&self, api_key: &str, text: &str, voice_name: &str) -> Result<String, TransportError> {
        let body = SpeechRequest {
            contents: vec![SpeechContent {
                parts: vec![TextPart {
                    text: text.to_string(),
                }],
            }],
            generation_config: SpeechGenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice_name.to_string(),
                        },
                    },
                },
            },
        };
        let response = self
            .client
            .post(generate_content_url(&self.endpoint, &self.model))
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: body.chars().take(300).collect(),
            });
        }
        let payload: SpeechResponse = response.json().await?;
        payload
            .candidates
            .into_iter()
            .filter_map(|candidate| candidate.content)
            .flat_map(|content| content.parts)
            .find_map(|part| part.inline_data.map(|data| data.data))
            .ok_or(TransportError::EmptyResponse)
    }

    async fn resample(&self, source: &Path, output: &Path) -> SpeechResult<()> {
        let mut command = Command::new(&self.ffmpeg);
        command
            .arg("-y")
            .arg("-i")
            .arg(source)
            .arg("-ar")
            .arg(self.sample_rate.to_string())
            .arg("-ac")
            .arg("1")
            .arg("-sample_fmt")
            .arg("s16")
            .arg(output);
        let result = self.executor.run(&mut command).await?;
        if !result.status.success() {
            return Err(SpeechError::CommandFailure {
                command: describe(&command),
                status: result.status.code(),
                stderr: stderr_tail(&result),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for GeminiSpeechProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiSpeechProvider")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("voices", &self.voices)
            .field("retry", &self.retry)
            .finish()
    }
}

#[async_trait]
impl SpeechProvider for GeminiSpeechProvider {
    fn name(&self) -> &str {
        "gemini-tts"
    }

    async fn synthesize(&self, text: &str, voice: Narrator, output: &Path) -> SpeechResult<()> {
        let voice_name = self.voices.for_narrator(voice);
        let outcome = self.fetch_audio(|_| self.attempt(text, voice_name)).await?;
        let pcm = outcome.result;
        if pcm.len() < 2 {
            return Err(SpeechError::EmptyAudio("gemini returned no audio".into()));
        }

        let raw = output.with_extension("gemini.wav");
        write_pcm(&raw, &pcm, GEMINI_SAMPLE_RATE)?;
        let resampled = self.resample(&raw, output).await;
        remove_file(&raw).await;
        resampled?;
        debug!(voice = voice_name, attempts = outcome.attempts, "gemini synthesis complete");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechRequest {
    contents: Vec<SpeechContent>,
    generation_config: SpeechGenerationConfig,
}

#[derive(Debug, Serialize)]
struct SpeechContent {
    parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
struct TextPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechGenerationConfig {
    response_modalities: Vec<String>,
    speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Debug, Deserialize)]
struct SpeechResponse {
    #[serde(default)]
    candidates: Vec<SpeechCandidate>,
}

#[derive(Debug, Deserialize)]
struct SpeechCandidate {
    #[serde(default)]
    content: Option<SpeechCandidateContent>,
}

#[derive(Debug, Deserialize)]
struct SpeechCandidateContent {
    #[serde(default)]
    parts: Vec<AudioPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AudioPart {
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::config::load_config;
    use crate::retry::RecordingSleeper;

    fn provider(sleeper: &RecordingSleeper) -> GeminiSpeechProvider {
        let config = load_config(Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/kamishibai.toml")).unwrap();
        let pool = Arc::new(Mutex::new(CredentialPool::new(Vec::new(), 3, Duration::from_secs(60))));
        GeminiSpeechProvider::new(&config, pool).with_sleeper(Arc::new(sleeper.clone()))
    }

    fn status(status: u16) -> SpeechError {
        SpeechError::Transport(TransportError::Status {
            status,
            body: "backend".into(),
        })
    }

    #[tokio::test]
    async fn server_error_is_retried_after_fixed_backoff() {
        let sleeper = RecordingSleeper::new();
        let outcome = provider(&sleeper)
            .fetch_audio(|attempt| async move {
                if attempt == 0 {
                    Err(status(500))
                } else {
                    Ok(vec![0u8; 4])
                }
            })
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(sleeper.waits(), vec![Duration::from_secs(5)]);
    }

    #[tokio::test]
    async fn rate_limit_ends_retries_at_once() {
        let sleeper = RecordingSleeper::new();
        let calls = AtomicUsize::new(0);
        let err = provider(&sleeper)
            .fetch_audio(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(status(429)) }
            })
            .await
            .unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.waits().is_empty());
    }

    #[tokio::test]
    async fn missing_key_pool_fails_without_waiting() {
        let sleeper = RecordingSleeper::new();
        let provider = provider(&sleeper);
        let err = provider
            .synthesize("はい", Narrator::Female, Path::new("unused.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, SpeechError::NoCredentials(ProviderKind::Gemini)));
        assert!(sleeper.waits().is_empty());
    }

    #[test]
    fn response_inline_audio_is_found() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"x"},{"inlineData":{"mimeType":"audio/L16","data":"AAA="}}]}}]}"#;
        let payload: SpeechResponse = serde_json::from_str(raw).unwrap();
        let data = payload
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .find_map(|p| p.inline_data.map(|d| d.data));
        assert_eq!(data.as_deref(), Some("AAA="));
    }

    #[test]
    fn request_uses_audio_modality() {
        let body = SpeechRequest {
            contents: vec![SpeechContent {
                parts: vec![TextPart { text: "はい".into() }],
            }],
            generation_config: SpeechGenerationConfig {
                response_modalities: vec!["AUDIO".into()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: "Kore".into(),
                        },
                    },
                },
            },
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            value["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
    }
}
