use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::cleanup::remove_file;
use crate::config::TtsSection;
use crate::credentials::{AttemptOutcome, CredentialPool, ProviderAttempt, ProviderKind};
use crate::executor::{describe, stderr_tail, CommandExecutor, SystemCommandExecutor};

use super::wav::write_pcm;
use super::{Narrator, SpeechError, SpeechProvider, SpeechResult, VoicePair};

const AUTH_ERRORS: &[&str] = &[
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "UnrecognizedClientException",
    "AccessDenied",
];

/// Amazon Polly neural voices through `aws polly synthesize-speech`,
/// requesting raw PCM and wrapping it into WAV.
pub struct PollyProvider {
    aws: PathBuf,
    region: String,
    voices: VoicePair,
    sample_rate: u32,
    pool: Arc<Mutex<CredentialPool>>,
    executor: Arc<dyn CommandExecutor>,
}

impl PollyProvider {
    pub fn new(config: &TtsSection, pool: Arc<Mutex<CredentialPool>>) -> Self {
        Self {
            aws: PathBuf::from(&config.polly.aws_binary),
            region: config.polly.region.clone(),
            voices: VoicePair::new(&config.polly.female_voice, &config.polly.male_voice),
            sample_rate: config.sample_rate,
            pool,
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }
}

impl fmt::Debug for PollyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollyProvider")
            .field("aws", &self.aws)
            .field("region", &self.region)
            .field("voices", &self.voices)
            .finish()
    }
}

#[async_trait]
impl SpeechProvider for PollyProvider {
    fn name(&self) -> &str {
        "polly"
    }

    async fn synthesize(&self, text: &str, voice: Narrator, output: &Path) -> SpeechResult<()> {
        let credential = {
            let mut pool = self.pool.lock().await;
            pool.acquire(ProviderKind::Polly).await
        };
        let Some(credential) = credential else {
            return Err(SpeechError::NoCredentials(ProviderKind::Polly));
        };

        let pcm = output.with_extension("polly.pcm");
        let mut command = Command::new(&self.aws);
        command
            .arg("polly")
            .arg("synthesize-speech")
            .arg("--region")
            .arg(&self.region)
            .arg("--engine")
            .arg("neural")
            .arg("--output-format")
            .arg("pcm")
            .arg("--sample-rate")
            .arg(self.sample_rate.to_string())
            .arg("--voice-id")
            .arg(self.voices.for_narrator(voice))
            .arg("--text")
            .arg(text)
            .arg(&pcm)
            .env("AWS_ACCESS_KEY_ID", credential.account.as_deref().unwrap_or_default())
            .env("AWS_SECRET_ACCESS_KEY", &credential.secret);

        let started = Instant::now();
        let result = self.executor.run(&mut command).await;
        let (outcome, failure) = match &result {
            Ok(out) if out.status.success() => (AttemptOutcome::Success, None),
            Ok(out) => {
                let stderr = stderr_tail(out);
                let outcome = if AUTH_ERRORS.iter().any(|code| stderr.contains(code)) {
                    AttemptOutcome::FatalFailure
                } else {
                    AttemptOutcome::RetryableFailure
                };
                (
                    outcome,
                    Some(SpeechError::CommandFailure {
                        command: describe(&command),
                        status: out.status.code(),
                        stderr,
                    }),
                )
            }
            Err(err) => (
                AttemptOutcome::RetryableFailure,
                Some(SpeechError::Io(std::io::Error::new(err.kind(), err.to_string()))),
            ),
        };
        ProviderAttempt {
            provider: self.name().to_string(),
            credential_id: Some(credential.id.clone()),
            outcome,
            latency: started.elapsed(),
            error: failure.as_ref().map(ToString::to_string),
        }
        .log();
        self.pool.lock().await.report(&credential.id, outcome);
        if let Some(err) = failure {
            remove_file(&pcm).await;
            return Err(err);
        }

        let bytes = tokio::fs::read(&pcm).await?;
        remove_file(&pcm).await;
        if bytes.len() < 2 {
            return Err(SpeechError::EmptyAudio("polly returned no pcm".into()));
        }
        write_pcm(output, &bytes, self.sample_rate)?;
        Ok(())
    }
}
