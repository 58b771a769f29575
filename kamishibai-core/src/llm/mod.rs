mod gemini;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::credentials::{AttemptOutcome, CredentialPool, ProviderAttempt, ProviderKind};

pub use gemini::{generate_content_url, GeminiTransport};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("completion requested with no messages")]
    EmptyPrompt,
    #[error("no {0} credentials configured")]
    NoCredentials(ProviderKind),
    #[error("all {} credential(s) failed: {}", .errors.len(), summarize(.errors))]
    AllProvidersExhausted { errors: Vec<CredentialFailure> },
}

pub type LlmResult<T> = Result<T, LlmError>;

#[derive(Debug, Clone)]
pub struct CredentialFailure {
    pub credential_id: String,
    pub error: String,
}

fn summarize(errors: &[CredentialFailure]) -> String {
    errors
        .iter()
        .map(|failure| format!("[{}] {}", failure.credential_id, failure.error))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request failed: {0}")]
    Request(String),
    #[error("response carried no text")]
    EmptyResponse,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl TransportError {
    /// 403 and 429 mean the key is revoked or out of quota.
    pub fn outcome(&self) -> AttemptOutcome {
        match self {
            TransportError::Status { status, .. } if *status == 403 || *status == 429 => {
                AttemptOutcome::FatalFailure
            }
            _ => AttemptOutcome::RetryableFailure,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, TransportError::Status { status: 429, .. })
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => TransportError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            },
            None => TransportError::Request(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub json_mode: bool,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            json_mode: false,
            max_tokens: 8192,
            temperature: 0.8,
        }
    }
}

impl CompletionOptions {
    pub fn json() -> Self {
        Self {
            json_mode: true,
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait CompletionTransport: Send + Sync {
    fn name(&self) -> &str;

    async fn send(
        &self,
        api_key: &str,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String, TransportError>;
}

/// Seam the script generator talks to.
#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> LlmResult<String>;
}

/// Stable rotation start for a channel, so reruns hit keys in the same order.
pub fn start_index(channel: &str, credential_count: usize) -> usize {
    if credential_count == 0 {
        return 0;
    }
    let digest = Sha256::digest(channel.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(bytes) % credential_count as u64) as usize
}

pub struct LlmService {
    transport: Arc<dyn CompletionTransport>,
    pool: Arc<Mutex<CredentialPool>>,
    channel: String,
    request_timeout: Duration,
}

impl fmt::Debug for LlmService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmService")
            .field("transport", &self.transport.name())
            .field("channel", &self.channel)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl LlmService {
    pub fn new(
        transport: Arc<dyn CompletionTransport>,
        pool: Arc<Mutex<CredentialPool>>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            pool,
            channel: channel.into(),
            request_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    async fn call(
        &self,
        api_key: &str,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String, TransportError> {
        match timeout(
            self.request_timeout,
            self.transport.send(api_key, messages, options),
        )
        .await
        {
            Ok(Ok(text)) if text.trim().is_empty() => Err(TransportError::EmptyResponse),
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.request_timeout)),
        }
    }
}

#[async_trait]
impl Completion for LlmService {
    /// Tries every credential of the provider at most once, starting at the
    /// channel's stable index. Raw text comes back; parsing is the caller's.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> LlmResult<String> {
        if messages.is_empty() {
            return Err(LlmError::EmptyPrompt);
        }
        let kind = ProviderKind::Gemini;
        let count = {
            let mut pool = self.pool.lock().await;
            let count = pool.count(kind);
            pool.start_at(kind, start_index(&self.channel, count));
            count
        };
        if count == 0 {
            return Err(LlmError::NoCredentials(kind));
        }

        let mut tried: Vec<String> = Vec::with_capacity(count);
        let mut errors = Vec::new();
        for _ in 0..count {
            let credential = {
                let mut pool = self.pool.lock().await;
                pool.acquire(kind).await
            };
            let Some(credential) = credential else {
                break;
            };
            if tried.contains(&credential.id) {
                break;
            }
            tried.push(credential.id.clone());

            let started = Instant::now();
            let result = self.call(&credential.secret, messages, options).await;
            let outcome = match &result {
                Ok(_) => AttemptOutcome::Success,
                Err(err) => err.outcome(),
            };
            ProviderAttempt {
                provider: self.transport.name().to_string(),
                credential_id: Some(credential.id.clone()),
                outcome,
                latency: started.elapsed(),
                error: result.as_ref().err().map(ToString::to_string),
            }
            .log();
            self.pool.lock().await.report(&credential.id, outcome);

            match result {
                Ok(text) => {
                    debug!(target: "llm", credential = %credential.id, chars = text.chars().count(), "completion received");
                    return Ok(text);
                }
                Err(err) => errors.push(CredentialFailure {
                    credential_id: credential.id,
                    error: err.to_string(),
                }),
            }
        }
        info!(target: "llm", failures = errors.len(), "every credential failed for completion");
        Err(LlmError::AllProvidersExhausted { errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{Credential, HealthState};
    use crate::retry::RecordingSleeper;
    use std::sync::Mutex as StdMutex;

    struct ScriptedTransport {
        responses: StdMutex<Vec<Result<String, TransportError>>>,
        keys_seen: StdMutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<String, TransportError>>) -> Self {
            Self {
                responses: StdMutex::new(responses),
                keys_seen: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionTransport for ScriptedTransport {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send(
            &self,
            api_key: &str,
            _messages: &[ChatMessage],
            _options: &CompletionOptions,
        ) -> Result<String, TransportError> {
            self.keys_seen.lock().unwrap().push(api_key.to_string());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Err(TransportError::EmptyResponse)
            } else {
                responses.remove(0)
            }
        }
    }

    fn service(
        keys: &[&str],
        transport: Arc<ScriptedTransport>,
    ) -> (LlmService, Arc<Mutex<CredentialPool>>) {
        let credentials = keys
            .iter()
            .map(|key| Credential::new(ProviderKind::Gemini, *key))
            .collect();
        let pool = Arc::new(Mutex::new(
            CredentialPool::new(credentials, 3, Duration::from_secs(60))
                .with_sleeper(Arc::new(RecordingSleeper::new())),
        ));
        (
            LlmService::new(transport, Arc::clone(&pool), "nenkin"),
            pool,
        )
    }

    #[tokio::test]
    async fn empty_prompt_fails_fast() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let (service, _) = service(&["a"], Arc::clone(&transport));
        let err = service
            .complete(&[], &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::EmptyPrompt));
        assert!(transport.keys_seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn falls_through_to_next_key() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(TransportError::Status {
                status: 429,
                body: "quota".into(),
            }),
            Ok("{\"ok\":true}".into()),
        ]));
        let (service, pool) = service(&["a", "b"], Arc::clone(&transport));
        let text = service
            .complete(&[ChatMessage::user("hi")], &CompletionOptions::json())
            .await
            .unwrap();
        assert_eq!(text, "{\"ok\":true}");

        let seen = transport.keys_seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        let failed = Credential::new(ProviderKind::Gemini, seen[0].clone()).id;
        assert_eq!(
            pool.lock().await.health(&failed),
            Some(HealthState::Exhausted)
        );
    }

    #[tokio::test]
    async fn start_index_is_stable() {
        assert_eq!(start_index("nenkin", 3), start_index("nenkin", 3));
        assert!(start_index("nenkin", 3) < 3);
        assert_eq!(start_index("anything", 0), 0);
    }

    #[tokio::test]
    async fn blank_text_counts_as_failure() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok("   ".into())]));
        let (service, _) = service(&["a"], transport);
        let err = service
            .complete(&[ChatMessage::user("hi")], &CompletionOptions::default())
            .await
            .unwrap_err();
        match err {
            LlmError::AllProvidersExhausted { errors } => assert_eq!(errors.len(), 1),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
