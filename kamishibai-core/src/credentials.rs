use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::KamishibaiConfig;
use crate::retry::{Sleeper, TokioSleeper};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Gemini,
    Polly,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Gemini => f.write_str("gemini"),
            ProviderKind::Polly => f.write_str("polly"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Available,
    CoolingDown,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    RetryableFailure,
    /// Quota or permission signal (HTTP 403/429): the credential is done.
    FatalFailure,
}

#[derive(Clone)]
pub struct Credential {
    pub id: String,
    pub provider: ProviderKind,
    /// Account identifier paired with the secret, when the provider needs one.
    pub account: Option<String>,
    pub secret: String,
    pub health: HealthState,
    pub consecutive_failures: u32,
}

impl Credential {
    pub fn new(provider: ProviderKind, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        Self {
            id: fingerprint(provider, &secret),
            provider,
            account: None,
            secret,
            health: HealthState::Available,
            consecutive_failures: 0,
        }
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    fn reset(&mut self) {
        self.health = HealthState::Available;
        self.consecutive_failures = 0;
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("health", &self.health)
            .field("consecutive_failures", &self.consecutive_failures)
            .finish()
    }
}

fn fingerprint(provider: ProviderKind, secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    format!("{provider}-{}", &hex::encode(digest)[..8])
}

/// One provider call, logged and dropped.
#[derive(Debug, Clone)]
pub struct ProviderAttempt {
    pub provider: String,
    pub credential_id: Option<String>,
    pub outcome: AttemptOutcome,
    pub latency: Duration,
    pub error: Option<String>,
}

impl ProviderAttempt {
    pub fn log(&self) {
        match self.outcome {
            AttemptOutcome::Success => debug!(
                provider = %self.provider,
                credential = ?self.credential_id,
                latency_ms = self.latency.as_millis() as u64,
                "provider attempt succeeded"
            ),
            outcome => warn!(
                provider = %self.provider,
                credential = ?self.credential_id,
                outcome = ?outcome,
                latency_ms = self.latency.as_millis() as u64,
                error = self.error.as_deref().unwrap_or(""),
                "provider attempt failed"
            ),
        }
    }
}

/// Rotating set of credentials per provider. In-memory only; health is
/// mutated on every report and reset once a whole provider has cooled down.
pub struct CredentialPool {
    credentials: Vec<Credential>,
    cursors: HashMap<ProviderKind, usize>,
    failure_threshold: u32,
    cooldown: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl CredentialPool {
    pub fn new(credentials: Vec<Credential>, failure_threshold: u32, cooldown: Duration) -> Self {
        let mut seen = std::collections::HashSet::new();
        let credentials = credentials
            .into_iter()
            .filter(|credential| !credential.secret.trim().is_empty())
            .filter(|credential| seen.insert(credential.id.clone()))
            .collect();
        Self {
            credentials,
            cursors: HashMap::new(),
            failure_threshold: failure_threshold.max(1),
            cooldown,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn from_config(config: &KamishibaiConfig) -> Self {
        let mut credentials: Vec<Credential> = config
            .llm
            .api_keys
            .iter()
            .map(|key| Credential::new(ProviderKind::Gemini, key.clone()))
            .collect();
        let polly = &config.tts.polly;
        if let (Some(access), Some(secret)) = (&polly.access_key, &polly.secret_key) {
            credentials.push(Credential::new(ProviderKind::Polly, secret.clone()).with_account(access.clone()));
        }
        let pool = Self::new(
            credentials,
            config.policy.credential_failure_threshold,
            config.policy.credential_cooldown(),
        );
        info!(
            gemini = pool.count(ProviderKind::Gemini),
            polly = pool.count(ProviderKind::Polly),
            "credential pool loaded"
        );
        pool
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn count(&self, kind: ProviderKind) -> usize {
        self.credentials.iter().filter(|c| c.provider == kind).count()
    }

    pub fn health(&self, credential_id: &str) -> Option<HealthState> {
        self.credentials
            .iter()
            .find(|c| c.id == credential_id)
            .map(|c| c.health)
    }

    fn indices(&self, kind: ProviderKind) -> Vec<usize> {
        self.credentials
            .iter()
            .enumerate()
            .filter(|(_, c)| c.provider == kind)
            .map(|(index, _)| index)
            .collect()
    }

    /// Positions the rotation so the next `acquire` starts at `index`
    /// (modulo the number of credentials of that kind).
    pub fn start_at(&mut self, kind: ProviderKind, index: usize) {
        let count = self.count(kind);
        if count > 0 {
            self.cursors.insert(kind, index % count);
        }
    }

    /// Next usable credential in rotation order. When every credential of the
    /// kind is exhausted, waits the cooldown, resets them all and hands out
    /// the first one. `None` means the kind has no credentials at all.
    pub async fn acquire(&mut self, kind: ProviderKind) -> Option<Credential> {
        let indices = self.indices(kind);
        if indices.is_empty() {
            return None;
        }
        let cursor = self.cursors.get(&kind).copied().unwrap_or(0) % indices.len();
        for offset in 0..indices.len() {
            let position = (cursor + offset) % indices.len();
            let credential = &self.credentials[indices[position]];
            if credential.health != HealthState::Exhausted {
                self.cursors.insert(kind, (position + 1) % indices.len());
                return Some(credential.clone());
            }
        }

        warn!(
            provider = %kind,
            cooldown = ?self.cooldown,
            "all credentials exhausted, waiting for cooldown"
        );
        self.sleeper.sleep(self.cooldown).await;
        for index in &indices {
            self.credentials[*index].reset();
        }
        self.cursors.insert(kind, 1 % indices.len());
        Some(self.credentials[indices[0]].clone())
    }

    pub fn report(&mut self, credential_id: &str, outcome: AttemptOutcome) {
        let threshold = self.failure_threshold;
        let Some(credential) = self.credentials.iter_mut().find(|c| c.id == credential_id) else {
            debug!(credential = credential_id, "report for unknown credential ignored");
            return;
        };
        match outcome {
            AttemptOutcome::Success => credential.reset(),
            AttemptOutcome::RetryableFailure => {
                credential.consecutive_failures += 1;
                credential.health = if credential.consecutive_failures >= threshold {
                    HealthState::Exhausted
                } else {
                    HealthState::CoolingDown
                };
            }
            AttemptOutcome::FatalFailure => {
                credential.consecutive_failures += 1;
                credential.health = HealthState::Exhausted;
            }
        }
        if credential.health == HealthState::Exhausted {
            info!(
                provider = %credential.provider,
                credential = %credential.id,
                failures = credential.consecutive_failures,
                "credential exhausted"
            );
        }
    }
}

impl fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPool")
            .field("credentials", &self.credentials)
            .field("failure_threshold", &self.failure_threshold)
            .field("cooldown", &self.cooldown)
            .finish()
    }
}
