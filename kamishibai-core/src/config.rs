use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct KamishibaiConfig {
    pub channel: ChannelSection,
    pub paths: PathsSection,
    pub llm: LlmSection,
    pub tts: TtsSection,
    pub render: RenderSection,
    #[serde(default)]
    pub publish: PublishSection,
    #[serde(default)]
    pub policy: PolicySection,
}

impl KamishibaiConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.output_dir)
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.temp_dir)
    }

    pub fn history_db(&self) -> PathBuf {
        self.resolve_path(&self.paths.history_db)
    }

    /// Reads every `*_env` indirection once. Nothing else in the crate
    /// consults the process environment.
    pub fn resolve_secrets(&mut self) {
        self.resolve_secrets_with(|name| std::env::var(name).ok());
    }

    pub fn resolve_secrets_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.llm.api_keys.is_empty() {
            if let Some(raw) = self.llm.api_keys_env.as_deref().and_then(&lookup) {
                self.llm.api_keys = split_keys(&raw);
            }
        }
        if self.tts.polly.access_key.is_none() {
            self.tts.polly.access_key = self.tts.polly.access_key_env.as_deref().and_then(&lookup);
        }
        if self.tts.polly.secret_key.is_none() {
            self.tts.polly.secret_key = self.tts.polly.secret_key_env.as_deref().and_then(&lookup);
        }
        if self.publish.client_id.is_none() {
            self.publish.client_id = self.publish.client_id_env.as_deref().and_then(&lookup);
        }
        if self.publish.client_secret.is_none() {
            self.publish.client_secret =
                self.publish.client_secret_env.as_deref().and_then(&lookup);
        }
        if self.publish.refresh_token.is_none() {
            self.publish.refresh_token =
                self.publish.refresh_token_env.as_deref().and_then(&lookup);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.llm.api_keys.is_empty() {
            return Err(ConfigError::invalid(
                "llm.api_keys",
                "is empty and llm.api_keys_env resolved to nothing",
            ));
        }
        if self.channel.speakers.len() != 2 {
            return Err(ConfigError::invalid(
                "channel.speakers",
                format!("must name exactly two narrators, got {}", self.channel.speakers.len()),
            ));
        }
        let policy = &self.policy;
        for (key, value) in [
            ("policy.dedup_similarity", policy.dedup_similarity),
            ("policy.honne_similarity", policy.honne_similarity),
            ("policy.news_similarity", policy.news_similarity),
            ("policy.silence_fraction_limit", policy.silence_fraction_limit),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::invalid(key, format!("must be within [0, 1], got {value}")));
            }
        }
        if policy.max_detail_attempts == 0 {
            return Err(ConfigError::invalid("policy.max_detail_attempts", "must be greater than zero"));
        }
        if policy.render_attempts == 0 {
            return Err(ConfigError::invalid("policy.render_attempts", "must be greater than zero"));
        }
        Ok(())
    }
}

pub fn split_keys(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelSection {
    pub name: String,
    pub theme: String,
    #[serde(default = "default_channel_color")]
    pub color: String,
    #[serde(default)]
    pub group: ChannelGroup,
    #[serde(default = "default_speakers")]
    pub speakers: Vec<String>,
    #[serde(default)]
    pub material_path: Option<String>,
    #[serde(default)]
    pub playlist_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelGroup {
    #[default]
    Documentary,
    Kamishibai,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub output_dir: String,
    pub temp_dir: String,
    pub history_db: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    pub endpoint: String,
    pub model: String,
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default)]
    pub api_keys_env: Option<String>,
    #[serde(default = "default_llm_timeout")]
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TtsSection {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    pub edge: EdgeSection,
    pub polly: PollySection,
    pub gemini: GeminiTtsSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EdgeSection {
    pub binary: String,
    pub ffmpeg_binary: String,
    pub female_voice: String,
    pub male_voice: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollySection {
    pub aws_binary: String,
    pub region: String,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub access_key_env: Option<String>,
    #[serde(default)]
    pub secret_key_env: Option<String>,
    pub female_voice: String,
    pub male_voice: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeminiTtsSection {
    pub model: String,
    pub female_voice: String,
    pub male_voice: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenderSection {
    pub npx_binary: String,
    pub ffmpeg_binary: String,
    pub project_dir: String,
    pub entry_point: String,
    pub composition: String,
    pub timeout_seconds: u64,
    pub concurrency: u32,
    pub slide_duration_frames: u64,
    #[serde(default)]
    pub epilogue_video: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishSection {
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_upload_base")]
    pub upload_base: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub client_id_env: Option<String>,
    #[serde(default)]
    pub client_secret_env: Option<String>,
    #[serde(default)]
    pub refresh_token_env: Option<String>,
    #[serde(default = "default_privacy")]
    pub privacy_status: String,
    #[serde(default = "default_category")]
    pub category_id: String,
    /// Random extra seconds added to each chunk-upload retry.
    #[serde(default = "default_upload_jitter")]
    pub upload_jitter_seconds: u64,
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            token_url: default_token_url(),
            api_base: default_api_base(),
            upload_base: default_upload_base(),
            channel_id: None,
            client_id: None,
            client_secret: None,
            refresh_token: None,
            client_id_env: None,
            client_secret_env: None,
            refresh_token_env: None,
            privacy_status: default_privacy(),
            category_id: default_category(),
            upload_jitter_seconds: default_upload_jitter(),
        }
    }
}

/// Tunable thresholds. The defaults reproduce the production channel's
/// behaviour; none of them is load-bearing beyond "some threshold exists".
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicySection {
    pub dedup_similarity: f64,
    pub honne_similarity: f64,
    pub news_similarity: f64,
    pub min_script_lines: usize,
    pub max_detail_attempts: u32,
    pub silence_fraction_limit: f64,
    pub max_charts: usize,
    pub credential_cooldown_seconds: u64,
    pub credential_failure_threshold: u32,
    pub render_attempts: u32,
    pub render_backoff_seconds: u64,
    pub tts_attempts: u32,
    pub tts_backoff_seconds: u64,
    pub quality_min_chars: usize,
    pub quality_min_lines: usize,
    pub theme_keywords: Vec<String>,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            dedup_similarity: 0.75,
            honne_similarity: 0.60,
            news_similarity: 0.50,
            min_script_lines: 35,
            max_detail_attempts: 10,
            silence_fraction_limit: 0.5,
            max_charts: 8,
            credential_cooldown_seconds: 60,
            credential_failure_threshold: 3,
            render_attempts: 3,
            render_backoff_seconds: 10,
            tts_attempts: 2,
            tts_backoff_seconds: 5,
            quality_min_chars: 700,
            quality_min_lines: 10,
            theme_keywords: ["損", "得", "知らない", "見落とし", "間に合う"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

impl PolicySection {
    pub fn credential_cooldown(&self) -> Duration {
        Duration::from_secs(self.credential_cooldown_seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    Test,
    ShortProd,
    Prod,
    ScriptOnly,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Test => "test",
            RunMode::ShortProd => "short-prod",
            RunMode::Prod => "prod",
            RunMode::ScriptOnly => "script-only",
        }
    }

    pub fn publishes(&self) -> bool {
        matches!(self, RunMode::Prod)
    }

    pub fn renders(&self) -> bool {
        !matches!(self, RunMode::ScriptOnly)
    }

    /// Number of leading script lines kept for the run, `None` keeps all.
    pub fn line_limit(&self) -> Option<usize> {
        match self {
            RunMode::ShortProd => Some(5),
            _ => None,
        }
    }

    pub fn render_profile(&self) -> RenderProfile {
        match self {
            RunMode::ShortProd => RenderProfile {
                width: 960,
                height: 540,
                fps: 12,
            },
            _ => RenderProfile {
                width: 1920,
                height: 1080,
                fps: 24,
            },
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "test" => Ok(RunMode::Test),
            "short-prod" => Ok(RunMode::ShortProd),
            "prod" => Ok(RunMode::Prod),
            "script-only" => Ok(RunMode::ScriptOnly),
            other => Err(format!("unknown run mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderProfile {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

fn default_channel_color() -> String {
    "#e74c3c".into()
}

fn default_upload_jitter() -> u64 {
    3
}

fn default_speakers() -> Vec<String> {
    vec!["カツミ".into(), "ヒロシ".into()]
}

fn default_llm_timeout() -> u64 {
    300
}

fn default_sample_rate() -> u32 {
    16_000
}

fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".into()
}

fn default_api_base() -> String {
    "https://www.googleapis.com/youtube/v3".into()
}

fn default_upload_base() -> String {
    "https://www.googleapis.com/upload/youtube/v3".into()
}

fn default_privacy() -> String {
    "public".into()
}

fn default_category() -> String {
    "22".into()
}

/// Loads the config file and resolves `*_env` secrets.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<KamishibaiConfig> {
    let mut config: KamishibaiConfig = load_toml(path)?;
    config.resolve_secrets();
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
