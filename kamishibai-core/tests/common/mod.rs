#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use tokio::process::Command;

use kamishibai_core::config::{load_config, KamishibaiConfig};
use kamishibai_core::executor::{describe, CommandExecutor};
use kamishibai_core::llm::{ChatMessage, Completion, CompletionOptions, LlmError, LlmResult};
use kamishibai_core::media::{AudioConcatenator, MediaError, MediaResult, VideoRenderer};
use kamishibai_core::speech::wav::write_silence;
use kamishibai_core::speech::{Narrator, SpeechError, SpeechProvider, SpeechResult};

pub const SAMPLE_RATE: u32 = 16_000;

pub fn fixture_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join(relative)
}

/// Fixture config rooted in `base`.
pub fn fixture_config(base: &TempDir) -> KamishibaiConfig {
    let mut config = load_config(fixture_path("configs/kamishibai.toml")).unwrap();
    config.paths.base_dir = base.path().to_string_lossy().to_string();
    config.llm.api_keys = vec!["fixture-key-1".into(), "fixture-key-2".into()];
    // Generated dialogue repeats topics; only identical lines are dropped.
    config.policy.dedup_similarity = 1.0;
    config
}

/// Replies in order, then fails.
pub struct CannedCompletion {
    replies: Mutex<Vec<String>>,
    calls: Mutex<usize>,
}

impl CannedCompletion {
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(replies),
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Completion for CannedCompletion {
    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> LlmResult<String> {
        *self.calls.lock().unwrap() += 1;
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            Err(LlmError::AllProvidersExhausted { errors: Vec::new() })
        } else {
            Ok(replies.remove(0))
        }
    }
}

pub fn outline_json() -> String {
    json!({
        "hook_fact": "年金の繰り下げで受給額が42%増える",
        "hook_number": "42%",
        "themes": [
            {"title": "繰り下げ受給", "chart_type": "bar", "key_data": "42%", "angle": "損得"}
        ],
        "epilogue_direction": "自分の受給開始年齢を考える",
        "stat_data": [{"topic": "受給開始年齢", "source": "厚生労働省"}]
    })
    .to_string()
}

const TOPICS: &[&str] = &[
    "年金の受給開始年齢",
    "繰り下げ受給の増額率",
    "国民年金の保険料",
    "厚生年金の加入期間",
    "遺族年金の条件",
    "障害年金の申請",
    "在職老齢年金の仕組み",
    "ねんきん定期便の見方",
];

/// Dialogue of `lines` distinct lines alternating between the two narrators.
pub fn dialogue(lines: usize) -> Vec<serde_json::Value> {
    (0..lines)
        .map(|index| {
            let speaker = if index % 2 == 0 { "カツミ" } else { "ヒロシ" };
            let topic = TOPICS[index % TOPICS.len()];
            json!({
                "speaker": speaker,
                "text": format!("{topic}について、第{}回目の確認をしておきましょう", index + 1),
                "section": "main",
            })
        })
        .collect()
}

pub fn draft_json(lines: usize) -> String {
    json!({
        "title": "年金は何歳からもらうのが得？",
        "source": "厚生労働省",
        "summary": "受給開始年齢で年金額がどう変わるかを解説します",
        "key_points": ["繰り下げで最大84%増", "繰り上げは減額"],
        "reference_sources": [{"name": "日本年金機構", "url": "https://www.nenkin.go.jp/"}],
        "first_comment": "皆さんは何歳から受け取りますか？",
        "tags": ["年金"],
        "dynamic_hashtags": ["繰り下げ受給"],
        "script": dialogue(lines),
        "polls": [{
            "question": "繰り下げ受給、する？",
            "source": "厚生労働省調査",
            "answers": [{"label": "する", "value": 30}, {"label": "しない", "value": 70}]
        }]
    })
    .to_string()
}

/// Speech provider double. Fails whenever `fails` matches the text, otherwise
/// writes a silent clip of `seconds`.
pub struct FakeSpeech {
    name: String,
    seconds: f64,
    fails: Box<dyn Fn(&str) -> bool + Send + Sync>,
    texts: Mutex<Vec<String>>,
}

impl FakeSpeech {
    pub fn new(name: &str, seconds: f64) -> Self {
        Self {
            name: name.to_string(),
            seconds,
            fails: Box::new(|_| false),
            texts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(name: &str) -> Self {
        Self::new(name, 0.0).fail_when(|_| true)
    }

    pub fn fail_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.fails = Box::new(predicate);
        self
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechProvider for FakeSpeech {
    fn name(&self) -> &str {
        &self.name
    }

    async fn synthesize(&self, text: &str, _voice: Narrator, output: &Path) -> SpeechResult<()> {
        self.texts.lock().unwrap().push(text.to_string());
        if (self.fails)(text) {
            return Err(SpeechError::EmptyAudio(format!("{} refused", self.name)));
        }
        write_silence(output, self.seconds, SAMPLE_RATE)?;
        Ok(())
    }
}

/// Writes a narration track of a fixed measured length, regardless of the
/// inputs, to simulate encoder drift.
pub struct FakeConcatenator {
    measured_seconds: f64,
    inputs: Mutex<Vec<PathBuf>>,
}

impl FakeConcatenator {
    pub fn new(measured_seconds: f64) -> Self {
        Self {
            measured_seconds,
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn inputs(&self) -> Vec<PathBuf> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioConcatenator for FakeConcatenator {
    async fn concatenate(&self, inputs: &[PathBuf], output: &Path) -> MediaResult<PathBuf> {
        self.inputs.lock().unwrap().extend(inputs.iter().cloned());
        write_silence(output, self.measured_seconds, SAMPLE_RATE)?;
        Ok(output.to_path_buf())
    }
}

/// Fails the first `failures` renders, then writes a placeholder video.
pub struct FlakyRenderer {
    failures: Mutex<usize>,
    calls: Mutex<usize>,
}

impl FlakyRenderer {
    pub fn new(failures: usize) -> Self {
        Self {
            failures: Mutex::new(failures),
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl VideoRenderer for FlakyRenderer {
    async fn render(&self, props: &Path, _audio: &Path, output: &Path) -> MediaResult<PathBuf> {
        *self.calls.lock().unwrap() += 1;
        assert!(props.exists(), "props must be written before rendering");
        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(MediaError::CommandFailure {
                    command: "npx remotion render".into(),
                    status: Some(1),
                    stderr: "composition crashed".into(),
                });
            }
        }
        tokio::fs::write(output, b"video").await?;
        Ok(output.to_path_buf())
    }
}

/// Records every command line and reports success without running anything.
#[derive(Default)]
pub struct RecordingExecutor {
    commands: Mutex<Vec<String>>,
}

impl RecordingExecutor {
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn run(&self, command: &mut Command) -> std::io::Result<Output> {
        self.commands.lock().unwrap().push(describe(command));
        Ok(Output {
            status: success(),
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }
}

#[cfg(unix)]
fn success() -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    ExitStatus::from_raw(0)
}
