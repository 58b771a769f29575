use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{ChannelGroup, ChannelSection, KamishibaiConfig};
use crate::llm::{ChatMessage, Completion, CompletionOptions};

use super::error::{ScriptError, ScriptResult};
use super::extract::parse_json_payload;
use super::models::{Outline, ScriptDraft};
use super::quality::{QualityGate, QualityWarning};
use super::repair::{RepairReport, RepairThresholds, ScriptRepairer};
use super::similarity::{LevenshteinRatio, SimilarityScorer};

pub const FEMALE_VOICE: &str = "Kazuha";
pub const MALE_VOICE: &str = "Takumi";

const MATERIAL_LIMIT: usize = 3000;

#[derive(Debug, Clone)]
pub struct GeneratedScript {
    pub outline: Outline,
    pub draft: ScriptDraft,
    pub attempts: u32,
    pub repair: RepairReport,
    pub warnings: Vec<QualityWarning>,
}

/// Outline call, detail loop, dedup and repair passes, quality gate.
pub struct ScriptGenerator {
    llm: Arc<dyn Completion>,
    channel: ChannelSection,
    repairer: ScriptRepairer,
    quality: QualityGate,
    min_lines: usize,
    max_attempts: u32,
}

impl fmt::Debug for ScriptGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptGenerator")
            .field("channel", &self.channel.name)
            .field("min_lines", &self.min_lines)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl ScriptGenerator {
    pub fn new(llm: Arc<dyn Completion>, config: &KamishibaiConfig) -> Self {
        Self::with_scorer(llm, config, Arc::new(LevenshteinRatio))
    }

    pub fn with_scorer(
        llm: Arc<dyn Completion>,
        config: &KamishibaiConfig,
        scorer: Arc<dyn SimilarityScorer>,
    ) -> Self {
        let policy = &config.policy;
        Self {
            llm,
            channel: config.channel.clone(),
            repairer: ScriptRepairer::new(
                scorer,
                RepairThresholds {
                    dedup: policy.dedup_similarity,
                    honne: policy.honne_similarity,
                    news: policy.news_similarity,
                },
            ),
            quality: QualityGate::from_config(config),
            min_lines: policy.min_script_lines,
            max_attempts: policy.max_detail_attempts,
        }
    }

    pub async fn generate(&self, material: &str) -> ScriptResult<GeneratedScript> {
        let outline = self.outline(material).await?;
        let (mut draft, attempts) = self.detail(material, &outline).await?;
        self.assign_voices(&mut draft);
        let repair = self.repairer.repair(&mut draft);
        let warnings = self.quality.check(&draft);
        Ok(GeneratedScript {
            outline,
            draft,
            attempts,
            repair,
            warnings,
        })
    }

    /// One call, no retry. Unparseable output is fatal.
    pub async fn outline(&self, material: &str) -> ScriptResult<Outline> {
        let messages = vec![
            ChatMessage::system("Generate structure. Output JSON."),
            ChatMessage::user(self.outline_prompt(material)),
        ];
        let options = CompletionOptions {
            json_mode: true,
            max_tokens: 2000,
            temperature: 0.7,
        };
        let text = self.llm.complete(&messages, &options).await?;
        let outline: Outline = parse_json_payload(&text).map_err(|err| match err {
            ScriptError::MalformedPayload(detail) => ScriptError::MalformedOutline(detail),
            other => other,
        })?;
        if outline.is_empty() {
            return Err(ScriptError::MalformedOutline(
                "outline carries no hook, themes or profile".into(),
            ));
        }
        info!(
            themes = outline.themes.len(),
            stats = outline.stat_data.len(),
            "outline generated"
        );
        Ok(outline)
    }

    /// Regenerates the whole script until it reaches the minimum line
    /// count. Attempts are never merged.
    pub async fn detail(&self, material: &str, outline: &Outline) -> ScriptResult<(ScriptDraft, u32)> {
        let messages = vec![
            ChatMessage::system(format!(
                "Generate detailed script. script must have {}+ lines. Output JSON.",
                self.min_lines
            )),
            ChatMessage::user(self.detail_prompt(material, outline)),
        ];
        let options = CompletionOptions {
            json_mode: true,
            max_tokens: 16384,
            temperature: 0.8,
        };

        let mut last_lines = 0usize;
        for attempt in 1..=self.max_attempts {
            let text = self.llm.complete(&messages, &options).await?;
            let draft = match parse_json_payload::<ScriptDraft>(&text) {
                Ok(draft) => draft,
                Err(err) => {
                    warn!(attempt, error = %err, "detail attempt unparseable, regenerating");
                    last_lines = 0;
                    continue;
                }
            };
            last_lines = draft.line_count();
            info!(
                attempt,
                lines = last_lines,
                chars = draft.total_chars(),
                required = self.min_lines,
                "detail attempt complete"
            );
            if last_lines >= self.min_lines {
                return Ok((draft, attempt));
            }
            warn!(attempt, lines = last_lines, required = self.min_lines, "script too short, regenerating");
        }
        Err(ScriptError::InsufficientScriptLength {
            lines: last_lines,
            required: self.min_lines,
            attempts: self.max_attempts,
        })
    }

    fn assign_voices(&self, draft: &mut ScriptDraft) {
        let female = self.channel.speakers.first().cloned().unwrap_or_default();
        for line in draft.script.iter_mut().filter(|line| line.voice.is_empty()) {
            line.voice = if line.speaker == female {
                FEMALE_VOICE.to_string()
            } else {
                MALE_VOICE.to_string()
            };
        }
    }

    fn speakers(&self) -> (String, String) {
        let first = self.channel.speakers.first().cloned().unwrap_or_default();
        let second = self.channel.speakers.get(1).cloned().unwrap_or_default();
        (first, second)
    }

    fn outline_prompt(&self, material: &str) -> String {
        let theme = &self.channel.theme;
        let material: String = material.chars().take(MATERIAL_LIMIT).collect();
        let shape = match self.channel.group {
            ChannelGroup::Kamishibai => format!(
                "Plan a three-act kamishibai episode about {theme}: an opening hook with one striking number, \
                 three main themes with a chart type each (bar/line/pie/radar), and an epilogue direction.\n\
                 Output JSON: {{\"hook_fact\": \"...\", \"hook_number\": \"...\", \
                 \"themes\": [{{\"title\": \"...\", \"chart_type\": \"bar\", \"key_data\": \"...\", \"angle\": \"...\"}}], \
                 \"epilogue_direction\": \"...\", \
                 \"stat_data\": [{{\"topic\": \"...\", \"source\": \"...\", \"angle\": \"...\"}}]}}"
            ),
            ChannelGroup::Documentary => format!(
                "Plan a human documentary episode about {theme}: create one fictional person's profile \
                 (background, challenges, current life, lessons) from the material.\n\
                 Output JSON: {{\"person_profile\": {{...}}, \
                 \"stat_data\": [{{\"topic\": \"...\", \"source\": \"...\", \"angle\": \"...\"}}]}}"
            ),
        };
        format!(
            "ALL OUTPUT CONTENT MUST BE IN JAPANESE.\n\n## MATERIAL\n{material}\n\n## TASK\n{shape}\n"
        )
    }

    fn detail_prompt(&self, material: &str, outline: &Outline) -> String {
        let theme = &self.channel.theme;
        let (first, second) = self.speakers();
        let outline_json = serde_json::to_string(outline).unwrap_or_else(|_| "{}".into());
        let material: String = material.chars().take(MATERIAL_LIMIT).collect();
        format!(
            "Write a dialogue script about {theme} between {first} and {second} following this outline:\n\
             {outline_json}\n\n## MATERIAL\n{material}\n\n\
             ## RULES\n- at least {min} lines\n- open with the theme name {theme}\n\
             - include at least 8 concrete numbers\n- include 2 polls with a source each\n\n\
             ## OUTPUT FORMAT (JSON)\n\
             {{\"title\": \"...\", \"source\": \"...\", \"summary\": \"...\", \"key_points\": [\"...\"], \
             \"reference_sources\": [{{\"name\": \"...\", \"url\": \"...\"}}], \"first_comment\": \"...\", \
             \"tags\": [\"{theme}\"], \"dynamic_hashtags\": [\"...\"], \
             \"script\": [{{\"speaker\": \"{first}\", \"text\": \"...\", \"voice\": \"{FEMALE_VOICE}\", \"section\": \"main\", \"emotion\": \"surprised\"}}], \
             \"polls\": [{{\"question\": \"...\", \"source\": \"...\", \"answers\": [{{\"label\": \"...\", \"value\": 45}}]}}]}}",
            min = self.min_lines
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, LlmResult};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct CannedCompletion {
        replies: Mutex<Vec<LlmResult<String>>>,
        calls: Mutex<usize>,
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
                Err(LlmError::EmptyPrompt)
            } else {
                replies.remove(0)
            }
        }
    }

    fn config() -> KamishibaiConfig {
        let raw = std::fs::read_to_string(
            std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/kamishibai.toml"),
        )
        .unwrap();
        let mut config: KamishibaiConfig = toml::from_str(&raw).unwrap();
        config.policy.min_script_lines = 3;
        config.policy.max_detail_attempts = 2;
        config
    }

    fn generator(replies: Vec<LlmResult<String>>) -> (ScriptGenerator, Arc<CannedCompletion>) {
        let llm = Arc::new(CannedCompletion {
            replies: Mutex::new(replies),
            calls: Mutex::new(0),
        });
        (ScriptGenerator::new(llm.clone(), &config()), llm)
    }

    #[tokio::test]
    async fn outline_rejects_prose() {
        let (generator, _) = generator(vec![Ok("I cannot help with that".into())]);
        let err = generator.outline("material").await.unwrap_err();
        assert!(matches!(err, ScriptError::MalformedOutline(_)));
    }

    #[tokio::test]
    async fn outline_accepts_fenced_json() {
        let (generator, _) = generator(vec![Ok(
            "```json\n{\"hook_fact\": \"月5万円\", \"themes\": []}\n```".into(),
        )]);
        let outline = generator.outline("material").await.unwrap();
        assert_eq!(outline.hook_fact.as_deref(), Some("月5万円"));
    }

    #[tokio::test]
    async fn unparseable_attempts_count_toward_cap() {
        let (generator, llm) = generator(vec![Ok("garbage".into()), Ok("{\"title\": 1}".into())]);
        let err = generator
            .detail("material", &Outline::default())
            .await
            .unwrap_err();
        match err {
            ScriptError::InsufficientScriptLength {
                lines,
                required,
                attempts,
            } => {
                assert_eq!((lines, required, attempts), (0, 3, 2));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(*llm.calls.lock().unwrap(), 2);
    }
}
