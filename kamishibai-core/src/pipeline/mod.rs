mod run;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{KamishibaiConfig, RunMode};
use crate::error::ConfigError;
use crate::credentials::CredentialPool;
use crate::history::{HistoryError, RunRecord, RunStatus, SqliteHistoryStore};
use crate::llm::{GeminiTransport, LlmService};
use crate::media::{MediaAssembler, MediaError};
use crate::publish::{
    PublicationReport, PublicationRequest, PublishError, Publisher, VideoMetadata, YouTubeClient,
};
use crate::script::{
    build_description, number_episode, save_draft, DescriptionContext, ScriptDraft, ScriptError,
    ScriptGenerator,
};
use crate::speech::{
    EdgeTtsProvider, GeminiSpeechProvider, PollyProvider, SpeechError, SpeechProvider,
    SpeechSynthesizer,
};

pub use run::PipelineRun;

pub const CONTENT_FILE: &str = "content.json";
pub const THUMBNAIL_FILE: &str = "thumbnail.png";
/// Title marker for truncated verification runs.
pub const SHORT_RUN_MARKER: &str = "検証";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("material not readable at {path}: {source}")]
    Material { path: PathBuf, source: io::Error },
    #[error("material is empty")]
    EmptyMaterial,
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Speech(#[from] SpeechError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error(transparent)]
    History(#[from] HistoryError),
}

impl PipelineError {
    /// Short stage label for operators.
    pub fn class(&self) -> &'static str {
        match self {
            PipelineError::Config(_) => "config",
            PipelineError::Material { .. } | PipelineError::EmptyMaterial => "material",
            PipelineError::Script(_) => "script",
            PipelineError::Speech(_) => "speech",
            PipelineError::Media(_) => "media",
            PipelineError::Publish(_) => "publish",
            PipelineError::History(_) => "history",
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub mode: RunMode,
    pub title: String,
    pub line_count: usize,
    pub detail_attempts: u32,
    pub quality_warnings: Vec<String>,
    pub content_path: PathBuf,
    pub props_path: Option<PathBuf>,
    pub video_path: Option<PathBuf>,
    pub silent_lines: usize,
    pub publication: Option<PublicationReport>,
}

impl RunOutcome {
    pub fn video_id(&self) -> Option<&str> {
        self.publication
            .as_ref()
            .and_then(|report| report.video_id.as_deref())
    }

    /// Prod runs must end with an uploaded video.
    pub fn is_success(&self) -> bool {
        !self.mode.publishes() || self.video_id().is_some()
    }

    fn status(&self) -> RunStatus {
        if self.video_id().is_some() {
            RunStatus::Published
        } else if self.video_path.is_some() {
            RunStatus::Rendered
        } else {
            RunStatus::ScriptOnly
        }
    }
}

/// Script, speech, assembly and publication, in that order.
pub struct Pipeline {
    config: KamishibaiConfig,
    generator: ScriptGenerator,
    synthesizer: SpeechSynthesizer,
    assembler: MediaAssembler,
    publisher: Option<Publisher>,
    history: Option<SqliteHistoryStore>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("channel", &self.config.channel.name)
            .field("generator", &self.generator)
            .field("synthesizer", &self.synthesizer)
            .field("publisher", &self.publisher)
            .field("history", &self.history)
            .finish()
    }
}

impl Pipeline {
    pub fn new(
        config: KamishibaiConfig,
        generator: ScriptGenerator,
        synthesizer: SpeechSynthesizer,
        assembler: MediaAssembler,
    ) -> Self {
        Self {
            config,
            generator,
            synthesizer,
            assembler,
            publisher: None,
            history: None,
        }
    }

    pub fn with_publisher(mut self, publisher: Publisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_history(mut self, history: SqliteHistoryStore) -> Self {
        self.history = Some(history);
        self
    }

    /// Production wiring: Gemini for text, edge-tts → Polly → Gemini for
    /// speech, ffmpeg and Remotion for media, YouTube when credentials exist.
    pub fn from_config(config: KamishibaiConfig) -> PipelineResult<Self> {
        config.validate()?;
        let pool = Arc::new(Mutex::new(CredentialPool::from_config(&config)));

        let transport = Arc::new(GeminiTransport::new(&config.llm.endpoint, &config.llm.model));
        let llm = LlmService::new(transport, pool.clone(), &config.channel.name)
            .with_timeout(Duration::from_secs(config.llm.request_timeout_seconds));
        let generator = ScriptGenerator::new(Arc::new(llm), &config);

        let providers: Vec<Arc<dyn SpeechProvider>> = vec![
            Arc::new(EdgeTtsProvider::new(&config.tts)),
            Arc::new(PollyProvider::new(&config.tts, pool.clone())),
            Arc::new(GeminiSpeechProvider::new(&config, pool)),
        ];
        let synthesizer = SpeechSynthesizer::new(
            providers,
            config.tts.sample_rate,
            config.policy.silence_fraction_limit,
            config.channel.speakers.first().cloned().unwrap_or_default(),
        );
        let assembler = MediaAssembler::from_config(&config);

        let history = SqliteHistoryStore::new(config.history_db())?;
        history.initialize()?;

        let mut pipeline = Self::new(config, generator, synthesizer, assembler).with_history(history);
        match YouTubeClient::from_config(&pipeline.config.publish) {
            Ok(client) => pipeline = pipeline.with_publisher(Publisher::new(Arc::new(client))),
            Err(err) => info!(reason = %err, "publishing disabled"),
        }
        Ok(pipeline)
    }

    pub fn config(&self) -> &KamishibaiConfig {
        &self.config
    }

    /// Reads topic material from `path`, or from the configured default.
    pub async fn load_material(&self, path: Option<&Path>) -> PipelineResult<String> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match &self.config.channel.material_path {
                Some(configured) => self.config.resolve_path(configured),
                None => return Err(PipelineError::EmptyMaterial),
            },
        };
        let material = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| PipelineError::Material {
                path: path.clone(),
                source,
            })?;
        if material.trim().is_empty() {
            return Err(PipelineError::EmptyMaterial);
        }
        Ok(material)
    }

    /// Runs every stage `mode` asks for. Temporary files are removed and the
    /// run is recorded whatever the result.
    pub async fn run(&self, mode: RunMode, material: &str) -> PipelineResult<RunOutcome> {
        let mut run = PipelineRun::new(mode, &self.config.temp_dir());
        info!(run_id = %run.id, mode = %mode, channel = %self.config.channel.name, "pipeline started");

        let result = self.execute(&mut run, material).await;
        let removed = run.cleanup().await;
        info!(run_id = %run.id, removed, "temporary files removed");

        self.record(&run, &result);
        match &result {
            Ok(outcome) => info!(
                run_id = %run.id,
                title = %outcome.title,
                video = ?outcome.video_path,
                video_id = ?outcome.video_id(),
                "pipeline finished"
            ),
            Err(err) => warn!(run_id = %run.id, class = err.class(), error = %err, "pipeline failed"),
        }
        result
    }

    async fn execute(&self, run: &mut PipelineRun, material: &str) -> PipelineResult<RunOutcome> {
        let publisher = if run.mode.publishes() {
            Some(
                self.publisher
                    .as_ref()
                    .ok_or(PublishError::MissingCredentials("youtube"))?,
            )
        } else {
            None
        };

        let mut draft = self.prepare_script(run.mode, material).await?;
        let content_path = self.config.output_dir().join(CONTENT_FILE);
        save_draft(&draft.script, &content_path).await?;

        let mut outcome = RunOutcome {
            run_id: run.id.to_string(),
            mode: run.mode,
            title: draft.script.title.clone(),
            line_count: draft.script.line_count(),
            detail_attempts: draft.attempts,
            quality_warnings: draft.warnings.clone(),
            content_path,
            props_path: None,
            video_path: None,
            silent_lines: 0,
            publication: None,
        };
        run.draft = Some(draft.script.clone());
        if !run.mode.renders() {
            return Ok(outcome);
        }

        let synthesis = self
            .synthesizer
            .synthesize_script(&draft.script.script, &run.work_dir)
            .await?;
        run.audio = synthesis.paths();
        run.track(synthesis.paths());
        outcome.silent_lines = synthesis.silent_lines;

        let assembled = self
            .assembler
            .assemble(
                &mut draft.script,
                &synthesis,
                run.mode.render_profile(),
                &self.config.output_dir(),
            )
            .await?;
        run.track(assembled.intermediates.iter().cloned());
        run.draft = Some(draft.script.clone());
        outcome.props_path = Some(assembled.props.clone());
        outcome.video_path = Some(assembled.video.clone());

        if let Some(publisher) = publisher {
            let thumbnail = self.config.output_dir().join(THUMBNAIL_FILE);
            let request = PublicationRequest {
                video: &assembled.video,
                thumbnail: thumbnail.exists().then_some(thumbnail.as_path()),
                metadata: VideoMetadata {
                    title: draft.script.title.clone(),
                    description: draft.script.description.clone(),
                    tags: draft.script.tags.clone(),
                    category_id: self.config.publish.category_id.clone(),
                    privacy_status: self.config.publish.privacy_status.clone(),
                },
                first_comment: draft.script.first_comment.as_deref(),
                playlist_ids: &self.config.channel.playlist_ids,
            };
            let report = publisher.publish(request).await;
            if !report.is_published() {
                warn!(video = %assembled.video.display(), "upload failed, video kept on disk");
            }
            outcome.publication = Some(report);
        }
        Ok(outcome)
    }

    /// Generation plus the publishing touches on the draft: episode number,
    /// description, short-run truncation.
    pub async fn prepare_script(&self, mode: RunMode, material: &str) -> PipelineResult<PreparedScript> {
        let generated = self.generator.generate(material).await?;
        let mut draft = generated.draft;

        let episode = match &self.publisher {
            Some(publisher) => publisher.next_episode_number().await,
            None => 1,
        };
        number_episode(&mut draft, episode);
        draft.description = build_description(
            &draft,
            &DescriptionContext {
                channel_name: &self.config.channel.name,
                theme: &self.config.channel.theme,
                hosts: &self.config.channel.speakers,
                playlist_ids: &self.config.channel.playlist_ids,
            },
        );

        if let Some(limit) = mode.line_limit() {
            draft.truncate(limit);
            draft.title = format!("{SHORT_RUN_MARKER}{}", draft.title);
        }

        Ok(PreparedScript {
            script: draft,
            attempts: generated.attempts,
            warnings: generated.warnings.iter().map(ToString::to_string).collect(),
        })
    }

    fn record(&self, run: &PipelineRun, result: &PipelineResult<RunOutcome>) {
        let Some(history) = &self.history else {
            return;
        };
        let draft = run.draft.as_ref();
        let record = RunRecord {
            run_id: run.id.to_string(),
            channel: self.config.channel.name.clone(),
            theme: self.config.channel.theme.clone(),
            title: draft.map(|d| d.title.clone()).unwrap_or_default(),
            mode: run.mode.as_str().to_string(),
            video_id: result
                .as_ref()
                .ok()
                .and_then(|o| o.video_id().map(ToString::to_string)),
            video_url: result
                .as_ref()
                .ok()
                .and_then(|o| o.publication.as_ref())
                .and_then(|p| p.video_url.clone()),
            line_count: draft.map(ScriptDraft::line_count).unwrap_or(0),
            silent_lines: result.as_ref().map(|o| o.silent_lines).unwrap_or(0),
            status: match result {
                Ok(outcome) => outcome.status(),
                Err(_) => RunStatus::Failed,
            },
            error: result.as_ref().err().map(ToString::to_string),
            finished_at: Utc::now(),
        };
        if let Err(err) = history.record(&record) {
            warn!(run_id = %record.run_id, error = %err, "run not recorded in history");
        }
    }
}

/// Draft ready for speech, with generation statistics.
#[derive(Debug, Clone)]
pub struct PreparedScript {
    pub script: ScriptDraft,
    pub attempts: u32,
    pub warnings: Vec<String>,
}
