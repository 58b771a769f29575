pub mod charts;
mod ffmpeg;
mod props;
mod remotion;
pub mod timeline;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::{KamishibaiConfig, RenderProfile};
use crate::retry::{RetryPolicy, Sleeper, TokioSleeper};
use crate::script::ScriptDraft;
use crate::speech::{wav, SynthesisReport};

pub use charts::{extract_chart, ChartDatum, ChartItem, ChartKind, ChartPlanner, ChartTrigger};
pub use ffmpeg::{AudioConcatenator, Ffmpeg};
pub use props::{PropsContext, RenderProps, TimedLine};
pub use remotion::{RemotionRenderer, VideoRenderer};
pub use timeline::{apply_timeline, build_timeline, line_duration, Timeline};

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
    #[error("failed to serialize render props: {0}")]
    Json(#[from] serde_json::Error),
    #[error("command failed ({command}): {stderr}")]
    CommandFailure {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("no audio clips to concatenate")]
    NothingToConcatenate,
    #[error("render timed out after {0:?}")]
    RenderTimeout(Duration),
    #[error("render failed after {attempts} attempt(s): {reason}")]
    RenderFailed { attempts: usize, reason: String },
}

pub type MediaResult<T> = Result<T, MediaError>;

pub const AUDIO_FILE: &str = "audio.wav";
pub const PROPS_FILE: &str = "props.json";

/// Files produced by one assembly.
#[derive(Debug, Clone)]
pub struct AssembledVideo {
    pub audio: PathBuf,
    pub props: PathBuf,
    pub video: PathBuf,
    pub timeline: Timeline,
    pub chart_count: usize,
    pub render_attempts: usize,
    /// Intermediate files safe to delete once the final video exists.
    pub intermediates: Vec<PathBuf>,
}

/// Concatenate, correct the timeline, plan charts, render, mux, append the
/// epilogue. Any failure here is fatal for the run.
pub struct MediaAssembler {
    concatenator: Arc<dyn AudioConcatenator>,
    renderer: Arc<dyn VideoRenderer>,
    ffmpeg: Arc<Ffmpeg>,
    planner: ChartPlanner,
    render_retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    slide_frames: u64,
    channel_name: String,
    channel_color: String,
    epilogue: Option<PathBuf>,
}

impl MediaAssembler {
    pub fn new(
        config: &KamishibaiConfig,
        concatenator: Arc<dyn AudioConcatenator>,
        renderer: Arc<dyn VideoRenderer>,
        ffmpeg: Arc<Ffmpeg>,
    ) -> Self {
        Self {
            concatenator,
            renderer,
            ffmpeg,
            planner: ChartPlanner::new(config.policy.max_charts),
            render_retry: RetryPolicy::fixed(
                config.policy.render_attempts,
                Duration::from_secs(config.policy.render_backoff_seconds),
            ),
            sleeper: Arc::new(TokioSleeper),
            slide_frames: config.render.slide_duration_frames,
            channel_name: config.channel.name.clone(),
            channel_color: config.channel.color.clone(),
            epilogue: config
                .render
                .epilogue_video
                .as_ref()
                .map(|path| config.resolve_path(path)),
        }
    }

    /// ffmpeg for audio and muxing, Remotion for the composition.
    pub fn from_config(config: &KamishibaiConfig) -> Self {
        let ffmpeg = Arc::new(Ffmpeg::new(&config.render.ffmpeg_binary));
        let renderer = Arc::new(RemotionRenderer::new(
            &config.render,
            config.resolve_path(&config.render.project_dir),
        ));
        Self::new(config, ffmpeg.clone(), renderer, ffmpeg)
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Per-line durations in script order; see [`line_duration`].
    pub fn line_durations(draft: &ScriptDraft, synthesis: &SynthesisReport) -> Vec<f64> {
        draft
            .script
            .iter()
            .enumerate()
            .map(|(index, line)| {
                let clip = synthesis.clips.get(index).map(|clip| clip.duration_seconds);
                line_duration(line, clip)
            })
            .collect()
    }

    pub async fn assemble(
        &self,
        draft: &mut ScriptDraft,
        synthesis: &SynthesisReport,
        profile: RenderProfile,
        work_dir: &Path,
    ) -> MediaResult<AssembledVideo> {
        tokio::fs::create_dir_all(work_dir).await?;

        let audio = self
            .concatenator
            .concatenate(&synthesis.paths(), &work_dir.join(AUDIO_FILE))
            .await?;
        let measured = wav::duration_seconds(&audio)?;
        let durations = Self::line_durations(draft, synthesis);
        let timeline = build_timeline(&durations, measured, profile.fps, self.slide_frames);
        info!(
            measured_seconds = measured,
            estimated_seconds = durations.iter().sum::<f64>(),
            ratio = timeline.correction_ratio,
            total_frames = timeline.total_frames,
            "timeline corrected to measured narration"
        );
        apply_timeline(&mut draft.script, &timeline);

        let charts = self.planner.plan(&draft.script, &draft.polls);
        let chart_count = charts.len();
        let audio_file = audio
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| AUDIO_FILE.to_string());
        let props = RenderProps::build(
            draft,
            charts,
            &PropsContext {
                channel_name: &self.channel_name,
                channel_color: &self.channel_color,
                audio_file: &audio_file,
                profile,
                slide_frames: self.slide_frames,
                total_frames: timeline.total_frames,
            },
        );
        let props_path = work_dir.join(PROPS_FILE);
        props.write(&props_path).await?;

        let rendered_path = work_dir.join("render.mp4");
        let rendered = self
            .render_retry
            .run(
                "render",
                self.sleeper.as_ref(),
                |_: &MediaError| true,
                |_| self.renderer.render(&props_path, &audio, &rendered_path),
            )
            .await
            .map_err(|exhausted| MediaError::RenderFailed {
                attempts: exhausted.attempts,
                reason: exhausted.error.to_string(),
            })?;

        let mut intermediates = vec![rendered.result.clone()];
        let narrated = self
            .ffmpeg
            .mux_narration(&rendered.result, &audio, &work_dir.join("narrated.mp4"))
            .await?;

        let video = match &self.epilogue {
            Some(epilogue) if epilogue.exists() => {
                intermediates.push(narrated.clone());
                self.ffmpeg
                    .concat_videos(&[narrated, epilogue.clone()], &work_dir.join("final.mp4"))
                    .await?
            }
            Some(epilogue) => {
                warn!(path = %epilogue.display(), "epilogue video missing, skipping");
                narrated
            }
            None => narrated,
        };

        info!(
            video = %video.display(),
            charts = chart_count,
            render_attempts = rendered.attempts,
            "media assembly complete"
        );
        Ok(AssembledVideo {
            audio,
            props: props_path,
            video,
            timeline,
            chart_count,
            render_attempts: rendered.attempts,
            intermediates,
        })
    }
}

impl fmt::Debug for MediaAssembler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaAssembler")
            .field("ffmpeg", &self.ffmpeg)
            .field("planner", &self.planner)
            .field("render_retry", &self.render_retry)
            .field("slide_frames", &self.slide_frames)
            .field("epilogue", &self.epilogue)
            .finish()
    }
}
