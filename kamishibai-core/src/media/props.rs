use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::RenderProfile;
use crate::script::{Line, ScriptDraft};

use super::charts::ChartTrigger;
use super::MediaResult;

/// One script line as the composition consumes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimedLine {
    pub speaker: String,
    pub text: String,
    pub voice: String,
    pub section: String,
    pub emotion: String,
    pub start_frame: u64,
    pub end_frame: u64,
    pub start_seconds: f64,
    pub end_seconds: f64,
}

impl From<&Line> for TimedLine {
    fn from(line: &Line) -> Self {
        let timing = line.timing.unwrap_or(crate::script::LineTiming {
            start_seconds: 0.0,
            end_seconds: 0.0,
            start_frame: 0,
            end_frame: 0,
        });
        Self {
            speaker: line.speaker.clone(),
            text: line.text.clone(),
            voice: line.voice.clone(),
            section: line.section.clone(),
            emotion: line.emotion.clone(),
            start_frame: timing.start_frame,
            end_frame: timing.end_frame,
            start_seconds: timing.start_seconds,
            end_seconds: timing.end_seconds,
        }
    }
}

/// Input document handed to the external renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderProps {
    pub title: String,
    pub summary: String,
    pub key_points: Vec<String>,
    pub script: Vec<TimedLine>,
    pub chart_data: Vec<ChartTrigger>,
    pub audio_path: String,
    pub duration_in_frames: u64,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub channel_name: String,
    pub channel_color: String,
    pub source: String,
    pub slide_duration: u64,
}

#[derive(Debug, Clone)]
pub struct PropsContext<'a> {
    pub channel_name: &'a str,
    pub channel_color: &'a str,
    pub audio_file: &'a str,
    pub profile: RenderProfile,
    pub slide_frames: u64,
    pub total_frames: u64,
}

impl RenderProps {
    pub fn build(draft: &ScriptDraft, charts: Vec<ChartTrigger>, ctx: &PropsContext<'_>) -> Self {
        Self {
            title: draft.title.clone(),
            summary: draft.summary.clone(),
            key_points: draft.key_points.clone(),
            script: draft.script.iter().map(TimedLine::from).collect(),
            chart_data: charts,
            audio_path: ctx.audio_file.to_string(),
            duration_in_frames: ctx.total_frames,
            fps: ctx.profile.fps,
            width: ctx.profile.width,
            height: ctx.profile.height,
            channel_name: ctx.channel_name.to_string(),
            channel_color: ctx.channel_color.to_string(),
            source: draft.source.clone(),
            slide_duration: ctx.slide_frames,
        }
    }

    pub async fn write(&self, path: &Path) -> MediaResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::LineTiming;

    #[test]
    fn props_serialize_camel_case_with_frames() {
        let mut line = Line::new("カツミ", "こんにちは");
        line.timing = Some(LineTiming {
            start_seconds: 0.0,
            end_seconds: 1.5,
            start_frame: 168,
            end_frame: 204,
        });
        let draft = ScriptDraft {
            title: "年金の話".into(),
            source: String::new(),
            summary: "要約".into(),
            description: String::new(),
            key_points: vec!["一".into()],
            reference_sources: Vec::new(),
            first_comment: None,
            tags: Vec::new(),
            dynamic_hashtags: Vec::new(),
            script: vec![line],
            polls: Vec::new(),
            episode_number: None,
        };
        let ctx = PropsContext {
            channel_name: "年金チャンネル",
            channel_color: "#2E7D32",
            audio_file: "audio.wav",
            profile: RenderProfile {
                width: 1920,
                height: 1080,
                fps: 24,
            },
            slide_frames: 168,
            total_frames: 204,
        };
        let props = RenderProps::build(&draft, Vec::new(), &ctx);
        let value = serde_json::to_value(&props).unwrap();
        assert_eq!(value["durationInFrames"], 204);
        assert_eq!(value["script"][0]["startFrame"], 168);
        assert_eq!(value["keyPoints"][0], "一");
        assert_eq!(value["audioPath"], "audio.wav");
        assert!(value["chartData"].as_array().unwrap().is_empty());
    }
}
