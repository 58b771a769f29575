use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Structured plan produced by the outline call. Documentary and
/// kamishibai channels fill different halves of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outline {
    #[serde(default)]
    pub hook_fact: Option<String>,
    #[serde(default)]
    pub hook_number: Option<String>,
    #[serde(default)]
    pub themes: Vec<OutlineTheme>,
    #[serde(default)]
    pub person_profile: Option<serde_json::Value>,
    #[serde(default)]
    pub epilogue_direction: Option<String>,
    #[serde(default)]
    pub stat_data: Vec<StatDatum>,
}

impl Outline {
    pub fn is_empty(&self) -> bool {
        self.hook_fact.is_none() && self.themes.is_empty() && self.person_profile.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineTheme {
    pub title: String,
    #[serde(default)]
    pub chart_type: Option<String>,
    #[serde(default)]
    pub key_data: Option<String>,
    #[serde(default)]
    pub angle: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatDatum {
    pub topic: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub angle: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptDraft {
    pub title: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub reference_sources: Vec<ReferenceSource>,
    #[serde(default)]
    pub first_comment: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub dynamic_hashtags: Vec<String>,
    pub script: Vec<Line>,
    #[serde(default)]
    pub polls: Vec<Poll>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_number: Option<u32>,
}

impl ScriptDraft {
    pub fn line_count(&self) -> usize {
        self.script.len()
    }

    pub fn total_chars(&self) -> usize {
        self.script.iter().map(|line| line.text.chars().count()).sum()
    }

    pub fn speakers(&self) -> BTreeSet<&str> {
        self.script.iter().map(|line| line.speaker.as_str()).collect()
    }

    /// Keeps only the first `limit` lines.
    pub fn truncate(&mut self, limit: usize) {
        self.script.truncate(limit);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSource {
    pub name: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub speaker: String,
    pub text: String,
    #[serde(default)]
    pub voice: String,
    #[serde(default = "default_section")]
    pub section: String,
    #[serde(default = "default_emotion")]
    pub emotion: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<LineTiming>,
}

impl Line {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
            voice: String::new(),
            section: default_section(),
            emotion: default_emotion(),
            marker: None,
            timing: None,
        }
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = section.into();
        self
    }

    pub fn has_marker(&self, category: &str) -> bool {
        self.marker
            .as_deref()
            .map(|marker| marker.contains(category))
            .unwrap_or(false)
    }
}

fn default_section() -> String {
    "main".into()
}

fn default_emotion() -> String {
    "neutral".into()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineTiming {
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub start_frame: u64,
    pub end_frame: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    pub question: String,
    #[serde(default)]
    pub source: String,
    pub answers: Vec<PollAnswer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollAnswer {
    pub label: String,
    pub value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_defaults_fill_optional_fields() {
        let line: Line = serde_json::from_str(r#"{"speaker":"カツミ","text":"年金の話です"}"#).unwrap();
        assert_eq!(line.section, "main");
        assert_eq!(line.emotion, "neutral");
        assert!(line.marker.is_none());
    }

    #[test]
    fn draft_requires_script_field() {
        let result = serde_json::from_str::<ScriptDraft>(r#"{"title":"t"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn marker_matching_is_substring() {
        let line = Line::new("ヒロシ", "本音です").with_marker("honne_2");
        assert!(line.has_marker("honne"));
        assert!(!line.has_marker("news"));
    }
}
