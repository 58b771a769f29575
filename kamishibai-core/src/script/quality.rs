use std::fmt;

use tracing::{info, warn};

use crate::config::KamishibaiConfig;

use super::models::ScriptDraft;

#[derive(Debug, Clone, PartialEq)]
pub enum QualityWarning {
    TooFewCharacters { chars: usize, minimum: usize },
    TooFewLines { lines: usize, minimum: usize },
    MissingSpeaker(String),
    NoThemeKeyword,
    ThemeMissingFromOpening(String),
}

impl fmt::Display for QualityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityWarning::TooFewCharacters { chars, minimum } => {
                write!(f, "script has {chars} characters (minimum {minimum})")
            }
            QualityWarning::TooFewLines { lines, minimum } => {
                write!(f, "script has {lines} lines (minimum {minimum})")
            }
            QualityWarning::MissingSpeaker(name) => write!(f, "speaker {name} never appears"),
            QualityWarning::NoThemeKeyword => f.write_str("no theme keyword in dialogue"),
            QualityWarning::ThemeMissingFromOpening(theme) => {
                write!(f, "opening line does not mention '{theme}'")
            }
        }
    }
}

/// Non-blocking checklist run on the final draft.
#[derive(Debug, Clone)]
pub struct QualityGate {
    pub min_chars: usize,
    pub min_lines: usize,
    pub speakers: Vec<String>,
    pub keywords: Vec<String>,
    pub theme: String,
}

impl QualityGate {
    pub fn from_config(config: &KamishibaiConfig) -> Self {
        Self {
            min_chars: config.policy.quality_min_chars,
            min_lines: config.policy.quality_min_lines,
            speakers: config.channel.speakers.clone(),
            keywords: config.policy.theme_keywords.clone(),
            theme: config.channel.theme.clone(),
        }
    }

    pub fn check(&self, draft: &ScriptDraft) -> Vec<QualityWarning> {
        let mut warnings = Vec::new();
        let chars = draft.total_chars();
        if chars < self.min_chars {
            warnings.push(QualityWarning::TooFewCharacters {
                chars,
                minimum: self.min_chars,
            });
        }
        if draft.line_count() < self.min_lines {
            warnings.push(QualityWarning::TooFewLines {
                lines: draft.line_count(),
                minimum: self.min_lines,
            });
        }
        let speakers = draft.speakers();
        for speaker in &self.speakers {
            if !speakers.contains(speaker.as_str()) {
                warnings.push(QualityWarning::MissingSpeaker(speaker.clone()));
            }
        }
        let dialogue: String = draft.script.iter().map(|line| line.text.as_str()).collect();
        if !self.keywords.iter().any(|keyword| dialogue.contains(keyword.as_str())) {
            warnings.push(QualityWarning::NoThemeKeyword);
        }
        if let Some(first) = draft.script.first() {
            if !first.text.contains(&self.theme) {
                warnings.push(QualityWarning::ThemeMissingFromOpening(self.theme.clone()));
            }
        }

        if warnings.is_empty() {
            info!("quality gate passed");
        } else {
            for warning in &warnings {
                warn!(%warning, "quality gate");
            }
        }
        warnings
    }
}
