pub mod description;
pub mod error;
pub mod extract;
pub mod generator;
pub mod models;
pub mod quality;
pub mod repair;
pub mod similarity;

use std::path::Path;

use tracing::info;

pub use description::{build_description, number_episode, DescriptionContext, DESCRIPTION_LIMIT};
pub use error::{ScriptError, ScriptResult};
pub use extract::parse_json_payload;
pub use generator::{GeneratedScript, ScriptGenerator, FEMALE_VOICE, MALE_VOICE};
pub use models::{
    Line, LineTiming, Outline, OutlineTheme, Poll, PollAnswer, ReferenceSource, ScriptDraft,
    StatDatum,
};
pub use quality::{QualityGate, QualityWarning};
pub use repair::{RepairIssue, RepairReport, RepairThresholds, ScriptRepairer};
pub use similarity::{LevenshteinRatio, SimilarityScorer};

/// Writes the draft as pretty JSON (`content.json`).
pub async fn save_draft(draft: &ScriptDraft, path: &Path) -> ScriptResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let payload = serde_json::to_vec_pretty(draft)?;
    tokio::fs::write(path, payload).await?;
    info!(path = %path.display(), lines = draft.line_count(), "draft saved");
    Ok(())
}

pub async fn load_draft(path: &Path) -> ScriptResult<ScriptDraft> {
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&raw)?)
}
