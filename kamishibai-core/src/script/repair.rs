use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use super::models::{Line, ScriptDraft};
use super::similarity::SimilarityScorer;

pub const CLOSING_PHRASES: &[&str] = &[
    "今日はここまで",
    "ここまでです",
    "次回をお楽しみ",
    "また次回",
    "また来週",
    "またね",
    "さようなら",
    "バイバイ",
];

pub const GREETING_PHRASES: &[&str] = &[
    "こんにちは",
    "皆さん、こんにちは",
    "今日のニュースです",
    "本日のニュースは",
    "ニュースをお届け",
];

#[derive(Debug, Clone, PartialEq)]
pub enum RepairIssue {
    PrematureClosing { line: usize, phrase: String },
    ThematicDuplicate { first: usize, second: usize, similarity: f64 },
    TopicalDuplicate { first: usize, second: usize, similarity: f64 },
    GreetingReset { line: usize, phrase: String },
}

impl fmt::Display for RepairIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairIssue::PrematureClosing { line, phrase } => {
                write!(f, "[A] closing phrase '{phrase}' stripped from line {}", line + 1)
            }
            RepairIssue::ThematicDuplicate { first, second, similarity } => write!(
                f,
                "[B] honne lines {} and {} overlap ({:.0}%)",
                first + 1,
                second + 1,
                similarity * 100.0
            ),
            RepairIssue::TopicalDuplicate { first, second, similarity } => write!(
                f,
                "[C] news lines {} and {} overlap ({:.0}%)",
                first + 1,
                second + 1,
                similarity * 100.0
            ),
            RepairIssue::GreetingReset { line, phrase } => {
                write!(f, "[D] greeting '{phrase}' stripped from line {}", line + 1)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepairReport {
    pub removed_duplicates: usize,
    pub issues: Vec<RepairIssue>,
}

/// Drops every line whose similarity to an already kept line reaches
/// `threshold`. Dropped lines are never compared against.
pub fn dedup(lines: &mut Vec<Line>, scorer: &dyn SimilarityScorer, threshold: f64) -> usize {
    let original = std::mem::take(lines);
    let before = original.len();
    for line in original {
        let duplicate = lines
            .iter()
            .any(|kept| scorer.score(&line.text, &kept.text) >= threshold);
        if duplicate {
            info!(text = %preview(&line.text), "dropping repeated line");
        } else {
            lines.push(line);
        }
    }
    before - lines.len()
}

/// A: strips closing phrases from every line except the final two, until
/// no phrase remains in the line.
pub fn strip_closing_phrases(lines: &mut [Line]) -> Vec<RepairIssue> {
    let mut issues = Vec::new();
    let end = lines.len().saturating_sub(2);
    for (index, line) in lines[..end].iter_mut().enumerate() {
        strip_until_stable(&mut line.text, CLOSING_PHRASES, |phrase| {
            issues.push(RepairIssue::PrematureClosing {
                line: index,
                phrase: phrase.to_string(),
            })
        });
    }
    issues
}

/// B and C: pairwise comparison among lines whose marker contains
/// `category`. Text is left untouched.
pub fn flag_marker_duplicates(
    lines: &[Line],
    category: &str,
    threshold: f64,
    scorer: &dyn SimilarityScorer,
) -> Vec<(usize, usize, f64)> {
    let marked: Vec<(usize, &Line)> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.has_marker(category))
        .collect();
    let mut pairs = Vec::new();
    for (offset, (first, a)) in marked.iter().enumerate() {
        for (second, b) in &marked[offset + 1..] {
            let similarity = scorer.score(&a.text, &b.text);
            if similarity > threshold {
                pairs.push((*first, *second, similarity));
            }
        }
    }
    pairs
}

/// D: strips greetings from every line except the first, longest phrase
/// first so a contained phrase is not matched twice.
pub fn strip_greetings(lines: &mut [Line]) -> Vec<RepairIssue> {
    let mut phrases: Vec<&str> = GREETING_PHRASES.to_vec();
    phrases.sort_by_key(|phrase| std::cmp::Reverse(phrase.chars().count()));

    let mut issues = Vec::new();
    for (index, line) in lines.iter_mut().enumerate().skip(1) {
        strip_until_stable(&mut line.text, &phrases, |phrase| {
            issues.push(RepairIssue::GreetingReset {
                line: index,
                phrase: phrase.to_string(),
            })
        });
    }
    issues
}

/// A and D alternated until neither changes anything.
pub fn strip_boundary_phrases(lines: &mut [Line]) -> Vec<RepairIssue> {
    let mut issues = Vec::new();
    loop {
        let closing = strip_closing_phrases(lines);
        let greetings = strip_greetings(lines);
        if closing.is_empty() && greetings.is_empty() {
            return issues;
        }
        issues.extend(closing);
        issues.extend(greetings);
    }
}

fn strip_until_stable(text: &mut String, phrases: &[&str], mut on_strip: impl FnMut(&str)) {
    loop {
        let mut changed = false;
        for phrase in phrases {
            if text.contains(phrase) {
                *text = text.replace(phrase, "").trim().to_string();
                on_strip(*phrase);
                changed = true;
            }
        }
        if !changed {
            return;
        }
    }
}

fn preview(text: &str) -> String {
    text.chars().take(40).collect()
}

#[derive(Debug, Clone, Copy)]
pub struct RepairThresholds {
    pub dedup: f64,
    pub honne: f64,
    pub news: f64,
}

/// Dedup followed by the A-D passes, in that order.
pub struct ScriptRepairer {
    scorer: Arc<dyn SimilarityScorer>,
    thresholds: RepairThresholds,
}

impl fmt::Debug for ScriptRepairer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptRepairer")
            .field("thresholds", &self.thresholds)
            .finish()
    }
}

impl ScriptRepairer {
    pub fn new(scorer: Arc<dyn SimilarityScorer>, thresholds: RepairThresholds) -> Self {
        Self { scorer, thresholds }
    }

    pub fn repair(&self, draft: &mut ScriptDraft) -> RepairReport {
        let removed_duplicates = dedup(&mut draft.script, self.scorer.as_ref(), self.thresholds.dedup);
        info!(
            removed = removed_duplicates,
            remaining = draft.script.len(),
            "dedup pass complete"
        );

        let mut issues = strip_closing_phrases(&mut draft.script);
        issues.extend(
            flag_marker_duplicates(&draft.script, "honne", self.thresholds.honne, self.scorer.as_ref())
                .into_iter()
                .map(|(first, second, similarity)| RepairIssue::ThematicDuplicate {
                    first,
                    second,
                    similarity,
                }),
        );
        issues.extend(
            flag_marker_duplicates(&draft.script, "news", self.thresholds.news, self.scorer.as_ref())
                .into_iter()
                .map(|(first, second, similarity)| RepairIssue::TopicalDuplicate {
                    first,
                    second,
                    similarity,
                }),
        );
        issues.extend(strip_greetings(&mut draft.script));
        issues.extend(strip_boundary_phrases(&mut draft.script));

        for issue in &issues {
            warn!(%issue, "script repair");
        }
        RepairReport {
            removed_duplicates,
            issues,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::similarity::LevenshteinRatio;

    fn lines(texts: &[&str]) -> Vec<Line> {
        texts.iter().map(|text| Line::new("カツミ", *text)).collect()
    }

    #[test]
    fn dedup_compares_against_kept_lines_only() {
        let mut script = lines(&[
            "年金の受給額は毎年変わります",
            "年金の受給額は毎年変わりますね",
            "今日は医療費の話もします",
        ]);
        let removed = dedup(&mut script, &LevenshteinRatio, 0.75);
        assert_eq!(removed, 1);
        assert_eq!(script.len(), 2);
        assert_eq!(script[1].text, "今日は医療費の話もします");
    }

    #[test]
    fn closing_phrases_kept_in_final_two_lines() {
        let mut script = lines(&["また来週の話です", "普通の行", "今日はここまで", "またね"]);
        let issues = strip_closing_phrases(&mut script);
        assert_eq!(issues.len(), 1);
        assert_eq!(script[0].text, "の話です");
        assert_eq!(script[2].text, "今日はここまで");
        assert_eq!(script[3].text, "またね");
    }

    #[test]
    fn greetings_stripped_longest_first_except_opening() {
        let mut script = lines(&["皆さん、こんにちは", "皆さん、こんにちは 年金の話"]);
        let issues = strip_greetings(&mut script);
        assert_eq!(script[0].text, "皆さん、こんにちは");
        assert_eq!(script[1].text, "年金の話");
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn marker_duplicates_only_warn() {
        let script = vec![
            Line::new("カツミ", "本音を言うと年金は足りない").with_marker("honne_1"),
            Line::new("ヒロシ", "本音を言うと年金は足りないよ").with_marker("honne_2"),
            Line::new("カツミ", "本音を言うと年金は足りない"),
        ];
        let pairs = flag_marker_duplicates(&script, "honne", 0.6, &LevenshteinRatio);
        assert_eq!(pairs.len(), 1);
        assert_eq!((pairs[0].0, pairs[0].1), (0, 1));
    }
}
