use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::script::{Line, Poll};

const LABEL_MAX_CHARS: usize = 20;
const SUBTITLE_MAX_CHARS: usize = 20;
const ITEMS_MAX: usize = 4;
const ITEM_LABEL_MAX_CHARS: usize = 8;
const CONTEXT_LABEL_MAX_CHARS: usize = 15;

/// Sections that never carry a poll overlay.
const NON_MAIN_SECTIONS: &[&str] = &[
    "hikaeshitsu",
    "hikaeshitsu_jingle",
    "ending",
    "opening",
    "opening_jingle",
];
/// Sections skipped by numeric extraction.
const EPILOGUE_SECTIONS: &[&str] = &["hikaeshitsu", "hikaeshitsu_jingle", "ending"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Compare,
    Donut,
    Pie,
    Number,
    Poll,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartItem {
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartDatum {
    #[serde(rename = "type")]
    pub kind: ChartKind,
    pub label: String,
    pub value: f64,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<ChartItem>,
    #[serde(default)]
    pub negative: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compare_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compare_label: Option<String>,
}

impl ChartDatum {
    pub fn new(kind: ChartKind, label: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            value,
            unit: unit.into(),
            subtitle: None,
            items: Vec::new(),
            negative: false,
            max_value: None,
            compare_value: None,
            compare_label: None,
        }
    }

    /// Truncates text so it fits the overlay.
    pub fn fit_to_display(mut self) -> Self {
        self.label = truncate_chars(&self.label, LABEL_MAX_CHARS);
        self.subtitle = self
            .subtitle
            .map(|subtitle| truncate_chars(&subtitle, SUBTITLE_MAX_CHARS));
        self.items.truncate(ITEMS_MAX);
        for item in &mut self.items {
            item.label = truncate_chars(&item.label, ITEM_LABEL_MAX_CHARS);
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartTrigger {
    pub data: ChartDatum,
    pub trigger_frame: u64,
}

/// Places poll overlays first, then fills up with numeric facts found in
/// the dialogue.
#[derive(Debug, Clone)]
pub struct ChartPlanner {
    max_charts: usize,
    min_line_gap: usize,
    min_frame_gap: u64,
}

impl ChartPlanner {
    pub fn new(max_charts: usize) -> Self {
        Self {
            max_charts,
            min_line_gap: 3,
            min_frame_gap: 72,
        }
    }

    /// Lines must already carry their timing.
    pub fn plan(&self, lines: &[Line], polls: &[Poll]) -> Vec<ChartTrigger> {
        let mut triggers = self.place_polls(lines, polls);
        let poll_count = triggers.len();
        let mut used_frames: Vec<u64> = triggers.iter().map(|t| t.trigger_frame).collect();
        let mut last_chart: Option<usize> = None;

        for (index, line) in lines.iter().enumerate() {
            if triggers.len() >= self.max_charts {
                break;
            }
            if EPILOGUE_SECTIONS.contains(&line.section.as_str()) {
                continue;
            }
            let frame = start_frame(line);
            if used_frames
                .iter()
                .any(|used| used.abs_diff(frame) < self.min_frame_gap)
            {
                continue;
            }
            if last_chart.is_some_and(|last| index - last < self.min_line_gap) {
                continue;
            }
            let Some(datum) = extract_chart(&line.text) else {
                continue;
            };
            triggers.push(ChartTrigger {
                data: datum.fit_to_display(),
                trigger_frame: frame,
            });
            used_frames.push(frame);
            last_chart = Some(index);
        }

        triggers.sort_by_key(|trigger| trigger.trigger_frame);
        debug!(
            polls = poll_count,
            numeric = triggers.len() - poll_count,
            "chart triggers planned"
        );
        triggers
    }

    fn place_polls(&self, lines: &[Line], polls: &[Poll]) -> Vec<ChartTrigger> {
        let main: Vec<&Line> = lines
            .iter()
            .filter(|line| !NON_MAIN_SECTIONS.contains(&line.section.as_str()))
            .collect();
        if main.is_empty() || polls.is_empty() {
            return Vec::new();
        }
        let polls = &polls[..polls.len().min(self.max_charts)];

        let mut reserved = BTreeSet::new();
        let mut triggers = Vec::with_capacity(polls.len());
        for (poll_index, poll) in polls.iter().enumerate() {
            let keywords: Vec<&str> = keyword_pattern()
                .find_iter(&poll.question)
                .map(|m| m.as_str())
                .collect();

            let mut best: Option<(usize, f64)> = None;
            for (index, line) in main.iter().enumerate() {
                if reserved.contains(&index) {
                    continue;
                }
                let mut score = keyword_hits(&keywords, &line.text) as f64;
                for offset in [-2isize, -1, 1, 2] {
                    let neighbour = index as isize + offset;
                    if neighbour >= 0 && (neighbour as usize) < main.len() {
                        score += 0.5 * keyword_hits(&keywords, &main[neighbour as usize].text) as f64;
                    }
                }
                if score > best.map_or(0.0, |(_, best_score)| best_score) {
                    best = Some((index, score));
                }
            }

            let chosen = match best {
                Some((index, _)) => index,
                None => {
                    let interval = (main.len() / (polls.len() + 1)).max(1);
                    ((poll_index + 1) * interval).min(main.len() - 1)
                }
            };
            reserved.insert(chosen);
            reserved.insert(chosen.saturating_sub(1));
            reserved.insert((chosen + 1).min(main.len() - 1));

            let frame = start_frame(main[chosen]);
            debug!(
                poll = poll_index,
                line = chosen,
                score = best.map_or(0.0, |(_, score)| score),
                frame,
                "poll overlay placed"
            );
            triggers.push(ChartTrigger {
                data: poll_datum(poll).fit_to_display(),
                trigger_frame: frame,
            });
        }
        triggers
    }
}

fn start_frame(line: &Line) -> u64 {
    line.timing.map(|timing| timing.start_frame).unwrap_or(0)
}

fn keyword_hits(keywords: &[&str], text: &str) -> usize {
    keywords.iter().filter(|keyword| text.contains(*keyword)).count()
}

fn poll_datum(poll: &Poll) -> ChartDatum {
    let label = if poll.question.is_empty() {
        "みんなの声".to_string()
    } else {
        poll.question.clone()
    };
    let mut datum = ChartDatum::new(ChartKind::Poll, label, 0.0, "");
    datum.items = poll
        .answers
        .iter()
        .map(|answer| ChartItem {
            label: answer.label.clone(),
            value: answer.value,
        })
        .collect();
    if !poll.source.is_empty() {
        datum.subtitle = Some(format!("出典：{}", truncate_chars(&poll.source, 15)));
    }
    datum
}

/// Numeric fact in a line of dialogue, tried in order: percent, 割,
/// 万円, 円 (at least 100), 万人.
pub fn extract_chart(text: &str) -> Option<ChartDatum> {
    if let Some((start, value)) = first_number(percent_pattern(), text) {
        let label = label_for(text, start);
        let negative = is_negative(text);
        let mut datum = match context_kind(text, true) {
            ChartKind::Bar => {
                let rising = text.contains('増') || text.contains('上') || text.contains("アップ");
                let mut datum = ChartDatum::new(
                    ChartKind::Bar,
                    label,
                    if rising { 100.0 + value } else { 100.0 - value },
                    "%",
                );
                datum.max_value = Some(150f64.max(100.0 + value + 20.0));
                datum
            }
            ChartKind::Compare => compare_datum(label, value),
            _ => ChartDatum::new(ChartKind::Number, label, value, "%"),
        };
        datum.negative = negative;
        datum.subtitle = subtitle_for(text, value, "%");
        return Some(datum);
    }

    if let Some((start, tenths)) = first_number(wari_pattern(), text) {
        let value = tenths * 10.0;
        let label = label_for(text, start);
        return Some(match context_kind(text, true) {
            ChartKind::Compare => compare_datum(label, value),
            _ => ChartDatum::new(ChartKind::Number, label, value, "%"),
        });
    }

    if let Some((start, man)) = first_number(man_yen_pattern(), text) {
        return Some(money_datum(text, start, man * 10_000.0));
    }

    if let Some((start, yen)) = first_number(yen_pattern(), text) {
        if yen >= 100.0 {
            return Some(money_datum(text, start, yen));
        }
    }

    if let Some((start, people)) = first_number(man_people_pattern(), text) {
        return Some(ChartDatum::new(
            ChartKind::Number,
            label_for(text, start),
            people,
            "万人",
        ));
    }

    None
}

fn compare_datum(label: String, value: f64) -> ChartDatum {
    let mut datum = ChartDatum::new(ChartKind::Compare, label, value, "%");
    datum.max_value = Some(100.0);
    datum.compare_value = Some(100.0 - value);
    datum.compare_label = Some("その他".to_string());
    datum
}

fn money_datum(text: &str, start: usize, value: f64) -> ChartDatum {
    let mut datum = ChartDatum::new(context_kind(text, false), label_for(text, start), value, "円");
    datum.negative = is_negative(text);
    datum.subtitle = subtitle_for(text, value, "円");
    datum
}

/// Byte offset of the first match and its parsed number.
fn first_number(pattern: &Regex, text: &str) -> Option<(usize, f64)> {
    let captures = pattern.captures(text)?;
    let whole = captures.get(0)?;
    let digits = ascii_digits(captures.get(1)?.as_str());
    let value = digits.parse::<f64>().ok()?;
    Some((whole.start(), value))
}

fn ascii_digits(raw: &str) -> String {
    raw.chars()
        .filter_map(|ch| match ch {
            '０'..='９' => char::from_u32(ch as u32 - '０' as u32 + '0' as u32),
            ',' | '，' => None,
            other => Some(other),
        })
        .collect()
}

fn context_kind(text: &str, is_percent: bool) -> ChartKind {
    if trend_pattern().is_match(text) {
        return ChartKind::Bar;
    }
    if versus_pattern().is_match(text) {
        return if is_percent { ChartKind::Compare } else { ChartKind::Pie };
    }
    if share_pattern().is_match(text) {
        return if is_percent { ChartKind::Donut } else { ChartKind::Pie };
    }
    if is_percent {
        ChartKind::Bar
    } else {
        ChartKind::Number
    }
}

fn is_negative(text: &str) -> bool {
    negative_pattern().is_match(text)
}

fn label_for(text: &str, match_start: usize) -> String {
    context_label(text, match_start).unwrap_or_else(|| truncate_chars(text, 40).trim().to_string())
}

/// Short noun phrase preceding the number, falling back to the opening of
/// the line. `None` when nothing of at least three characters remains.
fn context_label(text: &str, match_start: usize) -> Option<String> {
    let prefix = text[..match_start].trim();
    let segments: Vec<&str> = sentence_pattern().split(prefix).collect();
    let last = segments.last().copied().unwrap_or(prefix);
    let mut cleaned = strip_quotes(last.trim());
    if cleaned.is_empty() && segments.len() >= 2 {
        cleaned = segments[segments.len() - 2].trim().to_string();
    }
    if cleaned.is_empty() {
        cleaned = last_chars(prefix, CONTEXT_LABEL_MAX_CHARS).trim().to_string();
    }
    cleaned = strip_trailing_particles(&cleaned);

    if char_len(&cleaned) > CONTEXT_LABEL_MAX_CHARS {
        let parts: Vec<&str> = cleaned.split('、').collect();
        let tail = parts[parts.len() - 1];
        cleaned = if char_len(tail) >= 4 {
            tail.trim().to_string()
        } else {
            parts[parts.len().saturating_sub(2)..].join("、").trim().to_string()
        };
    }
    if char_len(&cleaned) > CONTEXT_LABEL_MAX_CHARS {
        cleaned = last_chars(&cleaned, CONTEXT_LABEL_MAX_CHARS);
        let cut = particle_pattern()
            .find(&cleaned)
            .filter(|found| cleaned[..found.start()].chars().count() < 4)
            .map(|found| found.end());
        if let Some(end) = cut {
            cleaned = cleaned[end..].to_string();
        }
    }

    if char_len(&cleaned) >= 3 {
        return Some(cleaned);
    }
    let unquoted = strip_quotes(text);
    let first = sentence_pattern()
        .split(unquoted.trim())
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();
    let fallback = truncate_chars(&strip_trailing_particles(&first), CONTEXT_LABEL_MAX_CHARS);
    (char_len(&fallback) >= 3).then_some(fallback)
}

fn subtitle_for(text: &str, value: f64, unit: &str) -> Option<String> {
    if rising_pattern().is_match(text) {
        return Some(format!("増加傾向: {}{unit}", format_amount(value)));
    }
    if falling_pattern().is_match(text) {
        return Some(format!("減少傾向: {}{unit}", format_amount(value)));
    }
    let sentences: Vec<&str> = sentence_pattern().split(text).map(str::trim).collect();
    let context = sentences
        .iter()
        .find(|s| char_len(s) >= 8 && s.chars().any(|c| c.is_numeric()))
        .or_else(|| sentences.iter().find(|s| char_len(s) >= 8))?;
    if char_len(context) > 30 {
        Some(format!("{}...", truncate_chars(context, 30)))
    } else {
        Some((*context).to_string())
    }
}

fn format_amount(value: f64) -> String {
    if value.fract() != 0.0 || value.abs() >= 1e15 {
        return value.to_string();
    }
    let digits = (value.abs() as u64).to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if value < 0.0 {
        format!("-{grouped}")
    } else {
        grouped
    }
}

fn strip_quotes(text: &str) -> String {
    quote_pattern().replace_all(text, "").trim().to_string()
}

fn strip_trailing_particles(text: &str) -> String {
    trailing_particle_pattern().replace(text, "").trim().to_string()
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

fn last_chars(text: &str, limit: usize) -> String {
    let count = char_len(text);
    text.chars().skip(count.saturating_sub(limit)).collect()
}

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($re).expect("valid regex"))
        }
    };
}

pattern!(keyword_pattern, r"[\x{4e00}-\x{9fff}\x{3040}-\x{309f}\x{30a0}-\x{30ff}\x{ff66}-\x{ff9f}]{2,}");
pattern!(percent_pattern, r"([0-9０-９]+\.?[0-9０-９]*)\s*[%％]");
pattern!(wari_pattern, r"([0-9０-９]+)\s*割");
pattern!(man_yen_pattern, r"([0-9０-９,，]+)\s*万\s*円");
pattern!(yen_pattern, r"([0-9０-９,，]+)\s*円");
pattern!(man_people_pattern, r"([0-9０-９,，]+)\s*万\s*人");
pattern!(
    trend_pattern,
    r"増額|増加|引き上げ|引上げ|アップ|上が|減額|減少|引き下げ|切り下げ|ダウン|下が|増え|減り|前年比|比べ|変更|改定"
);
pattern!(versus_pattern, r"賛成.*反対|反対.*賛成|支持.*不支持|不支持.*支持");
pattern!(share_pattern, r"意見|人が|人は|全体の|のうち|中の|割合|分布|アンケート");
pattern!(
    negative_pattern,
    r"減額|減少|引き下げ|ダウン|下が|下落|減り|赤字|損|不足|マイナス|負担|削減|カット|廃止"
);
pattern!(rising_pattern, r"増額|増加|引き上げ|アップ|上が|上昇|増え");
pattern!(falling_pattern, r"減額|減少|引き下げ|ダウン|下が|下落|減り");
pattern!(sentence_pattern, r"[。！？\n]");
pattern!(quote_pattern, r"「[^」]*」");
pattern!(trailing_particle_pattern, r"[はがをにでのもへと]+$");
pattern!(particle_pattern, r"[はがをにでのもへと]");
