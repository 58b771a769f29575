/// Misread terms and their readings, applied in order.
pub const READING_CORRECTIONS: &[(&str, &str)] = &[
    ("掛金", "かけきん"),
    ("掛け金", "かけきん"),
    ("NISA", "ニーサ"),
    ("nisa", "ニーサ"),
    ("iDeCo", "イデコ"),
    ("ideco", "イデコ"),
    ("GDP", "ジーディーピー"),
    ("NHK", "エヌエイチケー"),
    ("板橋", "いたばし"),
    ("他人事", "ひとごと"),
    ("今日の方", "きょうのかた"),
    ("この方", "このかた"),
];

/// Short interjections some providers reject, expanded to full phrases.
pub const SHORT_PHRASES: &[(&str, &str)] = &[
    ("なるほど", "なるほどそうなんですね"),
    ("なるほど！", "なるほどそうなんですね！"),
    ("へえ", "へえそうなんですか"),
    ("へえ！", "へえそうなんですか！"),
    ("ほう", "ほう興味深いですね"),
    ("そうか", "そうか分かりました"),
    ("そうですね", "そうですねその通りですね"),
    ("分かりました", "分かりました承知しました"),
    ("はい", "はい分かりました"),
    ("ええ", "ええそうですね"),
];

const SYMBOLS: &str = "…！？!?.,;:[]()（）";
const TERMINATORS: &[char] = &['。', '！', '？', '.', '!', '?'];
const SHORT_LIMIT: usize = 8;
const PAD_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedText {
    Speak(String),
    /// Nothing pronounceable; rendered as a short fixed silence.
    Skip,
}

pub fn normalize(text: &str) -> NormalizedText {
    let mut text = text.to_string();
    for (wrong, reading) in READING_CORRECTIONS {
        text = text.replace(wrong, reading);
    }

    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.chars().all(|c| c.is_whitespace() || SYMBOLS.contains(c)) {
        return NormalizedText::Skip;
    }

    let length = trimmed.chars().count();
    if length <= SHORT_LIMIT {
        if let Some((_, expanded)) = SHORT_PHRASES.iter().find(|(short, _)| *short == trimmed) {
            return NormalizedText::Speak((*expanded).to_string());
        }
        if length <= PAD_LIMIT && !trimmed.ends_with(TERMINATORS) {
            return NormalizedText::Speak(format!("{trimmed}。"));
        }
    }
    NormalizedText::Speak(text)
}
