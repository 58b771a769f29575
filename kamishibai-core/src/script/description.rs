use super::models::ScriptDraft;

pub const DESCRIPTION_LIMIT: usize = 1500;

const FALLBACK_SOURCES: &str =
    "・出典：国会議事録 https://www.shugiin.go.jp/\n・参考：厚生労働省HP https://www.mhlw.go.jp/";

#[derive(Debug, Clone)]
pub struct DescriptionContext<'a> {
    pub channel_name: &'a str,
    pub theme: &'a str,
    pub hosts: &'a [String],
    pub playlist_ids: &'a [String],
}

/// Assembles the upload description and truncates it to the platform limit.
pub fn build_description(draft: &ScriptDraft, context: &DescriptionContext<'_>) -> String {
    let theme = context.theme;
    let hosts = context.hosts.join("と");
    let mut sections = vec![format!(
        "{theme}について考える\n{hosts}が、{theme}の日常を紹介し本音で語ります\n\n\
         [利用ツールについて]\n本動画はAIで構成を生成し、運営者が内容の正確性を検証・編集しています。\n\
         音声合成にはAI技術を使用しています。\n情報源は公式サイトを参考にしています。\n"
    )];

    sections.push(format!("{}\n", draft.summary));

    let points = draft
        .key_points
        .iter()
        .map(|point| format!("・{point}"))
        .collect::<Vec<_>>()
        .join("\n");
    sections.push(format!("主要ポイント\n{points}\n"));

    match draft.key_points.first().filter(|point| !point.is_empty()) {
        Some(point) => {
            let topic: String = point.chars().take(30).collect();
            sections.push(format!(
                "コメントで教えてください！\n今日の『{topic}』について、皆さんはどう思いましたか？\n\
                 体験談や疑問、「うちはこうだよ」って話も大歓迎です！\n"
            ));
        }
        None => sections.push(
            "コメントで教えてください！\n今日の内容で気になったこと、「うちはこうだよ」って体験談も大歓迎です！\n"
                .to_string(),
        ),
    }

    let playlist_links: Vec<String> = context
        .playlist_ids
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .map(|id| format!("https://www.youtube.com/playlist?list={id}"))
        .collect();
    if !playlist_links.is_empty() {
        sections.push(format!("関連動画\n{}\n", playlist_links.join("\n")));
    }

    let sources = draft
        .reference_sources
        .iter()
        .map(|source| format!("・出典：{} {}", source.name, source.url))
        .collect::<Vec<_>>()
        .join("\n");
    let sources = if sources.is_empty() {
        FALLBACK_SOURCES.to_string()
    } else {
        sources
    };
    sections.push(format!("出典・参考\n{sources}\n"));

    let dynamic = draft
        .dynamic_hashtags
        .iter()
        .take(4)
        .map(|tag| format!("#{}", tag.replace('#', "")))
        .collect::<Vec<_>>()
        .join(" ");
    let hashtags = format!(
        "#{theme} #シニア #暮らし #実話 #{} {dynamic}",
        context.channel_name
    );
    sections.push(format!(
        "{}\n\nこの動画は公式情報源を基に独自に解説したものです最新情報は各公式サイトをご確認ください判断はご自身の責任で行ってください",
        hashtags.trim()
    ));

    sections.join("\n").chars().take(DESCRIPTION_LIMIT).collect()
}

/// Prefixes the title with `【#N】` unless it already carries one.
pub fn number_episode(draft: &mut ScriptDraft, episode: u32) {
    if !draft.title.starts_with("【#") {
        draft.title = format!("【#{episode}】{}", draft.title);
    }
    draft.episode_number = Some(episode);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::models::{Line, ReferenceSource};

    fn draft() -> ScriptDraft {
        ScriptDraft {
            title: "【年金】月5万円の暮らし".into(),
            source: "厚労省".into(),
            summary: "年金生活の実態".into(),
            description: String::new(),
            key_points: vec!["受給額は平均14万円".into()],
            reference_sources: vec![],
            first_comment: None,
            tags: vec![],
            dynamic_hashtags: vec!["年金".into(), "#老後".into()],
            script: vec![Line::new("カツミ", "年金の話")],
            polls: vec![],
            episode_number: None,
        }
    }

    #[test]
    fn description_includes_sections_and_fallback_sources() {
        let ctx = DescriptionContext {
            channel_name: "nenkin",
            theme: "年金",
            hosts: &["カツミ".to_string(), "ヒロシ".to_string()],
            playlist_ids: &["PL1".to_string(), " ".to_string()],
        };
        let text = build_description(&draft(), &ctx);
        assert!(text.starts_with("年金について考える\nカツミとヒロシが、"));
        assert!(text.contains("・受給額は平均14万円"));
        assert!(text.contains("『受給額は平均14万円』"));
        assert!(text.contains("https://www.youtube.com/playlist?list=PL1"));
        assert!(text.contains("国会議事録"));
        assert!(text.contains("#年金 #シニア #暮らし #実話 #nenkin #年金 #老後"));
    }

    #[test]
    fn description_is_truncated() {
        let mut long = draft();
        long.summary = "あ".repeat(3000);
        long.reference_sources = vec![ReferenceSource {
            name: "総務省".into(),
            url: "https://www.soumu.go.jp/".into(),
        }];
        let ctx = DescriptionContext {
            channel_name: "nenkin",
            theme: "年金",
            hosts: &[],
            playlist_ids: &[],
        };
        assert_eq!(build_description(&long, &ctx).chars().count(), DESCRIPTION_LIMIT);
    }

    #[test]
    fn episode_prefix_is_applied_once() {
        let mut draft = draft();
        number_episode(&mut draft, 12);
        number_episode(&mut draft, 13);
        assert_eq!(draft.title, "【#12】【年金】月5万円の暮らし");
        assert_eq!(draft.episode_number, Some(13));
    }
}
