mod common;

use std::sync::Arc;

use tempfile::TempDir;

use kamishibai_core::script::Line;
use kamishibai_core::speech::wav::duration_seconds;
use kamishibai_core::speech::{
    ClipKind, SpeechError, SpeechProvider, SpeechSynthesizer, SKIP_SECONDS,
};

use common::{FakeSpeech, SAMPLE_RATE};

fn synthesizer(providers: Vec<Arc<FakeSpeech>>) -> SpeechSynthesizer {
    let providers: Vec<Arc<dyn SpeechProvider>> = providers
        .into_iter()
        .map(|provider| provider as Arc<dyn SpeechProvider>)
        .collect();
    SpeechSynthesizer::new(providers, SAMPLE_RATE, 0.5, "カツミ")
}

#[tokio::test]
async fn symbol_only_line_becomes_short_silence() {
    let dir = TempDir::new().unwrap();
    let primary = Arc::new(FakeSpeech::new("primary", 1.2));
    let synth = synthesizer(vec![primary.clone()]);
    let lines = vec![
        Line::new("カツミ", "年金の話をしましょう"),
        Line::new("ヒロシ", "…！？"),
    ];

    let report = synth.synthesize_script(&lines, dir.path()).await.unwrap();

    assert_eq!(report.clips[1].kind, ClipKind::Skipped);
    assert_eq!(report.skipped_lines, 1);
    assert_eq!(report.silent_lines, 0);
    let seconds = duration_seconds(&report.clips[1].path).unwrap();
    assert!((seconds - SKIP_SECONDS).abs() < 1e-3);
    assert_eq!(primary.texts(), vec!["年金の話をしましょう".to_string()]);
}

#[tokio::test]
async fn short_interjection_is_expanded_before_synthesis() {
    let dir = TempDir::new().unwrap();
    let primary = Arc::new(FakeSpeech::new("primary", 1.0));
    let synth = synthesizer(vec![primary.clone()]);

    synth
        .synthesize_script(&[Line::new("ヒロシ", "はい")], dir.path())
        .await
        .unwrap();

    assert_eq!(primary.texts(), vec!["はい分かりました".to_string()]);
}

#[tokio::test]
async fn cascade_falls_through_to_next_provider() {
    let dir = TempDir::new().unwrap();
    let edge = Arc::new(FakeSpeech::failing("edge"));
    let polly = Arc::new(FakeSpeech::new("polly", 0.8).fail_when(|text| text.contains("国民年金")));
    let gemini = Arc::new(FakeSpeech::new("gemini", 2.0));
    let synth = synthesizer(vec![edge.clone(), polly.clone(), gemini.clone()]);
    let lines = vec![
        Line::new("カツミ", "厚生年金の話です"),
        Line::new("ヒロシ", "国民年金はどうですか"),
    ];

    let report = synth.synthesize_script(&lines, dir.path()).await.unwrap();

    assert_eq!(
        report.clips[0].kind,
        ClipKind::Speech {
            provider: "polly".into()
        }
    );
    assert_eq!(
        report.clips[1].kind,
        ClipKind::Speech {
            provider: "gemini".into()
        }
    );
    assert!((report.clips[1].duration_seconds - 2.0).abs() < 1e-3);
    assert_eq!(edge.texts().len(), 2);
    assert_eq!(gemini.texts().len(), 1);
}

#[tokio::test]
async fn single_failed_line_gets_length_based_silence() {
    let dir = TempDir::new().unwrap();
    let broken = Arc::new(FakeSpeech::new("only", 1.0).fail_when(|text| text.starts_with("失敗")));
    let synth = synthesizer(vec![broken]);
    let lines = vec![
        Line::new("カツミ", "一行目です"),
        Line::new("ヒロシ", "失敗する行ですが長めに話しています"),
        Line::new("カツミ", "三行目です"),
    ];

    let report = synth.synthesize_script(&lines, dir.path()).await.unwrap();

    assert_eq!(report.silent_lines, 1);
    assert_eq!(report.clips[1].kind, ClipKind::Silence);
    assert!(report.clips[1].duration_seconds >= 1.0);
    assert!(report.clips[1].path.exists());
}

#[tokio::test]
async fn majority_silence_aborts_and_removes_clips() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(FakeSpeech::new("only", 1.0).fail_when(|text| text.contains("無音")));
    let synth = synthesizer(vec![provider]);
    let lines: Vec<Line> = (0..10)
        .map(|index| {
            if index < 6 {
                Line::new("カツミ", format!("無音になる{index}行目の台詞です"))
            } else {
                Line::new("ヒロシ", format!("普通に読める{index}行目の台詞です"))
            }
        })
        .collect();

    let err = synth.synthesize_script(&lines, dir.path()).await.unwrap_err();

    match err {
        SpeechError::SilenceThresholdExceeded {
            silent,
            total,
            fraction,
        } => {
            assert_eq!((silent, total), (6, 10));
            assert!((fraction - 0.6).abs() < f64::EPSILON);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    for index in 0..10 {
        assert!(!SpeechSynthesizer::clip_path(dir.path(), index).exists());
    }
}
