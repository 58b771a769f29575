mod common;

use std::sync::Arc;

use tempfile::TempDir;

use kamishibai_core::history::{RunStatus, SqliteHistoryStore};
use kamishibai_core::media::{Ffmpeg, MediaAssembler, RenderProps};
use kamishibai_core::pipeline::{Pipeline, PipelineError, CONTENT_FILE, SHORT_RUN_MARKER};
use kamishibai_core::publish::PublishError;
use kamishibai_core::retry::RecordingSleeper;
use kamishibai_core::script::repair::{
    dedup, strip_boundary_phrases, strip_closing_phrases, strip_greetings,
};
use kamishibai_core::script::{
    load_draft, save_draft, Line, ScriptDraft, ScriptError, ScriptGenerator, LevenshteinRatio,
    SimilarityScorer, FEMALE_VOICE, MALE_VOICE,
};
use kamishibai_core::speech::{SpeechProvider, SpeechSynthesizer};
use kamishibai_core::RunMode;

use common::{
    draft_json, fixture_config, outline_json, CannedCompletion, FakeConcatenator, FakeSpeech,
    FlakyRenderer, RecordingExecutor,
};

#[tokio::test]
async fn short_detail_attempt_is_regenerated_not_merged() {
    let base = TempDir::new().unwrap();
    let config = fixture_config(&base);
    let llm = Arc::new(CannedCompletion::new(vec![
        outline_json(),
        draft_json(20),
        draft_json(40),
    ]));
    let generator = ScriptGenerator::new(llm.clone(), &config);

    let generated = generator.generate("年金の繰り下げ受給について").await.unwrap();

    assert_eq!(generated.attempts, 2);
    assert_eq!(generated.draft.line_count(), 40);
    assert_eq!(llm.calls(), 3);
    assert_eq!(generated.repair.removed_duplicates, 0);
    let first = &generated.draft.script[0];
    assert_eq!(first.speaker, "カツミ");
    assert_eq!(first.voice, FEMALE_VOICE);
    assert_eq!(generated.draft.script[1].voice, MALE_VOICE);
}

#[tokio::test]
async fn detail_gives_up_after_attempt_cap() {
    let base = TempDir::new().unwrap();
    let mut config = fixture_config(&base);
    config.policy.max_detail_attempts = 3;
    let llm = Arc::new(CannedCompletion::new(vec![
        outline_json(),
        draft_json(10),
        "not json at all".into(),
        draft_json(12),
    ]));
    let generator = ScriptGenerator::new(llm.clone(), &config);

    let err = generator.generate("material").await.unwrap_err();
    match err {
        ScriptError::InsufficientScriptLength {
            lines,
            required,
            attempts,
        } => assert_eq!((lines, required, attempts), (12, 35, 3)),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(llm.calls(), 4);
}

#[test]
fn dedup_keeps_no_line_similar_to_an_earlier_kept_line() {
    let scorer = LevenshteinRatio;
    let mut lines = vec![
        Line::new("カツミ", "年金は65歳から受け取れます"),
        Line::new("ヒロシ", "年金は65歳から受け取れますね"),
        Line::new("カツミ", "繰り下げると増額されます"),
        Line::new("ヒロシ", "まったく別の話になりますが、医療費の自己負担も変わります"),
        Line::new("カツミ", "繰り下げると増額されますよ"),
    ];

    let removed = dedup(&mut lines, &scorer, 0.75);

    assert_eq!(removed, 2);
    for (index, line) in lines.iter().enumerate() {
        for earlier in &lines[..index] {
            assert!(scorer.score(&line.text, &earlier.text) < 0.75);
        }
    }
}

#[test]
fn closing_and_greeting_repairs_are_idempotent() {
    let mut lines = vec![
        Line::new("カツミ", "皆さん、こんにちは。年金の話です"),
        Line::new("ヒロシ", "皆さん、こんにちは。今日はここまでと言いたいところですが"),
        Line::new("カツミ", "まだ続きます。また次回とは言いません"),
        Line::new("ヒロシ", "今日はここまで"),
        Line::new("カツミ", "また次回"),
    ];

    let first_closing = strip_closing_phrases(&mut lines);
    let first_greeting = strip_greetings(&mut lines);
    assert!(!first_closing.is_empty());
    assert!(!first_greeting.is_empty());
    let once: Vec<String> = lines.iter().map(|line| line.text.clone()).collect();

    assert!(strip_closing_phrases(&mut lines).is_empty());
    assert!(strip_greetings(&mut lines).is_empty());
    let twice: Vec<String> = lines.iter().map(|line| line.text.clone()).collect();

    assert_eq!(once, twice);
    assert!(once[0].contains("こんにちは"));
    assert_eq!(once[3], "今日はここまで");
    assert_eq!(once[4], "また次回");
}

#[test]
fn spliced_phrases_are_stripped_in_one_pass() {
    let texts = |lines: &[Line]| lines.iter().map(|line| line.text.clone()).collect::<Vec<_>>();

    let mut closing = vec![
        Line::new("カツミ", "ままたねたね"),
        Line::new("ヒロシ", "締め"),
        Line::new("カツミ", "締め"),
    ];
    strip_closing_phrases(&mut closing);
    let once = texts(&closing);
    assert_eq!(once[0], "");
    assert!(strip_closing_phrases(&mut closing).is_empty());
    assert_eq!(texts(&closing), once);

    let mut greeting = vec![
        Line::new("カツミ", "冒頭"),
        Line::new("ヒロシ", "こんにこんにちはちは、年金の話"),
    ];
    strip_greetings(&mut greeting);
    assert_eq!(greeting[1].text, "、年金の話");
    assert!(strip_greetings(&mut greeting).is_empty());
    assert_eq!(greeting[1].text, "、年金の話");

    let mut crossed = vec![
        Line::new("カツミ", "冒頭"),
        Line::new("ヒロシ", "またこんにちは次回"),
        Line::new("カツミ", "締め"),
        Line::new("ヒロシ", "締め"),
    ];
    assert!(!strip_boundary_phrases(&mut crossed).is_empty());
    let once = texts(&crossed);
    assert_eq!(once[1], "");
    assert!(strip_closing_phrases(&mut crossed).is_empty());
    assert!(strip_greetings(&mut crossed).is_empty());
    assert!(strip_boundary_phrases(&mut crossed).is_empty());
    assert_eq!(texts(&crossed), once);
}

#[tokio::test]
async fn draft_round_trips_through_content_json() {
    let base = TempDir::new().unwrap();
    let draft: ScriptDraft = serde_json::from_str(&draft_json(12)).unwrap();
    let path = base.path().join("output").join(CONTENT_FILE);

    save_draft(&draft, &path).await.unwrap();
    let loaded = load_draft(&path).await.unwrap();

    assert_eq!(loaded.line_count(), draft.line_count());
    assert_eq!(loaded.speakers(), draft.speakers());
    let texts = |d: &ScriptDraft| d.script.iter().map(|l| l.text.clone()).collect::<Vec<_>>();
    assert_eq!(texts(&loaded), texts(&draft));
}

fn script_only_pipeline(base: &TempDir, replies: Vec<String>) -> (Pipeline, SqliteHistoryStore) {
    let config = fixture_config(base);
    let generator = ScriptGenerator::new(Arc::new(CannedCompletion::new(replies)), &config);
    let synthesizer = SpeechSynthesizer::new(Vec::new(), 16_000, 0.5, "カツミ");
    let assembler = MediaAssembler::from_config(&config);
    let history = SqliteHistoryStore::new(config.history_db()).unwrap();
    history.initialize().unwrap();
    let pipeline = Pipeline::new(config, generator, synthesizer, assembler).with_history(history.clone());
    (pipeline, history)
}

#[tokio::test]
async fn script_only_run_saves_content_and_records_history() {
    let base = TempDir::new().unwrap();
    let (pipeline, history) = script_only_pipeline(&base, vec![outline_json(), draft_json(36)]);

    let outcome = pipeline
        .run(RunMode::ScriptOnly, "年金の繰り下げ受給について")
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.line_count, 36);
    assert!(outcome.title.starts_with("【#1】"));
    assert!(outcome.video_path.is_none());
    let saved = load_draft(&outcome.content_path).await.unwrap();
    assert_eq!(saved.episode_number, Some(1));
    assert!(saved.description.contains("主要ポイント"));

    let records = history.list(5).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, RunStatus::ScriptOnly);
    assert_eq!(records[0].line_count, 36);
}

#[tokio::test]
async fn prod_without_publisher_fails_before_generation() {
    let base = TempDir::new().unwrap();
    let (pipeline, history) = script_only_pipeline(&base, vec![outline_json(), draft_json(36)]);

    let err = pipeline.run(RunMode::Prod, "material").await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Publish(PublishError::MissingCredentials("youtube"))
    ));
    assert_eq!(err.class(), "publish");
    let records = history.list(5).unwrap();
    assert_eq!(records[0].status, RunStatus::Failed);
    assert!(records[0].error.is_some());
}

#[tokio::test]
async fn short_prod_run_truncates_renders_and_cleans_up() {
    let base = TempDir::new().unwrap();
    let config = fixture_config(&base);
    let generator = ScriptGenerator::new(
        Arc::new(CannedCompletion::new(vec![outline_json(), draft_json(40)])),
        &config,
    );
    let speech = Arc::new(FakeSpeech::new("fake", 1.0));
    let providers: Vec<Arc<dyn SpeechProvider>> = vec![speech.clone()];
    let synthesizer = SpeechSynthesizer::new(providers, 16_000, 0.5, "カツミ");
    let executor = Arc::new(RecordingExecutor::default());
    let ffmpeg = Arc::new(Ffmpeg::new("ffmpeg").with_executor(executor.clone()));
    let concatenator = Arc::new(FakeConcatenator::new(6.0));
    let renderer = Arc::new(FlakyRenderer::new(0));
    let assembler = MediaAssembler::new(&config, concatenator.clone(), renderer.clone(), ffmpeg)
        .with_sleeper(Arc::new(RecordingSleeper::new()));
    let pipeline = Pipeline::new(config.clone(), generator, synthesizer, assembler);

    let outcome = pipeline.run(RunMode::ShortProd, "material").await.unwrap();

    assert_eq!(outcome.line_count, 5);
    assert!(outcome.title.starts_with(&format!("{SHORT_RUN_MARKER}【#1】")));
    assert_eq!(speech.texts().len(), 5);
    assert_eq!(renderer.calls(), 1);
    assert!(outcome.publication.is_none());
    assert!(outcome.is_success());
    assert_eq!(
        outcome.video_path.as_deref(),
        Some(config.output_dir().join("narrated.mp4").as_path())
    );

    let props: RenderProps =
        serde_json::from_str(&std::fs::read_to_string(outcome.props_path.unwrap()).unwrap()).unwrap();
    assert_eq!((props.width, props.height, props.fps), (960, 540, 12));
    assert_eq!(props.script.len(), 5);
    assert_eq!(props.script[4].end_seconds, 6.0);
    assert_eq!(props.duration_in_frames, 72 + config.render.slide_duration_frames);

    let commands = executor.commands();
    assert_eq!(commands.len(), 1);
    assert!(commands[0].contains("-shortest"));

    for clip in concatenator.inputs() {
        assert!(!clip.exists(), "clip {} should be cleaned up", clip.display());
    }
    assert!(!config.output_dir().join("render.mp4").exists());
}
