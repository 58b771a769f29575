use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use kamishibai_core::{
    load_config, HistoryError, KamishibaiConfig, Pipeline, PipelineError, RunMode, RunOutcome,
    RunRecord, SqliteHistoryStore,
};
use serde::Serialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] kamishibai_core::ConfigError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("history error: {0}")]
    History(#[from] HistoryError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("run finished without a published video: {0}")]
    Unpublished(String),
    #[error("one or more configuration checks failed")]
    CheckFailed,
}

impl AppError {
    pub fn class(&self) -> &'static str {
        match self {
            AppError::Config(_) | AppError::CheckFailed => "config",
            AppError::Pipeline(err) => err.class(),
            AppError::History(_) => "history",
            AppError::Io(_) => "io",
            AppError::Serialize(_) => "output",
            AppError::Unpublished(_) => "publish",
        }
    }

    /// Message, class and every `source()` below it, one cause per line.
    pub fn report(&self) -> String {
        let mut report = format!("erro: {self} [{}]", self.class());
        let mut cause = std::error::Error::source(self);
        while let Some(err) = cause {
            report.push_str(&format!("\n  causa: {err}"));
            cause = std::error::Error::source(err);
        }
        report
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Kamishibai video pipeline control interface", long_about = None)]
pub struct Cli {
    /// Path to the channel config
    #[arg(long, default_value = "configs/kamishibai.toml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Log filter, e.g. `debug` or `kamishibai_core=trace` (overrides RUST_LOG)
    #[arg(long)]
    pub log_level: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate, voice, render and (in prod) publish one episode
    Run(RunArgs),
    /// Generate and save the script only
    Script(MaterialArgs),
    /// List recorded pipeline runs
    History(HistoryArgs),
    /// Configuration utilities
    #[command(subcommand)]
    Config(ConfigCommands),
    /// Print shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Run mode
    #[arg(long, value_enum, default_value_t = ModeArg::Test)]
    pub mode: ModeArg,
    #[command(flatten)]
    pub material: MaterialArgs,
}

#[derive(Args, Debug)]
pub struct MaterialArgs {
    /// Topic material file (defaults to channel.material_path)
    #[arg(long)]
    pub material: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Number of records returned
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Load and validate the config, reporting missing pieces
    Check,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    #[arg(value_enum)]
    pub shell: Shell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Test,
    ShortProd,
    Prod,
    ScriptOnly,
}

impl From<ModeArg> for RunMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Test => RunMode::Test,
            ModeArg::ShortProd => RunMode::ShortProd,
            ModeArg::Prod => RunMode::Prod,
            ModeArg::ScriptOnly => RunMode::ScriptOnly,
        }
    }
}

/// Installs the global subscriber. `--log-level` wins over `RUST_LOG`.
pub fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

pub async fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions(args) = &cli.command {
        let mut command = Cli::command();
        clap_complete::generate(args.shell, &mut command, "kamishibaictl", &mut io::stdout());
        return Ok(());
    }

    let context = AppContext::new(&cli.config)?;
    match &cli.command {
        Commands::Run(args) => {
            let outcome = context
                .run_pipeline(args.mode.into(), args.material.material.as_deref())
                .await?;
            render(&outcome, cli.format)?;
            if !outcome.is_success() {
                return Err(AppError::Unpublished(outcome.title.clone()));
            }
        }
        Commands::Script(args) => {
            let outcome = context
                .run_pipeline(RunMode::ScriptOnly, args.material.as_deref())
                .await?;
            render(&outcome, cli.format)?;
        }
        Commands::History(args) => {
            let history = context.history(args.limit)?;
            render(&history, cli.format)?;
        }
        Commands::Config(ConfigCommands::Check) => {
            let report = context.config_check();
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::CheckFailed);
            }
        }
        Commands::Completions(_) => {}
    }
    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: KamishibaiConfig,
    config_path: PathBuf,
}

impl AppContext {
    fn new(config_path: &Path) -> Result<Self> {
        let config = load_config(config_path)?;
        Ok(Self::from_config(config, config_path))
    }

    fn from_config(config: KamishibaiConfig, config_path: &Path) -> Self {
        Self {
            config,
            config_path: config_path.to_path_buf(),
        }
    }

    async fn run_pipeline(&self, mode: RunMode, material: Option<&Path>) -> Result<RunOutcome> {
        let pipeline = Pipeline::from_config(self.config.clone())?;
        let material = pipeline.load_material(material).await?;
        Ok(pipeline.run(mode, &material).await?)
    }

    fn history(&self, limit: usize) -> Result<HistoryList> {
        let path = self.config.history_db();
        if !path.exists() {
            return Ok(HistoryList { rows: Vec::new() });
        }
        let store = SqliteHistoryStore::builder()
            .path(&path)
            .read_only(true)
            .build()?;
        Ok(HistoryList {
            rows: store.list(limit)?,
        })
    }

    fn config_check(&self) -> Vec<CheckEntry> {
        let config = &self.config;
        let mut entries = vec![CheckEntry::ok(
            "config",
            format!("loaded {}", self.config_path.display()),
        )];

        match config.validate() {
            Ok(()) => entries.push(CheckEntry::ok(
                "policy",
                format!("{} LLM key(s), speakers valid", config.llm.api_keys.len()),
            )),
            Err(err) => entries.push(CheckEntry::error("policy", err.to_string())),
        }

        let polly = &config.tts.polly;
        if polly.access_key.is_some() && polly.secret_key.is_some() {
            entries.push(CheckEntry::ok("polly", "credentials present"));
        } else {
            entries.push(CheckEntry::warn("polly", "no credentials, cascade skips Polly"));
        }

        let publish = &config.publish;
        if publish.client_id.is_some()
            && publish.client_secret.is_some()
            && publish.refresh_token.is_some()
        {
            entries.push(CheckEntry::ok("youtube", "OAuth credentials present"));
        } else {
            entries.push(CheckEntry::warn(
                "youtube",
                "OAuth credentials missing, prod runs will fail",
            ));
        }

        let project = config.resolve_path(&config.render.project_dir);
        if project.is_dir() {
            entries.push(CheckEntry::ok("remotion", project.display().to_string()));
        } else {
            entries.push(CheckEntry::warn(
                "remotion",
                format!("project not found at {}", project.display()),
            ));
        }

        if let Some(epilogue) = &config.render.epilogue_video {
            let path = config.resolve_path(epilogue);
            if path.exists() {
                entries.push(CheckEntry::ok("epilogue", path.display().to_string()));
            } else {
                entries.push(CheckEntry::warn(
                    "epilogue",
                    format!("missing {}, videos ship without it", path.display()),
                ));
            }
        }
        entries
    }
}

impl DisplayFallback for RunOutcome {
    fn display(&self) -> String {
        let mut lines = vec![
            format!("Run {} ({})", self.run_id, self.mode),
            format!("  - Title: {}", self.title),
            format!(
                "  - Lines: {} (detail attempts: {})",
                self.line_count, self.detail_attempts
            ),
            format!("  - Script: {}", self.content_path.display()),
        ];
        for warning in &self.quality_warnings {
            lines.push(format!("  - Quality: {warning}"));
        }
        if let Some(video) = &self.video_path {
            lines.push(format!("  - Video: {}", video.display()));
            lines.push(format!("  - Silent lines: {}", self.silent_lines));
        }
        if let Some(report) = &self.publication {
            match (&report.video_id, &report.video_url) {
                (Some(id), Some(url)) => lines.push(format!("  - Published: {id} {url}")),
                (Some(id), None) => lines.push(format!("  - Published: {id}")),
                _ => lines.push("  - Published: no".to_string()),
            }
            for warning in &report.warnings {
                lines.push(format!("  - Warning: {warning}"));
            }
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryList {
    pub rows: Vec<RunRecord>,
}

impl DisplayFallback for HistoryList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "No runs recorded".to_string();
        }
        let mut lines = Vec::new();
        for entry in &self.rows {
            lines.push(format!(
                "{} | {} | {} | mode={} | status={} | video={}",
                entry.finished_at.format("%Y-%m-%d %H:%M"),
                entry.run_id,
                if entry.title.is_empty() {
                    "<untitled>"
                } else {
                    entry.title.as_str()
                },
                entry.mode,
                entry.status,
                entry.video_id.as_deref().unwrap_or("-"),
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct CheckEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl CheckEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for Vec<CheckEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(|entry| format!("[{}] {}: {}", entry.status, entry.name, entry.detail))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
