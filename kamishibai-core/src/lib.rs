pub mod cleanup;
pub mod config;
pub mod credentials;
pub mod error;
pub mod executor;
pub mod history;
pub mod llm;
pub mod media;
pub mod pipeline;
pub mod publish;
pub mod retry;
pub mod script;
pub mod speech;

pub use config::{load_config, ChannelGroup, KamishibaiConfig, RenderProfile, RunMode};
pub use credentials::{
    AttemptOutcome, Credential, CredentialPool, HealthState, ProviderAttempt, ProviderKind,
};
pub use error::{ConfigError, Result};
pub use executor::{CommandExecutor, SystemCommandExecutor};
pub use history::{HistoryError, RunRecord, RunStatus, SqliteHistoryStore, SqliteHistoryStoreBuilder};
pub use llm::{ChatMessage, Completion, CompletionOptions, CompletionTransport, LlmError, LlmService};
pub use media::{AssembledVideo, AudioConcatenator, MediaAssembler, MediaError, VideoRenderer};
pub use pipeline::{Pipeline, PipelineError, PipelineRun, PreparedScript, RunOutcome};
pub use publish::{PublicationReport, PublishError, Publisher, VideoPlatform};
pub use retry::{RecordingSleeper, RetryPolicy, Sleeper, TokioSleeper};
pub use script::{Line, ScriptDraft, ScriptError, ScriptGenerator};
pub use speech::{SpeechError, SpeechProvider, SpeechSynthesizer, SynthesisReport};
