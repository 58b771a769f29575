use std::io;

use thiserror::Error;

use crate::llm::LlmError;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("llm error: {0}")]
    Llm(#[from] LlmError),
    #[error("malformed json payload: {0}")]
    MalformedPayload(String),
    #[error("outline could not be parsed: {0}")]
    MalformedOutline(String),
    #[error("script too short after {attempts} attempt(s): {lines} lines < {required}")]
    InsufficientScriptLength {
        lines: usize,
        required: usize,
        attempts: u32,
    },
    #[error("failed to persist draft: {0}")]
    Io(#[from] io::Error),
    #[error("failed to serialize draft: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type ScriptResult<T> = Result<T, ScriptError>;
