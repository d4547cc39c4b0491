use thiserror::Error;

use crate::types::RunState;

#[derive(Debug, Error)]
pub enum WeirError {
    // Execution errors
    #[error("step '{step}' failed: {cause}")]
    StepExecutionFailed { step: String, cause: String },

    #[error("step '{step}' timed out after {timeout_secs}s")]
    StepTimeout { step: String, timeout_secs: u64 },

    #[error("no route predicate matched output of step '{step}' (declared branches: {branches:?})")]
    UnroutedOutput { step: String, branches: Vec<String> },

    #[error(
        "loop budget exhausted on edge '{edge}' into step '{step}': traversal {traversals} reached limit {limit}"
    )]
    LoopBudgetExceeded {
        step: String,
        edge: String,
        traversals: u32,
        limit: u32,
        partial: Box<RunState>,
    },

    #[error("run cancelled")]
    Cancelled,

    // Graph construction errors
    #[error("input '{input}' of step '{step}' is neither edge-bound, external, nor optional")]
    UnboundInput { step: String, input: String },

    #[error("unknown step '{0}' referenced in graph")]
    UnknownStep(String),

    #[error("invalid graph: {0}")]
    Graph(String),

    // Run setup errors
    #[error("no executor registered under '{executor}' for step '{step}'")]
    ExecutorNotFound { step: String, executor: String },

    #[error("missing external input '{input}' for step '{step}'")]
    MissingExternalInput { step: String, input: String },

    // Config errors
    #[error("config error: {0}")]
    Config(String),

    #[error("config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WeirError>;
