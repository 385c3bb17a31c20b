use thiserror::Error;

/// Message shown to callers when a question could not be compiled or was rejected.
pub const GENERIC_FAILURE_MESSAGE: &str =
    "Sorry, I could not understand or safely answer that question.";

#[derive(Error, Debug)]
pub enum ChatBiError {
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Unsafe SQL: {0}")]
    UnsafeSql(String),

    #[error("Unsupported field: {0}")]
    UnsupportedField(String),

    #[error("Unsupported aggregation: {0}")]
    UnsupportedAggregation(String),

    #[error("Unsupported dataset: {0}")]
    UnsupportedDataset(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Model client error: {0}")]
    ModelClient(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification used by callers to decide how to react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The plan or question was rejected; the caller may rephrase.
    UserInput,
    /// The compiled SQL failed the structural safety check.
    Unsafe,
    /// The builder received state the validator should have rejected.
    InternalBug,
    /// A collaborator (model client, executor, storage, config) failed.
    Collaborator,
}

impl ChatBiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatBiError::InvalidPlan(_) | ChatBiError::Unauthorized(_) => ErrorKind::UserInput,
            ChatBiError::UnsafeSql(_) => ErrorKind::Unsafe,
            ChatBiError::UnsupportedField(_)
            | ChatBiError::UnsupportedAggregation(_)
            | ChatBiError::UnsupportedDataset(_) => ErrorKind::InternalBug,
            ChatBiError::ModelClient(_)
            | ChatBiError::Execution(_)
            | ChatBiError::Config(_)
            | ChatBiError::Database(_)
            | ChatBiError::Io(_)
            | ChatBiError::Json(_) => ErrorKind::Collaborator,
        }
    }

    /// Text that is safe to show an untrusted caller. Raw reasons stay in the logs.
    pub fn user_message(&self) -> &'static str {
        match self.kind() {
            ErrorKind::UserInput | ErrorKind::Unsafe | ErrorKind::InternalBug => {
                GENERIC_FAILURE_MESSAGE
            }
            ErrorKind::Collaborator => "The service is busy, please try again later.",
        }
    }

    /// True for rejections that terminate a single request without being a service fault.
    pub fn is_pipeline_rejection(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Collaborator)
    }
}

pub type Result<T> = std::result::Result<T, ChatBiError>;
