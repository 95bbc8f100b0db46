use lumen_syntax::ParseError;

/// The per-project semantic environment could not be constructed, typically
/// because the classpath is unusable. Aborts the project's current cascade;
/// previously published artifacts stay visible.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to build semantic environment: {message}")]
pub struct EnvironmentError {
    pub message: String,
}

impl EnvironmentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure modes of a parse-tree cache lookup.
///
/// `Cancelled` is not a failure: the result is simply no longer needed.
/// Errors are `Clone` because a single in-flight parse fans its outcome out
/// to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("failed to read source content: {message}")]
    Content { message: String },

    #[error("parse was cancelled")]
    Cancelled,
}

impl TreeError {
    pub fn content(err: &std::io::Error) -> Self {
        TreeError::Content {
            message: err.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TreeError::Cancelled)
    }
}
