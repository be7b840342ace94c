use thiserror::Error;

/// Errors produced by the chat core.
#[derive(Debug, Error)]
pub enum ChatError {
    /// A binary frame arrived; only text frames carry chat messages.
    #[error("binary content is not supported")]
    UnsupportedContent,

    #[error("codec error: {0}")]
    Codec(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// An operation was invoked before a base implementation was registered.
    #[error("operation `{0}` has no base implementation")]
    MissingBase(&'static str),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        ChatError::Codec(e.to_string())
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
