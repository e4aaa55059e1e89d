use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemorphError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("storage error: {0}")]
    Store(String),

    #[error("query parse error: {message} (at `{fragment}`)")]
    QueryParse { fragment: String, message: String },

    #[error("unsupported function: {0}")]
    UnsupportedFunction(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("evaluation error: {0}")]
    Evaluation(String),

    #[error("query cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TelemorphError {
    pub fn parse(fragment: impl Into<String>, message: impl Into<String>) -> Self {
        Self::QueryParse {
            fragment: fragment.into(),
            message: message.into(),
        }
    }

    /// True for errors caused by the caller's input rather than by the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_)
                | Self::QueryParse { .. }
                | Self::UnsupportedFunction(_)
                | Self::UnsupportedOperation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TelemorphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_carries_fragment() {
        let err = TelemorphError::parse("[5x]", "invalid duration");
        assert_eq!(
            err.to_string(),
            "query parse error: invalid duration (at `[5x]`)"
        );
        assert!(err.is_client_error());
    }

    #[test]
    fn storage_errors_are_not_client_errors() {
        assert!(!TelemorphError::Store("disk full".into()).is_client_error());
        assert!(!TelemorphError::Cancelled.is_client_error());
    }
}
