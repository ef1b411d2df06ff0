use thiserror::Error;

/// Failures that can surface while importing an extract into the graph.
#[derive(Debug, Error)]
pub enum ImportError {
    /// The store could not be reached. Safe to retry the whole batch.
    #[error("store connectivity failure: {0}")]
    Connectivity(String),

    /// A value the store refused (ill-typed or malformed parameter).
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// A record missing a required field. Normally dropped during filtering.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("source error ({source_name}): {detail}")]
    Source { source_name: String, detail: String },

    #[error("invalid batch size {0}: must be positive")]
    InvalidBatchSize(usize),
}

pub type ImportResult<T> = std::result::Result<T, ImportError>;

impl ImportError {
    pub fn connectivity<T: Into<String>>(msg: T) -> Self {
        ImportError::Connectivity(msg.into())
    }

    pub fn constraint<T: Into<String>>(msg: T) -> Self {
        ImportError::ConstraintViolation(msg.into())
    }

    pub fn source_error<N: Into<String>, D: ToString>(source_name: N, detail: D) -> Self {
        ImportError::Source {
            source_name: source_name.into(),
            detail: detail.to_string(),
        }
    }

    /// Whether re-running the same batch from scratch may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ImportError::Connectivity(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connectivity_is_transient() {
        assert!(ImportError::connectivity("socket closed").is_transient());
        assert!(!ImportError::constraint("NaN rating").is_transient());
        assert!(!ImportError::MalformedRecord("empty tag".into()).is_transient());
        assert!(!ImportError::source_error("tags.csv", "bad header").is_transient());
        assert!(!ImportError::InvalidBatchSize(0).is_transient());
    }

    #[test]
    fn test_source_error_message_names_extract() {
        let err = ImportError::source_error("ratings.csv", "missing field `rating`");
        assert_eq!(
            err.to_string(),
            "source error (ratings.csv): missing field `rating`"
        );
    }
}
