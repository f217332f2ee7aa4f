use crate::classify::{Outcome, RESULT_FAILURE, RESULT_ONGOING};
use thiserror::Error;

/// Failures raised by a transactional resource or its connection layer.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("connect to {target} failed: {message}")]
    Connect { target: String, message: String },

    #[error("exec `{statement}` failed: {message}")]
    Statement { statement: String, message: String },

    #[error("exec `{statement}` timed out after {elapsed_ms} ms")]
    Timeout { statement: String, elapsed_ms: u128 },

    #[error("unsupported resource driver '{0}'")]
    UnsupportedDriver(String),
}

impl ResourceError {
    pub fn statement(statement: impl Into<String>, message: impl ToString) -> Self {
        Self::Statement {
            statement: statement.into(),
            message: message.to_string(),
        }
    }
}

/// Branch-level transaction errors.
///
/// `Ongoing` and `Failure` carry the remote response body and render it the same way the
/// wire markers do, so a re-serialized error is still recognized by older responders.
#[derive(Debug, Error)]
pub enum DtxError {
    /// Not yet decided; retry the whole branch operation later.
    #[error("{body}. {}", RESULT_ONGOING)]
    Ongoing { body: String },

    /// Permanent failure for this attempt; triggers compensation.
    #[error("{body}. {}", RESULT_FAILURE)]
    Failure { body: String },

    /// Any other non-success remote response.
    #[error("{0}")]
    Remote(String),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error("invalid branch info: {0}")]
    InvalidBranch(String),

    #[error("{0}")]
    Business(String),
}

impl DtxError {
    pub fn ongoing(body: impl Into<String>) -> Self {
        Self::Ongoing { body: body.into() }
    }

    pub fn failure(body: impl Into<String>) -> Self {
        Self::Failure { body: body.into() }
    }

    pub fn business(message: impl Into<String>) -> Self {
        Self::Business(message.into())
    }

    pub fn is_ongoing(&self) -> bool {
        matches!(self, Self::Ongoing { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    /// Transaction outcome this error stands for. Only `Ongoing` avoids compensation.
    pub fn outcome(&self) -> Outcome {
        if self.is_ongoing() {
            Outcome::Ongoing
        } else {
            Outcome::Failure
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_markers_survive_display() {
        let err = DtxError::ongoing("{\"dtm_result\":\"x\"}");
        assert!(err.to_string().ends_with(". ONGOING"));

        let err = DtxError::failure("conflict");
        assert_eq!(err.to_string(), "conflict. FAILURE");
    }

    #[test]
    fn only_ongoing_maps_to_retry() {
        assert_eq!(DtxError::ongoing("").outcome(), Outcome::Ongoing);
        assert_eq!(DtxError::failure("").outcome(), Outcome::Failure);
        assert_eq!(
            DtxError::Remote("teapot".into()).outcome(),
            Outcome::Failure
        );
        assert_eq!(DtxError::business("money").outcome(), Outcome::Failure);
    }

    #[test]
    fn resource_errors_convert() {
        let err: DtxError = ResourceError::statement("xa end 'g-b'", "gone").into();
        assert!(matches!(err, DtxError::Resource(_)));
        assert_eq!(err.to_string(), "exec `xa end 'g-b'` failed: gone");
    }
}
