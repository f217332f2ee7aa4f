//! Client error types

use dtx_core::{DtxError, ResourceError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure talking to the coordinator or a branch.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Classified remote outcome, invalid branch info, or a resource failure.
    #[error(transparent)]
    Dtx(#[from] DtxError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ResourceError> for ClientError {
    fn from(err: ResourceError) -> Self {
        Self::Dtx(DtxError::Resource(err))
    }
}

impl ClientError {
    /// The remote side has not decided yet; retry the whole operation later.
    pub fn is_ongoing(&self) -> bool {
        matches!(self, Self::Dtx(err) if err.is_ongoing())
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Dtx(err) if err.is_failure())
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
