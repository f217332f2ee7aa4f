//! Translation of coordinator/branch responses into transaction outcomes.
//!
//! Responders signal outcomes either with a status code (200 / 409 / 425) or, for
//! responders that predate status-code usage, with a `SUCCESS` / `FAILURE` / `ONGOING`
//! marker in the body. Status codes win when both are present.

use crate::error::DtxError;

pub const RESULT_SUCCESS: &str = "SUCCESS";
pub const RESULT_FAILURE: &str = "FAILURE";
pub const RESULT_ONGOING: &str = "ONGOING";

pub const STATUS_OK: u16 = 200;
pub const STATUS_CONFLICT: u16 = 409;
pub const STATUS_TOO_EARLY: u16 = 425;

/// Outcome of one remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    /// Retry later; never compensates.
    Ongoing,
    /// Permanent for this attempt; compensates.
    Failure,
}

impl Outcome {
    pub fn of<T>(result: &Result<T, DtxError>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(err) => err.outcome(),
        }
    }
}

/// Classify a response by status code and body.
///
/// - 200 is success regardless of body.
/// - 425, or a body carrying `ONGOING`, is [`DtxError::Ongoing`].
/// - 409, or a body carrying `FAILURE`, is [`DtxError::Failure`].
/// - Anything else is a [`DtxError::Remote`] built from the raw body.
pub fn classify_response(status: u16, body: &str) -> Result<(), DtxError> {
    match status {
        STATUS_OK => Ok(()),
        STATUS_TOO_EARLY => Err(DtxError::ongoing(body)),
        STATUS_CONFLICT => Err(DtxError::failure(body)),
        _ if body.contains(RESULT_ONGOING) => Err(DtxError::ongoing(body)),
        _ if body.contains(RESULT_FAILURE) => Err(DtxError::failure(body)),
        _ => Err(DtxError::Remote(body.to_string())),
    }
}
