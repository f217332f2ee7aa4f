//! Exactly-one-of-two completion for a guarded region.
//!
//! A region ends in success, an error, or a panic. Success runs `confirm`, whose error
//! becomes the result. An error runs `compensate` and keeps the original error. A panic
//! runs `compensate` and then resumes unwinding with the original payload.
//! Compensation is best-effort: its failure is logged and never returned.

use futures::FutureExt;
use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use tracing::{error, warn};

/// Captured exit of a guarded region.
pub enum Completion<T, E> {
    Success(T),
    Failure(E),
    Panic(Box<dyn Any + Send>),
}

impl<T, E> Completion<T, E> {
    /// Drive `region` to completion, catching a panic instead of unwinding through the caller.
    pub async fn capture<F>(region: F) -> Self
    where
        F: Future<Output = Result<T, E>>,
    {
        match AssertUnwindSafe(region).catch_unwind().await {
            Ok(Ok(value)) => Self::Success(value),
            Ok(Err(err)) => Self::Failure(err),
            Err(payload) => Self::Panic(payload),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Run exactly one of `confirm` / `compensate` for this exit.
    pub async fn resolve<C, CF, K, KF>(self, confirm: C, compensate: K) -> Result<T, E>
    where
        C: FnOnce() -> CF,
        CF: Future<Output = Result<(), E>>,
        K: FnOnce() -> KF,
        KF: Future<Output = Result<(), E>>,
        E: Display,
    {
        match self {
            Self::Success(value) => {
                confirm().await?;
                Ok(value)
            }
            Self::Failure(err) => {
                if let Err(compensate_err) = compensate().await {
                    warn!(error = %err, compensate_error = %compensate_err, "compensation failed");
                }
                Err(err)
            }
            Self::Panic(payload) => {
                error!(
                    fault = %panic_message(payload.as_ref()),
                    "guarded region panicked, compensating"
                );
                if let Err(compensate_err) = compensate().await {
                    warn!(compensate_error = %compensate_err, "compensation after panic failed");
                }
                panic::resume_unwind(payload)
            }
        }
    }
}

impl<T, E> From<Result<T, E>> for Completion<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(err) => Self::Failure(err),
        }
    }
}

/// Run `region` and resolve its exit through `confirm` or `compensate`.
pub async fn settle<T, E, F, C, CF, K, KF>(region: F, confirm: C, compensate: K) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    C: FnOnce() -> CF,
    CF: Future<Output = Result<(), E>>,
    K: FnOnce() -> KF,
    KF: Future<Output = Result<(), E>>,
    E: Display,
{
    Completion::capture(region)
        .await
        .resolve(confirm, compensate)
        .await
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
