//! Branch-level reliability engine for distributed-transaction participants.
//!
//! A participant joins a coordinator-driven global transaction through two drivers:
//! the [`ResourceBranchDriver`] brackets local work in XA START/END/PREPARE, and
//! [`run_global_branch`] sequences the coordinator's prepare/submit/abort phases around
//! a business call. Both resolve through the same confirm/compensate guard
//! ([`settle`]). Coordinator decisions arrive later through the [`CallbackDispatcher`],
//! which is safe under at-least-once redelivery.

#![deny(unsafe_code)]

pub mod branch;
pub mod branch_id;
pub mod callback;
pub mod classify;
pub mod dialect;
pub mod error;
pub mod global;
pub mod guard;
pub mod resource;
pub mod types;

#[cfg(test)]
mod test_support;

pub use branch::ResourceBranchDriver;
pub use branch_id::BranchIdGenerator;
pub use callback::CallbackDispatcher;
pub use classify::{classify_response, Outcome, RESULT_FAILURE, RESULT_ONGOING, RESULT_SUCCESS};
pub use dialect::{dialect_for, MySqlDialect, PostgresDialect, XaDialect};
pub use error::{DtxError, ResourceError};
pub use global::run_global_branch;
pub use guard::{settle, Completion};
pub use resource::{
    exec_statement, with_deadline, ResourceHandle, ResourceProvider, TimeoutHandle,
    TimeoutProvider,
};
pub use types::{
    BranchIdentity, Decision, Phase, ResourceConfig, ResourceDriver, TransBase, TransType,
    XaAction,
};
