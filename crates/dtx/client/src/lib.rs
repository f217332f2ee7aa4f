//! Coordinator client for XA participants.
//!
//! [`XaClient`] talks to the coordinator over HTTP and drives the local resource through
//! the branch engine in `dtx-core`: it opens global transactions, runs local branches
//! that register themselves with the coordinator, calls sub-branches, and applies the
//! coordinator's commit/rollback callbacks.

pub mod client;
pub mod config;
pub mod error;

pub use client::{GlobalTrans, XaClient};
pub use config::XaClientConfig;
pub use error::{ClientError, ClientResult};
