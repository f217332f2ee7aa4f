//! Resource providers for the DTX branch engine.

#![deny(unsafe_code)]

pub mod memory;
pub mod sql;

pub use memory::{BranchState, MemoryXaHandle, MemoryXaResource};
pub use sql::{SqlxHandle, SqlxProvider, SqlxProviderConfig};
