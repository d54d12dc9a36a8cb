//! Shared foundations for Nebula.
//!
//! This crate holds the leaf types every other Nebula crate builds on:
//!
//! - A unified error type and stable error-code registry
//! - Deterministic content hashing used for spec and block signatures
//! - The paged-slice memory pool backing in-memory columnar blocks
//! - Small shared value types (time ranges)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod hash;
pub mod memory;
pub mod types;

pub use error::{ErrorCode, NebulaError, NebulaResult};
pub use hash::hash64;
pub use types::TimeRange;
