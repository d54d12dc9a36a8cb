//! Memory primitives for in-memory columnar data.
//!
//! Nebula keeps all block data in memory; this module provides the paged
//! slices that back it and the pool that accounts for them.

mod paged;

pub use paged::{PagedSlice, Pool};
