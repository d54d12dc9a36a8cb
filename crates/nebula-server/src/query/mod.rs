//! Thin query fan-out.
//!
//! The coordinator compiles a request into a [`nebula_meta::PlanFragment`],
//! dispatches it to every active worker in parallel, merges the partial
//! aggregates and serialises the result. Compilation is deliberately
//! shallow — the DSL front end proper is an external collaborator — but
//! validation, fan-out, merge and serialisation are all here.

pub mod cursor;
pub mod handler;
pub mod udaf;

pub use cursor::Cursor;
pub use handler::{QueryContext, QueryHandler, QueryOutcome};
pub use udaf::merger_for;
