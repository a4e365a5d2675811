//! Domain types and invariants.

pub mod diagnostic;
pub mod request;
