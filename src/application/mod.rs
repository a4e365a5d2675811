//! Application services: the compile pipeline and top-level errors.

pub mod compile;
pub mod error;
