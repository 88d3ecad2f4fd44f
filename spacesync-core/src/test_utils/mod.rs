//! Shared test utilities
//!
//! Fixtures and async helpers used by unit and scenario tests across
//! the crate.

pub mod async_helpers;
pub mod fixtures;

pub use async_helpers::*;
pub use fixtures::*;
