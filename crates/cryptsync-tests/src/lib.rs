//! CryptSync integration test support
//!
//! Shared fixtures for the scenario tests in `tests/`: temporary pair
//! layouts, a recording content codec and a fast archive codec.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Unified test utilities
pub mod test_utils;
