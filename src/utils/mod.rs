//! Shared utilities
//!
//! This module provides the seedable random number generator used by tests
//! and callers that need reproducible initialization.

pub mod rng;

pub use rng::SimpleRng;
