//! Clipframe Common Utilities
//!
//! Shared infrastructure for all Clipframe crates:
//! - Error types and result aliases
//! - Media clock helpers (timescale conversion, A/V drift, render timing)
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
