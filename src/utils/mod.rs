//! Utility functions and helpers.

pub mod ffi;
pub mod logging;

pub use logging::{init_logging, LogConfig};
