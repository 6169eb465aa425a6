//! rulescan: a safe façade over the libyara pattern-matching engine.
//!
//! This crate compiles signature rules under namespaces, persists and reloads
//! compiled rule sets, and scans memory buffers and files, reporting every
//! satisfied rule to a caller-supplied callback that can continue, abort or
//! fail the scan.
//!
//! ```no_run
//! use rulescan::{CallbackStatus, Compiler, Runtime};
//!
//! # fn main() -> rulescan::Result<()> {
//! let runtime = Runtime::initialize()?;
//! let mut compiler = Compiler::new(&runtime)?;
//! compiler.add_string("default", r#"rule test { strings: $a = "abc" condition: $a }"#)?;
//! let rules = compiler.rules()?;
//!
//! rules.scan_mem(b"xxabcxx", |rule| {
//!     println!("matched {}", rule);
//!     CallbackStatus::Continue
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod compiler;
pub mod core;
pub mod engine;
pub mod rules;
pub mod runtime;
pub mod scanner;
pub mod ui;
pub mod utils;

// Re-export commonly used types
pub use crate::compiler::{Compiler, CompilerOptions};
pub use crate::core::config::Config;
pub use crate::core::error::{Diagnostic, DiagnosticLevel, Error, Result};
pub use crate::core::types::*;
pub use crate::rules::RuleSet;
pub use crate::runtime::Runtime;
pub use crate::scanner::{CallbackStatus, ScanOptions, ScanSummary};
