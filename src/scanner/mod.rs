//! Scan control protocol.
//!
//! During a scan the engine reports every satisfied rule; the caller's
//! handler answers each report with a [`CallbackStatus`]:
//! - `Continue` keeps evaluating the remaining rules
//! - `Abort` stops the scan and reports success
//! - `Fail` stops the scan and reports [`Error::CallbackFailed`]

pub mod registry;

pub use registry::{active_scans, MatchSink, ScanId};

use crate::core::config::ScanConfig;
use crate::core::error::{self, codes, Code, Error, Result};
use crate::core::types::Rule;
use registry::{HandlerRef, Registration};
use serde::Serialize;
use std::panic;
use std::path::Path;
use std::time::Duration;

/// Stop matching a string after its first occurrence.
pub const SCAN_FLAGS_FAST_MODE: i32 = 1;

/// Verdict of the match handler on one reported rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum CallbackStatus {
    Continue = 0,
    Abort = 1,
    Fail = 2,
}

impl CallbackStatus {
    /// Numeric value understood by the engine.
    pub fn as_raw(self) -> i32 {
        self as i32
    }

    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::Continue),
            1 => Some(Self::Abort),
            2 => Some(Self::Fail),
            _ => None,
        }
    }
}

/// Per-scan engine settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOptions {
    /// Stop matching a string after its first occurrence
    pub fast_mode: bool,
    /// Abort the scan after this long. Engine resolution is one second.
    pub timeout: Option<Duration>,
}

impl ScanOptions {
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            fast_mode: config.fast_mode,
            timeout: config.timeout(),
        }
    }

    pub fn with_fast_mode(mut self, fast_mode: bool) -> Self {
        self.fast_mode = fast_mode;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Engine scan flags.
    pub fn flags(&self) -> i32 {
        if self.fast_mode {
            SCAN_FLAGS_FAST_MODE
        } else {
            0
        }
    }

    /// Engine timeout in whole seconds, `0` meaning none. Sub-second timeouts
    /// round up so they never turn into "no timeout".
    pub fn timeout_secs(&self) -> i32 {
        match self.timeout {
            None => 0,
            Some(t) if t.is_zero() => 0,
            Some(t) => {
                let secs = t.as_secs() + u64::from(t.subsec_nanos() > 0);
                i32::try_from(secs).unwrap_or(i32::MAX)
            }
        }
    }
}

/// Outcome of a scan that did not fail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    /// Number of match reports delivered to the handler
    pub matches: usize,
    /// The handler stopped the scan with `Abort`
    pub aborted: bool,
}

/// Raw result of one engine scan call.
pub(crate) struct ScanRun {
    code: Code,
    matches: usize,
    last: CallbackStatus,
}

/// Register `callback` for the duration of `scan` and run it.
///
/// `scan` receives the sink to hand to the engine. A panic raised by the
/// callback is carried across the engine call and resumed here.
pub(crate) fn run<F, S>(mut callback: F, scan: S) -> ScanRun
where
    F: FnMut(&Rule) -> CallbackStatus,
    S: FnOnce(MatchSink) -> Code,
{
    let mut matches = 0usize;
    let mut last = CallbackStatus::Continue;

    let (code, panicked) = {
        let mut handler = |rule: &Rule| {
            let status = callback(rule);
            matches += 1;
            last = status;
            status
        };
        let mut slot: HandlerRef<'_> = &mut handler;
        let registration = Registration::register(&mut slot);
        let code = scan(registration.sink());
        (code, registration.finish())
    };

    if let Some(payload) = panicked {
        panic::resume_unwind(payload);
    }

    ScanRun {
        code,
        matches,
        last,
    }
}

impl ScanRun {
    /// Apply the callback verdict, then the engine status.
    pub(crate) fn finish(self, path: Option<&Path>) -> Result<ScanSummary> {
        match self.last {
            CallbackStatus::Fail => Err(Error::CallbackFailed),
            CallbackStatus::Abort => Ok(ScanSummary {
                matches: self.matches,
                aborted: true,
            }),
            CallbackStatus::Continue => {
                // The handler never failed, so the report was refused by the
                // registration table (unknown scan, foreign thread, re-entry).
                if self.code == codes::CALLBACK_ERROR {
                    return Err(Error::Engine { code: self.code });
                }
                error::classify_scan(self.code, path)?;
                Ok(ScanSummary {
                    matches: self.matches,
                    aborted: false,
                })
            }
        }
    }
}
