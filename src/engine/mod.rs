//! Boundary to the external pattern-matching engine.
//!
//! The [`Engine`] trait mirrors the handle-and-status-code interface of
//! libyara: every call returns a status code (`0` on success) or an opaque
//! handle. The rest of the crate never touches engine state except through
//! these calls, and translates every code through [`crate::core::error`].
//!
//! Matches travel back through a [`MatchSink`], which carries nothing but the
//! integer id of the running scan.

use crate::core::error::{Code, Diagnostic};
use crate::core::types::{MetaValue, Rule};
use crate::scanner::MatchSink;
use std::borrow::Cow;
use std::ffi::CStr;
use std::fs::File;

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(feature = "native")]
pub use native::NativeEngine;

/// Opaque engine handle for a compiler session or a compiled rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(usize);

impl RawHandle {
    /// Wrap an engine-owned pointer.
    pub fn from_ptr<T>(ptr: *mut T) -> Self {
        Self(ptr as usize)
    }

    /// Recover the engine-owned pointer.
    pub fn as_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// Wrap an engine-assigned integer id.
    pub fn from_id(id: usize) -> Self {
        Self(id)
    }

    /// The integer value of the handle.
    pub fn id(self) -> usize {
        self.0
    }
}

/// Borrowed view of one satisfied rule, as reported by the engine.
#[derive(Debug, Clone)]
pub struct MatchEvent<'a> {
    pub identifier: Cow<'a, str>,
    pub namespace: Cow<'a, str>,
    pub tags: Vec<Cow<'a, str>>,
    pub metadata: Vec<(Cow<'a, str>, MetaValue)>,
}

impl MatchEvent<'_> {
    /// Copy the event into an owned match record.
    pub fn to_rule(&self) -> Rule {
        let mut rule = Rule::new(self.namespace.as_ref(), self.identifier.as_ref());
        rule.tags = self.tags.iter().map(|t| t.to_string()).collect();
        for (key, value) in &self.metadata {
            rule.insert_meta(key.as_ref(), value.clone());
        }
        rule
    }
}

/// Operations the external engine must expose.
///
/// Implementations must be safe to call from several threads at once for
/// distinct handles, and for scans sharing one rule set handle.
pub trait Engine: Send + Sync {
    /// Short engine name for logs.
    fn name(&self) -> &'static str;

    fn initialize(&self) -> Code;

    fn finalize(&self) -> Code;

    fn compiler_create(&self) -> Result<RawHandle, Code>;

    fn compiler_destroy(&self, compiler: RawHandle);

    /// Compile the content of `file` into `namespace`. `source_path` is only
    /// used for diagnostics and relative includes. Returns the error count.
    fn compiler_add_file(
        &self,
        compiler: RawHandle,
        file: &File,
        namespace: &CStr,
        source_path: &CStr,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> u32;

    /// Compile `source` into `namespace`. Returns the error count.
    fn compiler_add_string(
        &self,
        compiler: RawHandle,
        source: &CStr,
        namespace: &CStr,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> u32;

    fn compiler_get_rules(&self, compiler: RawHandle) -> Result<RawHandle, Code>;

    fn rules_load(&self, path: &CStr) -> Result<RawHandle, Code>;

    fn rules_save(&self, rules: RawHandle, path: &CStr) -> Code;

    fn rules_destroy(&self, rules: RawHandle) -> Code;

    /// Scan `data`, reporting every satisfied rule to `sink` and stopping as
    /// soon as the returned status is not `Continue`.
    fn rules_scan_mem(
        &self,
        rules: RawHandle,
        data: &[u8],
        flags: i32,
        timeout: i32,
        sink: MatchSink,
    ) -> Code;

    /// Same as [`Engine::rules_scan_mem`] for the content of `path`.
    fn rules_scan_file(
        &self,
        rules: RawHandle,
        path: &CStr,
        flags: i32,
        timeout: i32,
        sink: MatchSink,
    ) -> Code;
}
