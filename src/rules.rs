//! Compiled rule sets.
//!
//! A [`RuleSet`] never changes once produced. It can be scanned from several
//! threads at once through `&RuleSet` or `Arc<RuleSet>`.

use crate::core::error::{self, Error, Result};
use crate::core::types::Rule;
use crate::engine::RawHandle;
use crate::runtime::{Runtime, Shared};
use crate::scanner::{self, CallbackStatus, ScanOptions, ScanSummary};
use crate::utils::ffi;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Immutable compiled rules.
pub struct RuleSet {
    runtime: Arc<Shared>,
    handle: RawHandle,
    released: bool,
    options: ScanOptions,
}

impl RuleSet {
    pub(crate) fn from_raw(runtime: Arc<Shared>, handle: RawHandle) -> Self {
        Self {
            runtime,
            handle,
            released: false,
            options: ScanOptions::default(),
        }
    }

    /// Load rules previously written by [`RuleSet::save`].
    pub fn load(runtime: &Runtime, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        File::open(path).map_err(|e| Error::file_read(path, e))?;
        let c_path = ffi::path_cstring(path)?;

        let shared = runtime.shared();
        let handle = shared
            .engine()
            .rules_load(&c_path)
            .map_err(|code| error::load_failure(code, path))?;
        log::debug!("Loaded compiled rules from {}", path.display());

        Ok(Self::from_raw(shared, handle))
    }

    /// Load rules from a stream holding a saved artifact.
    pub fn load_from_reader(runtime: &Runtime, mut reader: impl Read) -> Result<Self> {
        let mut temp = NamedTempFile::new().map_err(|e| Error::file_write(std::env::temp_dir(), e))?;
        io::copy(&mut reader, &mut temp).map_err(|e| Error::file_write(temp.path(), e))?;
        temp.flush().map_err(|e| Error::file_write(temp.path(), e))?;
        Self::load(runtime, temp.path())
    }

    /// Write the compiled rules to `path`, replacing any existing file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let c_path = ffi::path_cstring(path)?;
        let code = self.runtime.engine().rules_save(self.handle, &c_path);
        error::classify_save(code, path)?;
        log::debug!("Saved compiled rules to {}", path.display());
        Ok(())
    }

    /// Write the compiled rules to a stream.
    pub fn save_to_writer(&self, mut writer: impl Write) -> Result<()> {
        let temp = NamedTempFile::new().map_err(|e| Error::file_write(std::env::temp_dir(), e))?;
        self.save(temp.path())?;
        let mut file = File::open(temp.path()).map_err(|e| Error::file_read(temp.path(), e))?;
        io::copy(&mut file, &mut writer).map_err(|e| Error::file_read(temp.path(), e))?;
        writer.flush().map_err(|e| Error::file_read(temp.path(), e))?;
        Ok(())
    }

    /// Use `options` for scans that do not pass their own.
    pub fn with_options(mut self, options: ScanOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Scan a memory buffer, calling `callback` for every satisfied rule.
    pub fn scan_mem<F>(&self, data: &[u8], callback: F) -> Result<ScanSummary>
    where
        F: FnMut(&Rule) -> CallbackStatus,
    {
        self.scan_mem_with(data, &self.options, callback)
    }

    pub fn scan_mem_with<F>(
        &self,
        data: &[u8],
        options: &ScanOptions,
        callback: F,
    ) -> Result<ScanSummary>
    where
        F: FnMut(&Rule) -> CallbackStatus,
    {
        if data.is_empty() {
            return Err(Error::EmptyBuffer);
        }
        log::debug!("Scanning {} byte(s)", data.len());

        let engine = self.runtime.engine();
        scanner::run(callback, |sink| {
            engine.rules_scan_mem(
                self.handle,
                data,
                options.flags(),
                options.timeout_secs(),
                sink,
            )
        })
        .finish(None)
    }

    /// Scan the content of a file, calling `callback` for every satisfied
    /// rule.
    pub fn scan_file<F>(&self, path: impl AsRef<Path>, callback: F) -> Result<ScanSummary>
    where
        F: FnMut(&Rule) -> CallbackStatus,
    {
        self.scan_file_with(path, &self.options, callback)
    }

    pub fn scan_file_with<F>(
        &self,
        path: impl AsRef<Path>,
        options: &ScanOptions,
        callback: F,
    ) -> Result<ScanSummary>
    where
        F: FnMut(&Rule) -> CallbackStatus,
    {
        let path = path.as_ref();
        File::open(path).map_err(|e| Error::file_read(path, e))?;
        let c_path = ffi::path_cstring(path)?;
        log::debug!("Scanning {}", path.display());

        let engine = self.runtime.engine();
        scanner::run(callback, |sink| {
            engine.rules_scan_file(
                self.handle,
                &c_path,
                options.flags(),
                options.timeout_secs(),
                sink,
            )
        })
        .finish(Some(path))
    }

    /// Every rule satisfied by `data`, in report order.
    pub fn matches_mem(&self, data: &[u8]) -> Result<Vec<Rule>> {
        let mut matches = Vec::new();
        self.scan_mem(data, |rule| {
            matches.push(rule.clone());
            CallbackStatus::Continue
        })?;
        Ok(matches)
    }

    /// Every rule satisfied by the content of `path`, in report order.
    pub fn matches_file(&self, path: impl AsRef<Path>) -> Result<Vec<Rule>> {
        let mut matches = Vec::new();
        self.scan_file(path, |rule| {
            matches.push(rule.clone());
            CallbackStatus::Continue
        })?;
        Ok(matches)
    }

    /// Release the rule set.
    pub fn destroy(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        error::check(self.runtime.engine().rules_destroy(self.handle))
    }
}

impl Drop for RuleSet {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::warn!("Failed to release rule set: {}", e);
        }
    }
}

impl std::fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleSet")
            .field("engine", &self.runtime.engine().name())
            .field("options", &self.options)
            .finish()
    }
}
