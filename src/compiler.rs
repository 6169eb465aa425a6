//! Rule compilation sessions.
//!
//! A [`Compiler`] accumulates rule source under namespaces and is consumed
//! by [`Compiler::rules`] to produce an immutable [`RuleSet`].

use crate::core::config::CompilerConfig;
use crate::core::error::{Diagnostic, DiagnosticLevel, Error, Result};
use crate::engine::RawHandle;
use crate::rules::RuleSet;
use crate::runtime::{Runtime, Shared};
use crate::utils::ffi;
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;

/// Compilation settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompilerOptions {
    /// Refuse to produce rules while any warning was reported
    pub fail_on_warnings: bool,
}

impl From<&CompilerConfig> for CompilerOptions {
    fn from(config: &CompilerConfig) -> Self {
        Self {
            fail_on_warnings: config.fail_on_warnings,
        }
    }
}

/// One compilation session.
///
/// Once an add call reports errors the session is failed: later adds and
/// [`Compiler::rules`] return [`Error::SessionFailed`].
pub struct Compiler {
    runtime: Arc<Shared>,
    handle: RawHandle,
    released: bool,
    options: CompilerOptions,
    /// Error count of the add call that failed the session
    failed: Option<usize>,
    warnings: Vec<Diagnostic>,
    namespaces: Vec<String>,
    sources: usize,
}

impl Compiler {
    /// Create an empty session.
    pub fn new(runtime: &Runtime) -> Result<Self> {
        let shared = runtime.shared();
        let handle = shared
            .engine()
            .compiler_create()
            .map_err(|code| Error::Engine { code })?;
        log::debug!("Created compiler session");

        Ok(Self {
            runtime: shared,
            handle,
            released: false,
            options: CompilerOptions::default(),
            failed: None,
            warnings: Vec::new(),
            namespaces: Vec::new(),
            sources: 0,
        })
    }

    pub fn with_options(mut self, options: CompilerOptions) -> Self {
        self.options = options;
        self
    }

    /// Compile the rules in `path` into `namespace`.
    ///
    /// The file is opened here, so a missing or unreadable file is an
    /// [`Error::FileRead`] and leaves the session usable. The same holds for
    /// a path that is not a regular file, such as a directory.
    pub fn add_file(&mut self, namespace: &str, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.ensure_usable()?;
        let ns = ffi::namespace_cstring(namespace)?;
        let source_path = ffi::path_cstring(path)?;
        let file = File::open(path).map_err(|e| Error::file_read(path, e))?;
        let metadata = file.metadata().map_err(|e| Error::file_read(path, e))?;
        if !metadata.is_file() {
            return Err(Error::file_read(
                path,
                io::Error::new(io::ErrorKind::Other, "not a regular file"),
            ));
        }

        log::debug!("Compiling {} into namespace '{}'", path.display(), namespace);
        let mut diagnostics = Vec::new();
        let errors = self.runtime.engine().compiler_add_file(
            self.handle,
            &file,
            &ns,
            &source_path,
            &mut diagnostics,
        );
        self.absorb(namespace, errors, diagnostics)
    }

    /// Compile every file in `paths` into `namespace`, stopping at the first
    /// failure.
    pub fn add_files<P: AsRef<Path>>(
        &mut self,
        namespace: &str,
        paths: impl IntoIterator<Item = P>,
    ) -> Result<()> {
        for path in paths {
            self.add_file(namespace, path)?;
        }
        Ok(())
    }

    /// Compile rule text into `namespace`.
    pub fn add_string(&mut self, namespace: &str, source: &str) -> Result<()> {
        self.ensure_usable()?;
        let ns = ffi::namespace_cstring(namespace)?;
        let source = ffi::to_cstring(source, "rule source")?;

        log::debug!("Compiling rule text into namespace '{}'", namespace);
        let mut diagnostics = Vec::new();
        let errors = self.runtime.engine().compiler_add_string(
            self.handle,
            &source,
            &ns,
            &mut diagnostics,
        );
        self.absorb(namespace, errors, diagnostics)
    }

    /// Warnings reported so far.
    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    /// Namespaces that received rules, in first-use order.
    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    /// Number of sources compiled successfully.
    pub fn sources(&self) -> usize {
        self.sources
    }

    /// Check if an add call failed the session.
    pub fn is_failed(&self) -> bool {
        self.failed.is_some()
    }

    /// Finish the session and produce its rule set.
    pub fn rules(mut self) -> Result<RuleSet> {
        self.ensure_usable()?;
        if self.options.fail_on_warnings && !self.warnings.is_empty() {
            return Err(Error::Compile {
                namespace: self.namespaces.join(","),
                errors: self.warnings.len(),
                diagnostics: std::mem::take(&mut self.warnings),
            });
        }

        let handle = self
            .runtime
            .engine()
            .compiler_get_rules(self.handle)
            .map_err(|code| Error::Engine { code })?;
        log::debug!(
            "Compiled {} source(s) in {} namespace(s)",
            self.sources,
            self.namespaces.len()
        );

        Ok(RuleSet::from_raw(Arc::clone(&self.runtime), handle))
    }

    /// Release the session.
    pub fn destroy(mut self) {
        self.release();
    }

    fn ensure_usable(&self) -> Result<()> {
        match self.failed {
            Some(errors) => Err(Error::SessionFailed { errors }),
            None => Ok(()),
        }
    }

    fn absorb(&mut self, namespace: &str, errors: u32, diagnostics: Vec<Diagnostic>) -> Result<()> {
        for warning in diagnostics
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Warning)
        {
            log::warn!("{}", warning);
            self.warnings.push(warning.clone());
        }

        if errors > 0 {
            let errors = errors as usize;
            self.failed = Some(errors);
            return Err(Error::Compile {
                namespace: namespace.to_string(),
                errors,
                diagnostics,
            });
        }

        if !self.namespaces.iter().any(|ns| ns == namespace) {
            self.namespaces.push(namespace.to_string());
        }
        self.sources += 1;
        Ok(())
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.runtime.engine().compiler_destroy(self.handle);
        }
    }
}

impl Drop for Compiler {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Compiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compiler")
            .field("namespaces", &self.namespaces)
            .field("sources", &self.sources)
            .field("warnings", &self.warnings.len())
            .field("failed", &self.failed)
            .finish()
    }
}
