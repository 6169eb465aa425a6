//! Engine lifecycle.
//!
//! A [`Runtime`] owns one engine initialize/finalize pair. Every
//! [`Compiler`](crate::Compiler) and [`RuleSet`](crate::RuleSet) keeps a
//! reference to it, so the engine cannot be finalized while any of them is
//! alive.

use crate::core::error::{self, codes, Error, Result};
use crate::engine::Engine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// State shared by a runtime and every resource created from it.
pub(crate) struct Shared {
    engine: Box<dyn Engine>,
    finalized: AtomicBool,
}

impl Shared {
    pub(crate) fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }

    fn finalize(&self) -> Result<()> {
        if self.finalized.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let code = self.engine.finalize();
        error::check(code)?;
        log::info!("{} finalized", self.engine.name());
        Ok(())
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            log::warn!("Failed to finalize {}: {}", self.engine.name(), e);
        }
    }
}

/// Live, initialized matching engine.
pub struct Runtime {
    shared: Arc<Shared>,
}

impl Runtime {
    /// Initialize libyara.
    #[cfg(feature = "native")]
    pub fn initialize() -> Result<Self> {
        Self::with_engine(Box::new(crate::engine::NativeEngine))
    }

    /// Initialize `engine` and take ownership of it.
    ///
    /// A failing initialize is reported as [`Error::Startup`]; nothing else in
    /// the crate can run without it.
    pub fn with_engine(engine: Box<dyn Engine>) -> Result<Self> {
        let code = engine.initialize();
        if code != codes::SUCCESS {
            log::error!("Failed to initialize {} (code {})", engine.name(), code);
            return Err(Error::Startup { code });
        }
        log::info!("{} initialized", engine.name());

        Ok(Self {
            shared: Arc::new(Shared {
                engine,
                finalized: AtomicBool::new(false),
            }),
        })
    }

    /// Name of the underlying engine.
    pub fn engine_name(&self) -> &'static str {
        self.shared.engine.name()
    }

    /// Number of compilers and rule sets still holding the engine.
    pub fn live_resources(&self) -> usize {
        Arc::strong_count(&self.shared) - 1
    }

    /// Finalize the engine.
    ///
    /// Refused with [`Error::ResourcesOutstanding`] while compilers or rule
    /// sets are alive; the engine is then finalized when the last of them is
    /// dropped.
    pub fn finalize(self) -> Result<()> {
        match Arc::try_unwrap(self.shared) {
            Ok(shared) => shared.finalize(),
            Err(shared) => Err(Error::ResourcesOutstanding {
                live: Arc::strong_count(&shared) - 1,
            }),
        }
    }

    pub(crate) fn shared(&self) -> Arc<Shared> {
        Arc::clone(&self.shared)
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("engine", &self.engine_name())
            .field("live_resources", &self.live_resources())
            .finish()
    }
}
