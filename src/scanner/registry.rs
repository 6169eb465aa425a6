//! Registration table for running scans.
//!
//! A scan registers its match handler under a fresh integer [`ScanId`] and
//! hands the engine a [`MatchSink`] that carries only that id. When the
//! engine reports a match, the sink looks the handler up here and calls it.
//! No handler pointer ever crosses the engine boundary.

use super::CallbackStatus;
use crate::core::types::Rule;
use crate::engine::MatchEvent;
use once_cell::sync::Lazy;
use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// Match handler of one running scan.
pub(crate) type HandlerRef<'a> = &'a mut (dyn FnMut(&Rule) -> CallbackStatus + 'a);

type PanicPayload = Box<dyn Any + Send + 'static>;

static NEXT_SCAN_ID: AtomicU64 = AtomicU64::new(1);

static SCANS: Lazy<Mutex<HashMap<ScanId, Slot>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn scans() -> MutexGuard<'static, HashMap<ScanId, Slot>> {
    // Handlers never run under the lock, so a poisoned table is still consistent.
    SCANS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Identifier of one running scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScanId(u64);

impl ScanId {
    fn next() -> Self {
        Self(NEXT_SCAN_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

struct Slot {
    /// Address of the scan's `HandlerRef`, valid while the slot exists.
    handler: usize,
    thread: ThreadId,
    busy: bool,
    panic: Option<PanicPayload>,
}

/// Destination for the matches of one scan.
///
/// A sink is only usable on the thread that started the scan, and only while
/// that scan runs. Reports outside that window are refused with
/// [`CallbackStatus::Fail`].
#[derive(Debug, Clone, Copy)]
pub struct MatchSink {
    id: ScanId,
    _not_send: PhantomData<*const ()>,
}

impl MatchSink {
    pub(crate) fn from_raw(id: u64) -> Self {
        Self {
            id: ScanId(id),
            _not_send: PhantomData,
        }
    }

    /// Id of the scan this sink reports to.
    pub fn id(&self) -> ScanId {
        self.id
    }

    /// Deliver one match to the scan's handler and return its verdict.
    pub fn report(&self, event: &MatchEvent<'_>) -> CallbackStatus {
        dispatch(self.id, event)
    }
}

/// Scope of one scan's entry in the table. Removes the entry when dropped.
pub(crate) struct Registration<'h> {
    id: ScanId,
    _handler: PhantomData<&'h mut ()>,
}

impl<'h> Registration<'h> {
    /// Register `handler` under a fresh id.
    pub(crate) fn register<'a>(handler: &'h mut HandlerRef<'a>) -> Self {
        let id = ScanId::next();
        let slot = Slot {
            handler: handler as *mut HandlerRef<'a> as usize,
            thread: thread::current().id(),
            busy: false,
            panic: None,
        };
        scans().insert(id, slot);
        log::trace!("Registered scan {}", id.0);

        Self {
            id,
            _handler: PhantomData,
        }
    }

    pub(crate) fn sink(&self) -> MatchSink {
        MatchSink::from_raw(self.id.0)
    }

    /// Remove the entry, returning a panic raised by the handler, if any.
    pub(crate) fn finish(self) -> Option<PanicPayload> {
        let slot = scans().remove(&self.id);
        slot.and_then(|slot| slot.panic)
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        scans().remove(&self.id);
    }
}

/// Number of scans currently registered.
pub fn active_scans() -> usize {
    scans().len()
}

fn dispatch(id: ScanId, event: &MatchEvent<'_>) -> CallbackStatus {
    let handler = {
        let mut table = scans();
        match table.get_mut(&id) {
            Some(slot) if slot.thread != thread::current().id() => {
                log::warn!("Match for scan {} reported from a foreign thread", id.0);
                return CallbackStatus::Fail;
            }
            Some(slot) if slot.busy => {
                log::warn!("Re-entrant match report for scan {}", id.0);
                return CallbackStatus::Fail;
            }
            Some(slot) => {
                slot.busy = true;
                slot.handler
            }
            None => {
                log::warn!("Match reported for unknown scan {}", id.0);
                return CallbackStatus::Fail;
            }
        }
    };

    let rule = event.to_rule();
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: the slot exists, so the `Registration` that borrows the
        // handler is alive on this thread, and `busy` rules out a second
        // mutable access until it is cleared below.
        let handler = unsafe { &mut *(handler as *mut HandlerRef<'_>) };
        (*handler)(&rule)
    }));

    let mut table = scans();
    match (result, table.get_mut(&id)) {
        (Ok(status), Some(slot)) => {
            slot.busy = false;
            status
        }
        (Ok(status), None) => status,
        (Err(payload), Some(slot)) => {
            slot.busy = false;
            slot.panic = Some(payload);
            CallbackStatus::Fail
        }
        (Err(payload), None) => {
            drop(table);
            panic::resume_unwind(payload)
        }
    }
}
