#![forbid(unsafe_code)]

//! Batch update coalescing for [`Observable`](super::Observable)
//! notifications.
//!
//! A repeat cycle rewrites several node states in a row (the repeated node,
//! the grid children list, shifted siblings). Without coalescing every
//! subscriber would observe each intermediate layout. A [`BatchScope`] defers
//! notifications until the outermost scope exits and then fires each unique
//! callback once with the latest value.
//!
//! # Invariants
//!
//! 1. Nested batches are supported: only the outermost scope flushes.
//! 2. Within a batch, `Observable::get()` returns the latest value; only
//!    notifications are deferred.
//! 3. Flush calls deferred callbacks in the order they were first enqueued.
//! 4. Deferred callbacks run in rounds, each inside a fresh batch context.
//!    Writes made by one round are queued into the next, so they are never
//!    lost and keyed callbacks raised by a round still coalesce.
//!
//! # Failure Modes
//!
//! - **Callback panics during flush**: remaining callbacks are still called.
//!   The first panic is re-raised after all callbacks have been attempted.

use std::cell::RefCell;
use tracing::{debug, debug_span};
use web_time::Instant;

type DeferredNotify = Box<dyn FnOnce()>;

/// Deferred callback entry optionally keyed for in-batch coalescing.
struct DeferredEntry {
    key: Option<usize>,
    notify: DeferredNotify,
}

struct BatchContext {
    /// Nesting depth. Only flush when this reaches 0.
    depth: u32,
    deferred: Vec<DeferredEntry>,
    /// Number of coalesced writes that replaced an earlier queued entry.
    coalesced: u64,
}

thread_local! {
    static BATCH_CTX: RefCell<Option<BatchContext>> = const { RefCell::new(None) };
}

/// Returns true if a batch is currently active on this thread.
pub fn is_batching() -> bool {
    BATCH_CTX.with(|ctx| ctx.borrow().is_some())
}

/// Enqueue `f` to run when the current batch exits, or run it now.
///
/// Returns `true` if the call was deferred.
pub fn defer_or_run(f: impl FnOnce() + 'static) -> bool {
    BATCH_CTX.with(|ctx| {
        let mut guard = ctx.borrow_mut();
        if let Some(ref mut batch) = *guard {
            batch.deferred.push(DeferredEntry {
                key: None,
                notify: Box::new(f),
            });
            true
        } else {
            drop(guard);
            f();
            false
        }
    })
}

/// Enqueue `f` keyed by `key`, or run it now when no batch is active.
///
/// If the key is already queued, the previous callback is replaced so the
/// latest wins while keeping the original enqueue position.
pub fn defer_or_run_keyed(key: usize, f: impl FnOnce() + 'static) -> bool {
    BATCH_CTX.with(|ctx| {
        let mut guard = ctx.borrow_mut();
        if let Some(ref mut batch) = *guard {
            if let Some(entry) = batch
                .deferred
                .iter_mut()
                .find(|entry| entry.key == Some(key))
            {
                entry.notify = Box::new(f);
                batch.coalesced = batch.coalesced.saturating_add(1);
            } else {
                batch.deferred.push(DeferredEntry {
                    key: Some(key),
                    notify: Box::new(f),
                });
            }
            true
        } else {
            drop(guard);
            f();
            false
        }
    })
}

type PanicPayload = Box<dyn std::any::Any + Send>;

/// Run one round of drained callbacks, returning the first panic payload.
fn flush(round: u32, coalesced: u64, deferred: Vec<DeferredNotify>) -> Option<PanicPayload> {
    let callbacks = deferred.len() as u64;
    let started = Instant::now();
    let _span = debug_span!(
        "batch.flush",
        round,
        callbacks,
        coalesced,
        duration_us = tracing::field::Empty
    )
    .entered();

    let mut first_panic: Option<PanicPayload> = None;
    for notify in deferred {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(notify));
        if let Err(payload) = result
            && first_panic.is_none()
        {
            first_panic = Some(payload);
        }
    }

    let duration_us = started.elapsed().as_micros() as u64;
    tracing::Span::current().record("duration_us", duration_us);
    debug!(round, callbacks, coalesced, duration_us, "batch flushed");
    first_panic
}

fn open_context() {
    BATCH_CTX.with(|ctx| {
        *ctx.borrow_mut() = Some(BatchContext {
            depth: 1,
            deferred: Vec::new(),
            coalesced: 0,
        });
    });
}

/// Close the current context and hand back what it queued.
fn take_context() -> Option<(u64, Vec<DeferredNotify>)> {
    BATCH_CTX.with(|ctx| {
        ctx.borrow_mut().take().map(|batch| {
            let deferred = batch.deferred.into_iter().map(|entry| entry.notify).collect();
            (batch.coalesced, deferred)
        })
    })
}

/// RAII guard that begins a batch scope.
///
/// While a `BatchScope` is alive, observable notifications are deferred.
/// When the outermost `BatchScope` drops, all deferred notifications fire.
pub struct BatchScope {
    is_root: bool,
}

impl BatchScope {
    /// Begin a new batch scope, or deepen the current one.
    #[must_use]
    pub fn new() -> Self {
        let is_root = BATCH_CTX.with(|ctx| {
            let mut guard = ctx.borrow_mut();
            match *guard {
                Some(ref mut batch) => {
                    batch.depth += 1;
                    false
                }
                None => {
                    *guard = Some(BatchContext {
                        depth: 1,
                        deferred: Vec::new(),
                        coalesced: 0,
                    });
                    true
                }
            }
        });
        Self { is_root }
    }

    /// Whether this scope opened the batch and will flush it.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// Number of deferred notifications queued in the current batch.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        BATCH_CTX.with(|ctx| ctx.borrow().as_ref().map_or(0, |b| b.deferred.len()))
    }
}

impl Default for BatchScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        let outermost = BATCH_CTX.with(|ctx| {
            let mut guard = ctx.borrow_mut();
            let Some(batch) = guard.as_mut() else {
                return false;
            };
            batch.depth -= 1;
            batch.depth == 0
        });
        if !outermost {
            return;
        }

        let mut first_panic: Option<PanicPayload> = None;
        let mut round = 0u32;
        while let Some((coalesced, deferred)) = take_context() {
            if deferred.is_empty() {
                break;
            }
            round += 1;
            open_context();
            if let Some(payload) = flush(round, coalesced, deferred)
                && first_panic.is_none()
            {
                first_panic = Some(payload);
            }
        }

        if let Some(payload) = first_panic {
            std::panic::resume_unwind(payload);
        }
    }
}

impl std::fmt::Debug for BatchScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScope")
            .field("is_root", &self.is_root)
            .field("pending", &self.pending_count())
            .finish()
    }
}
