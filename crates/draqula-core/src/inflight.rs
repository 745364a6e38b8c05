//! In-flight request deduplication.
//!
//! [`InFlight::dedupe`] guarantees at most one live transport call per
//! [`Fingerprint`]. The call is wrapped in a [`Shared`] future; every caller
//! that asks for the same fingerprint while the call is pending receives a
//! handle to that same future and observes the same cloned outcome.
//!
//! The table only stores a [`WeakShared`], so it never keeps a call alive on
//! its own. When the last handle is dropped the transport future is dropped
//! with it, and the entry is removed.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared, WeakShared};
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::DraqulaError;
use crate::fingerprint::Fingerprint;
use crate::logging::targets;

type SharedCall = Shared<BoxFuture<'static, Result<Value, DraqulaError>>>;
type Table = Mutex<HashMap<Fingerprint, Pending>>;

struct Pending {
    ticket: u64,
    call: WeakShared<BoxFuture<'static, Result<Value, DraqulaError>>>,
}

/// Removes the table entry when the wrapped call settles or is dropped.
///
/// Only removes the entry if it still belongs to the same ticket, so a late
/// drop never evicts a newer call for the same fingerprint.
struct Settle {
    table: Weak<Table>,
    fingerprint: Fingerprint,
    ticket: u64,
}

impl Drop for Settle {
    fn drop(&mut self) {
        let Some(table) = self.table.upgrade() else {
            return;
        };
        let mut table = table.lock();
        if table
            .get(&self.fingerprint)
            .is_some_and(|pending| pending.ticket == self.ticket)
        {
            table.remove(&self.fingerprint);
            tracing::trace!(
                target: targets::INFLIGHT,
                fingerprint = %self.fingerprint,
                ticket = self.ticket,
                "in-flight entry removed"
            );
        }
    }
}

/// The table of pending calls.
pub struct InFlight {
    table: Arc<Table>,
    next_ticket: AtomicU64,
}

impl Default for InFlight {
    fn default() -> Self {
        Self::new()
    }
}

impl InFlight {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Attach to the pending call for `fingerprint`, or start one.
    ///
    /// `start` is only invoked when no live call exists. It runs while the
    /// table is locked and must not call back into this table; it should do
    /// nothing but construct the (lazy) future.
    pub fn dedupe<F, Fut>(&self, fingerprint: Fingerprint, start: F) -> InFlightHandle
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, DraqulaError>> + Send + 'static,
    {
        let mut table = self.table.lock();

        if let Some(pending) = table.get(&fingerprint)
            && let Some(call) = pending.call.upgrade()
        {
            let ticket = pending.ticket;
            drop(table);
            tracing::debug!(target: targets::INFLIGHT, %fingerprint, ticket, "attached to in-flight request");
            return InFlightHandle {
                fingerprint,
                ticket,
                attached: true,
                call,
            };
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        let settle = Settle {
            table: Arc::downgrade(&self.table),
            fingerprint,
            ticket,
        };
        let future = start();
        let call: SharedCall = async move {
            let _settle = settle;
            future.await
        }
        .boxed()
        .shared();

        if let Some(weak) = call.downgrade() {
            table.insert(fingerprint, Pending { ticket, call: weak });
        }
        drop(table);

        tracing::debug!(target: targets::INFLIGHT, %fingerprint, ticket, "started request");
        InFlightHandle {
            fingerprint,
            ticket,
            attached: false,
            call,
        }
    }

    /// Check whether a live call exists for `fingerprint`.
    pub fn is_pending(&self, fingerprint: &Fingerprint) -> bool {
        self.ticket(fingerprint).is_some()
    }

    /// The ticket of the live call for `fingerprint`, if any.
    pub fn ticket(&self, fingerprint: &Fingerprint) -> Option<u64> {
        let (ticket, call) = {
            let table = self.table.lock();
            let pending = table.get(fingerprint)?;
            (pending.ticket, pending.call.upgrade())
        };
        // `call` may be the last strong handle; it must drop after the lock.
        call.map(|_| ticket)
    }

    /// Detach the pending call for `fingerprint` from the table.
    ///
    /// Existing handles keep the call alive and still resolve, but later
    /// callers start a new call instead of attaching.
    pub fn forget(&self, fingerprint: &Fingerprint) -> bool {
        let removed = self.table.lock().remove(fingerprint).is_some();
        if removed {
            tracing::debug!(target: targets::INFLIGHT, %fingerprint, "in-flight request detached");
        }
        removed
    }

    /// Detach every pending call. See [`forget`](Self::forget).
    pub fn forget_all(&self) -> usize {
        let mut table = self.table.lock();
        let count = table.len();
        table.clear();
        if count > 0 {
            tracing::debug!(target: targets::INFLIGHT, count, "in-flight requests detached");
        }
        count
    }

    /// Number of entries in the table.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }
}

impl fmt::Debug for InFlight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlight").field("pending", &self.len()).finish()
    }
}

/// A handle to a pending call.
///
/// Resolves to the call's outcome. Cloning the handle attaches another
/// caller; dropping every handle abandons the call.
#[must_use = "dropping the last handle cancels the request"]
#[derive(Clone)]
pub struct InFlightHandle {
    fingerprint: Fingerprint,
    ticket: u64,
    attached: bool,
    call: SharedCall,
}

impl InFlightHandle {
    /// The fingerprint of the request.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Identifies the transport call. Equal tickets mean the same call.
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    /// Whether this handle joined a call that was already pending.
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// The outcome, if the call has already settled.
    pub fn peek(&self) -> Option<&Result<Value, DraqulaError>> {
        self.call.peek()
    }
}

impl Future for InFlightHandle {
    type Output = Result<Value, DraqulaError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.call).poll(cx)
    }
}

impl fmt::Debug for InFlightHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlightHandle")
            .field("fingerprint", &self.fingerprint)
            .field("ticket", &self.ticket)
            .field("attached", &self.attached)
            .finish()
    }
}
