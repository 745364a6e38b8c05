//! Cache change notification.
//!
//! Observers register a callback for one [`Fingerprint`] and receive a
//! [`CacheEvent`] every time that fingerprint's cache entry is written or
//! invalidated. Registration returns a [`Subscription`] disposer; dropping it
//! or calling [`Subscription::unsubscribe`] removes the callback.
//!
//! Callbacks run on the thread that changed the cache, after every internal
//! lock has been released, so they may freely call back into the client.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use slotmap::{SlotMap, new_key_type};

use crate::cache::CacheEntry;
use crate::fingerprint::Fingerprint;
use crate::logging::targets;

new_key_type! {
    /// A unique identifier for a registered cache observer.
    pub struct SubscriptionId;
}

/// A change to one cache entry.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// The entry was written (data or error).
    Updated(CacheEntry),
    /// The entry was removed.
    Invalidated(Fingerprint),
}

impl CacheEvent {
    /// The fingerprint this event concerns.
    pub fn fingerprint(&self) -> Fingerprint {
        match self {
            Self::Updated(entry) => entry.fingerprint(),
            Self::Invalidated(fp) => *fp,
        }
    }
}

type Callback = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

struct Observer {
    fingerprint: Fingerprint,
    callback: Callback,
}

#[derive(Default)]
struct RegistryState {
    observers: SlotMap<SubscriptionId, Observer>,
    by_fingerprint: HashMap<Fingerprint, Vec<SubscriptionId>>,
}

/// Observer registry keyed by fingerprint.
#[derive(Default)]
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for changes to `fingerprint`.
    pub fn subscribe<F>(self: &Arc<Self>, fingerprint: Fingerprint, callback: F) -> Subscription
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        let mut state = self.state.lock();
        let id = state.observers.insert(Observer {
            fingerprint,
            callback: Arc::new(callback),
        });
        state.by_fingerprint.entry(fingerprint).or_default().push(id);
        drop(state);

        tracing::trace!(target: targets::SUBSCRIPTION, %fingerprint, ?id, "subscribed");
        Subscription {
            id,
            fingerprint,
            registry: Arc::downgrade(self),
            active: AtomicBool::new(true),
        }
    }

    /// Remove a registration. Returns `true` if it was present.
    pub fn remove(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.lock();
        let Some(observer) = state.observers.remove(id) else {
            return false;
        };
        if let Some(ids) = state.by_fingerprint.get_mut(&observer.fingerprint) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                state.by_fingerprint.remove(&observer.fingerprint);
            }
        }
        tracing::trace!(target: targets::SUBSCRIPTION, fingerprint = %observer.fingerprint, ?id, "unsubscribed");
        true
    }

    /// Deliver `event` to every observer of its fingerprint.
    ///
    /// Returns the number of observers notified.
    #[tracing::instrument(skip_all, target = "draqula_core::subscription", level = "trace")]
    pub fn notify(&self, event: &CacheEvent) -> usize {
        let fingerprint = event.fingerprint();
        let callbacks: Vec<Callback> = {
            let state = self.state.lock();
            state
                .by_fingerprint
                .get(&fingerprint)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| state.observers.get(*id))
                        .map(|observer| observer.callback.clone())
                        .collect()
                })
                .unwrap_or_default()
        };

        for callback in &callbacks {
            callback(event);
        }
        callbacks.len()
    }

    /// Number of observers registered for `fingerprint`.
    pub fn subscriber_count(&self, fingerprint: &Fingerprint) -> usize {
        self.state
            .lock()
            .by_fingerprint
            .get(fingerprint)
            .map_or(0, Vec::len)
    }

    /// Fingerprints with at least one observer.
    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        self.state.lock().by_fingerprint.keys().copied().collect()
    }

    /// Total number of registered observers.
    pub fn len(&self) -> usize {
        self.state.lock().observers.len()
    }

    /// Check if no observers are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("observers", &self.len())
            .finish()
    }
}

/// Disposer for a cache observer.
///
/// The callback stays registered until [`unsubscribe`](Self::unsubscribe) is
/// called or the subscription is dropped.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: SubscriptionId,
    fingerprint: Fingerprint,
    registry: Weak<SubscriptionRegistry>,
    active: AtomicBool,
}

impl Subscription {
    /// The subscription's identifier.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The observed fingerprint.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Check whether the callback is still registered.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst) && self.registry.strong_count() > 0
    }

    /// Remove the callback. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("fingerprint", &self.fingerprint)
            .field("active", &self.is_active())
            .finish()
    }
}
