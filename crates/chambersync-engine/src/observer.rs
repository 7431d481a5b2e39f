//! Ordered observer registration and dispatch.
//!
//! Channels fan out accepted samples to zero-argument observers: the
//! observer reads whatever state it needs through the channel's accessors,
//! nothing is passed in. Observers run synchronously, in registration
//! order, and a failing observer is logged and skipped so it can never
//! block delivery to the observers behind it.
//!
//! Registration is *at-least-once*: appending the same observer twice means
//! it runs twice per dispatch. Deduplication is deliberately not performed.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::warn;

use chambersync_types::SyncError;

/// A zero-argument callback invoked after a channel accepts a sample.
///
/// Implementations must not panic; recoverable problems are returned as
/// [`SyncError`] and logged by the dispatcher.
pub trait Observer: Send + Sync {
    fn notify(&self) -> Result<(), SyncError>;
}

/// Closures work as observers directly.
impl<F> Observer for F
where
    F: Fn() -> Result<(), SyncError> + Send + Sync,
{
    fn notify(&self) -> Result<(), SyncError> {
        self()
    }
}

/// An ordered list of observers sharing one dispatch point.
#[derive(Default)]
pub struct ObserverList {
    observers: Mutex<Vec<Arc<dyn Observer>>>,
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `observer` at the end of the list. Duplicates are permitted.
    pub fn append(&self, observer: Arc<dyn Observer>) {
        self.lock().push(observer);
    }

    /// Invoke every observer in registration order. Failures are logged
    /// per observer; dispatch always reaches the end of the list.
    pub fn notify_all(&self) {
        // Snapshot so observers may register further observers without
        // deadlocking the list.
        let snapshot: Vec<Arc<dyn Observer>> = self.lock().clone();
        for observer in snapshot {
            if let Err(e) = observer.notify() {
                warn!(error = %e, "observer callback failed; continuing with remaining observers");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn Observer>>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
