//! Shared plumbing for both channel flavors: the resolved remote identity,
//! the current sample slot, the observer list, and the subscription handle.
//!
//! Locking discipline: `ingest` serializes notification processing per
//! channel (the delivery mechanism may be multi-threaded); `sample` guards
//! the stored triple so readers always see a consistent snapshot. Neither
//! lock is ever held across a call into the bus: a write triggers a
//! synchronous echo on some transports, which re-enters notification
//! handling on the same call stack.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chambersync_remote::{DeviceHandle, NotificationSink, RemoteBus, SubscriptionId};
use chambersync_types::{AttrAddress, Quality, Sample, SyncError};

use crate::observer::{Observer, ObserverList};

pub(crate) fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct ChannelCore {
    address: AttrAddress,
    bus: Arc<dyn RemoteBus>,
    handle: DeviceHandle,
    sample: Mutex<Option<Sample>>,
    observers: ObserverList,
    subscription: Mutex<Option<SubscriptionId>>,
    ingest: Mutex<()>,
}

impl ChannelCore {
    /// Resolve `address` on `bus`. The feed is not live until
    /// [`subscribe`][Self::subscribe] is called with the owning channel as
    /// the sink.
    pub(crate) fn resolve(bus: Arc<dyn RemoteBus>, address: AttrAddress) -> Result<Self, SyncError> {
        let handle = bus.resolve(&address.device)?;
        Ok(Self {
            address,
            bus,
            handle,
            sample: Mutex::new(None),
            observers: ObserverList::new(),
            subscription: Mutex::new(None),
            ingest: Mutex::new(()),
        })
    }

    /// Establish the change-event feed. The bus delivers the bootstrap
    /// notification synchronously, so `sink` must already be fully
    /// constructed.
    pub(crate) fn subscribe(&self, sink: Arc<dyn NotificationSink>) -> Result<(), SyncError> {
        let id = self.bus.subscribe(self.handle, &self.address.attribute, sink)?;
        *relock(&self.subscription) = Some(id);
        Ok(())
    }

    /// Tear down the feed. Safe to call repeatedly; only the first call
    /// reaches the bus.
    pub(crate) fn unsubscribe(&self) {
        if let Some(id) = relock(&self.subscription).take() {
            self.bus.unsubscribe(id);
        }
    }

    pub(crate) fn write_remote(&self, value: f64) -> Result<(), SyncError> {
        self.bus.write(self.handle, &self.address.attribute, value)
    }

    pub(crate) fn address(&self) -> &AttrAddress {
        &self.address
    }

    pub(crate) fn sample(&self) -> Option<Sample> {
        *relock(&self.sample)
    }

    pub(crate) fn quality(&self) -> Quality {
        self.sample().map(|s| s.quality).unwrap_or_default()
    }

    pub(crate) fn sample_slot(&self) -> MutexGuard<'_, Option<Sample>> {
        relock(&self.sample)
    }

    pub(crate) fn ingest_guard(&self) -> MutexGuard<'_, ()> {
        relock(&self.ingest)
    }

    pub(crate) fn append_observer(&self, observer: Arc<dyn Observer>) {
        self.observers.append(observer);
    }

    pub(crate) fn notify_observers(&self) {
        self.observers.notify_all();
    }
}
