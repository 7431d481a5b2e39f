//! [`RemoteBus`] – the seam between the reactive engine and whatever control
//! system actually hosts the attributes.
//!
//! Implementations translate these five primitives into their transport of
//! choice; [`SimBus`][crate::sim::SimBus] translates them into an in-memory
//! map. The engine only ever talks to the trait, so transports can be
//! swapped without touching channel or coordinator logic.

use std::sync::Arc;

use chambersync_types::{Quality, SyncError};

/// Opaque token returned by [`RemoteBus::resolve`]. Only the issuing bus
/// assigns meaning to the inner value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub u64);

/// Opaque token identifying one live change-event subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Receiver half of a change-event subscription.
///
/// The remote service drives this: one call per change notification, with
/// `value` absent when the service could not produce a reading. The sink
/// must tolerate duplicate and out-of-order deliveries; filtering is the
/// sink's job, not the transport's.
pub trait NotificationSink: Send + Sync {
    fn on_notification(&self, value: Option<f64>, timestamp: f64, quality: Quality);
}

/// A remote attribute service: resolve device identities, subscribe to
/// scalar attribute change events, and read/write attribute values.
///
/// # Contract
///
/// * `subscribe` must deliver an initial notification carrying the
///   attribute's current value before any subsequent change events, so a
///   fresh subscriber bootstraps from remote truth.
/// * `write` makes the new value observable to *all* subscribers of that
///   attribute, including the writer itself (the echo).
/// * `unsubscribe` is idempotent; unknown ids are ignored.
pub trait RemoteBus: Send + Sync {
    /// Resolve a device path to a handle.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnresolvableIdentity`] when no such device
    /// exists on this bus.
    fn resolve(&self, device: &str) -> Result<DeviceHandle, SyncError>;

    /// Establish a change-event feed for `attribute` on the resolved device.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Subscription`] when the handle is stale or the
    /// attribute does not exist.
    fn subscribe(
        &self,
        handle: DeviceHandle,
        attribute: &str,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<SubscriptionId, SyncError>;

    /// Tear down a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Read the attribute's current value. `None` means the attribute has
    /// never been set.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Subscription`] when the handle is stale or the
    /// attribute does not exist.
    fn read(&self, handle: DeviceHandle, attribute: &str) -> Result<Option<f64>, SyncError>;

    /// Push a new value to the attribute.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::RemoteWrite`] when the target rejects the write.
    fn write(&self, handle: DeviceHandle, attribute: &str, value: f64) -> Result<(), SyncError>;
}
