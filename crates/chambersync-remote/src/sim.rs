//! [`SimBus`] – in-process remote service for tests, CI, and the demo
//! binary.
//!
//! The bus keeps every device and attribute in a map, delivers change
//! notifications synchronously on the caller's thread, and records every
//! write so tests can assert on the exact command sequence. Two behaviors
//! mirror the real transport closely enough to exercise the whole engine:
//!
//! * a fresh subscription immediately receives the attribute's current
//!   value (bootstrap event), and
//! * every successful [`write`][crate::bus::RemoteBus::write] echoes a
//!   change notification back to all subscribers of that attribute,
//!   including the writer.
//!
//! Notification fan-out never holds the bus lock: a subscriber is allowed
//! to call back into the bus from inside its sink (corrective writes do
//! exactly that).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tracing::debug;

use chambersync_types::{AttrAddress, Quality, SyncError};

use crate::bus::{DeviceHandle, NotificationSink, RemoteBus, SubscriptionId};

/// Current wall-clock time as epoch seconds, the unit all sample
/// timestamps use.
pub fn now_epoch() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1e6
}

struct SimDevice {
    name: String,
    attributes: HashMap<String, Option<f64>>,
    failing: bool,
}

struct SubEntry {
    id: u64,
    device: usize,
    attribute: String,
    sink: Arc<dyn NotificationSink>,
}

#[derive(Default)]
struct Inner {
    devices: Vec<SimDevice>,
    index: HashMap<String, usize>,
    subscribers: Vec<SubEntry>,
    next_subscription: u64,
    writes: Vec<(AttrAddress, f64)>,
}

/// In-memory [`RemoteBus`] implementation. Cheap to share behind an `Arc`;
/// all state lives behind one internal lock.
#[derive(Default)]
pub struct SimBus {
    inner: Mutex<Inner>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `addr`'s device and attribute if needed and set the attribute
    /// silently; no change notification is delivered. Use this to stage
    /// initial remote state before anything subscribes.
    pub fn seed(&self, addr: &AttrAddress, value: Option<f64>) {
        let mut inner = self.lock();
        let device = Self::device_entry(&mut inner, &addr.device);
        inner.devices[device]
            .attributes
            .insert(addr.attribute.clone(), value);
    }

    /// Make every write to `device` fail with [`SyncError::RemoteWrite`]
    /// (or succeed again when `failing` is false).
    pub fn set_failing(&self, device: &str, failing: bool) {
        let mut inner = self.lock();
        let idx = Self::device_entry(&mut inner, device);
        inner.devices[idx].failing = failing;
    }

    /// Update `addr` and deliver a change notification stamped with the
    /// current wall clock and [`Quality::Valid`]. This is the external
    /// world moving: a motor sweep, a third party writing to the target.
    pub fn push(&self, addr: &AttrAddress, value: f64) {
        self.push_raw(addr, Some(value), now_epoch(), Quality::Valid);
    }

    /// Deliver a fully specified notification. A `Some` value also updates
    /// the stored attribute; `None` leaves remote state untouched (a
    /// valueless event, e.g. a read error on the remote side).
    pub fn push_raw(&self, addr: &AttrAddress, value: Option<f64>, timestamp: f64, quality: Quality) {
        let sinks = {
            let mut inner = self.lock();
            let device = Self::device_entry(&mut inner, &addr.device);
            if let Some(v) = value {
                inner.devices[device]
                    .attributes
                    .insert(addr.attribute.clone(), Some(v));
            }
            Self::sinks_for(&inner, device, &addr.attribute)
        };
        for sink in sinks {
            sink.on_notification(value, timestamp, quality);
        }
    }

    /// Every successful write issued through [`RemoteBus::write`], in order.
    pub fn write_log(&self) -> Vec<(AttrAddress, f64)> {
        self.lock().writes.clone()
    }

    /// Number of live subscriptions, across all attributes.
    pub fn subscription_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn device_entry(inner: &mut Inner, name: &str) -> usize {
        if let Some(&idx) = inner.index.get(name) {
            return idx;
        }
        inner.devices.push(SimDevice {
            name: name.to_string(),
            attributes: HashMap::new(),
            failing: false,
        });
        let idx = inner.devices.len() - 1;
        inner.index.insert(name.to_string(), idx);
        idx
    }

    fn sinks_for(inner: &Inner, device: usize, attribute: &str) -> Vec<Arc<dyn NotificationSink>> {
        inner
            .subscribers
            .iter()
            .filter(|s| s.device == device && s.attribute == attribute)
            .map(|s| s.sink.clone())
            .collect()
    }

    fn check_attribute(inner: &Inner, handle: DeviceHandle, attribute: &str) -> Result<usize, SyncError> {
        let idx = handle.0 as usize;
        let device = inner.devices.get(idx).ok_or_else(|| SyncError::Subscription {
            address: format!("<handle {}>/{attribute}", handle.0),
            details: "stale device handle".to_string(),
        })?;
        if !device.attributes.contains_key(attribute) {
            return Err(SyncError::Subscription {
                address: format!("{}/{attribute}", device.name),
                details: format!("no attribute '{attribute}' on device"),
            });
        }
        Ok(idx)
    }
}

impl RemoteBus for SimBus {
    fn resolve(&self, device: &str) -> Result<DeviceHandle, SyncError> {
        let inner = self.lock();
        inner
            .index
            .get(device)
            .map(|&idx| DeviceHandle(idx as u64))
            .ok_or_else(|| SyncError::UnresolvableIdentity {
                device: device.to_string(),
            })
    }

    fn subscribe(
        &self,
        handle: DeviceHandle,
        attribute: &str,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<SubscriptionId, SyncError> {
        let (id, initial) = {
            let mut inner = self.lock();
            let device = Self::check_attribute(&inner, handle, attribute)?;
            let id = inner.next_subscription;
            inner.next_subscription += 1;
            inner.subscribers.push(SubEntry {
                id,
                device,
                attribute: attribute.to_string(),
                sink: sink.clone(),
            });
            let initial = inner.devices[device].attributes[attribute];
            debug!(device = %inner.devices[device].name, attribute, id, "sim subscription established");
            (id, initial)
        };
        // Bootstrap event: the subscriber sees current remote truth first.
        let quality = if initial.is_some() {
            Quality::Valid
        } else {
            Quality::Invalid
        };
        sink.on_notification(initial, now_epoch(), quality);
        Ok(SubscriptionId(id))
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.lock();
        inner.subscribers.retain(|s| s.id != id.0);
    }

    fn read(&self, handle: DeviceHandle, attribute: &str) -> Result<Option<f64>, SyncError> {
        let inner = self.lock();
        let device = Self::check_attribute(&inner, handle, attribute)?;
        Ok(inner.devices[device].attributes[attribute])
    }

    fn write(&self, handle: DeviceHandle, attribute: &str, value: f64) -> Result<(), SyncError> {
        let sinks = {
            let mut inner = self.lock();
            let device = Self::check_attribute(&inner, handle, attribute)?;
            if inner.devices[device].failing {
                return Err(SyncError::RemoteWrite {
                    address: format!("{}/{attribute}", inner.devices[device].name),
                    details: "device is in simulated failure mode".to_string(),
                });
            }
            inner.devices[device]
                .attributes
                .insert(attribute.to_string(), Some(value));
            let name = inner.devices[device].name.clone();
            inner.writes.push((AttrAddress::new(name, attribute), value));
            Self::sinks_for(&inner, device, attribute)
        };
        // Echo: the write lands, every subscriber (the writer included)
        // hears about it.
        for sink in sinks {
            sink.on_notification(Some(value), now_epoch(), Quality::Valid);
        }
        Ok(())
    }
}
