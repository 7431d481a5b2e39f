//! [`WriteChannel`] – subscriber over the write target, with echo
//! reconciliation instead of debouncing.
//!
//! The locally stored value is the *intent*: the last value this channel
//! asserted on the remote target (or bootstrapped from it before any write).
//! Incoming notifications are echoes and are reconciled against that intent:
//!
//! * no stored value yet → accept unconditionally (bootstrap from remote
//!   truth at startup),
//! * echo equals the stored value → the pending write landed; refresh
//!   timestamp/quality and notify observers,
//! * echo differs → external interference; warn and re-issue exactly one
//!   corrective write of the stored value.
//!
//! A third party writing to the same attribute is therefore overridden
//! within one notification cycle.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use chambersync_remote::{NotificationSink, RemoteBus};
use chambersync_types::{AttrAddress, Quality, Sample, SyncError};

use crate::channel::ChannelCore;
use crate::observer::Observer;

fn now_epoch() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1e6
}

enum Echo {
    Bootstrap,
    Confirmed,
    Drift(f64),
}

pub struct WriteChannel {
    core: ChannelCore,
}

impl WriteChannel {
    /// Resolve `address` and subscribe to its change events. See
    /// [`ValueChannel::open`][crate::ValueChannel::open] for the bootstrap
    /// behavior; the write channel accepts the initial value as its starting
    /// intent.
    ///
    /// # Errors
    ///
    /// [`SyncError::UnresolvableIdentity`] when the device is unknown,
    /// [`SyncError::Subscription`] when the feed cannot be established.
    pub fn open(bus: Arc<dyn RemoteBus>, address: AttrAddress) -> Result<Arc<Self>, SyncError> {
        let core = ChannelCore::resolve(bus, address)?;
        let channel = Arc::new(Self { core });
        channel.core.subscribe(channel.clone())?;
        Ok(channel)
    }

    /// Assert `value` on the remote target.
    ///
    /// The stored sample is replaced immediately: the intent is
    /// authoritative from this point on, whether or not the remote write
    /// goes through. On remote failure the error is logged and returned,
    /// the intent stays pending, and the next echo that disagrees with it
    /// triggers the corrective path.
    pub fn write(&self, value: f64) -> Result<(), SyncError> {
        info!(channel = %self.core.address(), value, "writing target value");
        {
            let mut stored = self.core.sample_slot();
            *stored = Some(Sample {
                value,
                timestamp: now_epoch(),
                quality: Quality::Valid,
            });
        }
        if let Err(e) = self.core.write_remote(value) {
            error!(
                channel = %self.core.address(),
                error = %e,
                "remote write failed; intent stays pending"
            );
            return Err(e);
        }
        Ok(())
    }

    /// Last intended value: what this channel believes the remote target
    /// must hold. Equals [`value`][Self::value]; the stored sample *is* the
    /// intent.
    pub fn intended_value(&self) -> Option<f64> {
        self.value()
    }

    pub fn value(&self) -> Option<f64> {
        self.core.sample().map(|s| s.value)
    }

    pub fn timestamp(&self) -> Option<f64> {
        self.core.sample().map(|s| s.timestamp)
    }

    pub fn quality(&self) -> Quality {
        self.core.quality()
    }

    pub fn sample(&self) -> Option<Sample> {
        self.core.sample()
    }

    pub fn address(&self) -> &AttrAddress {
        self.core.address()
    }

    /// Register an observer fired after every accepted echo (bootstrap or
    /// confirmation), in registration order.
    pub fn append_observer(&self, observer: Arc<dyn Observer>) {
        self.core.append_observer(observer);
    }

    /// Tear down the remote feed. Later calls are no-ops.
    pub fn unsubscribe(&self) {
        self.core.unsubscribe();
    }
}

impl NotificationSink for WriteChannel {
    fn on_notification(&self, value: Option<f64>, timestamp: f64, quality: Quality) {
        let correction = {
            let _serial = self.core.ingest_guard();
            let Some(value) = value else {
                warn!(channel = %self.core.address(), "echo without value ignored");
                return;
            };
            let outcome = {
                let mut stored = self.core.sample_slot();
                match *stored {
                    None => {
                        *stored = Some(Sample { value, timestamp, quality });
                        Echo::Bootstrap
                    }
                    Some(prev) if prev.value == value => {
                        *stored = Some(Sample { value, timestamp, quality });
                        Echo::Confirmed
                    }
                    Some(prev) => Echo::Drift(prev.value),
                }
            };
            match outcome {
                Echo::Bootstrap => {
                    info!(channel = %self.core.address(), value, "bootstrapped intent from remote state");
                    self.core.notify_observers();
                    None
                }
                Echo::Confirmed => {
                    debug!(channel = %self.core.address(), value, "echo confirmed pending write");
                    self.core.notify_observers();
                    None
                }
                Echo::Drift(intended) => {
                    warn!(
                        channel = %self.core.address(),
                        observed = value,
                        intended,
                        "external interference detected; restoring intended value"
                    );
                    Some(intended)
                }
            }
        };
        // The serialization guard is released here: on transports with
        // synchronous delivery the corrective write's own echo re-enters
        // on_notification on this same call stack.
        if let Some(intended) = correction {
            let _ = self.write(intended);
        }
    }
}
