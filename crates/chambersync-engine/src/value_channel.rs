//! [`ValueChannel`] – debounced subscriber over one remote scalar
//! attribute.
//!
//! Raw change notifications pass a two-stage acceptance filter before they
//! become visible: the sample must be *old enough* (`min_period` seconds
//! since the last accepted sample) **and** *different enough* (`min_change`
//! absolute delta). The two debounces are conjunctive: rapid jitter and
//! repeated near-identical values are both suppressed. Only acceptance
//! replaces the stored sample and fires the observers.

use std::sync::Arc;

use tracing::{debug, trace};

use chambersync_remote::{NotificationSink, RemoteBus};
use chambersync_types::{AttrAddress, DebounceConfig, Quality, Sample, SyncError};

use crate::channel::ChannelCore;
use crate::formula::PositionProvider;
use crate::observer::Observer;

pub struct ValueChannel {
    core: ChannelCore,
    config: DebounceConfig,
}

impl ValueChannel {
    /// Resolve `address` and establish a live change-event feed.
    ///
    /// The bus delivers an initial notification during this call; when the
    /// remote attribute already holds a value, the channel comes back
    /// pre-populated.
    ///
    /// # Errors
    ///
    /// [`SyncError::UnresolvableIdentity`] when the device is unknown,
    /// [`SyncError::Subscription`] when the feed cannot be established.
    pub fn open(
        bus: Arc<dyn RemoteBus>,
        address: AttrAddress,
        config: DebounceConfig,
    ) -> Result<Arc<Self>, SyncError> {
        let core = ChannelCore::resolve(bus, address)?;
        let channel = Arc::new(Self { core, config });
        channel.core.subscribe(channel.clone())?;
        Ok(channel)
    }

    /// Last accepted value, `None` until the first acceptance.
    pub fn value(&self) -> Option<f64> {
        self.core.sample().map(|s| s.value)
    }

    /// Timestamp of the last accepted sample, epoch seconds.
    pub fn timestamp(&self) -> Option<f64> {
        self.core.sample().map(|s| s.timestamp)
    }

    /// Quality of the last accepted sample; [`Quality::Invalid`] until the
    /// first acceptance.
    pub fn quality(&self) -> Quality {
        self.core.quality()
    }

    /// Consistent snapshot of the stored triple.
    pub fn sample(&self) -> Option<Sample> {
        self.core.sample()
    }

    pub fn address(&self) -> &AttrAddress {
        self.core.address()
    }

    /// Register an observer fired after every accepted sample, in
    /// registration order. Duplicates are permitted and fire once per
    /// registration.
    pub fn append_observer(&self, observer: Arc<dyn Observer>) {
        self.core.append_observer(observer);
    }

    /// Tear down the remote feed. Later calls are no-ops.
    pub fn unsubscribe(&self) {
        self.core.unsubscribe();
    }
}

impl NotificationSink for ValueChannel {
    fn on_notification(&self, value: Option<f64>, timestamp: f64, quality: Quality) {
        let _serial = self.core.ingest_guard();
        let Some(value) = value else {
            trace!(channel = %self.core.address(), "notification without value ignored");
            return;
        };
        let accepted = {
            let mut stored = self.core.sample_slot();
            match *stored {
                Some(prev) => {
                    let elapsed = timestamp - prev.timestamp;
                    if elapsed <= self.config.min_period {
                        trace!(
                            channel = %self.core.address(),
                            elapsed,
                            "notification too recent, ignored"
                        );
                        false
                    } else if (value - prev.value).abs() <= self.config.min_change {
                        // The timestamp stays on the last accepted sample:
                        // periodicity is measured against real changes only.
                        trace!(
                            channel = %self.core.address(),
                            value,
                            "change below threshold, ignored"
                        );
                        false
                    } else {
                        *stored = Some(Sample { value, timestamp, quality });
                        true
                    }
                }
                None => {
                    *stored = Some(Sample { value, timestamp, quality });
                    true
                }
            }
        };
        if accepted {
            debug!(channel = %self.core.address(), value, timestamp, "sample accepted");
            self.core.notify_observers();
        }
    }
}

impl PositionProvider for ValueChannel {
    fn current_value(&self) -> Option<f64> {
        self.value()
    }
}
