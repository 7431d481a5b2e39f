use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Quality flag attached to every sample delivered by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Quality {
    /// The remote service vouches for the value.
    Valid,
    /// The value is stale, out of range, or otherwise untrustworthy.
    #[default]
    Invalid,
}

/// One accepted reading of a remote scalar attribute.
///
/// Samples are immutable value objects: a channel replaces its stored sample
/// wholesale on acceptance and never mutates it in place. Timestamps are
/// epoch seconds and are monotonically non-decreasing across the samples a
/// channel accepts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// The scalar reading.
    pub value: f64,
    /// Epoch seconds, as stamped by the remote service.
    pub timestamp: f64,
    /// Quality reported alongside the value.
    pub quality: Quality,
}

/// Identity of one remote scalar attribute: a device path plus the attribute
/// name hosted on it.
///
/// The textual form is `"<device-path>/<attribute>"`. Device paths may
/// themselves contain `/` (e.g. `"sr/mot/fsh1"`), so the attribute is always
/// the final path segment: `"sr/mot/fsh1/Position"` names attribute
/// `Position` on device `sr/mot/fsh1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttrAddress {
    pub device: String,
    pub attribute: String,
}

impl AttrAddress {
    pub fn new(device: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            attribute: attribute.into(),
        }
    }
}

impl fmt::Display for AttrAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.attribute)
    }
}

impl FromStr for AttrAddress {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once('/') {
            Some((device, attribute)) if !device.is_empty() && !attribute.is_empty() => {
                Ok(Self::new(device, attribute))
            }
            _ => Err(SyncError::BadAddress(s.to_string())),
        }
    }
}

/// Acceptance thresholds for a monitored channel.
///
/// A raw notification is accepted only when it is *both* old enough
/// (`min_period` seconds since the last accepted sample) *and* different
/// enough (`min_change` absolute delta from the last accepted value).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DebounceConfig {
    /// Minimum seconds between accepted samples.
    pub min_period: f64,
    /// Minimum absolute value delta between accepted samples.
    pub min_change: f64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            min_period: 0.1,
            min_change: 0.001,
        }
    }
}

/// Host-visible lifecycle of a coordinator.
///
/// `Uninitialized` exists only before a connect attempt; a successful
/// [`connect`] yields `Ready` and a failed one leaves the host in `Faulted`
/// with the triggering error as the human-readable reason. A ready
/// coordinator never faults afterwards: every runtime error is recovered
/// locally and surfaced through logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinatorState {
    Uninitialized,
    Ready,
    Faulted { reason: String },
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinatorState::Uninitialized => write!(f, "UNINITIALIZED"),
            CoordinatorState::Ready => write!(f, "READY"),
            CoordinatorState::Faulted { reason } => write!(f, "FAULTED: {reason}"),
        }
    }
}

/// Error taxonomy shared by every chambersync crate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("cannot resolve remote device '{device}'")]
    UnresolvableIdentity { device: String },

    #[error("cannot subscribe to {address}: {details}")]
    Subscription { address: String, details: String },

    #[error("remote write to {address} failed: {details}")]
    RemoteWrite { address: String, details: String },

    #[error("formula evaluation failed: {0}")]
    Evaluation(String),

    #[error("malformed attribute address '{0}'")]
    BadAddress(String),
}
