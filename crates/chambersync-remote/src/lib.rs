//! `chambersync-remote` – the remote attribute service boundary.
//!
//! The engine never speaks a control-system transport directly. It talks to
//! the [`RemoteBus`] trait: resolve a device, subscribe to change events on
//! one of its scalar attributes, read it, write it. Notifications flow back
//! through [`NotificationSink`], driven by the service, never polled by the
//! engine.
//!
//! # Modules
//!
//! - [`bus`] – the `RemoteBus` / `NotificationSink` traits and their handle
//!   types.
//! - [`sim`] – [`SimBus`], an in-memory implementation with synchronous echo
//!   delivery, used by every test and by the demo binary so the full stack
//!   runs headless.

pub mod bus;
pub mod sim;

pub use bus::{DeviceHandle, NotificationSink, RemoteBus, SubscriptionId};
pub use sim::SimBus;
