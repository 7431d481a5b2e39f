//! `chambersync-engine` – the reactive computation core.
//!
//! A small dataflow graph keeps a derived chamber offset synchronized with a
//! live motor position:
//!
//! ```text
//! remote event ─▶ ValueChannel (debounce) ─▶ observers ─▶ FormulaEngine.evaluate
//!                                                              │
//!                 WriteChannel ◀── write ◀────────────────────┘
//!                      │
//! remote echo ────▶ reconcile (confirm / bootstrap / correct drift)
//! ```
//!
//! # Modules
//!
//! - [`observer`] – ordered observer lists with per-observer failure
//!   isolation.
//! - [`value_channel`] – debounced subscriber over one remote scalar
//!   attribute.
//! - [`write_channel`] – write target with echo reconciliation: the locally
//!   intended value is authoritative and external interference is corrected
//!   within one notification cycle.
//! - [`formula`] – the `OFFSET`/`POSITION` expression template, parsed once
//!   into a tree and evaluated on demand.
//! - [`coordinator`] – wires one position channel, one write target, and one
//!   formula into a closed self-healing loop.

mod channel;

pub mod coordinator;
pub mod formula;
pub mod observer;
pub mod value_channel;
pub mod write_channel;

pub use coordinator::Coordinator;
pub use formula::{FormulaEngine, PositionProvider};
pub use observer::{Observer, ObserverList};
pub use value_channel::ValueChannel;
pub use write_channel::WriteChannel;
