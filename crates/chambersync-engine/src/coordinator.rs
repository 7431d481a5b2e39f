//! [`Coordinator`] – one position feed, one write target, one formula,
//! closed into a self-healing loop.
//!
//! Every accepted position change recomputes the formula and republishes
//! the result to the write target. Every accepted echo from the target
//! independently recomputes the expected value and warns on a mismatch,
//! a redundant consistency check only; the actual correction is the write
//! channel's own reconciliation, so there is never a second writer racing
//! the first.
//!
//! The offset is a mutable parameter: changing it recomputes immediately,
//! bypassing the position channel's debounce (the trigger originates
//! locally, not from the remote feed).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use chambersync_remote::RemoteBus;
use chambersync_types::{AttrAddress, CoordinatorState, DebounceConfig, Sample, SyncError};

use crate::formula::{FormulaEngine, PositionProvider};
use crate::observer::Observer;
use crate::value_channel::ValueChannel;
use crate::write_channel::WriteChannel;

fn recompute(formula: &FormulaEngine, target: &WriteChannel) {
    match formula.evaluate() {
        // write() logs its own failure and the intent stays pending for
        // the next reconciliation pass.
        Ok(value) => {
            let _ = target.write(value);
        }
        Err(e) => debug!(error = %e, "recompute skipped"),
    }
}

/// Fires on every accepted position sample.
struct RecomputeObserver {
    formula: Arc<FormulaEngine>,
    target: Arc<WriteChannel>,
    live: Arc<AtomicBool>,
}

impl Observer for RecomputeObserver {
    fn notify(&self) -> Result<(), SyncError> {
        if !self.live.load(Ordering::SeqCst) {
            return Ok(());
        }
        recompute(&self.formula, &self.target);
        Ok(())
    }
}

/// Fires on every accepted target echo.
struct DriftCheckObserver {
    formula: Arc<FormulaEngine>,
    target: Arc<WriteChannel>,
    live: Arc<AtomicBool>,
}

impl Observer for DriftCheckObserver {
    fn notify(&self) -> Result<(), SyncError> {
        if !self.live.load(Ordering::SeqCst) {
            return Ok(());
        }
        let Some(observed) = self.target.value() else {
            return Ok(());
        };
        match self.formula.evaluate() {
            Ok(expected) => {
                if expected != observed {
                    warn!(
                        channel = %self.target.address(),
                        expected,
                        observed,
                        "target value drifted from expected"
                    );
                }
            }
            Err(e) => debug!(error = %e, "drift check skipped"),
        }
        Ok(())
    }
}

pub struct Coordinator {
    position: Arc<ValueChannel>,
    target: Arc<WriteChannel>,
    formula: Arc<FormulaEngine>,
    live: Arc<AtomicBool>,
}

impl Coordinator {
    /// Build the whole loop: open the position feed, open the write
    /// target, configure the formula, and wire the observers.
    ///
    /// Construction is atomic: when the target cannot be opened the
    /// already-established position subscription is torn down before the
    /// error is returned, so no partially-subscribed coordinator ever
    /// exists.
    ///
    /// # Errors
    ///
    /// [`SyncError::UnresolvableIdentity`] or [`SyncError::Subscription`]
    /// from either channel. A bad formula template is *not* fatal: it is
    /// logged and every recompute cycle skips until a good template is
    /// configured.
    pub fn connect(
        bus: Arc<dyn RemoteBus>,
        position_addr: AttrAddress,
        target_addr: AttrAddress,
        template: &str,
        debounce: DebounceConfig,
    ) -> Result<Arc<Self>, SyncError> {
        let position = ValueChannel::open(bus.clone(), position_addr, debounce)?;
        let target = match WriteChannel::open(bus, target_addr) {
            Ok(target) => target,
            Err(e) => {
                position.unsubscribe();
                return Err(e);
            }
        };

        let provider: Arc<dyn PositionProvider> = position.clone();
        let formula = Arc::new(FormulaEngine::new(provider, template));
        let live = Arc::new(AtomicBool::new(true));

        position.append_observer(Arc::new(RecomputeObserver {
            formula: formula.clone(),
            target: target.clone(),
            live: live.clone(),
        }));
        target.append_observer(Arc::new(DriftCheckObserver {
            formula: formula.clone(),
            target: target.clone(),
            live: live.clone(),
        }));

        info!(
            position = %position.address(),
            target = %target.address(),
            formula = template,
            "coordinator ready"
        );
        Ok(Arc::new(Self {
            position,
            target,
            formula,
            live,
        }))
    }

    /// `Ready` while the loop is live; `Uninitialized` once
    /// [`shutdown`][Self::shutdown] has unwired the channels.
    pub fn state(&self) -> CoordinatorState {
        if self.live.load(Ordering::SeqCst) {
            CoordinatorState::Ready
        } else {
            CoordinatorState::Uninitialized
        }
    }

    pub fn offset(&self) -> f64 {
        self.formula.offset()
    }

    /// Update the offset. A changed value recomputes and republishes
    /// immediately; setting the current value again is a no-op.
    pub fn set_offset(&self, value: f64) {
        if value == self.formula.offset() {
            return;
        }
        self.formula.set_offset(value);
        info!(offset = value, "offset updated");
        if self.live.load(Ordering::SeqCst) {
            recompute(&self.formula, &self.target);
        }
    }

    /// The raw formula template.
    pub fn formula(&self) -> String {
        self.formula.template()
    }

    /// The template with operand tokens replaced by their live values;
    /// `None` while the position operand is still absent.
    pub fn expanded_formula(&self) -> Option<String> {
        self.formula.expanded_expression()
    }

    pub fn position_sample(&self) -> Option<Sample> {
        self.position.sample()
    }

    pub fn target_sample(&self) -> Option<Sample> {
        self.target.sample()
    }

    /// Register a host hook fired after every accepted position sample
    /// (e.g. to forward the change as a host-level event).
    pub fn add_position_observer(&self, observer: Arc<dyn Observer>) {
        self.position.append_observer(observer);
    }

    /// Register a host hook fired after every accepted target echo.
    pub fn add_target_observer(&self, observer: Arc<dyn Observer>) {
        self.target.append_observer(observer);
    }

    /// Unsubscribe both channels and stop all computation. Idempotent;
    /// after the first call no further recompute or drift check runs.
    pub fn shutdown(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            self.position.unsubscribe();
            self.target.unsubscribe();
            info!("coordinator stopped");
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use chambersync_remote::SimBus;

    fn motor() -> AttrAddress {
        AttrAddress::new("sim/motor/1", "Position")
    }

    fn chamber() -> AttrAddress {
        AttrAddress::new("sim/chamber/1", "ChamberOffsetX")
    }

    fn simulated_bus() -> Arc<SimBus> {
        let bus = Arc::new(SimBus::new());
        bus.seed(&motor(), None);
        bus.seed(&chamber(), None);
        bus
    }

    fn connect(bus: &Arc<SimBus>) -> Arc<Coordinator> {
        Coordinator::connect(
            bus.clone() as Arc<dyn RemoteBus>,
            motor(),
            chamber(),
            "OFFSET-POSITION",
            DebounceConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn unknown_position_device_faults_construction() {
        let bus = Arc::new(SimBus::new());
        bus.seed(&chamber(), None);
        let result = Coordinator::connect(
            bus.clone() as Arc<dyn RemoteBus>,
            motor(),
            chamber(),
            "OFFSET-POSITION",
            DebounceConfig::default(),
        );
        assert!(matches!(result, Err(SyncError::UnresolvableIdentity { .. })));
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn failed_target_rolls_back_the_position_subscription() {
        let bus = Arc::new(SimBus::new());
        bus.seed(&motor(), None);
        // chamber device unknown → second channel fails after the first
        // subscribed.
        let result = Coordinator::connect(
            bus.clone() as Arc<dyn RemoteBus>,
            motor(),
            chamber(),
            "OFFSET-POSITION",
            DebounceConfig::default(),
        );
        assert!(result.is_err());
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn coordinator_reports_ready_then_uninitialized_after_shutdown() {
        let bus = simulated_bus();
        let coordinator = connect(&bus);
        assert_eq!(coordinator.state(), CoordinatorState::Ready);

        coordinator.shutdown();
        coordinator.shutdown();
        assert_eq!(coordinator.state(), CoordinatorState::Uninitialized);
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn offset_change_recomputes_immediately() {
        let bus = simulated_bus();
        let coordinator = connect(&bus);
        bus.push_raw(&motor(), Some(5.0), 1000.0, chambersync_types::Quality::Valid);
        assert_eq!(bus.write_log().last(), Some(&(chamber(), -5.0)));

        // No new position event needed: the offset change triggers the
        // write directly.
        coordinator.set_offset(2.0);
        assert_eq!(bus.write_log().last(), Some(&(chamber(), -3.0)));
    }

    #[test]
    fn setting_the_same_offset_is_a_noop() {
        let bus = simulated_bus();
        let coordinator = connect(&bus);
        bus.push_raw(&motor(), Some(5.0), 1000.0, chambersync_types::Quality::Valid);
        let writes_before = bus.write_log().len();

        coordinator.set_offset(0.0);
        assert_eq!(bus.write_log().len(), writes_before);
    }

    #[test]
    fn recompute_is_skipped_while_position_is_absent() {
        let bus = simulated_bus();
        let coordinator = connect(&bus);

        coordinator.set_offset(2.0);
        assert!(bus.write_log().is_empty());
        assert_eq!(coordinator.expanded_formula(), None);
    }

    #[test]
    fn no_callbacks_after_shutdown() {
        let bus = simulated_bus();
        let coordinator = connect(&bus);
        coordinator.shutdown();

        bus.push_raw(&motor(), Some(5.0), 1000.0, chambersync_types::Quality::Valid);
        assert!(bus.write_log().is_empty());
        assert_eq!(coordinator.position_sample(), None);
    }

    #[test]
    fn host_observers_see_position_and_target_changes() {
        let bus = simulated_bus();
        let coordinator = connect(&bus);

        let position_hits = Arc::new(AtomicUsize::new(0));
        let target_hits = Arc::new(AtomicUsize::new(0));
        let p = position_hits.clone();
        coordinator.add_position_observer(Arc::new(move || -> Result<(), SyncError> {
            p.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        let t = target_hits.clone();
        coordinator.add_target_observer(Arc::new(move || -> Result<(), SyncError> {
            t.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        bus.push_raw(&motor(), Some(5.0), 1000.0, chambersync_types::Quality::Valid);

        assert_eq!(position_hits.load(Ordering::SeqCst), 1);
        // The recompute's write echoed back and was accepted as a
        // confirmation.
        assert_eq!(target_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn formula_accessors_reflect_live_operands() {
        let bus = simulated_bus();
        let coordinator = connect(&bus);
        coordinator.set_offset(1.1);
        bus.push_raw(&motor(), Some(3.0), 1000.0, chambersync_types::Quality::Valid);

        assert_eq!(coordinator.formula(), "OFFSET-POSITION");
        assert_eq!(coordinator.expanded_formula().unwrap(), " 1.1 - 3 ");
    }
}
