//! End-to-end scenarios over a simulated remote service: motor sweeps,
//! offset changes, write echoes, and third-party interference, all flowing
//! through one coordinator.

use std::sync::Arc;

use chambersync_engine::Coordinator;
use chambersync_remote::{RemoteBus, SimBus};
use chambersync_types::{AttrAddress, DebounceConfig, Quality};

fn motor() -> AttrAddress {
    AttrAddress::new("sr/mot/fsh1", "Position")
}

fn chamber() -> AttrAddress {
    AttrAddress::new("lab/el/fsh1-iba", "ChamberOffsetX")
}

fn bus_with_devices() -> Arc<SimBus> {
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
fn position_change_propagates_to_the_target() {
    let bus = bus_with_devices();
    let coordinator = connect(&bus);

    bus.push_raw(&motor(), Some(5.0), 1000.0, Quality::Valid);

    // offset 0, position 5 → 0 - 5 = -5, written once and confirmed by
    // its echo.
    assert_eq!(bus.write_log(), vec![(chamber(), -5.0)]);
    assert_eq!(coordinator.position_sample().unwrap().value, 5.0);
    assert_eq!(coordinator.target_sample().unwrap().value, -5.0);
}

#[test]
fn offset_change_bypasses_the_position_debounce() {
    let bus = bus_with_devices();
    let coordinator = connect(&bus);
    bus.push_raw(&motor(), Some(5.0), 1000.0, Quality::Valid);

    // The offset change recomputes with the already-held position; no new
    // position event is required and the position debounce plays no part.
    coordinator.set_offset(2.0);

    assert_eq!(
        bus.write_log(),
        vec![(chamber(), -5.0), (chamber(), -3.0)]
    );
    assert_eq!(coordinator.target_sample().unwrap().value, -3.0);
}

#[test]
fn rapid_position_jitter_is_debounced() {
    let bus = bus_with_devices();
    let coordinator = connect(&bus);

    bus.push_raw(&motor(), Some(5.0), 1000.0, Quality::Valid);
    // Within min_period of the accepted sample: ignored despite the delta.
    bus.push_raw(&motor(), Some(6.0), 1000.05, Quality::Valid);
    // Beyond min_period but within min_change: ignored.
    bus.push_raw(&motor(), Some(5.0005), 1001.0, Quality::Valid);

    assert_eq!(bus.write_log(), vec![(chamber(), -5.0)]);
    assert_eq!(coordinator.position_sample().unwrap().value, 5.0);
}

#[test]
fn third_party_write_is_corrected_within_one_cycle() {
    let bus = bus_with_devices();
    let coordinator = connect(&bus);
    bus.push_raw(&motor(), Some(5.0), 1000.0, Quality::Valid);
    assert_eq!(coordinator.target_sample().unwrap().value, -5.0);

    // Someone else writes to the chamber attribute behind our back.
    bus.push(&chamber(), 99.9);

    // Exactly one corrective write restores the intent, and remote state
    // converges back to it.
    assert_eq!(
        bus.write_log(),
        vec![(chamber(), -5.0), (chamber(), -5.0)]
    );
    let handle = bus.resolve(&chamber().device).unwrap();
    assert_eq!(bus.read(handle, &chamber().attribute).unwrap(), Some(-5.0));
    assert_eq!(coordinator.target_sample().unwrap().value, -5.0);
}

#[test]
fn first_target_echo_bootstraps_without_correction() {
    let bus = Arc::new(SimBus::new());
    bus.seed(&motor(), None);
    bus.seed(&chamber(), Some(10.0));

    let coordinator = connect(&bus);

    // The seeded remote value arrives as the bootstrap echo and is adopted
    // as the starting intent; nothing is written back.
    assert_eq!(coordinator.target_sample().unwrap().value, 10.0);
    assert!(bus.write_log().is_empty());
}

#[test]
fn remote_write_failure_recovers_on_the_next_event() {
    let bus = bus_with_devices();
    let coordinator = connect(&bus);

    bus.set_failing(&chamber().device, true);
    bus.push_raw(&motor(), Some(5.0), 1000.0, Quality::Valid);

    // The write failed but the intent is held locally.
    assert!(bus.write_log().is_empty());
    assert_eq!(coordinator.target_sample().unwrap().value, -5.0);

    // Remote recovers; any disagreeing echo re-asserts the pending intent.
    bus.set_failing(&chamber().device, false);
    bus.push(&chamber(), 0.0);

    assert_eq!(bus.write_log(), vec![(chamber(), -5.0)]);
    let handle = bus.resolve(&chamber().device).unwrap();
    assert_eq!(bus.read(handle, &chamber().attribute).unwrap(), Some(-5.0));
}

#[test]
fn expanded_formula_tracks_the_loop() {
    let bus = bus_with_devices();
    let coordinator = connect(&bus);
    assert_eq!(coordinator.expanded_formula(), None);

    coordinator.set_offset(1.1);
    bus.push_raw(&motor(), Some(3.0), 1000.0, Quality::Valid);

    assert_eq!(coordinator.expanded_formula().unwrap(), " 1.1 - 3 ");
    assert_eq!(coordinator.target_sample().unwrap().value, 1.1 - 3.0);
}

#[test]
fn shutdown_closes_the_loop_completely() {
    let bus = bus_with_devices();
    let coordinator = connect(&bus);
    bus.push_raw(&motor(), Some(5.0), 1000.0, Quality::Valid);

    coordinator.shutdown();
    assert_eq!(bus.subscription_count(), 0);

    // Neither a motor move nor target interference reaches the engine now.
    bus.push_raw(&motor(), Some(50.0), 2000.0, Quality::Valid);
    bus.push(&chamber(), 77.0);

    assert_eq!(bus.write_log(), vec![(chamber(), -5.0)]);
    assert_eq!(coordinator.position_sample().unwrap().value, 5.0);
}
