//! Integration tests for settings, calibration and the pause handshake

mod common;

use aquanode_core::{
    DoCalibration, EcCalibration, ManagerConfig, MockDelay, MockTime, PhCalibration,
    RtdCalibration, SensorError, SensorManager, TemperatureScale,
};
use common::{EzoSim, MockBus};
use proptest::prelude::*;

fn build_manager(bus: &MockBus, clock: &MockTime) -> SensorManager<MockBus, MockTime, MockDelay> {
    SensorManager::with_platform(
        bus.clone(),
        clock.clone(),
        MockDelay::new(clock.clone()),
        ManagerConfig::default(),
    )
}

#[test]
fn capability_gated_operations_touch_no_bus() {
    let bus = MockBus::new();
    bus.add_device(0x64, EzoSim::rtd());

    let clock = MockTime::new(0);
    let mut manager = build_manager(&bus, &clock);
    manager.init().unwrap();

    let before = bus.transaction_count();

    // RTD supports only calibration: everything else is rejected up front
    assert_eq!(manager.set_continuous_mode(0, true), Err(SensorError::NotSupported));
    assert_eq!(manager.set_temp_compensation(0, 21.0), Err(SensorError::NotSupported));
    assert_eq!(manager.sleep_sensor(0), Err(SensorError::NotSupported));
    assert_eq!(manager.wake_sensor(0), Err(SensorError::NotSupported));

    // Wrong-type calibration is an argument error, also before any I/O
    assert!(matches!(
        manager.calibrate_ph(0, PhCalibration::Mid(7.0)),
        Err(SensorError::InvalidArgument { .. })
    ));
    assert!(matches!(
        manager.calibrate_ec(0, EcCalibration::Dry),
        Err(SensorError::InvalidArgument { .. })
    ));
    assert!(matches!(
        manager.calibrate_do(0, DoCalibration::Atmospheric),
        Err(SensorError::InvalidArgument { .. })
    ));

    assert_eq!(bus.transaction_count(), before, "gated ops must not touch the bus");
}

#[test]
fn calibration_reaches_the_device_for_matching_types() {
    let bus = MockBus::new();
    bus.add_device(0x63, EzoSim::ph());
    bus.add_device(0x64, EzoSim::rtd());

    let clock = MockTime::new(0);
    let mut manager = build_manager(&bus, &clock);
    manager.init().unwrap();

    manager.calibrate_ph(0, PhCalibration::Mid(7.0)).unwrap();
    manager.calibrate_ph(0, PhCalibration::Clear).unwrap();
    manager.calibrate_rtd(1, RtdCalibration::Point(100.0)).unwrap();
    manager.calibrate_rtd(1, RtdCalibration::Clear).unwrap();

    // Out-of-range slot index
    assert_eq!(
        manager.calibrate_ph(7, PhCalibration::Clear),
        Err(SensorError::NotFound)
    );
}

#[test]
fn rename_round_trips_when_the_device_persists_it() {
    let bus = MockBus::new();
    bus.add_device(0x63, EzoSim::ph());

    let clock = MockTime::new(0);
    let mut manager = build_manager(&bus, &clock);
    manager.init().unwrap();

    manager.set_sensor_name(0, "tank_probe_7").unwrap();

    assert_eq!(manager.sensor_state(0).unwrap().name, "tank_probe_7");
    assert_eq!(bus.with_device(0x63, |sim| sim.name.clone()), "tank_probe_7");
}

#[test]
fn rename_updates_local_state_even_when_firmware_ignores_it() {
    let bus = MockBus::new();
    bus.add_device(0x63, EzoSim::ph().with_volatile_name());

    let clock = MockTime::new(0);
    let mut manager = build_manager(&bus, &clock);
    manager.init().unwrap();

    // The device never stores the name, but the call still succeeds and the
    // cached name follows the caller's intent.
    manager.set_sensor_name(0, "reservoir").unwrap();
    assert_eq!(manager.sensor_state(0).unwrap().name, "reservoir");
    assert_eq!(bus.with_device(0x63, |sim| sim.name.clone()), "");
}

#[test]
fn invalid_names_are_rejected_with_zero_bus_writes() {
    let bus = MockBus::new();
    bus.add_device(0x63, EzoSim::ph());

    let clock = MockTime::new(0);
    let mut manager = build_manager(&bus, &clock);
    manager.init().unwrap();

    let before = bus.transaction_count();
    for bad in ["", "seventeen_chars__", "has space", "has,comma", "dash-name"] {
        assert!(matches!(
            manager.set_sensor_name(0, bad),
            Err(SensorError::InvalidArgument { .. })
        ));
    }
    assert_eq!(bus.transaction_count(), before);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn valid_names_always_round_trip(name in "[A-Za-z0-9_]{1,16}") {
        let bus = MockBus::new();
        bus.add_device(0x63, EzoSim::ph());

        let clock = MockTime::new(0);
        let mut manager = build_manager(&bus, &clock);
        manager.init().unwrap();

        manager.set_sensor_name(0, &name).unwrap();
        let state = manager.sensor_state(0).unwrap();
        prop_assert_eq!(state.name.as_str(), name.as_str());
    }

    #[test]
    fn names_with_forbidden_bytes_never_reach_the_bus(name in "[A-Za-z0-9_]{0,6}[ ,;:!#@.-][A-Za-z0-9_]{0,6}") {
        let bus = MockBus::new();
        bus.add_device(0x63, EzoSim::ph());

        let clock = MockTime::new(0);
        let mut manager = build_manager(&bus, &clock);
        manager.init().unwrap();

        let before = bus.transaction_count();
        prop_assert!(manager.set_sensor_name(0, &name).is_err());
        prop_assert_eq!(bus.transaction_count(), before);
    }
}

#[test]
fn settings_setters_update_device_and_cached_state() {
    let bus = MockBus::new();
    bus.add_device(0x63, EzoSim::ph());
    bus.add_device(0x64, EzoSim::rtd());
    bus.add_device(0x6F, EzoSim::ec());

    let clock = MockTime::new(0);
    let mut manager = build_manager(&bus, &clock);
    manager.init().unwrap();

    manager.set_led(0, false).unwrap();
    assert!(!manager.sensor_state(0).unwrap().led_enabled);
    assert!(!bus.with_device(0x63, |sim| sim.led));

    manager.set_protocol_lock(0, true).unwrap();
    assert!(manager.sensor_state(0).unwrap().protocol_locked);

    manager.set_rtd_scale(1, TemperatureScale::Fahrenheit).unwrap();
    let rtd = manager.sensor_state(1).unwrap();
    assert_eq!(rtd.rtd_params().unwrap().scale, TemperatureScale::Fahrenheit);
    assert_eq!(bus.with_device(0x64, |sim| sim.scale), 'F');

    manager.set_ec_probe_k(2, 10.0).unwrap();
    manager.set_ec_tds_factor(2, 0.7).unwrap();
    let ec = manager.sensor_state(2).unwrap();
    assert!((ec.ec_params().unwrap().probe_k - 10.0).abs() < 1e-4);
    assert!((ec.ec_params().unwrap().tds_factor - 0.7).abs() < 1e-4);

    manager.set_ph_extended_scale(0, true).unwrap();
    assert!(manager.sensor_state(0).unwrap().ph_params().unwrap().extended_scale);

    // Scale setter on the wrong device type never reaches the bus
    let before = bus.transaction_count();
    assert!(matches!(
        manager.set_rtd_scale(0, TemperatureScale::Kelvin),
        Err(SensorError::InvalidArgument { .. })
    ));
    assert_eq!(bus.transaction_count(), before);
}

#[test]
fn sleep_and_wake_track_the_commanded_state() {
    let bus = MockBus::new();
    bus.add_device(0x63, EzoSim::ph());

    let clock = MockTime::new(0);
    let mut manager = build_manager(&bus, &clock);
    manager.init().unwrap();

    manager.sleep_sensor(0).unwrap();
    assert!(manager.sensor_state(0).unwrap().sleeping);

    manager.wake_sensor(0).unwrap();
    assert!(!manager.sensor_state(0).unwrap().sleeping);
}

#[test]
fn refresh_settings_returns_first_error_but_queries_everything() {
    let bus = MockBus::new();
    bus.add_device(0x63, EzoSim::ph());

    let clock = MockTime::new(0);
    let mut manager = build_manager(&bus, &clock);
    manager.init().unwrap();

    // Calibration status now fails; mode and temp comp still answer
    bus.with_device(0x63, |sim| {
        sim.fail_commands.push("Cal,?");
        sim.continuous = true;
        sim.temp_comp = 19.5;
    });

    assert_eq!(
        manager.refresh_settings(),
        Err(SensorError::CommunicationFailure)
    );

    let state = manager.sensor_state(0).unwrap();
    // The failed query invalidated its cache entry...
    assert_eq!(state.calibration_status, None);
    // ...while the remaining queries still ran and updated state
    assert_eq!(state.temp_compensation, Some(19.5));
    assert!(state.continuous_mode);
}

#[test]
fn refresh_settings_does_not_release_a_pause_it_did_not_take() {
    let bus = MockBus::new();
    bus.add_device(0x63, EzoSim::ph());

    let clock = MockTime::new(0);
    let mut manager = build_manager(&bus, &clock);
    manager.init().unwrap();

    // Caller already holds the pause; refresh must leave it in place
    manager.pause_reading();
    manager.refresh_settings().unwrap();
    assert!(manager.is_reading_paused());

    // When refresh takes the pause itself, it releases it afterwards
    manager.resume_reading();
    manager.refresh_settings().unwrap();
    assert!(!manager.is_reading_paused());
}

#[test]
fn unknown_sensor_accepts_no_settings() {
    let bus = MockBus::new();
    bus.add_device(0x63, EzoSim::ph().with_unresolved_info(u32::MAX));

    let clock = MockTime::new(0);
    let mut manager = build_manager(&bus, &clock);
    manager.init().unwrap();

    let before = bus.transaction_count();
    assert_eq!(manager.set_continuous_mode(0, true), Err(SensorError::NotSupported));
    assert!(matches!(
        manager.calibrate_rtd(0, RtdCalibration::Clear),
        Err(SensorError::InvalidArgument { .. })
    ));
    assert_eq!(bus.transaction_count(), before);
}
