use beamgrid::config::{ReceiverConfig, ReceiverKind, ReceiverShape};
use beamgrid::generator::GeneratorConfig;
use beamgrid::network::{PlatformId, PowerBeam, ReceiverId, RelayId, Route, RouteTable, TransmitterId};
use beamgrid::pool::ResourceKind;
use beamgrid::ramp::PowerState;
use beamgrid::receiver::ReceiverPersistence;
use beamgrid::simulation::{EventQueue, SimulationEvent, MAX_PENDING_EVENTS};
use beamgrid::{BeamError, Scenario, Simulation, SimulationConfig, TelemetryFrame};

fn cooled_platform(sim: &mut Simulation, name: &str) -> PlatformId {
    let id = sim.add_platform(name);
    let pool = sim.platform_mut(id).unwrap().pool_mut();
    pool.set_demand(ResourceKind::Megajoules, 1000.0);
    pool.set_base_capacity(ResourceKind::WasteHeat, 10_000.0);
    pool.set_demand(ResourceKind::WasteHeat, 1000.0);
    id
}

fn linked_pair(sim: &mut Simulation) -> (TransmitterId, ReceiverId) {
    let source = sim.add_platform("source");
    let tx = sim
        .add_transmitter(source, "array", 100.0, &[PowerBeam::new(0.003, 100_000.0, 0.0)])
        .unwrap();
    let platform = cooled_platform(sim, "outpost");
    let rx = sim
        .add_receiver(platform, 0, ReceiverConfig::preset(ReceiverKind::Microwave, ReceiverShape::Dish))
        .unwrap();
    sim.enable_receiver(rx).unwrap();
    sim.resolver_mut().insert(tx, rx, Route::direct(1.0, 1.0e6));
    (tx, rx)
}

fn new_sim() -> Simulation {
    Simulation::new(SimulationConfig::default(), RouteTable::new()).unwrap()
}

#[test]
fn test_record_created_on_first_tick() {
    let mut sim = new_sim();
    let (tx, rx) = linked_pair(&mut sim);

    sim.tick();

    assert!(sim.receiver(rx).unwrap().record(tx).is_some());
    assert!(sim
        .drain_events()
        .contains(&SimulationEvent::RecordCreated { receiver: rx, transmitter: tx }));
    assert!(sim.events().is_empty());
}

#[test]
fn test_stale_record_evicted_when_route_disappears() {
    let mut sim = new_sim();
    let (tx, rx) = linked_pair(&mut sim);
    sim.tick();
    sim.drain_events();

    sim.resolver_mut().remove(tx, rx);
    sim.tick();

    assert!(sim.receiver(rx).unwrap().record(tx).is_none());
    assert!(sim
        .events()
        .iter()
        .any(|e| *e == SimulationEvent::RecordEvicted { receiver: rx, transmitter: tx }));
}

#[test]
fn test_stale_record_evicted_when_transmitter_removed() {
    let mut sim = new_sim();
    let (tx, rx) = linked_pair(&mut sim);
    sim.tick();

    assert!(sim.remove_transmitter(tx).is_some());
    let summary = sim.tick();

    assert!(sim.receiver(rx).unwrap().ledger().is_empty());
    assert_eq!(summary.delivered_power, 0.0);
}

#[test]
fn test_overheat_shutdown_fires_once_until_reenabled() {
    let mut sim = new_sim();
    let (_, rx) = linked_pair(&mut sim);
    let platform = sim.receiver(rx).unwrap().platform();
    let pool = sim.platform_mut(platform).unwrap().pool_mut();
    pool.set_base_capacity(ResourceKind::WasteHeat, 100.0);
    pool.set_demand(ResourceKind::WasteHeat, 0.0);
    pool.set_stored(ResourceKind::WasteHeat, 100.0);

    for _ in 0..5 {
        sim.tick();
    }

    let overheats = |events: &EventQueue| {
        events
            .iter()
            .filter(|e| matches!(e, SimulationEvent::OverheatShutdown { .. }))
            .count()
    };
    assert_eq!(overheats(sim.events()), 1);
    assert!(!sim.receiver(rx).unwrap().is_enabled());

    sim.drain_events();
    let pool = sim.platform_mut(platform).unwrap().pool_mut();
    let full = pool.capacity(ResourceKind::WasteHeat);
    pool.set_stored(ResourceKind::WasteHeat, full);
    sim.enable_receiver(rx).unwrap();
    sim.tick();
    assert_eq!(overheats(sim.events()), 1);
}

#[test]
fn test_ignore_max_temperature_disables_overheat() {
    let config = SimulationConfig {
        ignore_max_temperature: true,
        ..SimulationConfig::default()
    };
    let mut sim = Simulation::new(config, RouteTable::new()).unwrap();
    let (_, rx) = linked_pair(&mut sim);
    let platform = sim.receiver(rx).unwrap().platform();
    let pool = sim.platform_mut(platform).unwrap().pool_mut();
    pool.set_base_capacity(ResourceKind::WasteHeat, 100.0);
    pool.set_stored(ResourceKind::WasteHeat, 100.0);

    let summary = sim.tick();
    assert!(sim.receiver(rx).unwrap().is_enabled());
    assert_eq!(summary.waste_heat, 0.0);
    assert!(summary.delivered_power > 0.0);
}

#[test]
fn test_disabled_receiver_ramps_to_offline() {
    let mut sim = new_sim();
    let (tx, rx) = linked_pair(&mut sim);
    sim.tick();
    sim.disable_receiver(rx).unwrap();

    let mut previous = 1.0;
    let mut ticks = 0;
    while sim.receiver(rx).unwrap().power_state() == PowerState::Online {
        sim.tick();
        ticks += 1;
        let fraction = sim.receiver(rx).unwrap().ramp().fraction();
        assert!(fraction <= previous);
        previous = fraction;
        assert!(ticks <= 100, "ramp-down did not finish");
    }

    assert_eq!(sim.receiver(rx).unwrap().ramp().fraction(), 0.0);
    assert_eq!(sim.receiver(rx).unwrap().current_received_power(tx), 0.0);
    assert_eq!(sim.receiver(rx).unwrap().output().supplied_power, 0.0);
}

#[test]
fn test_failing_receiver_is_isolated() {
    let mut sim = new_sim();
    let (tx, good) = linked_pair(&mut sim);
    let platform = cooled_platform(&mut sim, "broken outpost");
    let bad = sim
        .add_receiver(platform, 0, ReceiverConfig::preset(ReceiverKind::Microwave, ReceiverShape::Dish))
        .unwrap();
    sim.enable_receiver(bad).unwrap();
    sim.resolver_mut()
        .insert(tx, bad, Route::via(1.0, 1.0, &[RelayId(9)]).unwrap());

    let summary = sim.tick();

    assert_eq!(summary.failed_receivers, 1);
    assert!(sim
        .events()
        .iter()
        .any(|e| matches!(e, SimulationEvent::TickFailed { receiver, .. } if *receiver == bad)));
    assert_eq!(sim.receiver(bad).unwrap().output().supplied_power, 0.0);
    assert!(sim.receiver(good).unwrap().output().supplied_power > 0.0);
}

#[test]
fn test_force_activation_on_restore() {
    let mut sim = new_sim();
    let platform = sim.add_platform("outpost");
    let rx = sim.add_receiver(platform, 0, ReceiverConfig::default()).unwrap();

    let saved = ReceiverPersistence {
        enabled: false,
        force_activate_at_startup: true,
        thermal_mode: true,
        ..ReceiverPersistence::default()
    };
    sim.restore_receiver(rx, &saved).unwrap();

    let receiver = sim.receiver(rx).unwrap();
    assert!(receiver.is_enabled());
    assert!(receiver.is_thermal_mode());
    assert!(sim
        .events()
        .iter()
        .any(|e| *e == SimulationEvent::ForceActivated { receiver: rx }));
    assert_eq!(receiver.persistent_state().force_activate_at_startup, true);
}

#[test]
fn test_enable_if_possible_needs_auto_deploy() {
    let mut sim = new_sim();
    let platform = sim.add_platform("outpost");
    let manual = sim.add_receiver(platform, 0, ReceiverConfig::default()).unwrap();
    let auto = sim
        .add_receiver(
            platform,
            0,
            ReceiverConfig {
                auto_deploy: true,
                ..ReceiverConfig::default()
            },
        )
        .unwrap();

    assert!(!sim.enable_if_possible(manual).unwrap());
    assert!(sim.enable_if_possible(auto).unwrap());
}

#[test]
fn test_unknown_ids_are_errors() {
    let mut sim = new_sim();
    assert!(matches!(sim.enable_receiver(ReceiverId(3)), Err(BeamError::UnknownReceiver(3))));
    assert!(matches!(
        sim.add_receiver(PlatformId(7), 0, ReceiverConfig::default()),
        Err(BeamError::UnknownPlatform(7))
    ));
    let platform = sim.add_platform("outpost");
    assert!(sim.add_receiver(platform, 5, ReceiverConfig::default()).is_err());
}

#[test]
fn test_demo_scenario_round_trips_and_runs() {
    let json = Scenario::demo().to_json_pretty().unwrap();
    let scenario = Scenario::from_json_str(&json).unwrap();
    let mut sim = scenario.build().unwrap();

    let mut last = None;
    for _ in 0..5 {
        last = Some(sim.tick());
    }
    let summary = last.unwrap();
    assert_eq!(summary.failed_receivers, 0);
    assert!(summary.delivered_power > 0.0);

    let frame = TelemetryFrame::collect(&sim);
    assert_eq!(frame.receivers.len(), 4);
    assert_eq!(frame.platforms.len(), 3);
    assert!(frame.to_json().unwrap().contains("Outpost Rectenna Dish"));
}

#[test]
fn test_scenario_rejects_invalid_config() {
    let json = r#"{ "config": { "overheat_ceiling": 2.0 } }"#;
    assert!(matches!(Scenario::from_json_str(json), Err(BeamError::Config(_))));
    assert!(matches!(Scenario::from_json_str("{ nope"), Err(BeamError::Json(_))));
}

#[test]
fn test_scenario_route_to_missing_relay_is_rejected() {
    let mut scenario = Scenario::demo();
    scenario.routes[3].relays = vec![4];
    assert!(matches!(scenario.build(), Err(BeamError::UnknownRelay(4))));
}

#[test]
fn test_malformed_generator_supplies_nothing() {
    let mut sim = new_sim();
    let platform = cooled_platform(&mut sim, "outpost");
    sim.add_generator(
        platform,
        GeneratorConfig {
            input_conversion_rates: "0.2;oops".into(),
            ..GeneratorConfig::default()
        },
    )
    .unwrap();

    let summary = sim.tick();

    assert_eq!(summary.generator_power, 0.0);
    let generator = &sim.platform(platform).unwrap().generators()[0];
    assert!(generator.fault().is_some());
}

#[test]
fn test_generator_covers_platform_demand() {
    let mut sim = new_sim();
    let platform = cooled_platform(&mut sim, "outpost");
    sim.platform_mut(platform)
        .unwrap()
        .pool_mut()
        .set_demand(ResourceKind::Megajoules, 3.0);
    sim.add_generator(platform, GeneratorConfig::default()).unwrap();

    let summary = sim.tick();
    assert!((summary.generator_power - 3.0).abs() < 1e-9);
}

#[test]
fn test_reset_clears_ledgers() {
    let mut sim = new_sim();
    let (_, rx) = linked_pair(&mut sim);
    sim.tick();
    assert!(!sim.receiver(rx).unwrap().ledger().is_empty());

    sim.reset();
    assert!(sim.receiver(rx).unwrap().ledger().is_empty());
    assert!(sim.events().is_empty());
}

#[test]
fn test_event_queue_drops_oldest_when_full() {
    let mut sim = new_sim();
    let platform = sim.add_platform("outpost");
    let saved = ReceiverPersistence {
        enabled: false,
        force_activate_at_startup: true,
        ..ReceiverPersistence::default()
    };
    let total = MAX_PENDING_EVENTS + 10;
    for _ in 0..total {
        let rx = sim.add_receiver(platform, 0, ReceiverConfig::default()).unwrap();
        sim.restore_receiver(rx, &saved).unwrap();
    }

    assert_eq!(sim.events().len(), MAX_PENDING_EVENTS);
    let drained = sim.drain_events();
    assert_eq!(drained.len(), MAX_PENDING_EVENTS);
    assert_eq!(drained[0], SimulationEvent::ForceActivated { receiver: ReceiverId(10) });
    assert_eq!(
        drained[MAX_PENDING_EVENTS - 1],
        SimulationEvent::ForceActivated { receiver: ReceiverId(total as u32 - 1) }
    );
    assert!(sim.events().is_empty());
}
