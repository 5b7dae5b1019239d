use beamgrid::config::{FairnessPolicy, ReceiverConfig, ReceiverKind, ReceiverShape, SimulationConfig};
use beamgrid::network::{PlatformId, PowerBeam, ReceiverId, RelayId, Route, RouteTable, TransmitterId};
use beamgrid::pool::ResourceKind;
use beamgrid::receiver::MAX_LEDGER_ENTRIES;
use beamgrid::{BandwidthConfiguration, Simulation};

fn electric_receiver(efficiency_pct: f64) -> ReceiverConfig {
    ReceiverConfig {
        bandwidths: vec![BandwidthConfiguration::new("microwave", 1e-3, 1.0, 90.0, efficiency_pct)],
        ..ReceiverConfig::preset(ReceiverKind::Microwave, ReceiverShape::Dish)
    }
}

fn station(sim: &mut Simulation, name: &str) -> PlatformId {
    let id = sim.add_platform(name);
    let pool = sim.platform_mut(id).unwrap().pool_mut();
    pool.set_demand(ResourceKind::Megajoules, 1000.0);
    pool.set_demand(ResourceKind::ThermalPower, 1000.0);
    pool.set_base_capacity(ResourceKind::WasteHeat, 10_000.0);
    pool.set_demand(ResourceKind::WasteHeat, 1000.0);
    id
}

fn simulation(fairness: FairnessPolicy) -> Simulation {
    let config = SimulationConfig {
        fairness,
        ..SimulationConfig::default()
    };
    Simulation::new(config, RouteTable::new()).unwrap()
}

/// One 100 MW transmitter emitting a single 3 mm beam.
fn transmitter(sim: &mut Simulation, capacity: f64) -> TransmitterId {
    let source = sim.add_platform("source");
    sim.add_transmitter(source, "array", capacity, &[PowerBeam::new(0.003, capacity * 1000.0, 0.0)])
        .unwrap()
}

fn attach(sim: &mut Simulation, platform: PlatformId, config: ReceiverConfig, tx: TransmitterId) -> ReceiverId {
    let rx = sim.add_receiver(platform, 0, config).unwrap();
    sim.enable_receiver(rx).unwrap();
    sim.resolver_mut().insert(tx, rx, Route::direct(1.0, 1.0e6));
    rx
}

#[test]
fn test_single_receiver_eighty_percent_efficiency() {
    let mut sim = simulation(FairnessPolicy::Priority);
    let tx = transmitter(&mut sim, 100.0);
    let platform = station(&mut sim, "outpost");
    let rx = attach(&mut sim, platform, electric_receiver(80.0), tx);

    let summary = sim.tick();

    assert_eq!(summary.failed_receivers, 0);
    assert!((summary.delivered_power - 80.0).abs() < 1e-9);
    assert!((summary.waste_heat - 20.0).abs() < 1e-9);
    let receiver = sim.receiver(rx).unwrap();
    assert!((receiver.output().supplied_power - 80.0).abs() < 1e-9);
    let record = receiver.record(tx).unwrap();
    assert!((record.current_received_power - 100.0).abs() < 1e-9);
    assert!((record.receiver_efficiency - 80.0).abs() < 1e-9);
}

#[test]
fn test_second_receiver_sees_only_the_residual() {
    let mut sim = simulation(FairnessPolicy::Priority);
    let tx = transmitter(&mut sim, 100.0);
    let pa = station(&mut sim, "alpha");
    let pb = station(&mut sim, "beta");

    // 48 MW electric at 80% means a 60 MW claim.
    let a = attach(
        &mut sim,
        pa,
        ReceiverConfig {
            maximum_electric_power: Some(48.0),
            ..electric_receiver(80.0)
        },
        tx,
    );
    let b = attach(&mut sim, pb, electric_receiver(80.0), tx);

    sim.tick();

    let claimed_a = sim.receiver(a).unwrap().current_received_power(tx);
    let claimed_b = sim.receiver(b).unwrap().current_received_power(tx);
    assert!((claimed_a - 60.0).abs() < 1e-9);
    assert!(claimed_b <= 40.0 + 1e-9);
    assert!(sim.residual_capacity(tx, b).unwrap() <= 40.0 + 1e-9);
    assert!(claimed_a + claimed_b <= 100.0 + 1e-9);
}

#[test]
fn test_priority_orders_claims() {
    let mut sim = simulation(FairnessPolicy::Priority);
    let tx = transmitter(&mut sim, 100.0);
    let pa = station(&mut sim, "alpha");
    let pb = station(&mut sim, "beta");
    let a = attach(&mut sim, pa, electric_receiver(80.0), tx);
    let b = attach(
        &mut sim,
        pb,
        ReceiverConfig {
            supply_priority: 0,
            ..electric_receiver(80.0)
        },
        tx,
    );

    sim.tick();

    assert!((sim.receiver(b).unwrap().current_received_power(tx) - 100.0).abs() < 1e-9);
    assert_eq!(sim.receiver(a).unwrap().current_received_power(tx), 0.0);
}

#[test]
fn test_proportional_fairness_splits_oversubscription() {
    let mut sim = simulation(FairnessPolicy::Proportional);
    let tx = transmitter(&mut sim, 100.0);
    let pa = station(&mut sim, "alpha");
    let pb = station(&mut sim, "beta");
    let a = attach(&mut sim, pa, electric_receiver(80.0), tx);
    let b = attach(&mut sim, pb, electric_receiver(80.0), tx);

    sim.tick();

    let claimed_a = sim.receiver(a).unwrap().current_received_power(tx);
    let claimed_b = sim.receiver(b).unwrap().current_received_power(tx);
    assert!((claimed_a - 50.0).abs() < 1e-9);
    assert!((claimed_b - 50.0).abs() < 1e-9);
}

#[test]
fn test_uncontested_policies_agree() {
    for fairness in [FairnessPolicy::Priority, FairnessPolicy::Proportional] {
        let mut sim = simulation(fairness);
        let tx = transmitter(&mut sim, 100.0);
        let platform = station(&mut sim, "outpost");
        let rx = attach(&mut sim, platform, electric_receiver(80.0), tx);
        sim.tick();
        assert!((sim.receiver(rx).unwrap().current_received_power(tx) - 100.0).abs() < 1e-9);
    }
}

#[test]
fn test_relay_bottleneck_caps_claim() {
    let mut sim = simulation(FairnessPolicy::Priority);
    let tx = transmitter(&mut sim, 100.0);
    let relay = sim.add_relay("mirror", 35.0, 1e-7, 1.0);
    let platform = station(&mut sim, "outpost");
    let rx = sim.add_receiver(platform, 0, electric_receiver(80.0)).unwrap();
    sim.enable_receiver(rx).unwrap();
    sim.resolver_mut()
        .insert(tx, rx, Route::via(1.0, 4.0e8, &[relay]).unwrap());

    let summary = sim.tick();

    let receiver = sim.receiver(rx).unwrap();
    let record = receiver.record(tx).unwrap();
    assert!((record.network_capacity - 35.0).abs() < 1e-9);
    assert!(record.current_received_power <= 35.0 + 1e-9);
    assert!(summary.delivered_power <= 35.0 * 0.8 + 1e-9);
    assert_eq!(receiver.used_relays(), &[relay]);
    assert_eq!(receiver.totals().network_depth, 1);
}

#[test]
fn test_relay_that_cannot_carry_wavelength_blocks_beam() {
    let mut sim = simulation(FairnessPolicy::Priority);
    let tx = transmitter(&mut sim, 100.0);
    let relay = sim.add_relay("optical mirror", 100.0, 1e-7, 1e-4);
    let platform = station(&mut sim, "outpost");
    let rx = sim.add_receiver(platform, 0, electric_receiver(80.0)).unwrap();
    sim.enable_receiver(rx).unwrap();
    sim.resolver_mut()
        .insert(tx, rx, Route::via(1.0, 4.0e8, &[relay]).unwrap());

    let summary = sim.tick();
    assert_eq!(summary.delivered_power, 0.0);
    assert_eq!(sim.receiver(rx).unwrap().current_received_power(tx), 0.0);
}

#[test]
fn test_out_of_band_beam_contributes_nothing() {
    let mut sim = simulation(FairnessPolicy::Priority);
    let source = sim.add_platform("source");
    let tx = sim
        .add_transmitter(source, "laser", 100.0, &[PowerBeam::new(5.0e-7, 100_000.0, 0.0)])
        .unwrap();
    let platform = station(&mut sim, "outpost");
    let rx = attach(&mut sim, platform, electric_receiver(80.0), tx);

    let summary = sim.tick();

    assert_eq!(summary.delivered_power, 0.0);
    assert_eq!(summary.waste_heat, 0.0);
    let receiver = sim.receiver(rx).unwrap();
    assert_eq!(receiver.totals().delivered_power, 0.0);
    assert_eq!(receiver.totals().waste_heat, 0.0);
}

#[test]
fn test_route_efficiency_scales_beam() {
    let mut sim = simulation(FairnessPolicy::Priority);
    let tx = transmitter(&mut sim, 100.0);
    let platform = station(&mut sim, "outpost");
    let rx = sim.add_receiver(platform, 0, electric_receiver(100.0)).unwrap();
    sim.enable_receiver(rx).unwrap();
    sim.resolver_mut().insert(tx, rx, Route::direct(0.25, 1.0e9));

    let summary = sim.tick();
    assert!((summary.delivered_power - 25.0).abs() < 1e-9);
}

#[test]
fn test_minimum_consumption_floor_forces_supply() {
    let mut sim = simulation(FairnessPolicy::Priority);
    let tx = transmitter(&mut sim, 100.0);
    let platform = sim.add_platform("idle outpost");
    let pool = sim.platform_mut(platform).unwrap().pool_mut();
    pool.set_base_capacity(ResourceKind::WasteHeat, 10_000.0);
    pool.set_demand(ResourceKind::WasteHeat, 1000.0);

    let rx = attach(
        &mut sim,
        platform,
        ReceiverConfig {
            minimum_consumption_percentage: 50.0,
            ..electric_receiver(80.0)
        },
        tx,
    );

    sim.tick();
    let output = sim.receiver(rx).unwrap().output();
    assert!((output.minimum_ratio - 0.5).abs() < 1e-9);
    assert!(output.supplied_power >= 40.0 - 1e-9);
}

#[test]
fn test_full_ledger_skips_transmitter_without_failing() {
    let mut sim = simulation(FairnessPolicy::Priority);
    let fillers: Vec<TransmitterId> = (0..MAX_LEDGER_ENTRIES).map(|_| transmitter(&mut sim, 1.0)).collect();
    let shared = transmitter(&mut sim, 100.0);
    let pa = station(&mut sim, "alpha");
    let pb = station(&mut sim, "beta");

    // Alpha is reached by one transmitter more than its ledger holds; the
    // shared one comes last and does not fit.
    let a = attach(&mut sim, pa, electric_receiver(80.0), fillers[0]);
    for tx in fillers.iter().skip(1).chain([&shared]) {
        sim.resolver_mut().insert(*tx, a, Route::direct(1.0, 1.0e6));
    }
    let b = attach(&mut sim, pb, electric_receiver(80.0), shared);

    for _ in 0..3 {
        let summary = sim.tick();
        assert_eq!(summary.failed_receivers, 0);
    }

    let alpha = sim.receiver(a).unwrap();
    assert_eq!(alpha.ledger().len(), MAX_LEDGER_ENTRIES);
    assert!(alpha.record(shared).is_none());
    assert!((alpha.totals().claimed_power - MAX_LEDGER_ENTRIES as f64).abs() < 1e-9);
    assert!(alpha.output().supplied_power > 0.0);

    // Nothing alpha skipped is lost to the receiver that can take it.
    assert!((sim.receiver(b).unwrap().current_received_power(shared) - 100.0).abs() < 1e-9);
    assert_eq!(sim.residual_capacity(shared, ReceiverId(u32::MAX)).unwrap(), 0.0);
}

#[test]
fn test_failed_receiver_leaves_shared_capacity_to_others() {
    let mut sim = simulation(FairnessPolicy::Priority);
    let tx = transmitter(&mut sim, 100.0);
    let pa = station(&mut sim, "alpha");
    let pb = station(&mut sim, "beta");
    let broken = attach(
        &mut sim,
        pa,
        ReceiverConfig {
            supply_priority: 0,
            ..electric_receiver(80.0)
        },
        tx,
    );
    let second = transmitter(&mut sim, 10.0);
    sim.resolver_mut()
        .insert(second, broken, Route::via(1.0, 1.0e6, &[RelayId(9)]).unwrap());
    let b = attach(&mut sim, pb, electric_receiver(80.0), tx);

    let summary = sim.tick();

    assert_eq!(summary.failed_receivers, 1);
    assert_eq!(sim.receiver(broken).unwrap().current_received_power(tx), 0.0);
    let record = sim.receiver(b).unwrap().record(tx).unwrap();
    assert!((record.current_received_power - 100.0).abs() < 1e-9);
    assert_eq!(record.power_usage_others, 0.0);
}

#[test]
fn test_proportional_fairness_respects_relay_bottleneck() {
    let mut sim = simulation(FairnessPolicy::Proportional);
    let tx = transmitter(&mut sim, 100.0);
    let relay = sim.add_relay("mirror", 40.0, 1e-7, 1.0);
    let mut receivers = Vec::new();
    for name in ["alpha", "beta"] {
        let platform = station(&mut sim, name);
        let rx = sim.add_receiver(platform, 0, electric_receiver(80.0)).unwrap();
        sim.enable_receiver(rx).unwrap();
        sim.resolver_mut()
            .insert(tx, rx, Route::via(1.0, 4.0e8, &[relay]).unwrap());
        receivers.push(rx);
    }

    for _ in 0..2 {
        sim.tick();
        let claims: Vec<f64> = receivers
            .iter()
            .map(|rx| sim.receiver(*rx).unwrap().current_received_power(tx))
            .collect();
        assert!((claims[0] - 20.0).abs() < 1e-9, "claims {claims:?}");
        assert!((claims[1] - 20.0).abs() < 1e-9, "claims {claims:?}");
    }
}
