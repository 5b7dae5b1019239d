use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use heapless::Deque;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::accountant::CapacityAccountant;
use crate::allocation::{commit_order, proportional_scale, AllocationEngine, Readiness, ReceiverDemand};
use crate::config::{FairnessPolicy, ReceiverConfig, Scenario, SimulationConfig};
use crate::error::{BeamError, BeamResult};
use crate::generator::{BatteryGenerator, GeneratorConfig};
use crate::network::{
    PlatformId, PowerBeam, ReceiverId, Relay, RelayId, Route, RouteResolver, RouteTable, Transmitter, TransmitterId,
};
use crate::pool::PlatformPool;
use crate::receiver::{Receiver, ReceiverPersistence};
use crate::thermal::{collect_slaves_power, find_thermal_master, AttachKind, PartGraph};

/// Oldest events are dropped past this many undrained entries.
pub const MAX_PENDING_EVENTS: usize = 256;

pub type EventQueue = Deque<SimulationEvent, MAX_PENDING_EVENTS>;

/// A vessel or station: parts, a resource pool and local generators.
#[derive(Debug, Clone)]
pub struct Platform {
    id: PlatformId,
    name: String,
    pool: PlatformPool,
    parts: PartGraph,
    solar_flux: f64,
    solar_facing: f64,
    generators: Vec<BatteryGenerator>,
}

impl Platform {
    pub fn id(&self) -> PlatformId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool(&self) -> &PlatformPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut PlatformPool {
        &mut self.pool
    }

    pub fn parts(&self) -> &PartGraph {
        &self.parts
    }

    pub fn generators(&self) -> &[BatteryGenerator] {
        &self.generators
    }

    pub fn generators_mut(&mut self) -> &mut [BatteryGenerator] {
        &mut self.generators
    }

    /// Flux in W/m², facing factor in `[0, 1]`.
    pub fn set_solar_conditions(&mut self, flux: f64, facing: f64) {
        self.solar_flux = flux.max(0.0);
        self.solar_facing = facing.clamp(0.0, 1.0);
    }

    pub fn solar_conditions(&self) -> (f64, f64) {
        (self.solar_flux, self.solar_facing)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SimulationEvent {
    RecordCreated { receiver: ReceiverId, transmitter: TransmitterId },
    RecordEvicted { receiver: ReceiverId, transmitter: TransmitterId },
    OverheatShutdown { receiver: ReceiverId, waste_heat_ratio: f64 },
    ThermalSlaveLinked { slave: ReceiverId, master: ReceiverId },
    ForceActivated { receiver: ReceiverId },
    TickFailed { receiver: ReceiverId, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickSummary {
    pub tick: u64,
    pub active_receivers: u32,
    pub failed_receivers: u32,
    pub claimed_power: f64,
    pub delivered_power: f64,
    pub generator_power: f64,
    pub waste_heat: f64,
    pub events: u32,
}

/// Owns every platform, transmitter, relay and receiver and runs the tick.
pub struct Simulation<R: RouteResolver = RouteTable> {
    config: SimulationConfig,
    engine: AllocationEngine,
    platforms: Vec<Option<Platform>>,
    transmitters: Vec<Option<Transmitter>>,
    relays: Vec<Option<Relay>>,
    receivers: Vec<Option<Receiver>>,
    resolver: R,
    tick_count: u64,
    events: EventQueue,
}

fn slot<T>(arena: &[Option<T>], index: usize) -> Option<&T> {
    arena.get(index).and_then(Option::as_ref)
}

fn slot_mut<T>(arena: &mut [Option<T>], index: usize) -> Option<&mut T> {
    arena.get_mut(index).and_then(Option::as_mut)
}

impl<R: RouteResolver> Simulation<R> {
    pub fn new(config: SimulationConfig, resolver: R) -> BeamResult<Self> {
        config.validate()?;
        Ok(Self {
            engine: AllocationEngine::new(&config),
            config,
            platforms: Vec::new(),
            transmitters: Vec::new(),
            relays: Vec::new(),
            receivers: Vec::new(),
            resolver,
            tick_count: 0,
            events: EventQueue::new(),
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    pub fn resolver_mut(&mut self) -> &mut R {
        &mut self.resolver
    }

    // ---- platforms ----

    /// Adds a platform with a single root part.
    pub fn add_platform(&mut self, name: &str) -> PlatformId {
        let mut parts = PartGraph::new();
        let _ = parts.add_part("root", None, AttachKind::Stack);
        self.add_platform_with_parts(name, parts)
    }

    pub fn add_platform_with_parts(&mut self, name: &str, parts: PartGraph) -> PlatformId {
        let id = PlatformId(self.platforms.len() as u32);
        self.platforms.push(Some(Platform {
            id,
            name: name.into(),
            pool: PlatformPool::new(self.config.dt_seconds()),
            parts,
            solar_flux: 0.0,
            solar_facing: 1.0,
            generators: Vec::new(),
        }));
        id
    }

    pub fn platform(&self, id: PlatformId) -> Option<&Platform> {
        slot(&self.platforms, id.index())
    }

    pub fn platform_mut(&mut self, id: PlatformId) -> BeamResult<&mut Platform> {
        slot_mut(&mut self.platforms, id.index()).ok_or(BeamError::UnknownPlatform(id.0))
    }

    pub fn platforms(&self) -> impl Iterator<Item = &Platform> {
        self.platforms.iter().flatten()
    }

    pub fn add_part(&mut self, platform: PlatformId, name: &str, parent: Option<usize>, attach: AttachKind) -> BeamResult<usize> {
        let index = self.platform_mut(platform)?.parts.add_part(name, parent, attach)?;
        self.relink_thermal_slaves(platform);
        Ok(index)
    }

    pub fn set_solar_conditions(&mut self, platform: PlatformId, flux: f64, facing: f64) -> BeamResult<()> {
        self.platform_mut(platform)?.set_solar_conditions(flux, facing);
        Ok(())
    }

    pub fn add_generator(&mut self, platform: PlatformId, config: GeneratorConfig) -> BeamResult<usize> {
        let platform = self.platform_mut(platform)?;
        platform.generators.push(BatteryGenerator::new(config));
        Ok(platform.generators.len() - 1)
    }

    // ---- transmitters and relays ----

    pub fn add_transmitter(
        &mut self,
        platform: PlatformId,
        name: &str,
        deliverable_power: f64,
        beams: &[PowerBeam],
    ) -> BeamResult<TransmitterId> {
        if self.platform(platform).is_none() {
            return Err(BeamError::UnknownPlatform(platform.0));
        }
        let id = TransmitterId(self.transmitters.len() as u32);
        let mut transmitter = Transmitter::new(id, name, platform, deliverable_power);
        for beam in beams {
            transmitter.add_beam(*beam)?;
        }
        self.transmitters.push(Some(transmitter));
        Ok(id)
    }

    pub fn transmitter(&self, id: TransmitterId) -> Option<&Transmitter> {
        slot(&self.transmitters, id.index())
    }

    pub fn transmitter_mut(&mut self, id: TransmitterId) -> BeamResult<&mut Transmitter> {
        slot_mut(&mut self.transmitters, id.index()).ok_or(BeamError::UnknownTransmitter(id.0))
    }

    pub fn transmitters(&self) -> impl Iterator<Item = &Transmitter> {
        self.transmitters.iter().flatten()
    }

    /// Detaches a transmitter; records pointing at it go stale next tick.
    pub fn remove_transmitter(&mut self, id: TransmitterId) -> Option<Transmitter> {
        self.transmitters.get_mut(id.index()).and_then(Option::take)
    }

    pub fn add_relay(&mut self, name: &str, power_capacity: f64, min_wavelength: f64, max_wavelength: f64) -> RelayId {
        let id = RelayId(self.relays.len() as u32);
        self.relays
            .push(Some(Relay::new(id, name, power_capacity, min_wavelength, max_wavelength)));
        id
    }

    pub fn relay(&self, id: RelayId) -> Option<&Relay> {
        slot(&self.relays, id.index())
    }

    pub fn relay_mut(&mut self, id: RelayId) -> BeamResult<&mut Relay> {
        slot_mut(&mut self.relays, id.index()).ok_or(BeamError::UnknownRelay(id.0))
    }

    // ---- receivers ----

    pub fn add_receiver(&mut self, platform: PlatformId, part: usize, config: ReceiverConfig) -> BeamResult<ReceiverId> {
        let parts = self.platform(platform).ok_or(BeamError::UnknownPlatform(platform.0))?.parts.len();
        if part >= parts {
            return Err(BeamError::config(format!("platform {platform} has no part {part}")));
        }
        let id = ReceiverId(self.receivers.len() as u32);
        let receiver = Receiver::new(id, platform, part, config, self.config.ramp_step)?;
        debug!(receiver = %receiver.name(), %platform, part, "receiver attached");
        self.receivers.push(Some(receiver));
        self.relink_thermal_slaves(platform);
        Ok(id)
    }

    pub fn receiver(&self, id: ReceiverId) -> Option<&Receiver> {
        slot(&self.receivers, id.index())
    }

    pub fn receiver_mut(&mut self, id: ReceiverId) -> BeamResult<&mut Receiver> {
        slot_mut(&mut self.receivers, id.index()).ok_or(BeamError::UnknownReceiver(id.0))
    }

    pub fn receivers(&self) -> impl Iterator<Item = &Receiver> {
        self.receivers.iter().flatten()
    }

    /// Detaches a receiver, releasing its thermal links and pool buffers.
    pub fn remove_receiver(&mut self, id: ReceiverId) -> Option<Receiver> {
        let receiver = self.receivers.get_mut(id.index()).and_then(Option::take)?;

        if let Some(master) = receiver.thermal_link().master() {
            if let Some(master) = slot_mut(&mut self.receivers, master.index()) {
                master.thermal_link_mut().unregister_slave(id);
            }
        }
        for slave in receiver.thermal_link().slaves() {
            if let Some(slave) = slot_mut(&mut self.receivers, slave.index()) {
                slave.thermal_link_mut().set_master(None);
            }
        }
        if let Some(platform) = slot_mut(&mut self.platforms, receiver.platform().index()) {
            platform.pool.remove_contributions(id.0);
        }
        debug!(receiver = %receiver.name(), "receiver detached");
        self.relink_thermal_slaves(receiver.platform());
        Some(receiver)
    }

    pub fn enable_receiver(&mut self, id: ReceiverId) -> BeamResult<()> {
        self.receiver_mut(id)?.enable();
        Ok(())
    }

    pub fn disable_receiver(&mut self, id: ReceiverId) -> BeamResult<()> {
        self.receiver_mut(id)?.disable();
        Ok(())
    }

    pub fn enable_if_possible(&mut self, id: ReceiverId) -> BeamResult<bool> {
        Ok(self.receiver_mut(id)?.enable_if_possible())
    }

    pub fn restore_receiver(&mut self, id: ReceiverId, saved: &ReceiverPersistence) -> BeamResult<()> {
        self.receiver_mut(id)?.restore(saved)?;
        if saved.force_activate_at_startup && !saved.enabled {
            self.push_event(SimulationEvent::ForceActivated { receiver: id });
        }
        Ok(())
    }

    pub fn notify_generator_request(&mut self, id: ReceiverId, ratio: f64) -> BeamResult<()> {
        self.receiver_mut(id)?.notify_generator_request(ratio);
        Ok(())
    }

    /// Residual capacity of `transmitter` as `requester` would see it now.
    pub fn residual_capacity(&self, transmitter: TransmitterId, requester: ReceiverId) -> BeamResult<f64> {
        let tx = self
            .transmitter(transmitter)
            .ok_or(BeamError::UnknownTransmitter(transmitter.0))?;
        let network_capacity = self
            .receiver(requester)
            .and_then(|r| r.record(transmitter))
            .map_or(tx.deliverable_power(), |record| record.network_capacity);
        Ok(CapacityAccountant::new(&self.receivers).residual_capacity(transmitter, network_capacity, requester))
    }

    /// Clears every ledger, as on a restart.
    pub fn reset(&mut self) {
        for receiver in self.receivers.iter_mut().flatten() {
            receiver.reset();
        }
        self.events.clear();
        info!("simulation ledgers reset");
    }

    fn relink_thermal_slaves(&mut self, platform: PlatformId) {
        let Some(graph) = slot(&self.platforms, platform.index()).map(|p| &p.parts) else {
            return;
        };

        let mut links: Vec<(ReceiverId, ReceiverId)> = Vec::new();
        for slave in self.receivers.iter().flatten() {
            if slave.platform() != platform || !slave.is_thermal_slave() || slave.thermal_link().master().is_some() {
                continue;
            }
            if let Some(master) = find_thermal_master(graph, slave, &self.receivers) {
                links.push((slave.id(), master));
            }
        }

        for (slave, master) in links {
            let Some(master_receiver) = slot_mut(&mut self.receivers, master.index()) else {
                continue;
            };
            if let Err(e) = master_receiver.thermal_link_mut().register_slave(slave) {
                warn!(%slave, %master, error = %e, "thermal slave not linked");
                continue;
            }
            if let Some(slave_receiver) = slot_mut(&mut self.receivers, slave.index()) {
                slave_receiver.thermal_link_mut().set_master(Some(master));
            }
            info!(%slave, %master, "thermal slave linked");
            self.push_event(SimulationEvent::ThermalSlaveLinked { slave, master });
        }
    }

    // ---- events ----

    fn push_event(&mut self, event: SimulationEvent) {
        if self.events.is_full() {
            self.events.pop_front();
        }
        let _ = self.events.push_back(event);
    }

    /// Undrained events, oldest first.
    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<SimulationEvent> {
        core::iter::from_fn(|| self.events.pop_front()).collect()
    }

    // ---- tick ----

    /// One allocation pass over every receiver.
    ///
    /// A failure inside one receiver is logged, reported as an event and
    /// leaves that receiver with zero output for the tick.
    pub fn tick(&mut self) -> TickSummary {
        self.tick_count += 1;
        let tick = self.tick_count;
        let mut summary = TickSummary { tick, ..TickSummary::default() };
        let mut events: Vec<SimulationEvent> = Vec::new();
        let mut failed: Vec<(ReceiverId, String)> = Vec::new();

        for platform in self.platforms.iter_mut().flatten() {
            platform.pool.begin_tick();
        }

        // prepare
        let mut active: Vec<ReceiverId> = Vec::new();
        for receiver in self.receivers.iter_mut().flatten() {
            let Some(platform) = slot_mut(&mut self.platforms, receiver.platform().index()) else {
                receiver.abort_tick();
                failed.push((receiver.id(), BeamError::UnknownPlatform(receiver.platform().0).to_string()));
                continue;
            };
            let (flux, facing) = platform.solar_conditions();
            match self.engine.prepare(receiver, &mut platform.pool, flux, facing) {
                Readiness::Active => active.push(receiver.id()),
                Readiness::Inactive => {}
                Readiness::Overheated { first } => {
                    if first {
                        events.push(SimulationEvent::OverheatShutdown {
                            receiver: receiver.id(),
                            waste_heat_ratio: receiver.output().waste_heat_ratio,
                        });
                    }
                }
            }
        }

        // demand collection, read-only
        let mut demands: Vec<ReceiverDemand> = Vec::with_capacity(active.len());
        for &id in &active {
            let Some(receiver) = slot(&self.receivers, id.index()) else {
                continue;
            };
            match self
                .engine
                .collect_demand(receiver, &self.transmitters, &self.relays, &self.resolver)
            {
                Ok(demand) => demands.push(demand),
                Err(e) => failed.push((id, e.to_string())),
            }
        }

        // commit
        let scales: BTreeMap<TransmitterId, f64> = match self.engine.fairness() {
            FairnessPolicy::Priority => BTreeMap::new(),
            FairnessPolicy::Proportional => self
                .transmitters
                .iter()
                .flatten()
                .map(|tx| (tx.id(), proportional_scale(&demands, tx)))
                .collect(),
        };
        for index in commit_order(&demands) {
            let demand = &demands[index];
            for transmitter_demand in &demand.transmitters {
                let residual = CapacityAccountant::new(&self.receivers).residual_capacity(
                    transmitter_demand.transmitter,
                    transmitter_demand.network_capacity,
                    demand.receiver,
                );
                let scale = scales.get(&transmitter_demand.transmitter).copied().unwrap_or(1.0);
                let Some(receiver) = slot_mut(&mut self.receivers, demand.receiver.index()) else {
                    break;
                };
                match self.engine.commit_transmitter(receiver, transmitter_demand, residual, scale) {
                    Ok(outcome) => {
                        if outcome.created {
                            events.push(SimulationEvent::RecordCreated {
                                receiver: demand.receiver,
                                transmitter: transmitter_demand.transmitter,
                            });
                        }
                    }
                    Err(e) => {
                        // Release what it already claimed before the next receiver commits.
                        receiver.abort_tick();
                        failed.push((demand.receiver, e.to_string()));
                        break;
                    }
                }
            }
        }

        for (id, reason) in &failed {
            if let Some(receiver) = slot_mut(&mut self.receivers, id.index()) {
                receiver.abort_tick();
            }
            error!(receiver = %id, tick, %reason, "receiver tick failed, output zeroed");
            events.push(SimulationEvent::TickFailed { receiver: *id, reason: reason.clone() });
        }

        // evict
        for receiver in self.receivers.iter_mut().flatten() {
            for transmitter in receiver.evict_stale() {
                events.push(SimulationEvent::RecordEvicted { receiver: receiver.id(), transmitter });
            }
        }

        // deliver, slaves before their masters
        let (slaves, others): (Vec<ReceiverId>, Vec<ReceiverId>) = active
            .iter()
            .copied()
            .filter(|id| !failed.iter().any(|(f, _)| f == id))
            .partition(|id| {
                slot(&self.receivers, id.index())
                    .is_some_and(|r| r.is_thermal_slave() && r.thermal_link().master().is_some())
            });
        for id in slaves.iter().chain(others.iter()) {
            let slaves_power = match slot(&self.receivers, id.index()) {
                Some(receiver) if receiver.thermal_link().has_slaves() => collect_slaves_power(receiver, &self.receivers),
                Some(_) => 0.0,
                None => continue,
            };
            let Some(receiver) = slot_mut(&mut self.receivers, id.index()) else {
                continue;
            };
            let Some(platform) = slot_mut(&mut self.platforms, receiver.platform().index()) else {
                continue;
            };
            let outcome = self.engine.deliver(receiver, &mut platform.pool, slaves_power);
            summary.delivered_power += outcome.supplied;
            summary.waste_heat += outcome.waste_heat;

            if let Some(ratio) = outcome.thermal_ratio {
                let linked: heapless::Vec<ReceiverId, { crate::thermal::MAX_THERMAL_SLAVES }> =
                    receiver.thermal_link().slaves().iter().copied().collect();
                for slave in linked {
                    if let Some(slave) = slot_mut(&mut self.receivers, slave.index()) {
                        slave.apply_consumption_ratio(ratio);
                    }
                }
            }
        }

        let dt = self.config.dt_seconds();
        for platform in self.platforms.iter_mut().flatten() {
            for generator in &mut platform.generators {
                let output = generator.tick(&mut platform.pool, dt);
                summary.generator_power += output.supplied;
            }
            platform.pool.end_tick();
        }

        summary.active_receivers = active.len() as u32;
        summary.failed_receivers = failed.len() as u32;
        summary.claimed_power = self.receivers().map(|r| r.totals().claimed_power).sum();
        summary.events = events.len() as u32;
        for event in events {
            self.push_event(event);
        }
        debug!(
            tick,
            claimed = summary.claimed_power,
            delivered = summary.delivered_power,
            "tick complete"
        );
        summary
    }
}

impl Simulation<RouteTable> {
    /// Builds a table-routed simulation from a scenario. Receivers without
    /// saved state start enabled.
    pub fn from_scenario(scenario: &Scenario) -> BeamResult<Self> {
        let mut sim = Simulation::new(scenario.config.clone(), RouteTable::new())?;

        for spec in &scenario.platforms {
            let mut parts = PartGraph::new();
            if spec.parts.is_empty() {
                parts.add_part("root", None, AttachKind::Stack)?;
            }
            for part in &spec.parts {
                parts.add_part(&part.name, part.parent, part.attach)?;
            }
            let id = sim.add_platform_with_parts(&spec.name, parts);
            let platform = sim.platform_mut(id)?;
            for capacity in &spec.capacities {
                platform.pool.set_base_capacity(capacity.kind, capacity.amount);
            }
            for demand in &spec.demands {
                platform.pool.set_demand(demand.kind, demand.amount);
            }
            platform.set_solar_conditions(spec.solar_flux, spec.solar_facing);
        }

        for spec in &scenario.transmitters {
            let id = sim.add_transmitter(PlatformId(spec.platform), &spec.name, spec.deliverable_power_mw, &spec.beams)?;
            sim.transmitter_mut(id)?.set_relay_chain_cap(spec.relay_chain_cap_mw);
        }

        for spec in &scenario.relays {
            let id = sim.add_relay(&spec.name, spec.power_capacity_mw, spec.min_wavelength, spec.max_wavelength);
            sim.relay_mut(id)?.aperture = spec.aperture;
        }

        for spec in &scenario.receivers {
            let id = sim.add_receiver(PlatformId(spec.platform), spec.part, spec.config.clone())?;
            match &spec.persistence {
                Some(saved) => sim.restore_receiver(id, saved)?,
                None => sim.enable_receiver(id)?,
            }
        }

        for spec in &scenario.routes {
            let transmitter = TransmitterId(spec.transmitter);
            let receiver = ReceiverId(spec.receiver);
            if sim.transmitter(transmitter).is_none() {
                return Err(BeamError::UnknownTransmitter(spec.transmitter));
            }
            if sim.receiver(receiver).is_none() {
                return Err(BeamError::UnknownReceiver(spec.receiver));
            }
            let relays: Vec<RelayId> = spec.relays.iter().copied().map(RelayId).collect();
            if let Some(missing) = relays.iter().find(|r| sim.relay(**r).is_none()) {
                return Err(BeamError::UnknownRelay(missing.0));
            }
            let route = Route::via(spec.efficiency, spec.distance, &relays)?
                .with_spot_size(spec.spot_size)
                .with_facing_factor(spec.facing_factor);
            sim.resolver_mut().insert(transmitter, receiver, route);
        }

        for spec in &scenario.generators {
            sim.add_generator(PlatformId(spec.platform), spec.config.clone())?;
        }

        info!(
            platforms = scenario.platforms.len(),
            transmitters = scenario.transmitters.len(),
            receivers = scenario.receivers.len(),
            "scenario loaded"
        );
        Ok(sim)
    }
}

impl Scenario {
    pub fn build(&self) -> BeamResult<Simulation> {
        Simulation::from_scenario(self)
    }
}
