//! Per-receiver allocation of beamed power.
//!
//! A tick runs in phases so no receiver reads a claim another receiver has
//! not committed yet:
//!
//! 1. `prepare` latches inputs, checks the waste-heat ceiling and ramps
//!    down receivers that are off.
//! 2. `collect_demand` works out, read-only, what each receiver would draw
//!    from every transmitter that reaches it.
//! 3. `commit_transmitter` caps each demand by the residual capacity the
//!    accountant reports and writes the claim into the receiver's ledger.
//! 4. `deliver` smooths the totals, draws on the resource pool and writes
//!    consumption back into the ledger.

use heapless::Vec;
use tracing::{debug, trace};

use crate::accountant::{min_relay_capacity, network_capacity};
use crate::config::{FairnessPolicy, SimulationConfig};
use crate::error::{BeamError, BeamResult};
use crate::network::{
    Relay, ReceiverId, Route, RouteResolver, Transmitter, TransmitterId, MAX_BEAMS_PER_TRANSMITTER,
    MAX_RELAYS_PER_ROUTE,
};
use crate::pool::{ResourceKind, ResourcePool};
use crate::receiver::Receiver;

/// One beam a receiver can use, as seen during demand collection.
#[derive(Debug, Clone, Copy)]
pub struct BeamDemand {
    pub wavelength: f64,
    pub route_limited_power: f64,
    pub efficiency: f64,
    pub waste_heat_factor: f64,
    pub requested: f64,
}

#[derive(Debug, Clone)]
pub struct TransmitterDemand {
    pub transmitter: TransmitterId,
    pub route: Route,
    pub transmit_power: f64,
    pub network_capacity: f64,
    pub min_relay_capacity: Option<f64>,
    pub beams: Vec<BeamDemand, MAX_BEAMS_PER_TRANSMITTER>,
    pub requested: f64,
}

#[derive(Debug, Clone)]
pub struct ReceiverDemand {
    pub receiver: ReceiverId,
    pub priority: u8,
    pub transmitters: alloc::vec::Vec<TransmitterDemand>,
}

/// Outcome of the prepare phase for one receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Active,
    Inactive,
    /// Shut down by the waste-heat ceiling; `first` is set the first time.
    Overheated { first: bool },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CommitOutcome {
    pub claimed: f64,
    pub created: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryOutcome {
    pub supplied: f64,
    pub waste_heat: f64,
    /// Thermal supply ratio a master hands to its slaves.
    pub thermal_ratio: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct AllocationEngine {
    fairness: FairnessPolicy,
    overheat_ceiling: f64,
    ignore_max_temperature: bool,
}

impl AllocationEngine {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            fairness: config.fairness,
            overheat_ceiling: config.overheat_ceiling,
            ignore_max_temperature: config.ignore_max_temperature,
        }
    }

    pub fn fairness(&self) -> FairnessPolicy {
        self.fairness
    }

    pub fn prepare<P: ResourcePool>(
        &self,
        receiver: &mut Receiver,
        pool: &mut P,
        solar_flux: f64,
        solar_facing: f64,
    ) -> Readiness {
        receiver.begin_tick();
        let waste_ratio = pool.current_fill_ratio(ResourceKind::WasteHeat);
        receiver.output_mut().waste_heat_ratio = waste_ratio;

        let mut readiness = Readiness::Active;
        if receiver.is_enabled()
            && !self.ignore_max_temperature
            && waste_ratio >= self.overheat_ceiling
            && !receiver.is_thermal_only()
        {
            let first = receiver.overheat_shutdown(waste_ratio);
            readiness = Readiness::Overheated { first };
        }

        if !receiver.is_enabled() || receiver.is_radiator_mode() {
            self.power_down(receiver, pool);
            if readiness == Readiness::Active {
                readiness = Readiness::Inactive;
            }
            return readiness;
        }

        receiver.update_solar_input(solar_flux, solar_facing);
        readiness
    }

    fn power_down<P: ResourcePool>(&self, receiver: &mut Receiver, pool: &mut P) {
        let fraction = receiver.ramp_down();
        let scaled = receiver.stable_maximum_power() * fraction;
        update_buffers(receiver, pool, scaled);
    }

    /// Read-only demand of `receiver` on every transmitter that reaches it.
    pub fn collect_demand<R: RouteResolver>(
        &self,
        receiver: &Receiver,
        transmitters: &[Option<Transmitter>],
        relays: &[Option<Relay>],
        resolver: &R,
    ) -> BeamResult<ReceiverDemand> {
        let mut demand = ReceiverDemand {
            receiver: receiver.id(),
            priority: receiver.config().supply_priority,
            transmitters: alloc::vec::Vec::new(),
        };
        if receiver.is_solar_only() {
            return Ok(demand);
        }

        let thermal_mode = receiver.is_thermal_mode();
        let waste_heat_factor = if thermal_mode { receiver.config().thermal_waste_heat_factor } else { 1.0 };
        let mut headroom = receiver.intake_limit();

        for transmitter in transmitters.iter().flatten().filter(|t| t.is_active()) {
            let route = match resolver.resolve_route(transmitter.id(), receiver.id()) {
                Ok(Some(route)) => route,
                Ok(None) => continue,
                Err(e) => {
                    debug!(receiver = %receiver.name(), transmitter = %transmitter.name(), error = %e, "route rejected");
                    continue;
                }
            };

            let mut route_relays: Vec<&Relay, MAX_RELAYS_PER_ROUTE> = Vec::new();
            for relay_id in &route.relays {
                let relay = relays
                    .get(relay_id.index())
                    .and_then(Option::as_ref)
                    .ok_or(BeamError::UnknownRelay(relay_id.0))?;
                let _ = route_relays.push(relay);
            }

            let capacity = network_capacity(transmitter, &route_relays);
            let bottleneck = min_relay_capacity(&route_relays);
            let mut remaining = capacity;
            let mut beams: Vec<BeamDemand, MAX_BEAMS_PER_TRANSMITTER> = Vec::new();

            for beam in transmitter.beams() {
                let Some(band) = receiver.bands().matching_band(beam.wavelength) else {
                    trace!(receiver = %receiver.name(), wavelength = beam.wavelength, "no compatible band");
                    continue;
                };
                if !route_relays.iter().all(|r| r.supports(beam.wavelength)) {
                    trace!(receiver = %receiver.name(), wavelength = beam.wavelength, "relay cannot carry beam");
                    continue;
                }

                let efficiency = band.efficiency_fraction(thermal_mode);
                let route_limited_power = beam.route_limited_power(route.efficiency);
                let intake_cap = if efficiency > 0.0 { headroom / efficiency } else { f64::INFINITY };
                let requested = route_limited_power.min(remaining).min(intake_cap).max(0.0);
                remaining -= requested;
                headroom -= requested * efficiency;

                let _ = beams.push(BeamDemand {
                    wavelength: beam.wavelength,
                    route_limited_power,
                    efficiency,
                    waste_heat_factor,
                    requested,
                });
            }

            demand.transmitters.push(TransmitterDemand {
                transmitter: transmitter.id(),
                transmit_power: transmitter.deliverable_power(),
                network_capacity: capacity,
                min_relay_capacity: bottleneck,
                requested: beams.iter().map(|b| b.requested).sum(),
                beams,
                route,
            });
        }
        Ok(demand)
    }

    /// Commits one transmitter's claim against `residual` capacity.
    ///
    /// `scale` shrinks the request under proportional fairness; it is 1
    /// otherwise.
    pub fn commit_transmitter(
        &self,
        receiver: &mut Receiver,
        demand: &TransmitterDemand,
        residual: f64,
        scale: f64,
    ) -> BeamResult<CommitOutcome> {
        let max_receive = receiver.maximum_receive_power().unwrap_or(f64::INFINITY);
        let mut headroom = (receiver.intake_limit() - receiver.totals().delivered_power).max(0.0);
        let mut max_headroom = (max_receive - receiver.totals().delivered_power_max).max(0.0);

        let mut pool = match self.fairness {
            FairnessPolicy::Priority => residual,
            FairnessPolicy::Proportional => residual.min(demand.requested * scale.clamp(0.0, 1.0)),
        }
        .max(0.0);

        let Some((record, created)) = receiver.record_entry(demand.transmitter) else {
            return Ok(CommitOutcome::default());
        };
        record.is_alive = true;
        record.route = Some(demand.route.clone());
        record.transmit_power = demand.transmit_power;
        record.network_capacity = demand.network_capacity;
        record.power_usage_others = (demand.network_capacity - residual).max(0.0);

        let mut claimed_total = 0.0;
        let mut delivered_total = 0.0;
        let mut delivered_max_total = 0.0;
        let mut waste_total = 0.0;

        for beam in &demand.beams {
            let mut claim = beam.route_limited_power.min(pool);
            if let Some(bottleneck) = demand.min_relay_capacity {
                claim = claim.min(bottleneck);
            }
            if beam.efficiency > 0.0 {
                claim = claim.min(headroom / beam.efficiency);
            }
            if claim.is_nan() || claim <= 0.0 {
                continue;
            }

            pool -= claim;
            let delivered = claim * beam.efficiency;
            let waste = claim * (1.0 - beam.efficiency) * beam.waste_heat_factor;
            let delivered_max = (beam.route_limited_power.min(demand.network_capacity) * beam.efficiency).min(max_headroom);
            headroom -= delivered;
            max_headroom -= delivered_max;

            claimed_total += claim;
            delivered_total += delivered;
            delivered_max_total += delivered_max;
            waste_total += waste;

            if !record.wavelengths.contains(&beam.wavelength) {
                let _ = record.wavelengths.push(beam.wavelength);
            }
            record.receiver_efficiency = beam.efficiency * 100.0;
        }

        record.current_received_power = claimed_total;
        record.available_power = claimed_total;
        record.delivered_power = delivered_total;
        record.maximum_received_power = delivered_max_total;
        record.waste_heat = waste_total;
        record.remaining_power = (residual - claimed_total).max(0.0);

        debug_assert!(
            claimed_total <= residual + 1e-9,
            "Claimed {claimed_total} exceeds residual {residual}"
        );

        if claimed_total > 0.0 {
            let totals = receiver.totals_mut();
            totals.claimed_power += claimed_total;
            totals.delivered_power += delivered_total;
            totals.delivered_power_max += delivered_max_total;
            totals.waste_heat += waste_total;
            totals.connected_transmitters += 1;
            receiver.track_relays(&demand.route.relays);
        }

        Ok(CommitOutcome {
            claimed: claimed_total,
            created,
        })
    }

    /// Smooths totals, draws on the pool and writes consumption back.
    pub fn deliver<P: ResourcePool>(
        &self,
        receiver: &mut Receiver,
        pool: &mut P,
        slaves_power: f64,
    ) -> DeliveryOutcome {
        let (delivered, delivered_max) = {
            let totals = receiver.totals();
            (totals.delivered_power, totals.delivered_power_max)
        };
        let (beamed_filter, beamed_max_filter) = receiver.beamed_filters();
        let beamed = beamed_filter.update(delivered);
        let beamed_max = beamed_max_filter.update(delivered_max);

        receiver.ramp_up();
        {
            let output = receiver.output_mut();
            output.beamed_power = beamed;
            output.beamed_power_max = beamed_max;
            output.power_input = beamed + output.solar_thermal_input;
            output.power_input_max = beamed_max + output.solar_thermal_input_max;
        }
        let stable = receiver.stable_maximum_power();
        update_buffers(receiver, pool, stable);

        if receiver.is_thermal_mode() || receiver.is_thermal_slave() {
            self.deliver_thermal(receiver, pool, slaves_power)
        } else {
            self.deliver_electric(receiver, pool)
        }
    }

    fn minimum_ratio(receiver: &Receiver) -> f64 {
        let (floor, _) = receiver.consumption_bounds();
        (floor / 100.0).max(receiver.requested_minimum_ratio()).clamp(0.0, 1.0)
    }

    fn deliver_thermal<P: ResourcePool>(&self, receiver: &mut Receiver, pool: &mut P, slaves_power: f64) -> DeliveryOutcome {
        let max_receive = receiver.maximum_receive_power().unwrap_or(f64::INFINITY);
        let output = receiver.output().clone();
        let available = output.solar_thermal_input + output.beamed_power + slaves_power;
        let provided = available.min(max_receive);
        receiver.output_mut().thermal_power_provided = provided;
        receiver.thermal_link_mut().set_slaves_power(slaves_power);

        if receiver.is_thermal_slave() && receiver.thermal_link().master().is_some() {
            return DeliveryOutcome::default();
        }

        if provided.is_nan() || provided <= 0.0 {
            receiver.apply_consumption_ratio(0.0);
            return DeliveryOutcome {
                thermal_ratio: Some(0.0),
                ..DeliveryOutcome::default()
            };
        }

        let minimum_ratio = Self::minimum_ratio(receiver);
        let supplied = pool.request_supply(ResourceKind::ThermalPower, provided, minimum_ratio);
        let supply_ratio = supplied / provided;
        let thermal_ratio = if available > 0.0 { (supplied / available).min(1.0) } else { 0.0 };

        let waste_heat = supply_ratio * receiver.totals().waste_heat;
        let waste_heat = self.supply_waste_heat(pool, waste_heat);

        let output = receiver.output_mut();
        output.minimum_ratio = minimum_ratio;
        output.supplied_power = supplied;
        output.supply_ratio = supply_ratio;
        output.waste_heat_supplied = waste_heat;
        receiver.apply_consumption_ratio(thermal_ratio);

        DeliveryOutcome {
            supplied,
            waste_heat,
            thermal_ratio: Some(thermal_ratio),
        }
    }

    fn deliver_electric<P: ResourcePool>(&self, receiver: &mut Receiver, pool: &mut P) -> DeliveryOutcome {
        let config = receiver.config();
        let exponent = config.electric_waste_heat_exponent;
        let waste_ratio = receiver.output().waste_heat_ratio;
        let conversion = if self.ignore_max_temperature || exponent == 0.0 {
            1.0
        } else {
            (1.0 - waste_ratio.powf(exponent)).clamp(0.0, 1.0)
        };
        let solar_efficiency = conversion * config.solar_electric_efficiency;
        let beamed_efficiency = conversion * config.electric_max_efficiency;

        let output = receiver.output().clone();
        let available = output.solar_thermal_input * solar_efficiency + output.beamed_power * beamed_efficiency;
        let provided = available.min(receiver.maximum_receive_power().unwrap_or(f64::INFINITY));
        receiver.output_mut().electric_power_available = provided;

        if provided.is_nan() || provided <= 0.0 {
            receiver.apply_consumption_ratio(0.0);
            return DeliveryOutcome::default();
        }

        let minimum_ratio = Self::minimum_ratio(receiver);
        let supplied = pool.request_supply(ResourceKind::Megajoules, provided, minimum_ratio);
        let supply_ratio = supplied / provided;

        let solar_loss = output.solar_thermal_input * (1.0 - solar_efficiency);
        let waste_heat = supply_ratio * (receiver.totals().waste_heat + solar_loss);
        let waste_heat = self.supply_waste_heat(pool, waste_heat);

        let output = receiver.output_mut();
        output.minimum_ratio = minimum_ratio;
        output.supplied_power = supplied;
        output.supply_ratio = supply_ratio;
        output.waste_heat_supplied = waste_heat;
        receiver.apply_consumption_ratio(supply_ratio);

        DeliveryOutcome {
            supplied,
            waste_heat,
            thermal_ratio: None,
        }
    }

    fn supply_waste_heat<P: ResourcePool>(&self, pool: &mut P, waste_heat: f64) -> f64 {
        if self.ignore_max_temperature || waste_heat.is_nan() || waste_heat <= 0.0 {
            return 0.0;
        }
        pool.request_supply(ResourceKind::WasteHeat, waste_heat, 1.0)
    }
}

fn update_buffers<P: ResourcePool>(receiver: &Receiver, pool: &mut P, capacity: f64) {
    let capacity = if capacity.is_finite() { capacity } else { 0.0 };
    let source = receiver.id().0;
    for kind in [ResourceKind::ThermalPower, ResourceKind::Megajoules, ResourceKind::ElectricCharge] {
        pool.set_buffer_contribution(kind, source, capacity);
    }
    pool.set_buffer_contribution(ResourceKind::WasteHeat, source, receiver.config().mass.max(0.0));
}

/// Commit order for the current fairness policy: ascending priority, then id.
pub fn commit_order(demands: &[ReceiverDemand]) -> alloc::vec::Vec<usize> {
    let mut order: alloc::vec::Vec<usize> = (0..demands.len()).collect();
    order.sort_by_key(|&i| (demands[i].priority, demands[i].receiver));
    order
}

/// Per-transmitter request scale for proportional fairness.
///
/// Scales total demand down to the smallest network capacity among the
/// receivers requesting anything, so no claim depends on commit order.
pub fn proportional_scale(demands: &[ReceiverDemand], transmitter: &Transmitter) -> f64 {
    let mut total = 0.0;
    let mut binding = transmitter.deliverable_power();
    for request in demands
        .iter()
        .flat_map(|d| d.transmitters.iter())
        .filter(|t| t.transmitter == transmitter.id() && t.requested > 0.0)
    {
        total += request.requested;
        binding = binding.min(request.network_capacity);
    }
    if total > binding && total > 0.0 {
        binding.max(0.0) / total
    } else {
        1.0
    }
}
