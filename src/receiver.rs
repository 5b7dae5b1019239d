use heapless::{FnvIndexMap, Vec};
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use tracing::{debug, info, warn};

use crate::bandwidth::BandwidthRegistry;
use crate::config::ReceiverConfig;
use crate::error::{BeamError, BeamResult};
use crate::network::{PlatformId, ReceiverId, RelayId, Route, TransmitterId, MAX_BEAMS_PER_TRANSMITTER};
use crate::ramp::{PowerState, RampController};
use crate::smoothing::{BeamedPowerFilter, SolarFluxFilter};
use crate::thermal::ThermalLink;

pub const MAX_LEDGER_ENTRIES: usize = 64;
pub const MAX_TRACKED_RELAYS: usize = 16;

const_assert!(MAX_LEDGER_ENTRIES.is_power_of_two());
const_assert!(MAX_LEDGER_ENTRIES > 1);

/// W/m² to MW/m².
const FLUX_TO_MEGAWATT: f64 = 1e-6;

pub type Ledger = FnvIndexMap<TransmitterId, ReceivedPowerRecord, MAX_LEDGER_ENTRIES>;

/// What this receiver took from one transmitter on the current tick.
#[derive(Debug, Clone)]
pub struct ReceivedPowerRecord {
    pub transmitter: TransmitterId,
    pub is_alive: bool,
    pub route: Option<Route>,
    pub wavelengths: Vec<f64, MAX_BEAMS_PER_TRANSMITTER>,
    pub transmit_power: f64,
    pub network_capacity: f64,
    pub power_usage_others: f64,
    pub remaining_power: f64,
    /// Network power claimed this tick, before conversion.
    pub current_received_power: f64,
    pub maximum_received_power: f64,
    pub delivered_power: f64,
    pub waste_heat: f64,
    pub available_power: f64,
    pub consumed_power: f64,
    /// Percentage.
    pub receiver_efficiency: f64,
}

impl ReceivedPowerRecord {
    pub fn new(transmitter: TransmitterId) -> Self {
        Self {
            transmitter,
            is_alive: false,
            route: None,
            wavelengths: Vec::new(),
            transmit_power: 0.0,
            network_capacity: 0.0,
            power_usage_others: 0.0,
            remaining_power: 0.0,
            current_received_power: 0.0,
            maximum_received_power: 0.0,
            delivered_power: 0.0,
            waste_heat: 0.0,
            available_power: 0.0,
            consumed_power: 0.0,
            receiver_efficiency: 0.0,
        }
    }

    fn reset_tick(&mut self) {
        let transmitter = self.transmitter;
        let route = self.route.take();
        *self = Self::new(transmitter);
        self.route = route;
    }
}

/// Per-tick totals accumulated by the allocation engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeamedTotals {
    pub claimed_power: f64,
    pub delivered_power: f64,
    pub delivered_power_max: f64,
    pub waste_heat: f64,
    pub connected_transmitters: u32,
    pub connected_relays: u32,
    pub network_depth: u32,
}

/// Results of the delivery phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReceiverOutput {
    pub beamed_power: f64,
    pub beamed_power_max: f64,
    pub solar_thermal_input: f64,
    pub solar_thermal_input_max: f64,
    pub power_input: f64,
    pub power_input_max: f64,
    /// Thermal power offered, including slaves (`total_thermal_power_provided`).
    pub thermal_power_provided: f64,
    pub electric_power_available: f64,
    pub minimum_ratio: f64,
    pub supplied_power: f64,
    pub supply_ratio: f64,
    pub waste_heat_supplied: f64,
    pub waste_heat_ratio: f64,
}

/// Scalars carried across save/restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverPersistence {
    pub enabled: bool,
    pub bandwidth_index: Option<usize>,
    pub thermal_mode: bool,
    pub solar_only: bool,
    pub radiator_mode: bool,
    pub minimum_consumption_percentage: f64,
    pub maximum_consumption_percentage: f64,
    pub stored_temperature: f64,
    pub force_activate_at_startup: bool,
}

impl Default for ReceiverPersistence {
    fn default() -> Self {
        Self {
            enabled: false,
            bandwidth_index: None,
            thermal_mode: false,
            solar_only: false,
            radiator_mode: false,
            minimum_consumption_percentage: 0.0,
            maximum_consumption_percentage: 100.0,
            stored_temperature: 0.0,
            force_activate_at_startup: false,
        }
    }
}

/// A beamed-power receiver. One type for every model; the model lives in
/// `ReceiverConfig`.
#[derive(Debug, Clone)]
pub struct Receiver {
    id: ReceiverId,
    platform: PlatformId,
    part: usize,
    config: ReceiverConfig,
    bands: BandwidthRegistry,

    enabled: bool,
    thermal_mode: bool,
    solar_only: bool,
    radiator_mode: bool,
    minimum_consumption_percentage: f64,
    maximum_consumption_percentage: f64,

    ledger: Ledger,
    used_relays: Vec<RelayId, MAX_TRACKED_RELAYS>,
    totals: BeamedTotals,
    output: ReceiverOutput,

    beamed_filter: BeamedPowerFilter,
    beamed_max_filter: BeamedPowerFilter,
    solar_flux_filter: SolarFluxFilter,
    ramp: RampController,
    thermal: ThermalLink,

    requested_ratio_current: f64,
    requested_ratio_stored: f64,
    overheat_warned: bool,
    ledger_full_warned: bool,
    stored_temperature: f64,
    force_activate_at_startup: bool,
}

impl Receiver {
    pub fn new(
        id: ReceiverId,
        platform: PlatformId,
        part: usize,
        config: ReceiverConfig,
        ramp_step: f64,
    ) -> BeamResult<Self> {
        config.validate()?;
        let mut bands = BandwidthRegistry::new(&config.bandwidths, config.can_switch_bandwidth)?;
        bands.load_initial(config.target_wavelength);

        Ok(Self {
            id,
            platform,
            part,
            bands,
            enabled: false,
            thermal_mode: config.thermal_mode,
            solar_only: false,
            radiator_mode: false,
            minimum_consumption_percentage: config.minimum_consumption_percentage,
            maximum_consumption_percentage: config.maximum_consumption_percentage,
            ledger: Ledger::new(),
            used_relays: Vec::new(),
            totals: BeamedTotals::default(),
            output: ReceiverOutput::default(),
            beamed_filter: BeamedPowerFilter::new(),
            beamed_max_filter: BeamedPowerFilter::new(),
            solar_flux_filter: SolarFluxFilter::new(),
            ramp: RampController::new(ramp_step),
            thermal: ThermalLink::default(),
            requested_ratio_current: 0.0,
            requested_ratio_stored: 0.0,
            overheat_warned: false,
            ledger_full_warned: false,
            stored_temperature: 0.0,
            force_activate_at_startup: false,
            config,
        })
    }

    pub fn id(&self) -> ReceiverId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn platform(&self) -> PlatformId {
        self.platform
    }

    pub fn part(&self) -> usize {
        self.part
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    pub fn bands(&self) -> &BandwidthRegistry {
        &self.bands
    }

    pub fn bands_mut(&mut self) -> &mut BandwidthRegistry {
        &mut self.bands
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn enable(&mut self) {
        if !self.enabled {
            info!(receiver = %self.config.name, "receiver enabled");
        }
        self.enabled = true;
        self.overheat_warned = false;
    }

    pub fn disable(&mut self) {
        if self.enabled {
            info!(receiver = %self.config.name, "receiver disabled");
        }
        self.enabled = false;
    }

    /// Re-enables an auto-deploying receiver; returns whether it is now on.
    pub fn enable_if_possible(&mut self) -> bool {
        if !self.enabled && self.config.auto_deploy {
            self.enable();
        }
        self.enabled
    }

    pub fn is_thermal_mode(&self) -> bool {
        self.thermal_mode
    }

    /// Electric-only models cannot switch to thermal mode.
    pub fn set_thermal_mode(&mut self, thermal: bool) -> BeamResult<()> {
        if thermal && !self.config.is_thermal_receiver && self.bands.configurations().iter().all(|b| b.thermal_efficiency_percentage <= 0.0) {
            return Err(BeamError::config(format!(
                "receiver '{}' has no thermal conversion",
                self.config.name
            )));
        }
        self.thermal_mode = thermal;
        Ok(())
    }

    pub fn is_solar_only(&self) -> bool {
        self.solar_only
    }

    pub fn set_solar_only(&mut self, solar_only: bool) {
        self.solar_only = solar_only;
    }

    pub fn is_radiator_mode(&self) -> bool {
        self.radiator_mode
    }

    pub fn set_radiator_mode(&mut self, radiator: bool) {
        self.radiator_mode = radiator;
    }

    pub fn is_thermal_slave(&self) -> bool {
        self.config.is_thermal_slave
    }

    /// Devices that survive a full waste-heat pool.
    pub fn is_thermal_only(&self) -> bool {
        self.config.is_thermal_receiver || self.solar_only
    }

    pub fn consumption_bounds(&self) -> (f64, f64) {
        (self.minimum_consumption_percentage, self.maximum_consumption_percentage)
    }

    pub fn set_consumption_bounds(&mut self, minimum: f64, maximum: f64) -> BeamResult<()> {
        if !(0.0..=100.0).contains(&minimum) || !(0.0..=100.0).contains(&maximum) || minimum > maximum {
            return Err(BeamError::config(format!(
                "consumption bounds [{minimum}, {maximum}] invalid"
            )));
        }
        self.minimum_consumption_percentage = minimum;
        self.maximum_consumption_percentage = maximum;
        Ok(())
    }

    /// Thermal maximum in thermal mode, electric maximum otherwise, falling
    /// back to the general limit.
    pub fn maximum_receive_power(&self) -> Option<f64> {
        let specific = if self.thermal_mode {
            self.config.maximum_thermal_power
        } else {
            self.config.maximum_electric_power
        };
        specific.or(self.config.maximum_power)
    }

    /// Delivered-power ceiling for one tick.
    pub fn intake_limit(&self) -> f64 {
        self.maximum_receive_power()
            .map_or(f64::INFINITY, |max| max * self.maximum_consumption_percentage / 100.0)
    }

    /// Generators and engines ask for a minimum share of this receiver's power.
    pub fn notify_generator_request(&mut self, ratio: f64) {
        if ratio.is_finite() {
            self.requested_ratio_current = self.requested_ratio_current.max(ratio.max(0.0));
        }
    }

    pub fn requested_minimum_ratio(&self) -> f64 {
        self.requested_ratio_stored
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn record(&self, transmitter: TransmitterId) -> Option<&ReceivedPowerRecord> {
        self.ledger.get(&transmitter)
    }

    /// Claimed power this receiver holds against `transmitter`. Zero while disabled.
    pub fn current_received_power(&self, transmitter: TransmitterId) -> f64 {
        if !self.enabled {
            return 0.0;
        }
        self.record(transmitter).map_or(0.0, |r| r.current_received_power)
    }

    /// Record for `transmitter`, created on first contact.
    ///
    /// Returns `None` when the ledger is full; the transmitter is skipped
    /// until a stale record frees a slot. Warns once per overflow episode.
    pub(crate) fn record_entry(&mut self, transmitter: TransmitterId) -> Option<(&mut ReceivedPowerRecord, bool)> {
        let created = !self.ledger.contains_key(&transmitter);
        if created {
            if self
                .ledger
                .insert(transmitter, ReceivedPowerRecord::new(transmitter))
                .is_err()
            {
                if !self.ledger_full_warned {
                    warn!(
                        receiver = %self.config.name,
                        %transmitter,
                        capacity = MAX_LEDGER_ENTRIES,
                        "power ledger full, ignoring further transmitters"
                    );
                    self.ledger_full_warned = true;
                }
                return None;
            }
            debug!(receiver = %self.config.name, %transmitter, "power record created");
        }
        let record = self.ledger.get_mut(&transmitter)?;
        Some((record, created))
    }

    /// Drops records no transmitter refreshed this tick.
    pub fn evict_stale(&mut self) -> Vec<TransmitterId, MAX_LEDGER_ENTRIES> {
        let mut stale: Vec<TransmitterId, MAX_LEDGER_ENTRIES> = Vec::new();
        for (transmitter, record) in self.ledger.iter() {
            if !record.is_alive {
                let _ = stale.push(*transmitter);
            }
        }
        for transmitter in &stale {
            self.ledger.remove(transmitter);
            debug!(receiver = %self.config.name, %transmitter, "stale power record evicted");
        }
        if !stale.is_empty() {
            self.ledger_full_warned = false;
        }
        stale
    }

    pub fn reset(&mut self) {
        self.ledger.clear();
        self.ledger_full_warned = false;
        self.used_relays.clear();
        self.totals = BeamedTotals::default();
    }

    pub fn totals(&self) -> &BeamedTotals {
        &self.totals
    }

    pub(crate) fn totals_mut(&mut self) -> &mut BeamedTotals {
        &mut self.totals
    }

    pub fn output(&self) -> &ReceiverOutput {
        &self.output
    }

    pub(crate) fn output_mut(&mut self) -> &mut ReceiverOutput {
        &mut self.output
    }

    pub fn used_relays(&self) -> &[RelayId] {
        &self.used_relays
    }

    pub(crate) fn track_relays(&mut self, relays: &[RelayId]) {
        for relay in relays {
            if !self.used_relays.contains(relay) && self.used_relays.push(*relay).is_ok() {
                self.totals.connected_relays += 1;
            }
        }
        let depth = relays.len() as u32;
        self.totals.network_depth = self.totals.network_depth.max(depth);
    }

    pub fn thermal_link(&self) -> &ThermalLink {
        &self.thermal
    }

    pub(crate) fn thermal_link_mut(&mut self) -> &mut ThermalLink {
        &mut self.thermal
    }

    pub fn ramp(&self) -> &RampController {
        &self.ramp
    }

    pub fn power_state(&self) -> PowerState {
        self.ramp.state()
    }

    /// Start of tick: latch generator requests, mark records stale, clear totals.
    pub(crate) fn begin_tick(&mut self) {
        self.requested_ratio_stored = self.requested_ratio_current.min(1.0);
        self.requested_ratio_current = 0.0;

        for record in self.ledger.values_mut() {
            record.reset_tick();
        }
        self.used_relays.clear();
        self.totals = BeamedTotals::default();
    }

    /// Direct solar heating for receivers with a reception surface.
    pub(crate) fn update_solar_input(&mut self, flux: f64, facing_factor: f64) {
        let area = self.config.solar_reception_surface_area;
        let efficiency = self.config.solar_reception_efficiency;
        if area.is_nan() || area <= 0.0 || efficiency.is_nan() || efficiency <= 0.0 {
            self.output.solar_thermal_input = 0.0;
            self.output.solar_thermal_input_max = 0.0;
            return;
        }

        let average_flux = self.solar_flux_filter.update(flux.max(0.0));
        let maximum = area * average_flux * FLUX_TO_MEGAWATT * efficiency;
        let facing = facing_factor.clamp(0.0, 1.0).powf(self.config.solar_facing_exponent);
        self.output.solar_thermal_input_max = maximum;
        self.output.solar_thermal_input = maximum * facing;
    }

    /// Forced shutdown after the waste-heat ceiling. Returns true the first
    /// time it fires since the last enable.
    pub(crate) fn overheat_shutdown(&mut self, waste_ratio: f64) -> bool {
        self.enabled = false;
        if self.overheat_warned {
            return false;
        }
        self.overheat_warned = true;
        warn!(
            receiver = %self.config.name,
            waste_heat_ratio = waste_ratio,
            "receiver overheated and was shut down"
        );
        true
    }

    /// One ramp-down tick; returns the remaining fraction.
    pub(crate) fn ramp_down(&mut self) -> f64 {
        self.output = ReceiverOutput {
            waste_heat_ratio: self.output.waste_heat_ratio,
            ..ReceiverOutput::default()
        };
        self.ramp.power_down()
    }

    pub(crate) fn ramp_up(&mut self) {
        self.ramp.power_up();
    }

    pub(crate) fn beamed_filters(&mut self) -> (&mut BeamedPowerFilter, &mut BeamedPowerFilter) {
        (&mut self.beamed_filter, &mut self.beamed_max_filter)
    }

    /// Power the ramp controller scales buffers by.
    pub fn stable_maximum_power(&self) -> f64 {
        let max = self.maximum_receive_power().unwrap_or(f64::INFINITY);
        let observed = self.beamed_max_filter.average() + self.output.solar_thermal_input_max;
        observed.min(max)
    }

    /// Writes `consumed = available * ratio` into every live record.
    pub(crate) fn apply_consumption_ratio(&mut self, ratio: f64) {
        for record in self.ledger.values_mut() {
            record.consumed_power = if record.is_alive { record.available_power * ratio } else { 0.0 };
        }
    }

    /// Zeroes this tick's claims after a failure in the tick pass.
    pub(crate) fn abort_tick(&mut self) {
        for record in self.ledger.values_mut() {
            record.current_received_power = 0.0;
            record.consumed_power = 0.0;
            record.available_power = 0.0;
            record.delivered_power = 0.0;
            record.waste_heat = 0.0;
        }
        self.totals = BeamedTotals::default();
        self.output = ReceiverOutput::default();
    }

    pub fn stored_temperature(&self) -> f64 {
        self.stored_temperature
    }

    pub fn set_stored_temperature(&mut self, temperature: f64) {
        self.stored_temperature = temperature;
    }

    pub fn persistent_state(&self) -> ReceiverPersistence {
        ReceiverPersistence {
            enabled: self.enabled,
            bandwidth_index: Some(self.bands.active_index()),
            thermal_mode: self.thermal_mode,
            solar_only: self.solar_only,
            radiator_mode: self.radiator_mode,
            minimum_consumption_percentage: self.minimum_consumption_percentage,
            maximum_consumption_percentage: self.maximum_consumption_percentage,
            stored_temperature: self.stored_temperature,
            force_activate_at_startup: self.force_activate_at_startup,
        }
    }

    /// Applies saved scalars. A force-activated receiver comes up enabled.
    pub fn restore(&mut self, saved: &ReceiverPersistence) -> BeamResult<()> {
        self.set_consumption_bounds(saved.minimum_consumption_percentage, saved.maximum_consumption_percentage)?;
        if let Some(index) = saved.bandwidth_index {
            self.bands.set_active_index(index);
        }
        self.thermal_mode = saved.thermal_mode;
        self.solar_only = saved.solar_only;
        self.radiator_mode = saved.radiator_mode;
        self.stored_temperature = saved.stored_temperature;
        self.force_activate_at_startup = saved.force_activate_at_startup;
        self.enabled = saved.enabled;
        if saved.force_activate_at_startup && !self.enabled {
            info!(receiver = %self.config.name, "receiver was force activated");
            self.enabled = true;
        }
        Ok(())
    }
}
