//! Read-only snapshots of the simulation and the text formatting used to
//! present them. Nothing outside this module formats values for display.

use alloc::vec::Vec;
use arrayvec::ArrayString;
use core::fmt::Write;
use serde::{Deserialize, Serialize};

use crate::config::FairnessPolicy;
use crate::error::BeamResult;
use crate::generator::GeneratorOutput;
use crate::network::{PlatformId, ReceiverId, Route, RouteResolver, TransmitterId};
use crate::pool::{ResourceKind, ResourceLevel};
use crate::ramp::PowerState;
use crate::receiver::{BeamedTotals, ReceivedPowerRecord, Receiver, ReceiverOutput};
use crate::simulation::{Platform, Simulation, SimulationEvent};

pub const LABEL_CAPACITY: usize = 24;
pub const WAVELENGTH_LIST_CAPACITY: usize = 96;

pub type Label = ArrayString<LABEL_CAPACITY>;
pub type WavelengthList = ArrayString<WAVELENGTH_LIST_CAPACITY>;

// Labels are bounded; a value too long for the buffer is cut off.
fn label(args: core::fmt::Arguments<'_>) -> Label {
    let mut out = Label::new();
    let _ = out.write_fmt(args);
    out
}

fn trimmed(value: f64) -> Label {
    let mut out = label(format_args!("{value:.3}"));
    if out.contains('.') {
        while out.ends_with('0') {
            out.pop();
        }
        if out.ends_with('.') {
            out.pop();
        }
    }
    out
}

/// Wavelength in metres.
pub fn format_wavelength(wavelength: f64) -> Label {
    let (value, unit) = if wavelength > 1.0e-3 {
        (wavelength * 1.0e3, "mm")
    } else if wavelength > 7.5e-7 {
        (wavelength * 1.0e6, "µm")
    } else if wavelength > 1.0e-9 {
        (wavelength * 1.0e9, "nm")
    } else {
        (wavelength * 1.0e12, "pm")
    };
    label(format_args!("{} {unit}", trimmed(value)))
}

/// Distance in metres.
pub fn format_distance(distance: f64) -> Label {
    if distance >= 1.0e16 {
        label(format_args!("{:.2} Pm", distance / 1.0e15))
    } else if distance >= 1.0e13 {
        label(format_args!("{:.2} Tm", distance / 1.0e12))
    } else if distance >= 1.0e10 {
        label(format_args!("{:.2} Gm", distance / 1.0e9))
    } else if distance >= 1.0e7 {
        label(format_args!("{:.2} Mm", distance / 1.0e6))
    } else if distance >= 1.0e4 {
        label(format_args!("{:.2} km", distance / 1.0e3))
    } else {
        label(format_args!("{distance:.0} m"))
    }
}

/// Spot diameter in metres.
pub fn format_spot_size(spot_size: f64) -> Label {
    if spot_size > 1.0e3 {
        label(format_args!("{:.3} km", spot_size * 1.0e-3))
    } else if spot_size > 1.0 {
        label(format_args!("{spot_size:.2} m"))
    } else {
        label(format_args!("{:.0} mm", spot_size * 1.0e3))
    }
}

/// Power in MW.
pub fn format_power(power: f64) -> Label {
    if power >= 1000.0 {
        label(format_args!("{:.1} GW", power / 1000.0))
    } else if power >= 1.0 {
        label(format_args!("{power:.1} MW"))
    } else if power >= 1.0e-3 {
        label(format_args!("{:.1} kW", power * 1000.0))
    } else {
        label(format_args!("{:.1} W", power * 1.0e6))
    }
}

pub fn format_wavelengths(wavelengths: &[f64]) -> WavelengthList {
    let mut out = WavelengthList::new();
    for (i, wavelength) in wavelengths.iter().enumerate() {
        let separator = if i == 0 { "" } else { ", " };
        if out.try_push_str(separator).is_err() || out.try_push_str(&format_wavelength(*wavelength)).is_err() {
            break;
        }
    }
    out
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSnapshot {
    pub efficiency: f64,
    pub distance: f64,
    pub distance_label: String,
    pub spot_size: f64,
    pub spot_size_label: String,
    pub facing_factor: f64,
    pub relays: Vec<u32>,
}

impl From<&Route> for RouteSnapshot {
    fn from(route: &Route) -> Self {
        Self {
            efficiency: route.efficiency,
            distance: route.distance,
            distance_label: format_distance(route.distance).to_string(),
            spot_size: route.spot_size,
            spot_size_label: format_spot_size(route.spot_size).to_string(),
            facing_factor: route.facing_factor,
            relays: route.relays.iter().map(|r| r.0).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub transmitter: TransmitterId,
    pub transmitter_name: String,
    pub is_alive: bool,
    pub route: Option<RouteSnapshot>,
    pub wavelengths: String,
    pub transmit_power: f64,
    pub network_capacity: f64,
    pub power_usage_others: f64,
    pub available_power: f64,
    pub consumed_power: f64,
    pub receiver_efficiency: f64,
    pub available_label: String,
    pub consumed_label: String,
    pub network_label: String,
}

impl RecordSnapshot {
    pub fn new(record: &ReceivedPowerRecord, transmitter_name: &str) -> Self {
        Self {
            transmitter: record.transmitter,
            transmitter_name: transmitter_name.into(),
            is_alive: record.is_alive,
            route: record.route.as_ref().map(RouteSnapshot::from),
            wavelengths: format_wavelengths(&record.wavelengths).to_string(),
            transmit_power: record.transmit_power,
            network_capacity: record.network_capacity,
            power_usage_others: record.power_usage_others,
            available_power: record.available_power,
            consumed_power: record.consumed_power,
            receiver_efficiency: record.receiver_efficiency,
            available_label: format_power(record.available_power).to_string(),
            consumed_label: format_power(record.consumed_power).to_string(),
            network_label: format_power(record.network_capacity).to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverSnapshot {
    pub id: ReceiverId,
    pub name: String,
    pub platform: PlatformId,
    pub enabled: bool,
    pub power_state: PowerState,
    pub ramp_fraction: f64,
    pub thermal_mode: bool,
    pub solar_only: bool,
    pub active_band: String,
    pub thermal_master: Option<ReceiverId>,
    pub thermal_slaves: Vec<ReceiverId>,
    pub totals: BeamedTotals,
    pub output: ReceiverOutput,
    pub delivered_label: String,
    pub records: Vec<RecordSnapshot>,
}

impl ReceiverSnapshot {
    pub fn collect<R: RouteResolver>(receiver: &Receiver, sim: &Simulation<R>) -> Self {
        let records = receiver
            .ledger()
            .values()
            .map(|record| {
                let name = sim.transmitter(record.transmitter).map_or("detached", |tx| tx.name());
                RecordSnapshot::new(record, name)
            })
            .collect();
        Self {
            id: receiver.id(),
            name: receiver.name().into(),
            platform: receiver.platform(),
            enabled: receiver.is_enabled(),
            power_state: receiver.power_state(),
            ramp_fraction: receiver.ramp().fraction(),
            thermal_mode: receiver.is_thermal_mode(),
            solar_only: receiver.is_solar_only(),
            active_band: receiver.bands().active_band().name.clone(),
            thermal_master: receiver.thermal_link().master(),
            thermal_slaves: receiver.thermal_link().slaves().to_vec(),
            totals: receiver.totals().clone(),
            output: receiver.output().clone(),
            delivered_label: format_power(receiver.output().supplied_power).to_string(),
            records,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorSnapshot {
    pub name: String,
    pub fault: Option<String>,
    pub output: GeneratorOutput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformSnapshot {
    pub id: PlatformId,
    pub name: String,
    pub solar_flux: f64,
    pub levels: Vec<ResourceLevel>,
    pub generators: Vec<GeneratorSnapshot>,
}

impl From<&Platform> for PlatformSnapshot {
    fn from(platform: &Platform) -> Self {
        Self {
            id: platform.id(),
            name: platform.name().into(),
            solar_flux: platform.solar_conditions().0,
            levels: ResourceKind::ALL.iter().map(|kind| platform.pool().level(*kind)).collect(),
            generators: platform
                .generators()
                .iter()
                .map(|g| GeneratorSnapshot {
                    name: g.name().into(),
                    fault: g.fault().map(String::from),
                    output: g.output(),
                })
                .collect(),
        }
    }
}

/// Everything a monitor needs after one tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryFrame {
    pub tick: u64,
    pub fairness: FairnessPolicy,
    pub platforms: Vec<PlatformSnapshot>,
    pub receivers: Vec<ReceiverSnapshot>,
    pub events: Vec<SimulationEvent>,
}

impl TelemetryFrame {
    pub fn collect<R: RouteResolver>(sim: &Simulation<R>) -> Self {
        Self {
            tick: sim.tick_count(),
            fairness: sim.config().fairness,
            platforms: sim.platforms().map(PlatformSnapshot::from).collect(),
            receivers: sim.receivers().map(|r| ReceiverSnapshot::collect(r, sim)).collect(),
            events: sim.events().iter().cloned().collect(),
        }
    }

    pub fn to_json(&self) -> BeamResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn receiver(&self, id: ReceiverId) -> Option<&ReceiverSnapshot> {
        self.receivers.iter().find(|r| r.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wavelength_units() {
        assert_eq!(format_wavelength(0.003).as_str(), "3 mm");
        assert_eq!(format_wavelength(1.06e-6).as_str(), "1.06 µm");
        assert_eq!(format_wavelength(5.0e-7).as_str(), "500 nm");
        assert_eq!(format_wavelength(1.0e-10).as_str(), "100 pm");
    }

    #[test]
    fn test_distance_units() {
        assert_eq!(format_distance(500.0).as_str(), "500 m");
        assert_eq!(format_distance(12_500.0).as_str(), "12.50 km");
        assert_eq!(format_distance(3.0e7).as_str(), "30.00 Mm");
        assert_eq!(format_distance(2.0e16).as_str(), "20.00 Pm");
    }

    #[test]
    fn test_power_units() {
        assert_eq!(format_power(2500.0).as_str(), "2.5 GW");
        assert_eq!(format_power(80.0).as_str(), "80.0 MW");
        assert_eq!(format_power(0.25).as_str(), "250.0 kW");
        assert_eq!(format_power(0.0).as_str(), "0.0 W");
    }

    #[test]
    fn test_spot_size_units() {
        assert_eq!(format_spot_size(0.5).as_str(), "500 mm");
        assert_eq!(format_spot_size(12.0).as_str(), "12.00 m");
        assert_eq!(format_spot_size(2500.0).as_str(), "2.500 km");
    }

    #[test]
    fn test_wavelength_list_joins() {
        assert_eq!(format_wavelengths(&[0.003, 1.06e-6]).as_str(), "3 mm, 1.06 µm");
        assert!(format_wavelengths(&[]).is_empty());
    }
}
