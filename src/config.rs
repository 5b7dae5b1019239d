use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::bandwidth::BandwidthConfiguration;
use crate::error::{BeamError, BeamResult};
use crate::generator::GeneratorConfig;
use crate::network::PowerBeam;
use crate::pool::ResourceKind;
use crate::ramp::DEFAULT_RAMP_STEP;
use crate::thermal::{AttachKind, SearchDepth};

pub const DEFAULT_TICK_PERIOD_MS: u64 = 1000;
pub const DEFAULT_OVERHEAT_CEILING: f64 = 0.95;
pub const DEFAULT_TELEMETRY_PORT: u16 = 8080;
pub const DEFAULT_THERMAL_WASTE_HEAT_FACTOR: f64 = 0.05;

/// How claims are ordered when several receivers draw on one transmitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FairnessPolicy {
    /// Greedy claims in ascending `supply_priority`, then ascending id.
    #[default]
    Priority,
    /// Oversubscribed transmitters scale every request by capacity / demand.
    Proportional,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub tick_period_ms: u64,
    pub fairness: FairnessPolicy,
    /// Waste-heat fill ratio at which electric receivers shut down.
    pub overheat_ceiling: f64,
    pub ramp_step: f64,
    /// Disables waste heat production and the overheat shutdown.
    pub ignore_max_temperature: bool,
    pub telemetry_port: u16,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: DEFAULT_TICK_PERIOD_MS,
            fairness: FairnessPolicy::Priority,
            overheat_ceiling: DEFAULT_OVERHEAT_CEILING,
            ramp_step: DEFAULT_RAMP_STEP,
            ignore_max_temperature: false,
            telemetry_port: DEFAULT_TELEMETRY_PORT,
        }
    }
}

impl SimulationConfig {
    pub fn dt_seconds(&self) -> f64 {
        self.tick_period_ms.max(1) as f64 / 1000.0
    }

    pub fn validate(&self) -> BeamResult<()> {
        if self.overheat_ceiling.is_nan() || self.overheat_ceiling <= 0.0 || self.overheat_ceiling > 1.0 {
            return Err(BeamError::config(format!(
                "overheat ceiling {} outside (0, 1]",
                self.overheat_ceiling
            )));
        }
        if self.ramp_step.is_nan() || self.ramp_step <= 0.0 || self.ramp_step > 1.0 {
            return Err(BeamError::config(format!("ramp step {} outside (0, 1]", self.ramp_step)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiverShape {
    Dish,
    Panel,
    Bare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiverKind {
    Solar,
    Microwave,
    Photovoltaic,
    Rectenna,
    Thermal,
    Beamed,
}

/// Everything that distinguishes one receiver model from another.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub name: String,
    pub shape: ReceiverShape,
    pub kind: ReceiverKind,
    /// Metres.
    pub diameter: f64,
    pub is_thermal_receiver: bool,
    pub is_thermal_slave: bool,
    pub can_switch_bandwidth: bool,
    pub thermal_mode: bool,
    /// MW limits; `None` leaves the receiver unlimited.
    pub maximum_power: Option<f64>,
    pub maximum_thermal_power: Option<f64>,
    pub maximum_electric_power: Option<f64>,
    pub electric_max_efficiency: f64,
    pub electric_waste_heat_exponent: f64,
    pub thermal_waste_heat_factor: f64,
    /// Square metres.
    pub solar_reception_surface_area: f64,
    pub solar_reception_efficiency: f64,
    pub solar_electric_efficiency: f64,
    pub solar_facing_exponent: f64,
    pub minimum_consumption_percentage: f64,
    pub maximum_consumption_percentage: f64,
    pub supply_priority: u8,
    /// Tonnes; sizes the waste-heat buffer.
    pub mass: f64,
    pub auto_deploy: bool,
    pub thermal_search: SearchDepth,
    pub target_wavelength: Option<f64>,
    pub bandwidths: Vec<BandwidthConfiguration>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self::preset(ReceiverKind::Microwave, ReceiverShape::Dish)
    }
}

fn microwave_bands() -> Vec<BandwidthConfiguration> {
    vec![
        BandwidthConfiguration::new("Long Microwave", 1e-2, 1.0, 90.0, 85.0).with_target(0.125),
        BandwidthConfiguration::new("Short Microwave", 1e-3, 1e-2, 88.0, 80.0).with_target(0.003),
    ]
}

fn optical_bands() -> Vec<BandwidthConfiguration> {
    vec![
        BandwidthConfiguration::new("Infrared", 7e-7, 1e-3, 85.0, 45.0).with_target(1.06e-6),
        BandwidthConfiguration::new("Visible", 4e-7, 7e-7, 80.0, 55.0).with_target(5.5e-7),
        BandwidthConfiguration::new("Ultraviolet", 1e-8, 4e-7, 70.0, 35.0).with_target(3.5e-7),
    ]
}

impl ReceiverConfig {
    /// Default geometry and bands for a receiver model.
    pub fn preset(kind: ReceiverKind, shape: ReceiverShape) -> Self {
        let diameter = match shape {
            ReceiverShape::Dish => 10.0,
            ReceiverShape::Panel => 5.0,
            ReceiverShape::Bare => 2.5,
        };
        let area = match shape {
            ReceiverShape::Dish => core::f64::consts::PI * (diameter / 2.0) * (diameter / 2.0),
            ReceiverShape::Panel => diameter * diameter,
            ReceiverShape::Bare => 0.5 * diameter * diameter,
        };

        let mut config = Self {
            name: format!("{kind:?} {shape:?}"),
            shape,
            kind,
            diameter,
            is_thermal_receiver: false,
            is_thermal_slave: false,
            can_switch_bandwidth: false,
            thermal_mode: false,
            maximum_power: None,
            maximum_thermal_power: None,
            maximum_electric_power: None,
            electric_max_efficiency: 1.0,
            electric_waste_heat_exponent: 1.0,
            thermal_waste_heat_factor: DEFAULT_THERMAL_WASTE_HEAT_FACTOR,
            solar_reception_surface_area: 0.0,
            solar_reception_efficiency: 0.0,
            solar_electric_efficiency: 0.33,
            solar_facing_exponent: 1.0,
            minimum_consumption_percentage: 0.0,
            maximum_consumption_percentage: 100.0,
            supply_priority: 1,
            mass: 1.0,
            auto_deploy: false,
            thermal_search: SearchDepth::default(),
            target_wavelength: None,
            bandwidths: microwave_bands(),
        };

        match kind {
            ReceiverKind::Microwave => {}
            ReceiverKind::Rectenna => {
                config.bandwidths = vec![
                    BandwidthConfiguration::new("Rectenna", 1e-3, 1.0, 0.0, 85.0).with_target(0.125)
                ];
            }
            ReceiverKind::Photovoltaic => {
                config.bandwidths = vec![
                    BandwidthConfiguration::new("Photovoltaic", 4e-7, 1.1e-6, 0.0, 60.0).with_target(8.5e-7)
                ];
            }
            ReceiverKind::Solar => {
                config.bandwidths = vec![
                    BandwidthConfiguration::new("Visible", 4e-7, 7e-7, 0.0, 40.0).with_target(5.5e-7)
                ];
                config.solar_reception_surface_area = area;
                config.solar_reception_efficiency = 0.9;
            }
            ReceiverKind::Thermal => {
                config.is_thermal_receiver = true;
                config.thermal_mode = true;
                config.bandwidths = optical_bands();
                config.bandwidths.extend(microwave_bands());
                config.solar_reception_surface_area = area;
                config.solar_reception_efficiency = 0.85;
            }
            ReceiverKind::Beamed => {
                config.can_switch_bandwidth = true;
                config.bandwidths = optical_bands();
                config.bandwidths.extend(microwave_bands());
            }
        }
        config
    }

    #[must_use]
    pub fn named(mut self, name: &str) -> Self {
        self.name = name.into();
        self
    }

    pub fn validate(&self) -> BeamResult<()> {
        if self.bandwidths.is_empty() {
            return Err(BeamError::EmptyBandwidthList { receiver: self.name.clone() });
        }
        let (lo, hi) = (self.minimum_consumption_percentage, self.maximum_consumption_percentage);
        if !(0.0..=100.0).contains(&lo) || !(0.0..=100.0).contains(&hi) || lo > hi {
            return Err(BeamError::config(format!(
                "receiver '{}' consumption bounds [{lo}, {hi}] invalid",
                self.name
            )));
        }
        for (what, limit) in [
            ("maximum power", self.maximum_power),
            ("maximum thermal power", self.maximum_thermal_power),
            ("maximum electric power", self.maximum_electric_power),
        ] {
            if limit.is_some_and(|l| l.is_nan() || l < 0.0) {
                return Err(BeamError::config(format!("receiver '{}' {what} is negative", self.name)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceAmount {
    pub kind: ResourceKind,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartSpec {
    pub name: String,
    #[serde(default)]
    pub parent: Option<usize>,
    #[serde(default)]
    pub attach: AttachKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformSpec {
    pub name: String,
    #[serde(default)]
    pub parts: Vec<PartSpec>,
    #[serde(default)]
    pub capacities: Vec<ResourceAmount>,
    #[serde(default)]
    pub demands: Vec<ResourceAmount>,
    /// W/m².
    #[serde(default)]
    pub solar_flux: f64,
    #[serde(default = "default_facing")]
    pub solar_facing: f64,
}

fn default_facing() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransmitterSpec {
    pub name: String,
    pub platform: u32,
    pub deliverable_power_mw: f64,
    #[serde(default)]
    pub relay_chain_cap_mw: Option<f64>,
    pub beams: Vec<PowerBeam>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySpec {
    pub name: String,
    pub power_capacity_mw: f64,
    #[serde(default = "default_aperture")]
    pub aperture: f64,
    pub min_wavelength: f64,
    pub max_wavelength: f64,
}

fn default_aperture() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverSpec {
    pub platform: u32,
    #[serde(default)]
    pub part: usize,
    #[serde(default)]
    pub config: ReceiverConfig,
    #[serde(default)]
    pub persistence: Option<crate::receiver::ReceiverPersistence>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSpec {
    pub transmitter: u32,
    pub receiver: u32,
    pub efficiency: f64,
    #[serde(default)]
    pub distance: f64,
    #[serde(default)]
    pub spot_size: f64,
    #[serde(default = "default_facing")]
    pub facing_factor: f64,
    #[serde(default)]
    pub relays: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorSpec {
    pub platform: u32,
    #[serde(flatten)]
    pub config: GeneratorConfig,
}

/// A complete network loaded from JSON. Ids are positions in each list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub config: SimulationConfig,
    #[serde(default)]
    pub platforms: Vec<PlatformSpec>,
    #[serde(default)]
    pub transmitters: Vec<TransmitterSpec>,
    #[serde(default)]
    pub relays: Vec<RelaySpec>,
    #[serde(default)]
    pub receivers: Vec<ReceiverSpec>,
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
    #[serde(default)]
    pub generators: Vec<GeneratorSpec>,
}

impl Scenario {
    pub fn from_json_str(json: &str) -> BeamResult<Self> {
        let scenario: Scenario = serde_json::from_str(json)?;
        scenario.config.validate()?;
        Ok(scenario)
    }

    pub fn load(path: impl AsRef<Path>) -> BeamResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_pretty(&self) -> BeamResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Two stations sharing one microwave transmitter, one of them fed
    /// through a relay, plus a thermal receiver with a slave panel.
    pub fn demo() -> Self {
        let platform = |name: &str, parts: Vec<PartSpec>| PlatformSpec {
            name: name.into(),
            parts,
            capacities: vec![
                ResourceAmount { kind: ResourceKind::Megajoules, amount: 500.0 },
                ResourceAmount { kind: ResourceKind::WasteHeat, amount: 5000.0 },
            ],
            demands: vec![
                ResourceAmount { kind: ResourceKind::Megajoules, amount: 45.0 },
                ResourceAmount { kind: ResourceKind::ThermalPower, amount: 30.0 },
                ResourceAmount { kind: ResourceKind::WasteHeat, amount: 25.0 },
            ],
            solar_flux: 1361.0,
            solar_facing: 0.8,
        };
        let part = |name: &str, parent: Option<usize>, attach: AttachKind| PartSpec {
            name: name.into(),
            parent,
            attach,
        };

        Scenario {
            config: SimulationConfig::default(),
            platforms: vec![
                platform("Helios Array", vec![part("core", None, AttachKind::Stack)]),
                platform(
                    "Outpost Kerbin",
                    vec![
                        part("core", None, AttachKind::Stack),
                        part("dish mount", Some(0), AttachKind::Stack),
                        part("thermal core", Some(0), AttachKind::Stack),
                        part("panel", Some(2), AttachKind::Surface),
                    ],
                ),
                platform("Relay Station", vec![part("core", None, AttachKind::Stack)]),
            ],
            transmitters: vec![TransmitterSpec {
                name: "Helios Phased Array".into(),
                platform: 0,
                deliverable_power_mw: 100.0,
                relay_chain_cap_mw: None,
                beams: vec![
                    PowerBeam::new(0.003, 80_000.0, 0.0),
                    PowerBeam::new(1.06e-6, 0.0, 40_000.0),
                ],
            }],
            relays: vec![RelaySpec {
                name: "Lagrange Mirror".into(),
                power_capacity_mw: 35.0,
                aperture: 25.0,
                min_wavelength: 1e-7,
                max_wavelength: 1.0,
            }],
            receivers: vec![
                ReceiverSpec {
                    platform: 1,
                    part: 1,
                    config: ReceiverConfig::preset(ReceiverKind::Microwave, ReceiverShape::Dish)
                        .named("Outpost Rectenna Dish"),
                    persistence: None,
                },
                ReceiverSpec {
                    platform: 1,
                    part: 2,
                    config: ReceiverConfig::preset(ReceiverKind::Thermal, ReceiverShape::Dish)
                        .named("Outpost Thermal Receiver"),
                    persistence: None,
                },
                ReceiverSpec {
                    platform: 1,
                    part: 3,
                    config: ReceiverConfig {
                        is_thermal_slave: true,
                        ..ReceiverConfig::preset(ReceiverKind::Thermal, ReceiverShape::Panel)
                            .named("Outpost Thermal Panel")
                    },
                    persistence: None,
                },
                ReceiverSpec {
                    platform: 2,
                    part: 0,
                    config: ReceiverConfig::preset(ReceiverKind::Photovoltaic, ReceiverShape::Panel)
                        .named("Relay Station Photovoltaic"),
                    persistence: None,
                },
            ],
            routes: vec![
                RouteSpec {
                    transmitter: 0,
                    receiver: 0,
                    efficiency: 0.9,
                    distance: 2.1e7,
                    spot_size: 8.0,
                    facing_factor: 1.0,
                    relays: Vec::new(),
                },
                RouteSpec {
                    transmitter: 0,
                    receiver: 1,
                    efficiency: 0.8,
                    distance: 2.1e7,
                    spot_size: 3.5,
                    facing_factor: 0.9,
                    relays: Vec::new(),
                },
                RouteSpec {
                    transmitter: 0,
                    receiver: 2,
                    efficiency: 0.8,
                    distance: 2.1e7,
                    spot_size: 3.5,
                    facing_factor: 0.7,
                    relays: Vec::new(),
                },
                RouteSpec {
                    transmitter: 0,
                    receiver: 3,
                    efficiency: 0.7,
                    distance: 4.4e8,
                    spot_size: 12.0,
                    facing_factor: 1.0,
                    relays: vec![0],
                },
            ],
            generators: vec![GeneratorSpec {
                platform: 2,
                config: GeneratorConfig::default(),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        for kind in [
            ReceiverKind::Solar,
            ReceiverKind::Microwave,
            ReceiverKind::Photovoltaic,
            ReceiverKind::Rectenna,
            ReceiverKind::Thermal,
            ReceiverKind::Beamed,
        ] {
            for shape in [ReceiverShape::Dish, ReceiverShape::Panel, ReceiverShape::Bare] {
                let config = ReceiverConfig::preset(kind, shape);
                assert!(config.validate().is_ok(), "{kind:?} {shape:?}");
            }
        }
    }

    #[test]
    fn test_partial_receiver_json_uses_defaults() {
        let config: ReceiverConfig =
            serde_json::from_str(r#"{"name": "Spare Dish", "minimum_consumption_percentage": 10.0}"#).unwrap();
        assert_eq!(config.name, "Spare Dish");
        assert_eq!(config.minimum_consumption_percentage, 10.0);
        assert_eq!(config.kind, ReceiverKind::Microwave);
        assert!(!config.bandwidths.is_empty());
    }

    #[test]
    fn test_invalid_consumption_bounds() {
        let config = ReceiverConfig {
            minimum_consumption_percentage: 80.0,
            maximum_consumption_percentage: 20.0,
            ..ReceiverConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_demo_round_trips_through_json() {
        let json = Scenario::demo().to_json_pretty().unwrap();
        let scenario = Scenario::from_json_str(&json).unwrap();
        assert_eq!(scenario.receivers.len(), 4);
        assert_eq!(scenario.routes[3].relays, vec![0]);
    }

    #[test]
    fn test_rejects_bad_overheat_ceiling() {
        let result = Scenario::from_json_str(r#"{"config": {"overheat_ceiling": 1.5}}"#);
        assert!(matches!(result, Err(BeamError::Config(_))));
    }
}
