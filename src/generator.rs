use heapless::Vec;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{BeamError, BeamResult};
use crate::pool::{ResourceKind, ResourcePool};

pub const MAX_GENERATOR_INPUTS: usize = 4;

/// Share of consumed surplus that ends up back in storage when recharging.
const RECHARGE_EFFICIENCY: f64 = 0.995;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub name: String,
    /// MW.
    pub maximum_power: f64,
    pub can_recharge: bool,
    pub efficiency: f64,
    /// Comma- or semicolon-separated stored resource names.
    pub input_resources: String,
    /// Units of each input consumed per MJ of raw energy, same order.
    pub input_conversion_rates: String,
    pub power_percentage: f64,
    /// Units each input tank holds.
    pub storage_capacity: f64,
    /// Initial fill fraction.
    pub initial_fill: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            name: "Battery Generator".into(),
            maximum_power: 5.0,
            can_recharge: true,
            efficiency: 0.9,
            input_resources: "KilowattHour".into(),
            input_conversion_rates: "0.2777778".into(),
            power_percentage: 100.0,
            storage_capacity: 1000.0,
            initial_fill: 1.0,
        }
    }
}

pub fn parse_names(list: &str) -> alloc::vec::Vec<String> {
    list.split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

pub fn parse_rates(list: &str) -> BeamResult<alloc::vec::Vec<f64>> {
    list.split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s.parse::<f64>() {
            Ok(rate) if rate.is_finite() && rate > 0.0 => Ok(rate),
            _ => Err(BeamError::MalformedConversionRates(list.into())),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredInput {
    pub name: String,
    pub rate: f64,
    pub amount: f64,
    pub capacity: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GeneratorOutput {
    pub supplied: f64,
    pub waste_heat: f64,
    pub fuel_ratio: f64,
    pub recharged: f64,
}

/// Turns stored charge into electrical power, refilling from surplus.
#[derive(Debug, Clone)]
pub struct BatteryGenerator {
    config: GeneratorConfig,
    inputs: Vec<StoredInput, MAX_GENERATOR_INPUTS>,
    fault: Option<String>,
    output: GeneratorOutput,
}

impl BatteryGenerator {
    /// Bad conversion-rate lists leave the generator in place but inert.
    pub fn new(config: GeneratorConfig) -> Self {
        let mut generator = Self {
            inputs: Vec::new(),
            fault: None,
            output: GeneratorOutput::default(),
            config,
        };
        if let Err(e) = generator.load_inputs() {
            warn!(generator = %generator.config.name, error = %e, "generator inputs rejected");
            generator.inputs.clear();
            generator.fault = Some(e.to_string());
        }
        generator
    }

    fn load_inputs(&mut self) -> BeamResult<()> {
        let names = parse_names(&self.config.input_resources);
        let rates = parse_rates(&self.config.input_conversion_rates)?;
        if names.len() != rates.len() {
            return Err(BeamError::MalformedConversionRates(self.config.input_conversion_rates.clone()));
        }
        let capacity = self.config.storage_capacity.max(0.0);
        let fill = self.config.initial_fill.clamp(0.0, 1.0);
        for (name, rate) in names.into_iter().zip(rates) {
            self.inputs
                .push(StoredInput {
                    name,
                    rate,
                    amount: capacity * fill,
                    capacity,
                })
                .map_err(|_| BeamError::CapacityExceeded {
                    what: "generator inputs",
                    capacity: MAX_GENERATOR_INPUTS,
                })?;
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn fault(&self) -> Option<&str> {
        self.fault.as_deref()
    }

    pub fn inputs(&self) -> &[StoredInput] {
        &self.inputs
    }

    pub fn output(&self) -> GeneratorOutput {
        self.output
    }

    pub fn set_power_percentage(&mut self, percentage: f64) {
        self.config.power_percentage = percentage.clamp(0.0, 100.0);
    }

    pub fn current_maximum_power(&self) -> f64 {
        self.config.maximum_power.max(0.0) * self.config.power_percentage / 100.0
    }

    fn overheating_multiplier(&self, waste_ratio: f64) -> f64 {
        let efficiency = self.config.efficiency;
        if waste_ratio < efficiency {
            1.0
        } else {
            (1.0 - (waste_ratio - efficiency)).max(0.0)
        }
    }

    pub fn tick<P: ResourcePool>(&mut self, pool: &mut P, dt_seconds: f64) -> GeneratorOutput {
        self.output = GeneratorOutput::default();
        let efficiency = self.config.efficiency;
        let idle = self.inputs.is_empty()
            || efficiency.is_nan()
            || efficiency <= 0.0
            || dt_seconds.is_nan()
            || dt_seconds <= 0.0;
        if idle {
            return self.output;
        }

        let waste_ratio = pool.current_fill_ratio(ResourceKind::WasteHeat);
        let wanted = pool.current_unfilled_demand(ResourceKind::Megajoules)
            + pool.current_spare_capacity(ResourceKind::Megajoules);
        let needed = self.overheating_multiplier(waste_ratio) * wanted.min(self.current_maximum_power());

        if needed > 0.0 {
            let raw_needed = needed / efficiency;
            let fuel_ratio = self
                .inputs
                .iter()
                .map(|input| {
                    let required = raw_needed * input.rate * dt_seconds;
                    if required > 0.0 { (input.amount / required).min(1.0) } else { 1.0 }
                })
                .fold(1.0_f64, f64::min);

            let supplied = pool.request_supply(ResourceKind::Megajoules, raw_needed * fuel_ratio * efficiency, 0.0);
            let raw_used = supplied / efficiency;
            for input in &mut self.inputs {
                input.amount = (input.amount - raw_used * input.rate * dt_seconds).max(0.0);
            }
            let waste_heat = raw_used * (1.0 - efficiency);
            if waste_heat > 0.0 {
                pool.request_supply(ResourceKind::WasteHeat, waste_heat, 1.0);
            }
            self.output = GeneratorOutput {
                supplied,
                waste_heat,
                fuel_ratio,
                recharged: 0.0,
            };
        } else if self.config.can_recharge {
            let room: f64 = self
                .inputs
                .iter()
                .map(|input| (input.capacity - input.amount).max(0.0) / input.rate / dt_seconds)
                .fold(f64::INFINITY, f64::min);
            let request = room.min(self.current_maximum_power());
            if request > 0.0 {
                let taken = pool.request_consumption(ResourceKind::Megajoules, request);
                let stored = taken * RECHARGE_EFFICIENCY;
                for input in &mut self.inputs {
                    input.amount = (input.amount + stored * input.rate * dt_seconds).min(input.capacity);
                }
                debug!(generator = %self.config.name, recharged = stored, "generator recharging");
                self.output.recharged = stored;
            }
        }
        self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PlatformPool;

    #[test]
    fn test_parse_lists() {
        assert_eq!(parse_names(" KilowattHour ; LqdHydrogen,"), ["KilowattHour", "LqdHydrogen"]);
        assert_eq!(parse_rates("0.5, 2").unwrap(), [0.5, 2.0]);
        assert!(matches!(parse_rates("0.5, two"), Err(BeamError::MalformedConversionRates(_))));
        assert!(parse_rates("-1").is_err());
    }

    #[test]
    fn test_malformed_rates_leave_generator_inert() {
        let mut generator = BatteryGenerator::new(GeneratorConfig {
            input_conversion_rates: "fast".into(),
            ..GeneratorConfig::default()
        });
        assert!(generator.fault().is_some());

        let mut pool = PlatformPool::new(1.0);
        pool.set_demand(ResourceKind::Megajoules, 10.0);
        pool.begin_tick();
        assert_eq!(generator.tick(&mut pool, 1.0).supplied, 0.0);
    }

    #[test]
    fn test_mismatched_lists_are_malformed() {
        let generator = BatteryGenerator::new(GeneratorConfig {
            input_resources: "A, B".into(),
            input_conversion_rates: "1.0".into(),
            ..GeneratorConfig::default()
        });
        assert!(generator.fault().is_some());
        assert!(generator.inputs().is_empty());
    }

    #[test]
    fn test_covers_demand_and_heats() {
        let mut generator = BatteryGenerator::new(GeneratorConfig::default());
        let mut pool = PlatformPool::new(1.0);
        pool.set_demand(ResourceKind::Megajoules, 3.0);
        pool.set_base_capacity(ResourceKind::WasteHeat, 100.0);
        pool.begin_tick();

        let output = generator.tick(&mut pool, 1.0);
        assert!((output.supplied - 3.0).abs() < 1e-9);
        assert!((output.waste_heat - 3.0 / 0.9 * 0.1).abs() < 1e-9);
        assert!(generator.inputs()[0].amount < 1000.0);
    }

    #[test]
    fn test_recharges_from_surplus() {
        let mut generator = BatteryGenerator::new(GeneratorConfig {
            initial_fill: 0.5,
            ..GeneratorConfig::default()
        });
        let mut surplus_pool = PlatformPool::new(1.0);
        surplus_pool.set_base_capacity(ResourceKind::Megajoules, 50.0);
        surplus_pool.set_stored(ResourceKind::Megajoules, 50.0);
        surplus_pool.begin_tick();
        let before = generator.inputs()[0].amount;
        let output = generator.tick(&mut surplus_pool, 1.0);
        assert!(output.recharged > 0.0);
        assert!(generator.inputs()[0].amount > before);
    }
}
