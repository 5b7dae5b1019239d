use heapless::Vec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BeamError, BeamResult};

pub const MAX_BANDWIDTH_CONFIGURATIONS: usize = 8;

/// Wavelength used by `load_initial` when no target is configured.
pub const DEFAULT_TARGET_WAVELENGTH: f64 = 1.0;

/// One wavelength band a receiver can convert, with its efficiency curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandwidthConfiguration {
    pub name: String,
    pub min_wavelength: f64,
    pub max_wavelength: f64,
    pub target_wavelength: f64,
    pub thermal_efficiency_percentage: f64,
    pub electric_efficiency_percentage: f64,
}

impl BandwidthConfiguration {
    pub fn new(name: &str, min_wavelength: f64, max_wavelength: f64, thermal_pct: f64, electric_pct: f64) -> Self {
        Self {
            name: name.into(),
            min_wavelength,
            max_wavelength,
            target_wavelength: (min_wavelength * max_wavelength).sqrt(),
            thermal_efficiency_percentage: thermal_pct,
            electric_efficiency_percentage: electric_pct,
        }
    }

    #[must_use]
    pub fn with_target(mut self, target_wavelength: f64) -> Self {
        self.target_wavelength = target_wavelength;
        self
    }

    pub fn contains(&self, wavelength: f64) -> bool {
        wavelength >= self.min_wavelength && wavelength <= self.max_wavelength
    }

    /// Conversion efficiency as a fraction for the given mode.
    pub fn efficiency_fraction(&self, thermal_mode: bool) -> f64 {
        let pct = if thermal_mode {
            self.thermal_efficiency_percentage
        } else {
            self.electric_efficiency_percentage
        };
        pct / 100.0
    }

    fn validate(&self) -> BeamResult<()> {
        let finite = self.min_wavelength.is_finite() && self.max_wavelength.is_finite();
        if !finite || self.min_wavelength <= 0.0 || self.min_wavelength > self.max_wavelength {
            return Err(BeamError::config(format!(
                "bandwidth '{}' has invalid interval [{}, {}]",
                self.name, self.min_wavelength, self.max_wavelength
            )));
        }
        for pct in [self.thermal_efficiency_percentage, self.electric_efficiency_percentage] {
            if !(0.0..=100.0).contains(&pct) {
                return Err(BeamError::config(format!(
                    "bandwidth '{}' efficiency {}% outside [0, 100]",
                    self.name, pct
                )));
            }
        }
        Ok(())
    }
}

/// Ordered set of bands a receiver supports, sorted by descending target
/// wavelength, with exactly one active entry.
#[derive(Debug, Clone)]
pub struct BandwidthRegistry {
    configurations: Vec<BandwidthConfiguration, MAX_BANDWIDTH_CONFIGURATIONS>,
    active: usize,
    can_switch_in_place: bool,
}

impl BandwidthRegistry {
    pub fn new(configurations: &[BandwidthConfiguration], can_switch_in_place: bool) -> BeamResult<Self> {
        if configurations.is_empty() {
            return Err(BeamError::config("bandwidth list is empty"));
        }
        let mut sorted: Vec<BandwidthConfiguration, MAX_BANDWIDTH_CONFIGURATIONS> = Vec::new();
        for configuration in configurations {
            configuration.validate()?;
            sorted
                .push(configuration.clone())
                .map_err(|_| BeamError::CapacityExceeded {
                    what: "bandwidth list",
                    capacity: MAX_BANDWIDTH_CONFIGURATIONS,
                })?;
        }
        sorted.sort_by(|a, b| b.target_wavelength.total_cmp(&a.target_wavelength));

        Ok(Self {
            configurations: sorted,
            active: 0,
            can_switch_in_place,
        })
    }

    pub fn configurations(&self) -> &[BandwidthConfiguration] {
        &self.configurations
    }

    pub fn can_switch_in_place(&self) -> bool {
        self.can_switch_in_place
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active_band(&self) -> &BandwidthConfiguration {
        &self.configurations[self.active]
    }

    /// First band, in descending target order, whose interval contains `wavelength`.
    pub fn select_band_for_wavelength(&self, wavelength: f64) -> Option<&BandwidthConfiguration> {
        self.configurations.iter().find(|c| c.contains(wavelength))
    }

    /// Band the allocation engine should use for a beam. A switchable
    /// receiver only accepts beams inside its active band.
    pub fn matching_band(&self, wavelength: f64) -> Option<&BandwidthConfiguration> {
        if self.can_switch_in_place {
            let active = self.active_band();
            active.contains(wavelength).then_some(active)
        } else {
            self.select_band_for_wavelength(wavelength)
        }
    }

    /// Out-of-range indices clamp to the last configuration.
    pub fn set_active_index(&mut self, index: usize) {
        let last = self.configurations.len() - 1;
        if index > last {
            debug!(requested = index, clamped = last, "bandwidth index out of range");
        }
        self.active = index.min(last);
    }

    /// Returns false, leaving the active band unchanged, when no band contains `wavelength`.
    pub fn set_active_by_wavelength(&mut self, wavelength: f64) -> bool {
        match self.configurations.iter().position(|c| c.contains(wavelength)) {
            Some(index) => {
                self.active = index;
                true
            }
            None => false,
        }
    }

    /// Activates the band whose target wavelength is closest to `target`.
    pub fn load_initial(&mut self, target: Option<f64>) {
        let target = target.unwrap_or(DEFAULT_TARGET_WAVELENGTH);
        let closest = self
            .configurations
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                (a.target_wavelength - target)
                    .abs()
                    .total_cmp(&(b.target_wavelength - target).abs())
            })
            .map_or(0, |(index, _)| index);
        self.active = closest;
    }

    /// Wavelength interval this receiver currently accepts.
    pub fn receivable_range(&self) -> (f64, f64) {
        if self.can_switch_in_place {
            let active = self.active_band();
            return (active.min_wavelength, active.max_wavelength);
        }
        self.configurations.iter().fold((f64::MAX, 0.0_f64), |(lo, hi), c| {
            (lo.min(c.min_wavelength), hi.max(c.max_wavelength))
        })
    }
}
