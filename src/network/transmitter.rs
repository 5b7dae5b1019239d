use heapless::Vec;
use serde::{Deserialize, Serialize};

use super::{PlatformId, TransmitterId};
use crate::error::{BeamError, BeamResult};

pub const MAX_BEAMS_PER_TRANSMITTER: usize = 4;

/// Beam components are carried in kW, capacities in MW.
pub const KILOWATT_TO_MEGAWATT: f64 = 0.001;

/// One wavelength-tagged beam emitted by a transmitter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerBeam {
    /// Wavelength in metres.
    pub wavelength: f64,
    pub nuclear_power_kw: f64,
    #[serde(default)]
    pub solar_power_kw: f64,
}

impl PowerBeam {
    #[must_use]
    pub fn new(wavelength: f64, nuclear_power_kw: f64, solar_power_kw: f64) -> Self {
        Self {
            wavelength,
            nuclear_power_kw,
            solar_power_kw,
        }
    }

    #[must_use]
    pub fn total_power_kw(&self) -> f64 {
        (self.nuclear_power_kw + self.solar_power_kw).max(0.0)
    }

    /// Power that survives the route, in MW.
    #[must_use]
    pub fn route_limited_power(&self, route_efficiency: f64) -> f64 {
        self.total_power_kw() * route_efficiency * KILOWATT_TO_MEGAWATT
    }
}

#[derive(Debug, Clone)]
pub struct Transmitter {
    id: TransmitterId,
    name: String,
    platform: PlatformId,
    beams: Vec<PowerBeam, MAX_BEAMS_PER_TRANSMITTER>,
    deliverable_power: f64,
    relay_chain_cap: Option<f64>,
    active: bool,
}

impl Transmitter {
    pub fn new(id: TransmitterId, name: &str, platform: PlatformId, deliverable_power: f64) -> Self {
        Self {
            id,
            name: name.into(),
            platform,
            beams: Vec::new(),
            deliverable_power: deliverable_power.max(0.0),
            relay_chain_cap: None,
            active: true,
        }
    }

    #[must_use]
    pub fn with_relay_chain_cap(mut self, cap: Option<f64>) -> Self {
        self.relay_chain_cap = cap.map(|c| c.max(0.0));
        self
    }

    pub fn add_beam(&mut self, beam: PowerBeam) -> BeamResult<()> {
        if !beam.wavelength.is_finite() || beam.wavelength <= 0.0 {
            return Err(BeamError::config(format!(
                "transmitter '{}' beam wavelength {} is not positive",
                self.name, beam.wavelength
            )));
        }
        self.beams.push(beam).map_err(|_| BeamError::CapacityExceeded {
            what: "transmitter beam list",
            capacity: MAX_BEAMS_PER_TRANSMITTER,
        })
    }

    pub fn id(&self) -> TransmitterId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn platform(&self) -> PlatformId {
        self.platform
    }

    pub fn beams(&self) -> &[PowerBeam] {
        &self.beams
    }

    /// Maximum power this transmitter can push into the network, in MW.
    pub fn deliverable_power(&self) -> f64 {
        self.deliverable_power
    }

    pub fn set_deliverable_power(&mut self, power: f64) {
        self.deliverable_power = power.max(0.0);
    }

    pub fn relay_chain_cap(&self) -> Option<f64> {
        self.relay_chain_cap
    }

    pub fn set_relay_chain_cap(&mut self, cap: Option<f64>) {
        self.relay_chain_cap = cap.map(|c| c.max(0.0));
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_limited_power_converts_kilowatts() {
        let beam = PowerBeam::new(0.003, 60_000.0, 40_000.0);
        assert!((beam.route_limited_power(1.0) - 100.0).abs() < 1e-9);
        assert!((beam.route_limited_power(0.5) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_beam_list_is_bounded() {
        let mut tx = Transmitter::new(TransmitterId(0), "array", PlatformId(0), 100.0);
        for _ in 0..MAX_BEAMS_PER_TRANSMITTER {
            tx.add_beam(PowerBeam::new(0.01, 1.0, 0.0)).unwrap();
        }
        assert!(matches!(
            tx.add_beam(PowerBeam::new(0.01, 1.0, 0.0)),
            Err(BeamError::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn test_rejects_non_positive_wavelength() {
        let mut tx = Transmitter::new(TransmitterId(0), "array", PlatformId(0), 100.0);
        assert!(tx.add_beam(PowerBeam::new(0.0, 1.0, 0.0)).is_err());
        assert!(tx.add_beam(PowerBeam::new(f64::NAN, 1.0, 0.0)).is_err());
    }
}
