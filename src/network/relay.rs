use serde::{Deserialize, Serialize};

use super::RelayId;

/// Intermediate node forwarding beamed power at a capped capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relay {
    pub id: RelayId,
    pub name: String,
    /// Forwarding capacity in MW.
    pub power_capacity: f64,
    /// Aperture diameter in metres.
    pub aperture: f64,
    pub min_wavelength: f64,
    pub max_wavelength: f64,
}

impl Relay {
    pub fn new(id: RelayId, name: &str, power_capacity: f64, min_wavelength: f64, max_wavelength: f64) -> Self {
        Self {
            id,
            name: name.into(),
            power_capacity: power_capacity.max(0.0),
            aperture: 1.0,
            min_wavelength,
            max_wavelength,
        }
    }

    #[must_use]
    pub fn with_aperture(mut self, aperture: f64) -> Self {
        self.aperture = aperture;
        self
    }

    pub fn supports(&self, wavelength: f64) -> bool {
        wavelength >= self.min_wavelength && wavelength <= self.max_wavelength
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supports_inclusive_range() {
        let relay = Relay::new(RelayId(0), "mirror", 50.0, 1e-6, 1e-3);
        assert!(relay.supports(1e-6));
        assert!(relay.supports(1e-3));
        assert!(relay.supports(5e-4));
        assert!(!relay.supports(2e-3));
    }
}
