use serde::{Deserialize, Serialize};

pub const DEFAULT_RAMP_STEP: f64 = 0.01;

/// Residue below this fraction of a step snaps to zero.
const SNAP_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerState {
    Online,
    Offline,
}

/// Drives a smooth power-down of pool-facing buffers after a disable or a
/// forced shutdown.
#[derive(Debug, Clone)]
pub struct RampController {
    power_down_fraction: f64,
    step: f64,
    state: PowerState,
}

impl RampController {
    pub fn new(step: f64) -> Self {
        let step = if step.is_finite() && step > 0.0 { step.min(1.0) } else { DEFAULT_RAMP_STEP };
        Self {
            power_down_fraction: 1.0,
            step,
            state: PowerState::Online,
        }
    }

    pub fn power_up(&mut self) {
        self.power_down_fraction = 1.0;
        self.state = PowerState::Online;
    }

    /// One tick of ramp-down. Returns the fraction after the step.
    pub fn power_down(&mut self) -> f64 {
        if self.state == PowerState::Offline {
            return 0.0;
        }

        self.power_down_fraction = (self.power_down_fraction - self.step).max(0.0);
        if self.power_down_fraction <= self.step * SNAP_TOLERANCE {
            self.power_down_fraction = 0.0;
            self.state = PowerState::Offline;
        }

        debug_assert!(
            (0.0..=1.0).contains(&self.power_down_fraction),
            "Power-down fraction {} outside [0, 1]",
            self.power_down_fraction
        );
        self.power_down_fraction
    }

    pub fn fraction(&self) -> f64 {
        self.power_down_fraction
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    /// Ticks needed to go from fully on to offline.
    pub fn ticks_to_offline(&self) -> u32 {
        (1.0 / self.step).ceil() as u32
    }
}

impl Default for RampController {
    fn default() -> Self {
        Self::new(DEFAULT_RAMP_STEP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reaches_exact_zero_within_ceiling_ticks() {
        let mut ramp = RampController::default();
        let budget = ramp.ticks_to_offline();
        assert_eq!(budget, 100);

        let mut previous = ramp.fraction();
        for _ in 0..budget {
            let fraction = ramp.power_down();
            assert!(fraction <= previous);
            previous = fraction;
        }
        assert_eq!(ramp.fraction(), 0.0);
        assert_eq!(ramp.state(), PowerState::Offline);
    }

    #[test]
    fn test_power_up_resets() {
        let mut ramp = RampController::new(0.25);
        ramp.power_down();
        ramp.power_down();
        ramp.power_up();
        assert_eq!(ramp.fraction(), 1.0);
        assert_eq!(ramp.state(), PowerState::Online);
    }

    #[test]
    fn test_uneven_step() {
        let mut ramp = RampController::new(0.3);
        assert_eq!(ramp.ticks_to_offline(), 4);
        for _ in 0..4 {
            ramp.power_down();
        }
        assert_eq!(ramp.fraction(), 0.0);
    }

    #[test]
    fn test_invalid_step_falls_back_to_default() {
        assert_eq!(RampController::new(0.0).step(), DEFAULT_RAMP_STEP);
        assert_eq!(RampController::new(f64::NAN).step(), DEFAULT_RAMP_STEP);
    }
}
