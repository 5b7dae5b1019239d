//! Fixed-capacity FIFO windows that turn noisy per-tick samples into
//! stable averages.

use heapless::{Deque, Vec};

pub const BEAMED_POWER_WINDOW: usize = 20;
pub const SOLAR_FLUX_WINDOW: usize = 50;

/// Lowest samples dropped by the solar flux trimmed mean.
pub const SOLAR_FLUX_TRIM_LOW: usize = 10;
/// Samples averaged after trimming.
pub const SOLAR_FLUX_TRIM_KEEP: usize = 30;

/// Moving average biased toward recent non-zero activity.
///
/// A non-zero sample is pushed twice and the oldest entry popped once, so
/// a burst of power shows up faster than it fades.
#[derive(Debug, Clone, Default)]
pub struct MovingAverage<const N: usize> {
    window: Deque<f64, N>,
}

impl<const N: usize> MovingAverage<N> {
    pub fn new() -> Self {
        Self { window: Deque::new() }
    }

    fn push_evicting(&mut self, sample: f64) {
        if self.window.is_full() {
            let _ = self.window.pop_front();
        }
        let _ = self.window.push_back(sample);
    }

    /// Feeds one sample and returns the new average.
    pub fn update(&mut self, sample: f64) -> f64 {
        if sample == 0.0 || self.window.is_empty() {
            self.push_evicting(sample);
        } else {
            let _ = self.window.pop_front();
            self.push_evicting(sample);
            self.push_evicting(sample);
        }
        self.average()
    }

    pub fn average(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().sum::<f64>() / self.window.len() as f64
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }
}

/// Plain FIFO whose output discards the lowest samples once enough are held.
#[derive(Debug, Clone, Default)]
pub struct TrimmedMean<const N: usize> {
    window: Deque<f64, N>,
}

impl<const N: usize> TrimmedMean<N> {
    pub fn new() -> Self {
        Self { window: Deque::new() }
    }

    pub fn update(&mut self, sample: f64) -> f64 {
        if self.window.is_full() {
            let _ = self.window.pop_front();
        }
        let _ = self.window.push_back(sample);
        self.average()
    }

    pub fn average(&self) -> f64 {
        let count = self.window.len();
        if count == 0 {
            return 0.0;
        }
        if count <= SOLAR_FLUX_TRIM_LOW {
            return self.window.iter().sum::<f64>() / count as f64;
        }

        let mut sorted: Vec<f64, N> = self.window.iter().copied().collect();
        sorted.sort_unstable_by(f64::total_cmp);
        let kept = &sorted[SOLAR_FLUX_TRIM_LOW..count.min(SOLAR_FLUX_TRIM_LOW + SOLAR_FLUX_TRIM_KEEP)];
        kept.iter().sum::<f64>() / kept.len() as f64
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

pub type BeamedPowerFilter = MovingAverage<BEAMED_POWER_WINDOW>;
pub type SolarFluxFilter = TrimmedMean<SOLAR_FLUX_WINDOW>;
