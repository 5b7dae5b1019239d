use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    ThermalPower,
    Megajoules,
    ElectricCharge,
    WasteHeat,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::ThermalPower,
        ResourceKind::Megajoules,
        ResourceKind::ElectricCharge,
        ResourceKind::WasteHeat,
    ];

    fn slot(self) -> usize {
        match self {
            ResourceKind::ThermalPower => 0,
            ResourceKind::Megajoules => 1,
            ResourceKind::ElectricCharge => 2,
            ResourceKind::WasteHeat => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ResourceKind::ThermalPower => "ThermalPower",
            ResourceKind::Megajoules => "Megajoules",
            ResourceKind::ElectricCharge => "ElectricCharge",
            ResourceKind::WasteHeat => "WasteHeat",
        }
    }
}

/// Resource pool seen by suppliers. Rates are MW, transactional per tick.
pub trait ResourcePool {
    /// Offers `desired` and returns what the pool takes, never less than
    /// `minimum_ratio * desired`.
    fn request_supply(&mut self, kind: ResourceKind, desired: f64, minimum_ratio: f64) -> f64;

    /// Draws up to `amount` out of the pool and returns what was available.
    fn request_consumption(&mut self, kind: ResourceKind, amount: f64) -> f64;

    fn current_unfilled_demand(&self, kind: ResourceKind) -> f64;

    fn current_spare_capacity(&self, kind: ResourceKind) -> f64;

    /// Stored amount over capacity, in `[0, 1]`.
    fn current_fill_ratio(&self, kind: ResourceKind) -> f64;

    /// Sets the storage one supplier contributes to the pool.
    fn set_buffer_contribution(&mut self, kind: ResourceKind, source: u32, capacity: f64);
}

#[derive(Debug, Clone, Default)]
struct ResourceLedger {
    stored: f64,
    base_capacity: f64,
    contributions: alloc::vec::Vec<(u32, f64)>,
    demand: f64,
    supplied: f64,
    consumed: f64,
}

impl ResourceLedger {
    fn capacity(&self) -> f64 {
        self.base_capacity + self.contributions.iter().map(|(_, c)| c).sum::<f64>()
    }

    fn surplus(&self) -> f64 {
        (self.supplied - self.demand - self.consumed).max(0.0)
    }
}

/// Read-only view of one resource in a pool.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceLevel {
    pub kind: ResourceKind,
    pub stored: f64,
    pub capacity: f64,
    pub fill_ratio: f64,
    pub demand: f64,
    pub supplied: f64,
}

/// Reference per-platform pool: stored amounts in MJ, rates in MW.
///
/// Consumers register a standing `demand`; for waste heat that demand is
/// the radiator dissipation rate.
#[derive(Debug, Clone)]
pub struct PlatformPool {
    ledgers: [ResourceLedger; 4],
    dt_seconds: f64,
}

impl PlatformPool {
    pub fn new(dt_seconds: f64) -> Self {
        Self {
            ledgers: Default::default(),
            dt_seconds: if dt_seconds > 0.0 { dt_seconds } else { 1.0 },
        }
    }

    fn ledger(&self, kind: ResourceKind) -> &ResourceLedger {
        &self.ledgers[kind.slot()]
    }

    fn ledger_mut(&mut self, kind: ResourceKind) -> &mut ResourceLedger {
        &mut self.ledgers[kind.slot()]
    }

    pub fn set_base_capacity(&mut self, kind: ResourceKind, capacity: f64) {
        self.ledger_mut(kind).base_capacity = capacity.max(0.0);
    }

    pub fn set_stored(&mut self, kind: ResourceKind, amount: f64) {
        let ledger = self.ledger_mut(kind);
        ledger.stored = amount.clamp(0.0, ledger.capacity());
    }

    pub fn set_demand(&mut self, kind: ResourceKind, rate: f64) {
        self.ledger_mut(kind).demand = rate.max(0.0);
    }

    pub fn remove_contributions(&mut self, source: u32) {
        for ledger in &mut self.ledgers {
            ledger.contributions.retain(|(s, _)| *s != source);
        }
    }

    pub fn stored(&self, kind: ResourceKind) -> f64 {
        self.ledger(kind).stored
    }

    pub fn capacity(&self, kind: ResourceKind) -> f64 {
        self.ledger(kind).capacity()
    }

    pub fn supplied(&self, kind: ResourceKind) -> f64 {
        self.ledger(kind).supplied
    }

    pub fn demand(&self, kind: ResourceKind) -> f64 {
        self.ledger(kind).demand
    }

    pub fn dt_seconds(&self) -> f64 {
        self.dt_seconds
    }

    pub fn level(&self, kind: ResourceKind) -> ResourceLevel {
        let ledger = self.ledger(kind);
        ResourceLevel {
            kind,
            stored: ledger.stored,
            capacity: ledger.capacity(),
            fill_ratio: self.current_fill_ratio(kind),
            demand: ledger.demand,
            supplied: ledger.supplied,
        }
    }

    pub fn begin_tick(&mut self) {
        for ledger in &mut self.ledgers {
            ledger.supplied = 0.0;
            ledger.consumed = 0.0;
        }
    }

    /// Integrates this tick's net flow into storage.
    pub fn end_tick(&mut self) {
        let dt = self.dt_seconds;
        for ledger in &mut self.ledgers {
            let net = ledger.supplied - ledger.demand - ledger.consumed;
            ledger.stored = (ledger.stored + net * dt).clamp(0.0, ledger.capacity());
        }
    }
}

impl Default for PlatformPool {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl ResourcePool for PlatformPool {
    fn request_supply(&mut self, kind: ResourceKind, desired: f64, minimum_ratio: f64) -> f64 {
        if desired.is_nan() || desired <= 0.0 {
            return 0.0;
        }
        let room = self.current_unfilled_demand(kind) + self.current_spare_capacity(kind);
        let floor = desired * minimum_ratio.clamp(0.0, 1.0);
        let granted = desired.min(room).max(floor);
        self.ledger_mut(kind).supplied += granted;
        granted
    }

    fn request_consumption(&mut self, kind: ResourceKind, amount: f64) -> f64 {
        if amount.is_nan() || amount <= 0.0 {
            return 0.0;
        }
        let dt = self.dt_seconds;
        let ledger = self.ledger_mut(kind);
        let available = ledger.surplus() + ledger.stored / dt;
        let taken = amount.min(available);
        ledger.consumed += taken;
        taken
    }

    fn current_unfilled_demand(&self, kind: ResourceKind) -> f64 {
        let ledger = self.ledger(kind);
        (ledger.demand + ledger.consumed - ledger.supplied).max(0.0)
    }

    fn current_spare_capacity(&self, kind: ResourceKind) -> f64 {
        let ledger = self.ledger(kind);
        let headroom = (ledger.capacity() - ledger.stored).max(0.0) / self.dt_seconds;
        (headroom - ledger.surplus()).max(0.0)
    }

    fn current_fill_ratio(&self, kind: ResourceKind) -> f64 {
        let ledger = self.ledger(kind);
        let capacity = ledger.capacity();
        if capacity <= 0.0 {
            return 0.0;
        }
        (ledger.stored / capacity).clamp(0.0, 1.0)
    }

    fn set_buffer_contribution(&mut self, kind: ResourceKind, source: u32, capacity: f64) {
        let capacity = capacity.max(0.0);
        let ledger = self.ledger_mut(kind);
        match ledger.contributions.iter_mut().find(|(s, _)| *s == source) {
            Some(entry) => entry.1 = capacity,
            None => ledger.contributions.push((source, capacity)),
        }
        if ledger.stored > ledger.capacity() {
            ledger.stored = ledger.capacity();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supply_limited_by_demand_and_storage() {
        let mut pool = PlatformPool::new(1.0);
        pool.set_demand(ResourceKind::Megajoules, 30.0);
        pool.set_base_capacity(ResourceKind::Megajoules, 20.0);

        pool.begin_tick();
        assert_eq!(pool.request_supply(ResourceKind::Megajoules, 100.0, 0.0), 50.0);
        assert_eq!(pool.current_unfilled_demand(ResourceKind::Megajoules), 0.0);
        assert_eq!(pool.current_spare_capacity(ResourceKind::Megajoules), 0.0);
    }

    #[test]
    fn test_minimum_ratio_forces_acceptance() {
        let mut pool = PlatformPool::new(1.0);
        pool.begin_tick();
        assert_eq!(pool.request_supply(ResourceKind::ThermalPower, 10.0, 0.4), 4.0);
    }

    #[test]
    fn test_nan_and_negative_requests_are_ignored() {
        let mut pool = PlatformPool::new(1.0);
        pool.set_demand(ResourceKind::Megajoules, 30.0);
        pool.begin_tick();
        assert_eq!(pool.request_supply(ResourceKind::Megajoules, f64::NAN, 1.0), 0.0);
        assert_eq!(pool.request_supply(ResourceKind::Megajoules, -3.0, 1.0), 0.0);
        assert_eq!(pool.request_consumption(ResourceKind::Megajoules, f64::NAN), 0.0);
        assert_eq!(pool.current_unfilled_demand(ResourceKind::Megajoules), 30.0);
    }

    #[test]
    fn test_waste_heat_accumulates_against_dissipation() {
        let mut pool = PlatformPool::new(1.0);
        pool.set_base_capacity(ResourceKind::WasteHeat, 100.0);
        pool.set_demand(ResourceKind::WasteHeat, 5.0);

        pool.begin_tick();
        pool.request_supply(ResourceKind::WasteHeat, 25.0, 1.0);
        pool.end_tick();
        assert_eq!(pool.stored(ResourceKind::WasteHeat), 20.0);
        assert!((pool.current_fill_ratio(ResourceKind::WasteHeat) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_buffer_contributions_replace_per_source() {
        let mut pool = PlatformPool::new(1.0);
        pool.set_buffer_contribution(ResourceKind::Megajoules, 7, 10.0);
        pool.set_buffer_contribution(ResourceKind::Megajoules, 7, 4.0);
        pool.set_buffer_contribution(ResourceKind::Megajoules, 8, 1.0);
        assert_eq!(pool.capacity(ResourceKind::Megajoules), 5.0);
        pool.remove_contributions(7);
        assert_eq!(pool.capacity(ResourceKind::Megajoules), 1.0);
    }

    #[test]
    fn test_consumption_draws_from_storage() {
        let mut pool = PlatformPool::new(1.0);
        pool.set_base_capacity(ResourceKind::Megajoules, 10.0);
        pool.set_stored(ResourceKind::Megajoules, 6.0);
        pool.begin_tick();
        assert_eq!(pool.request_consumption(ResourceKind::Megajoules, 8.0), 6.0);
        pool.end_tick();
        assert_eq!(pool.stored(ResourceKind::Megajoules), 0.0);
    }
}
