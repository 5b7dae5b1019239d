use alloc::collections::BTreeMap;
use heapless::Vec;
use thiserror::Error;

use super::{ReceiverId, RelayId, TransmitterId};

pub const MAX_RELAYS_PER_ROUTE: usize = 8;

pub type RelayChain = Vec<RelayId, MAX_RELAYS_PER_ROUTE>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RouteError {
    #[error("route {0} is not finite")]
    NonFinite(&'static str),
    #[error("route efficiency {0} outside [0, 1]")]
    EfficiencyOutOfRange(f64),
    #[error("facing factor {0} outside [0, 1]")]
    FacingOutOfRange(f64),
    #[error("negative route {what}: {value}")]
    Negative { what: &'static str, value: f64 },
    #[error("relay chain longer than {0}")]
    TooManyRelays(usize),
}

/// Resolved link between one transmitter and one receiver.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub efficiency: f64,
    /// Metres.
    pub distance: f64,
    /// Metres.
    pub spot_size: f64,
    pub facing_factor: f64,
    pub relays: RelayChain,
}

impl Route {
    pub fn direct(efficiency: f64, distance: f64) -> Self {
        Self {
            efficiency,
            distance,
            spot_size: 0.0,
            facing_factor: 1.0,
            relays: Vec::new(),
        }
    }

    pub fn via(efficiency: f64, distance: f64, relays: &[RelayId]) -> Result<Self, RouteError> {
        let mut chain = RelayChain::new();
        chain
            .extend_from_slice(relays)
            .map_err(|()| RouteError::TooManyRelays(MAX_RELAYS_PER_ROUTE))?;
        Ok(Self {
            relays: chain,
            ..Self::direct(efficiency, distance)
        })
    }

    #[must_use]
    pub fn with_spot_size(mut self, spot_size: f64) -> Self {
        self.spot_size = spot_size;
        self
    }

    #[must_use]
    pub fn with_facing_factor(mut self, facing_factor: f64) -> Self {
        self.facing_factor = facing_factor;
        self
    }

    pub fn validate(&self) -> Result<(), RouteError> {
        for (what, value) in [
            ("efficiency", self.efficiency),
            ("distance", self.distance),
            ("spot size", self.spot_size),
            ("facing factor", self.facing_factor),
        ] {
            if !value.is_finite() {
                return Err(RouteError::NonFinite(what));
            }
        }
        if !(0.0..=1.0).contains(&self.efficiency) {
            return Err(RouteError::EfficiencyOutOfRange(self.efficiency));
        }
        if !(0.0..=1.0).contains(&self.facing_factor) {
            return Err(RouteError::FacingOutOfRange(self.facing_factor));
        }
        if self.distance < 0.0 {
            return Err(RouteError::Negative { what: "distance", value: self.distance });
        }
        if self.spot_size < 0.0 {
            return Err(RouteError::Negative { what: "spot size", value: self.spot_size });
        }
        Ok(())
    }
}

/// Supplies routing between transmitters and receivers.
///
/// `Ok(None)` means the beam does not reach the receiver this tick
/// (out of range, obstructed). An `Err` is bad geometry; the allocation
/// engine treats both the same way.
pub trait RouteResolver {
    fn resolve_route(
        &self,
        transmitter: TransmitterId,
        receiver: ReceiverId,
    ) -> Result<Option<Route>, RouteError>;
}

/// Table-driven resolver: routes are declared up front and looked up per pair.
#[derive(Debug, Default, Clone)]
pub struct RouteTable {
    routes: BTreeMap<(TransmitterId, ReceiverId), Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Geometry is checked on resolution, not here.
    pub fn insert(&mut self, transmitter: TransmitterId, receiver: ReceiverId, route: Route) -> Option<Route> {
        self.routes.insert((transmitter, receiver), route)
    }

    pub fn remove(&mut self, transmitter: TransmitterId, receiver: ReceiverId) -> Option<Route> {
        self.routes.remove(&(transmitter, receiver))
    }

    pub fn remove_transmitter(&mut self, transmitter: TransmitterId) {
        self.routes.retain(|(tx, _), _| *tx != transmitter);
    }

    pub fn remove_receiver(&mut self, receiver: ReceiverId) {
        self.routes.retain(|(_, rx), _| *rx != receiver);
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl RouteResolver for RouteTable {
    fn resolve_route(
        &self,
        transmitter: TransmitterId,
        receiver: ReceiverId,
    ) -> Result<Option<Route>, RouteError> {
        match self.routes.get(&(transmitter, receiver)) {
            Some(route) => {
                route.validate()?;
                Ok(Some(route.clone()))
            }
            None => Ok(None),
        }
    }
}
