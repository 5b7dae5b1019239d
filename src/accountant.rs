//! Cross-receiver capacity accounting.
//!
//! There is no central allocator: each receiver asks how much of a
//! transmitter's capacity the other receivers already hold and claims at
//! most the remainder.

use crate::network::{ReceiverId, Relay, Transmitter, TransmitterId};
use crate::receiver::Receiver;

/// `min(deliverable, relay chain cap, every relay capacity)` for one route.
pub fn network_capacity(transmitter: &Transmitter, relays: &[&Relay]) -> f64 {
    let mut capacity = transmitter.deliverable_power();
    if !relays.is_empty() {
        if let Some(cap) = transmitter.relay_chain_cap() {
            capacity = capacity.min(cap);
        }
        if let Some(bottleneck) = min_relay_capacity(relays) {
            capacity = capacity.min(bottleneck);
        }
    }
    capacity.max(0.0)
}

pub fn min_relay_capacity(relays: &[&Relay]) -> Option<f64> {
    relays.iter().map(|r| r.power_capacity).reduce(f64::min)
}

/// Read-only view over every loaded receiver.
pub struct CapacityAccountant<'a> {
    receivers: &'a [Option<Receiver>],
}

impl<'a> CapacityAccountant<'a> {
    pub fn new(receivers: &'a [Option<Receiver>]) -> Self {
        Self { receivers }
    }

    /// Power other enabled receivers have claimed from `transmitter` this tick.
    pub fn already_claimed(&self, transmitter: TransmitterId, requester: ReceiverId) -> f64 {
        self.receivers
            .iter()
            .flatten()
            .filter(|r| r.id() != requester)
            .map(|r| r.current_received_power(transmitter))
            .sum()
    }

    pub fn residual_capacity(&self, transmitter: TransmitterId, network_capacity: f64, requester: ReceiverId) -> f64 {
        let residual = (network_capacity - self.already_claimed(transmitter, requester)).max(0.0);
        debug_assert!(residual <= network_capacity.max(0.0), "Residual {residual} exceeds capacity {network_capacity}");
        residual
    }
}
