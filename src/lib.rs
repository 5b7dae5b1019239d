//! # Beamgrid
//!
//! A beamed-power network simulator: transmitters emit wavelength-tagged
//! beams, relays forward them at capped capacity, and receivers turn what
//! reaches them into thermal or electric power without any two receivers
//! over-claiming the same transmitter.
//!
//! ## Features
//!
//! - **Capacity accounting**: every receiver sees only the residual a transmitter has left
//! - **Bandwidth matching**: beams convert only inside a configured wavelength band
//! - **Phased ticks**: demand collection, an ordered commit, then delivery
//! - **Thermal aggregation**: slave receivers feed their power into a master
//! - **Safety**: overheat shutdown with a smooth ramp-down
//! - **Bounded state**: per-receiver ledgers and filters never grow past fixed sizes
//!
//! ## Quick Start
//!
//! ```rust
//! use beamgrid::{Scenario, Simulation};
//!
//! let scenario = Scenario::demo();
//! let mut sim = Simulation::from_scenario(&scenario).unwrap();
//!
//! let summary = sim.tick();
//! println!("delivered {:.1} MW", summary.delivered_power);
//! ```
//!
//! ## Architecture
//!
//! - [`simulation`] - arenas and the per-tick orchestration
//! - [`allocation`] - per-receiver demand, commit and delivery
//! - [`accountant`] - residual capacity across receivers
//! - [`bandwidth`] - wavelength bands and band selection
//! - [`receiver`] - receiver state and its power ledger
//! - [`thermal`] - part graph search and master/slave links
//! - [`pool`] - per-platform resource pool
//! - [`generator`] - battery generators fed from the pool
//! - [`protocol`] - JSON control commands
//! - [`telemetry`] - snapshots and display formatting

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::float_cmp)]

extern crate alloc;

pub mod accountant;
pub mod allocation;
pub mod bandwidth;
pub mod config;
pub mod error;
pub mod generator;
pub mod network;
pub mod pool;
pub mod protocol;
pub mod ramp;
pub mod receiver;
pub mod simulation;
pub mod smoothing;
pub mod telemetry;
pub mod thermal;

// Re-export main public types for convenience
pub use bandwidth::{BandwidthConfiguration, BandwidthRegistry};
pub use config::{FairnessPolicy, ReceiverConfig, ReceiverKind, ReceiverShape, Scenario, SimulationConfig};
pub use error::{BeamError, BeamResult};
pub use network::{PlatformId, PowerBeam, ReceiverId, RelayId, Route, RouteResolver, RouteTable, TransmitterId};
pub use pool::{PlatformPool, ResourceKind, ResourcePool};
pub use protocol::{ControlCommand, ControlResponse};
pub use receiver::Receiver;
pub use simulation::{Simulation, SimulationEvent, TickSummary};
pub use telemetry::TelemetryFrame;
