use core::fmt;
use serde::{Deserialize, Serialize};

pub mod relay;
pub mod route;
pub mod transmitter;

pub use relay::Relay;
pub use route::{RelayChain, Route, RouteError, RouteResolver, RouteTable, MAX_RELAYS_PER_ROUTE};
pub use transmitter::{PowerBeam, Transmitter, KILOWATT_TO_MEGAWATT, MAX_BEAMS_PER_TRANSMITTER};

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            #[must_use]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }
    };
}

arena_id!(
    /// Index of a platform (vessel or station) in the simulation arena.
    PlatformId,
    "platform"
);
arena_id!(
    /// Index of a transmitter in the simulation arena.
    TransmitterId,
    "tx"
);
arena_id!(
    /// Index of a relay in the simulation arena.
    RelayId,
    "relay"
);
arena_id!(
    /// Index of a receiver in the simulation arena.
    ReceiverId,
    "rx"
);
