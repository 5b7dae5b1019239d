use thiserror::Error;

use crate::network::RouteError;

/// Errors raised by the beamed-power engine.
///
/// Nothing here is fatal to the host: the simulation catches these per
/// receiver and degrades that receiver to zero output for the tick.
#[derive(Error, Debug)]
pub enum BeamError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("receiver '{receiver}' has no bandwidth configurations")]
    EmptyBandwidthList { receiver: String },

    #[error("malformed conversion-rate list '{0}'")]
    MalformedConversionRates(String),

    #[error("unknown platform {0}")]
    UnknownPlatform(u32),

    #[error("unknown transmitter {0}")]
    UnknownTransmitter(u32),

    #[error("unknown relay {0}")]
    UnknownRelay(u32),

    #[error("unknown receiver {0}")]
    UnknownReceiver(u32),

    #[error("{what} capacity of {capacity} exceeded")]
    CapacityExceeded { what: &'static str, capacity: usize },

    #[error("invalid route: {0}")]
    Route(#[from] RouteError),

    #[error("scenario parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BeamResult<T> = Result<T, BeamError>;

impl BeamError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
