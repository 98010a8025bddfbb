use thiserror::Error;

/// Failure to create the latency instrument.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InstrumentError {
    #[error("invalid bucket boundaries for '{name}': {reason}")]
    InvalidBoundaries { name: String, reason: String },
}
