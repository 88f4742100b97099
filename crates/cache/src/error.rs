use thiserror::Error;

/// Errors produced by the packet cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    #[error("packet for {packet} does not belong in buffer for {buffer}")]
    WrongSensor { packet: String, buffer: String },

    #[error("invalid query window: start {start} must be less than end {end}")]
    InvalidWindow { start: f64, end: f64 },

    #[error("capacity must be positive")]
    ZeroCapacity,

    #[error("duplicate data request for {0}")]
    DuplicateRequest(String),

    #[error(transparent)]
    Fabric(#[from] seisbus_fabric::FabricError),
}
