use thiserror::Error;

/// Failures at the host boundary. Parsing itself never fails; only decoding
/// host-supplied JSON and encoding results can.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid marker configuration: {0}")]
    InvalidMarkers(#[source] serde_json::Error),
    #[error("invalid statistics options: {0}")]
    InvalidOptions(#[source] serde_json::Error),
    #[error("failed to encode output: {0}")]
    Encode(#[source] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
