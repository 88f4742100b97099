use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in the seisbus messaging fabric.
#[derive(Debug, Error)]
pub enum FabricError {
    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("zeromq error: {0}")]
    Zmq(#[from] zeromq::ZmqError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode error for {type_tag}: {detail}")]
    Encode { type_tag: String, detail: String },

    #[error("decode error for {type_tag}: {detail}")]
    Decode { type_tag: String, detail: String },

    #[error("message type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("no codec registered for message type {0}")]
    UnknownType(String),

    #[error("codec for {0} is already registered")]
    DuplicateCodec(String),

    #[error("malformed wire message: expected {expected} frames, got {actual}")]
    FrameCount { expected: usize, actual: usize },

    #[error("handler error: {0}")]
    Handler(String),

    #[error("module registry error: {0}")]
    Registry(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("remote failure: {0}")]
    RemoteFailure(String),
}

impl FabricError {
    /// Shorthand for a decode error where the tag is already known.
    pub fn decode(type_tag: impl Into<String>, detail: impl ToString) -> Self {
        Self::Decode {
            type_tag: type_tag.into(),
            detail: detail.to_string(),
        }
    }

    /// Shorthand for an encode error where the tag is already known.
    pub fn encode(type_tag: impl Into<String>, detail: impl ToString) -> Self {
        Self::Encode {
            type_tag: type_tag.into(),
            detail: detail.to_string(),
        }
    }
}
