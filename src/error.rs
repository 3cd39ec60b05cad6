use crate::ids::ChannelId;
use thiserror::Error;

/// Failures on the bus side: decoding a message or talking to the sockets.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("malformed bus message: {0}")]
    MalformedMessage(String),
    #[error("there is no field \"{0}\" but it is required")]
    MissingField(&'static str),
    #[error("bad topic for channel id extraction: {0}")]
    BadTopic(String),
    #[error("invalid metadata JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("transport error: {0}")]
    Transport(#[from] zeromq::ZmqError),
    #[error("{0} socket is not connected")]
    NotConnected(&'static str),
}

/// Failures reported by the USLP stack boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StackError {
    #[error("there is no map channel {0} registered in the stack")]
    UnknownChannel(ChannelId),
    #[error("sdu queue of map channel {0} is full")]
    ChannelFull(ChannelId),
    #[error("sdu rejected: {0}")]
    InvalidSdu(String),
    #[error("sdu of {size} bytes exceeds the channel limit of {limit} bytes")]
    SduTooLarge { size: usize, limit: usize },
    #[error("there is no frame ready to pop")]
    NoFrameReady,
    #[error("frame buffer of {given} bytes does not match frame size {expected}")]
    FrameSizeMismatch { expected: usize, given: usize },
    #[error("bad frame: {0}")]
    BadFrame(String),
}

/// Startup configuration failures. Fatal before the loop starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("there is no {what} endpoint in {key} envvar")]
    MissingEndpoint { what: &'static str, key: &'static str },
    #[error("invalid value {value:?} for {key}: expected milliseconds")]
    InvalidDuration { key: &'static str, value: String },
}
