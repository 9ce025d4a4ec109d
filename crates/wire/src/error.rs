use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while encoding, shipping or decoding remote work.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("zeromq error: {0}")]
    Zmq(#[from] zeromq::ZmqError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("no reply after {0:?}")]
    Timeout(std::time::Duration),

    #[error("unknown task kind '{0}'")]
    UnknownKind(String),

    #[error("task kind '{0}' is already registered")]
    DuplicateKind(String),

    #[error("malformed reply: {0}")]
    MalformedReply(String),

    #[error("invalid endpoint: {0}")]
    Endpoint(String),
}

/// Failure raised by a task body. Crosses the wire as its message only.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{0}")]
pub struct TaskError(pub String);

impl TaskError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<String> for TaskError {
    fn from(msg: String) -> Self {
        Self(msg)
    }
}

impl From<&str> for TaskError {
    fn from(msg: &str) -> Self {
        Self(msg.to_string())
    }
}
