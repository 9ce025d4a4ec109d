use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::RemoteTask;

/// Current envelope schema version.
pub const ENVELOPE_VERSION: u16 = 1;

/// Wire-format envelope for one unit of remote work.
///
/// Serialized with MessagePack. `kind` selects the handler on the function
/// side, `invocation` is the caller's identity for this call (it shows up in
/// function logs), and `id` is echoed back in the [`Reply`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique per submission.
    pub id: Uuid,

    /// Registered task kind, see [`RemoteTask::KIND`].
    pub kind: String,

    /// Invocation identity generated by the submitting executor.
    pub invocation: String,

    /// MessagePack-encoded task.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,

    /// When this envelope was created.
    pub timestamp: DateTime<Utc>,

    /// Schema version. Function hosts reject versions they do not know.
    #[serde(default = "default_version")]
    pub version: u16,
}

fn default_version() -> u16 {
    ENVELOPE_VERSION
}

impl Envelope {
    /// Wrap a task, encoding it with MessagePack.
    pub fn new<T: RemoteTask>(
        task: &T,
        invocation: impl Into<String>,
    ) -> Result<Self, rmp_serde::encode::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            kind: T::KIND.to_string(),
            invocation: invocation.into(),
            payload: rmp_serde::to_vec(task)?,
            timestamp: Utc::now(),
            version: ENVELOPE_VERSION,
        })
    }

    /// Decode the payload into the expected task type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, rmp_serde::decode::Error> {
        rmp_serde::from_slice(&self.payload)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// Result of running one envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// MessagePack-encoded task output.
    Ok(#[serde(with = "serde_bytes")] Vec<u8>),
    /// Task error, panic, or a decode failure on the function side.
    Failed(String),
}

/// Response payload returned by a function for one [`Envelope`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    /// The envelope `id` this reply answers. Nil when the envelope was unreadable.
    pub correlation_id: Uuid,
    pub outcome: Outcome,
    pub finished_at: DateTime<Utc>,
}

impl Reply {
    pub fn new(correlation_id: Uuid, outcome: Outcome) -> Self {
        Self {
            correlation_id,
            outcome,
            finished_at: Utc::now(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// Helper module for serde to handle `Vec<u8>` as raw bytes in MessagePack.
pub(crate) mod serde_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let bytes: &[u8] = Deserialize::deserialize(d)?;
        Ok(bytes.to_vec())
    }
}
