//! Function-side dispatch: envelope bytes in, reply bytes out.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::envelope::{Envelope, Outcome, Reply, ENVELOPE_VERSION};
use crate::error::WireError;
use crate::task::{panic_message, RemoteTask};

type Handler = Box<dyn Fn(&[u8]) -> Result<Vec<u8>, String> + Send + Sync>;

/// Table of task kinds a function host knows how to run.
#[derive(Default)]
pub struct FunctionRegistry {
    handlers: HashMap<&'static str, Handler>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under its [`RemoteTask::KIND`].
    pub fn register<T: RemoteTask>(&mut self) -> Result<&mut Self, WireError> {
        if self.handlers.contains_key(T::KIND) {
            return Err(WireError::DuplicateKind(T::KIND.to_string()));
        }
        self.handlers.insert(T::KIND, Box::new(run_encoded::<T>));
        debug!(kind = T::KIND, "registered task kind");
        Ok(self)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    /// Run one encoded [`Envelope`] and return an encoded [`Reply`].
    ///
    /// Never fails: unreadable envelopes, unknown kinds, task errors and
    /// panics all become [`Outcome::Failed`].
    pub fn handle(&self, request: &[u8]) -> Vec<u8> {
        let reply = match Envelope::from_bytes(request) {
            Ok(envelope) => {
                let outcome = self.dispatch(&envelope);
                Reply::new(envelope.id, outcome)
            }
            Err(e) => {
                warn!(error = %e, "unreadable envelope");
                Reply::new(Uuid::nil(), Outcome::Failed(format!("malformed envelope: {e}")))
            }
        };
        reply.to_bytes().unwrap_or_else(|e| {
            // The caller sees an undecodable reply and reports it as such.
            error!(error = %e, correlation_id = %reply.correlation_id, "failed to encode reply");
            Vec::new()
        })
    }

    fn dispatch(&self, envelope: &Envelope) -> Outcome {
        if envelope.version != ENVELOPE_VERSION {
            return Outcome::Failed(format!(
                "unsupported envelope version {}",
                envelope.version
            ));
        }
        let Some(handler) = self.handlers.get(envelope.kind.as_str()) else {
            warn!(kind = %envelope.kind, invocation = %envelope.invocation, "unknown task kind");
            return Outcome::Failed(WireError::UnknownKind(envelope.kind.clone()).to_string());
        };
        match handler(&envelope.payload) {
            Ok(bytes) => {
                debug!(kind = %envelope.kind, invocation = %envelope.invocation, "task finished");
                Outcome::Ok(bytes)
            }
            Err(msg) => {
                warn!(kind = %envelope.kind, invocation = %envelope.invocation, error = %msg, "task failed");
                Outcome::Failed(msg)
            }
        }
    }
}

fn run_encoded<T: RemoteTask>(payload: &[u8]) -> Result<Vec<u8>, String> {
    let task: T = rmp_serde::from_slice(payload)
        .map_err(|e| format!("failed to decode {} payload: {e}", T::KIND))?;
    let output = panic::catch_unwind(AssertUnwindSafe(|| task.run()))
        .map_err(|p| format!("task {} panicked: {}", T::KIND, panic_message(p.as_ref())))?
        .map_err(|e| e.to_string())?;
    rmp_serde::to_vec(&output).map_err(|e| format!("failed to encode {} output: {e}", T::KIND))
}
