use std::any::Any;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::TaskError;

/// A unit of work that can run on either side of the local/remote boundary.
///
/// The serde bounds are what make a task transportable: a type that captures
/// non-serializable state simply does not implement this trait.
pub trait RemoteTask: Serialize + DeserializeOwned + Send + 'static {
    /// Handler name on the function side. Must be unique within a registry.
    const KIND: &'static str;

    type Output: Serialize + DeserializeOwned + Send + 'static;

    fn run(self) -> Result<Self::Output, TaskError>;
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
