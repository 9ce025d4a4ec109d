use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use uuid::Uuid;

use crate::error::ExecutionError;
use crate::types::Backend;

pub(crate) type Completion = watch::Receiver<Option<bool>>;

/// The single result of one accepted submission.
///
/// Blocking methods must not be called from inside an async context.
pub struct ResultHandle<T> {
    id: Uuid,
    backend: Backend,
    rx: oneshot::Receiver<Result<T, ExecutionError>>,
    done: Completion,
    runtime: Handle,
}

impl<T: Send + 'static> ResultHandle<T> {
    pub(crate) fn new(
        id: Uuid,
        backend: Backend,
        rx: oneshot::Receiver<Result<T, ExecutionError>>,
        done: Completion,
        runtime: Handle,
    ) -> Self {
        Self {
            id,
            backend,
            rx,
            done,
            runtime,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Backend chosen at admission.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Whether the result has been produced. Never blocks.
    pub fn is_finished(&self) -> bool {
        self.done.borrow().is_some()
    }

    /// Block until the result arrives.
    pub fn wait(self) -> Result<T, ExecutionError> {
        futures::executor::block_on(self.rx).unwrap_or(Err(ExecutionError::Dropped))
    }

    /// Block for at most `timeout`. Giving up does not stop the work.
    pub fn wait_timeout(self, timeout: Duration) -> Result<T, ExecutionError> {
        let rx = self.rx;
        self.runtime.block_on(async move {
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(ExecutionError::Dropped),
                Err(_) => Err(ExecutionError::Timeout(timeout)),
            }
        })
    }

    /// Run `callback` on the scheduler runtime once the result lands.
    pub fn then<F>(self, callback: F)
    where
        F: FnOnce(Result<T, ExecutionError>) + Send + 'static,
    {
        let rx = self.rx;
        self.runtime.spawn(async move {
            callback(rx.await.unwrap_or(Err(ExecutionError::Dropped)));
        });
    }
}

impl<T> std::fmt::Debug for ResultHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultHandle")
            .field("id", &self.id)
            .field("backend", &self.backend)
            .field("finished", &self.done.borrow().is_some())
            .finish()
    }
}
