use std::sync::Arc;

use async_trait::async_trait;

use crate::error::WireError;

/// Raw response of one remote invocation.
#[derive(Debug, Clone)]
pub struct InvokeResponse {
    /// Encoded [`Reply`](crate::Reply).
    pub payload: Vec<u8>,

    /// Tail of the function's execution log, if the platform returns one.
    /// Carries the `REPORT` line used for cost accounting.
    pub log_tail: Option<String>,
}

/// Request/response byte channel to a remote function.
///
/// Invocations are not cancellable: dropping the returned future, or timing
/// out on it, only stops the caller from waiting.
#[async_trait]
pub trait FunctionTransport: Send + Sync {
    async fn invoke(&self, request: Vec<u8>) -> Result<InvokeResponse, WireError>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// Blanket implementation so `Arc<dyn FunctionTransport>` can be used directly.
#[async_trait]
impl<T: FunctionTransport + ?Sized> FunctionTransport for Arc<T> {
    async fn invoke(&self, request: Vec<u8>) -> Result<InvokeResponse, WireError> {
        (**self).invoke(request).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
