use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::error::WireError;
use crate::registry::FunctionRegistry;
use crate::report::InvocationReport;
use crate::traits::{FunctionTransport, InvokeResponse};

/// Runs "remote" invocations on a blocking thread of the current runtime.
///
/// Goes through the full encode/decode path and returns a `REPORT` log tail,
/// so cost accounting behaves as it would against a hosted function.
pub struct InProcessTransport {
    registry: Arc<FunctionRegistry>,
    memory_size_mb: u32,
}

impl InProcessTransport {
    pub fn new(registry: FunctionRegistry, memory_size_mb: u32) -> Self {
        Self {
            registry: Arc::new(registry),
            memory_size_mb,
        }
    }
}

#[async_trait]
impl FunctionTransport for InProcessTransport {
    async fn invoke(&self, request: Vec<u8>) -> Result<InvokeResponse, WireError> {
        let registry = Arc::clone(&self.registry);
        let memory_size_mb = self.memory_size_mb;
        let request_id = Uuid::new_v4().to_string();

        let (payload, elapsed) = tokio::task::spawn_blocking(move || {
            let started = Instant::now();
            let payload = registry.handle(&request);
            (payload, started.elapsed())
        })
        .await
        .map_err(|e| WireError::Transport(format!("in-process invocation aborted: {e}")))?;

        let report = InvocationReport::measured(elapsed, memory_size_mb);
        debug!(
            request_id = %request_id,
            billed_ms = report.billed_duration_ms,
            "in-process invocation finished"
        );
        Ok(InvokeResponse {
            payload,
            log_tail: Some(report.log_tail(&request_id, elapsed)),
        })
    }

    fn name(&self) -> &str {
        "in-process"
    }
}
