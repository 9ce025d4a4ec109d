//! Remote functions over ZeroMQ DEALER/ROUTER sockets.
//!
//! - [`ZmqTransport`] wraps a DEALER socket and implements [`FunctionTransport`]
//! - [`FunctionHost`] wraps a ROUTER socket and runs requests against a
//!   [`FunctionRegistry`]
//!
//! ## Framing (zeromq-rs 0.4)
//!
//! ROUTER pushes the peer identity as first frame on recv and pops it on
//! send. DEALER sends and receives raw application frames:
//! - DEALER sends: `[b"invoke", frame]`
//! - ROUTER receives: `[identity, b"invoke", frame]`
//! - ROUTER sends: `[identity, b"invoke", frame]`
//! - DEALER receives: `[b"invoke", frame]`
//!
//! `frame` is a MessagePack [`WireFrame`] whose `body` is the opaque request
//! or reply payload.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use zeromq::prelude::*;
use zeromq::{DealerSocket, RouterSocket, ZmqMessage};

use crate::endpoint::Endpoint;
use crate::error::WireError;
use crate::registry::FunctionRegistry;
use crate::report::InvocationReport;
use crate::traits::{FunctionTransport, InvokeResponse};

const INVOKE_TOPIC: &str = "invoke";

/// Transport-level frame matching a reply to its request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFrame {
    pub correlation_id: Uuid,

    #[serde(with = "crate::envelope::serde_bytes")]
    pub body: Vec<u8>,

    /// Function log tail, set on replies only.
    #[serde(default)]
    pub log_tail: Option<String>,
}

impl WireFrame {
    fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }

    fn into_zmq(self, identity: Option<Vec<u8>>) -> Result<ZmqMessage, WireError> {
        let bytes = self.to_bytes()?;
        let mut zmq_msg = match identity {
            Some(identity) => {
                let mut m = ZmqMessage::from(identity);
                m.push_back(INVOKE_TOPIC.as_bytes().to_vec().into());
                m
            }
            None => ZmqMessage::from(INVOKE_TOPIC),
        };
        zmq_msg.push_back(bytes.into());
        Ok(zmq_msg)
    }
}

type Pending = Arc<Mutex<HashMap<Uuid, oneshot::Sender<WireFrame>>>>;

/// DEALER-socket client invoking functions on a [`FunctionHost`].
///
/// The socket is owned by a background task that multiplexes outbound
/// requests and inbound replies; replies are matched by correlation id.
pub struct ZmqTransport {
    send_tx: mpsc::Sender<ZmqMessage>,
    pending: Pending,
    timeout: Duration,
    name: String,
    _loop_handle: tokio::task::JoinHandle<()>,
}

impl ZmqTransport {
    /// Connect to a function host. Must be called inside a tokio runtime.
    #[instrument(skip_all, fields(endpoint = %endpoint))]
    pub async fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<Self, WireError> {
        let address = endpoint
            .zmq_address()
            .ok_or_else(|| WireError::Endpoint("in-process endpoint has no socket".into()))?;
        let mut socket = DealerSocket::new();
        info!(endpoint = %address, "connecting DEALER socket");
        socket.connect(&address).await?;

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (send_tx, send_rx) = mpsc::channel::<ZmqMessage>(256);

        let loop_pending = Arc::clone(&pending);
        let loop_handle = tokio::spawn(async move {
            Self::event_loop(socket, send_rx, loop_pending).await;
        });

        Ok(Self {
            send_tx,
            pending,
            timeout,
            name: address,
            _loop_handle: loop_handle,
        })
    }

    async fn event_loop(
        mut socket: DealerSocket,
        mut send_rx: mpsc::Receiver<ZmqMessage>,
        pending: Pending,
    ) {
        loop {
            tokio::select! {
                Some(zmq_msg) = send_rx.recv() => {
                    if let Err(e) = socket.send(zmq_msg).await {
                        warn!(error = %e, "DEALER send failed");
                    }
                }
                result = socket.recv() => {
                    match result {
                        Ok(zmq_msg) => Self::dispatch_reply(&pending, zmq_msg).await,
                        Err(e) => {
                            debug!(error = %e, "DEALER recv loop ending");
                            break;
                        }
                    }
                }
                else => break,
            }
        }
    }

    async fn dispatch_reply(pending: &Mutex<HashMap<Uuid, oneshot::Sender<WireFrame>>>, zmq_msg: ZmqMessage) {
        let frames: Vec<_> = zmq_msg.iter().collect();
        let data_frames: Vec<_> = frames.iter().skip_while(|f| f.as_ref().is_empty()).collect();

        if data_frames.len() < 2 {
            warn!(data_frame_count = data_frames.len(), "unexpected frame count on DEALER recv");
            return;
        }

        let frame = match WireFrame::from_bytes(data_frames[1].as_ref()) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "failed to decode reply frame");
                return;
            }
        };

        let cid = frame.correlation_id;
        match pending.lock().await.remove(&cid) {
            Some(tx) => {
                let _ = tx.send(frame);
            }
            // The caller timed out; the function ran anyway.
            None => debug!(correlation_id = %cid, "reply for abandoned invocation"),
        }
    }
}

#[async_trait]
impl FunctionTransport for ZmqTransport {
    /// Send a request and wait for the matching reply.
    ///
    /// Returns [`WireError::Timeout`] if nothing arrives in time. The host
    /// keeps running the request regardless.
    async fn invoke(&self, request: Vec<u8>) -> Result<InvokeResponse, WireError> {
        let cid = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(cid, tx);

        let frame = WireFrame {
            correlation_id: cid,
            body: request,
            log_tail: None,
        };
        let zmq_msg = match frame.into_zmq(None) {
            Ok(m) => m,
            Err(e) => {
                self.pending.lock().await.remove(&cid);
                return Err(e);
            }
        };
        if self.send_tx.send(zmq_msg).await.is_err() {
            self.pending.lock().await.remove(&cid);
            return Err(WireError::Transport("client event loop closed".into()));
        }
        debug!(correlation_id = %cid, "sent invocation");

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(frame)) => Ok(InvokeResponse {
                payload: frame.body,
                log_tail: frame.log_tail,
            }),
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&cid);
                Err(WireError::Transport("reply channel closed unexpectedly".into()))
            }
            Err(_) => {
                self.pending.lock().await.remove(&cid);
                Err(WireError::Timeout(self.timeout))
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// ROUTER-socket server hosting a [`FunctionRegistry`].
///
/// Each request runs on a blocking thread; replies are sent as they finish,
/// in completion order.
pub struct FunctionHost {
    socket: RouterSocket,
    registry: Arc<FunctionRegistry>,
    memory_size_mb: u32,
}

impl FunctionHost {
    /// Bind a ROUTER socket on the given endpoint.
    #[instrument(skip_all, fields(endpoint = %endpoint))]
    pub async fn bind(
        endpoint: &Endpoint,
        registry: FunctionRegistry,
        memory_size_mb: u32,
    ) -> Result<Self, WireError> {
        let address = endpoint
            .zmq_address()
            .ok_or_else(|| WireError::Endpoint("cannot host functions in-process".into()))?;
        endpoint
            .ensure_ipc_dir()
            .map_err(|e| WireError::Transport(e.to_string()))?;
        endpoint
            .remove_stale_socket()
            .map_err(|e| WireError::Transport(e.to_string()))?;
        let mut socket = RouterSocket::new();
        info!(endpoint = %address, kinds = ?registry.kinds().collect::<Vec<_>>(), "binding ROUTER socket");
        socket.bind(&address).await?;
        Ok(Self {
            socket,
            registry: Arc::new(registry),
            memory_size_mb,
        })
    }

    /// Serve requests until `shutdown` resolves.
    pub async fn serve_until<F>(mut self, shutdown: F) -> Result<(), WireError>
    where
        F: Future<Output = ()>,
    {
        let (done_tx, mut done_rx) = mpsc::channel::<ZmqMessage>(256);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("function host shutting down");
                    return Ok(());
                }
                Some(reply) = done_rx.recv() => {
                    self.socket.send(reply).await?;
                }
                result = self.socket.recv() => {
                    let zmq_msg = result?;
                    match Self::parse_request(zmq_msg) {
                        Ok((identity, frame)) => self.spawn_request(identity, frame, done_tx.clone()),
                        Err(e) => warn!(error = %e, "dropping malformed request"),
                    }
                }
            }
        }
    }

    fn parse_request(zmq_msg: ZmqMessage) -> Result<(Vec<u8>, WireFrame), WireError> {
        // ROUTER recv frames: [identity, ...data_frames]
        let frames: Vec<_> = zmq_msg.iter().collect();
        if frames.len() < 2 {
            return Err(WireError::Transport(format!(
                "expected at least 2 frames from ROUTER, got {}",
                frames.len()
            )));
        }
        let identity = frames[0].as_ref().to_vec();
        let data_frames: Vec<_> = frames[1..]
            .iter()
            .skip_while(|f| f.as_ref().is_empty())
            .collect();
        if data_frames.len() < 2 {
            return Err(WireError::Transport(format!(
                "expected [topic, frame] after identity, got {} data frames",
                data_frames.len()
            )));
        }
        let frame = WireFrame::from_bytes(data_frames[1].as_ref())?;
        Ok((identity, frame))
    }

    fn spawn_request(&self, identity: Vec<u8>, frame: WireFrame, done_tx: mpsc::Sender<ZmqMessage>) {
        let registry = Arc::clone(&self.registry);
        let memory_size_mb = self.memory_size_mb;
        tokio::spawn(async move {
            let cid = frame.correlation_id;
            let ran = tokio::task::spawn_blocking(move || {
                let started = Instant::now();
                let body = registry.handle(&frame.body);
                (body, started.elapsed())
            })
            .await;
            let (body, elapsed) = match ran {
                Ok(done) => done,
                Err(e) => {
                    warn!(correlation_id = %cid, error = %e, "function thread aborted");
                    return;
                }
            };
            let request_id = cid.to_string();
            let report = InvocationReport::measured(elapsed, memory_size_mb);
            let reply = WireFrame {
                correlation_id: cid,
                body,
                log_tail: Some(report.log_tail(&request_id, elapsed)),
            };
            match reply.into_zmq(Some(identity)) {
                Ok(zmq_msg) => {
                    if done_tx.send(zmq_msg).await.is_err() {
                        debug!(correlation_id = %cid, "host stopped before reply was sent");
                    }
                }
                Err(e) => warn!(correlation_id = %cid, error = %e, "failed to encode reply frame"),
            }
        });
    }
}
