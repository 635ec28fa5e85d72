//! Relay-node gateway: persistent control channels and job dispatch.
//!
//! Each relay node opens one long-lived WebSocket connection and announces
//! itself with a `register` frame. Jobs are dispatched as `request` frames
//! and correlated back by `job_id` when the node answers with a `response`
//! frame. Per node there is exactly one writer task draining an mpsc
//! channel into the socket, so frames never interleave.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ProxyError;
use crate::http::RESPONSE_502_GATEWAY;

/// How long a node may take to send its `register` frame.
const REGISTER_TIMEOUT: Duration = Duration::from_secs(30);

/// Control-channel frames, one JSON object per message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Register {
        token: String,
    },
    Request {
        job_id: String,
        method: String,
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        body: String,
    },
    Response {
        job_id: String,
        status_code: u16,
        #[serde(default)]
        body: String,
    },
}

/// Write half of the client connection a job answers to.
pub type ClientHandle = Box<dyn AsyncWrite + Send + Unpin>;

/// Delivered to the dispatching connection task once the job resolved,
/// for session accounting.
#[derive(Debug, Clone, Copy)]
pub struct JobOutcome {
    pub status_code: u16,
    pub body_bytes: u64,
}

struct PendingJob {
    node_id: String,
    token: String,
    client: ClientHandle,
    done: oneshot::Sender<JobOutcome>,
}

struct NodeChannel {
    sender: mpsc::Sender<Message>,
    last_seen: Instant,
    conn_id: u64,
}

/// Registry of connected relay nodes and in-flight jobs.
pub struct Gateway {
    nodes: Mutex<HashMap<String, NodeChannel>>,
    pending: Mutex<HashMap<String, PendingJob>>,
    silence_timeout: Duration,
    conn_seq: AtomicU64,
}

impl Gateway {
    pub fn new(silence_timeout: Duration) -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            silence_timeout,
            conn_seq: AtomicU64::new(0),
        }
    }

    /// Whether a node is currently registered on the control channel.
    pub fn is_connected(&self, node_id: &str) -> bool {
        self.nodes.lock().contains_key(node_id)
    }

    /// Currently registered node ids.
    pub fn connected_nodes(&self) -> Vec<String> {
        self.nodes.lock().keys().cloned().collect()
    }

    /// Number of jobs awaiting a response.
    pub fn pending_jobs(&self) -> usize {
        self.pending.lock().len()
    }

    /// How long a dispatcher should wait for a job to resolve.
    pub fn job_timeout(&self) -> Duration {
        self.silence_timeout
    }

    /// Fail one pending job back to its client with a gateway error.
    pub async fn fail_job(&self, job_id: &str) {
        let job = self.pending.lock().remove(job_id);
        if let Some(mut job) = job {
            let _ = job.client.write_all(RESPONSE_502_GATEWAY).await;
            let _ = job.client.shutdown().await;
            let _ = job.done.send(JobOutcome {
                status_code: 502,
                body_bytes: 0,
            });
        }
    }

    /// Dispatch a job to a registered node.
    ///
    /// The client write-half is parked with the pending job; the node's
    /// eventual `response` frame (or a failure) is written to it by the
    /// gateway. The returned receiver resolves when that happens, so the
    /// dispatching task can account the session.
    #[allow(clippy::too_many_arguments)]
    pub async fn dispatch(
        &self,
        node_id: &str,
        job_id: String,
        method: String,
        url: String,
        headers: HashMap<String, String>,
        body: String,
        token: String,
        client: ClientHandle,
    ) -> Result<oneshot::Receiver<JobOutcome>, ProxyError> {
        let sender = self
            .nodes
            .lock()
            .get(node_id)
            .map(|chan| chan.sender.clone())
            .ok_or(ProxyError::Gateway("node not connected"))?;

        let (done_tx, done_rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            pending.insert(
                job_id.clone(),
                PendingJob {
                    node_id: node_id.to_string(),
                    token,
                    client,
                    done: done_tx,
                },
            );
        }

        let frame = Frame::Request {
            job_id: job_id.clone(),
            method,
            url,
            headers,
            body,
        };
        let text = serde_json::to_string(&frame)
            .map_err(|_| ProxyError::Gateway("unserializable job"))?;

        if sender.send(Message::Text(text)).await.is_err() {
            self.pending.lock().remove(&job_id);
            return Err(ProxyError::Gateway("control channel closed"));
        }

        debug!(node = node_id, job = %job_id, "job dispatched");
        Ok(done_rx)
    }

    /// Serve control-channel connections until shutdown.
    pub async fn run(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("gateway listener shutting down");
                    return;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            debug!(peer = %peer, "control channel connection");
                            let gateway = self.clone();
                            tokio::spawn(gateway.handle_node_conn(stream));
                        }
                        Err(err) => {
                            warn!(error = %err, "gateway accept failed");
                        }
                    }
                }
            }
        }
    }

    /// Periodically deregister silent nodes until shutdown.
    pub async fn run_monitor(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("gateway monitor shutting down");
                    return;
                }
                _ = tokio::time::sleep(interval) => {
                    let evicted = self.evict_silent().await;
                    for node_id in evicted {
                        warn!(node = %node_id, "node silent past timeout, deregistered");
                    }
                }
            }
        }
    }

    /// One monitor sweep: remove nodes silent past the timeout and fail
    /// their pending jobs back to the clients. Returns the evicted ids.
    pub async fn evict_silent(&self) -> Vec<String> {
        let now = Instant::now();
        let evicted: Vec<String> = {
            let mut nodes = self.nodes.lock();
            let expired: Vec<String> = nodes
                .iter()
                .filter(|(_, chan)| now.duration_since(chan.last_seen) >= self.silence_timeout)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &expired {
                nodes.remove(id);
            }
            expired
        };

        for node_id in &evicted {
            self.fail_jobs_for_node(node_id).await;
        }
        evicted
    }

    /// Handle one control-channel connection end to end.
    pub async fn handle_node_conn<S>(self: Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let ws = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(err) => {
                warn!(error = %err, "control channel handshake failed");
                return;
            }
        };
        let (mut sink, mut source) = ws.split();

        // Registration must arrive first.
        let node_id = match tokio::time::timeout(REGISTER_TIMEOUT, async {
            while let Some(msg) = source.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Ok(Frame::Register { token }) = serde_json::from_str(&text) {
                            return Some(token);
                        }
                        debug!("ignoring pre-registration frame");
                    }
                    Ok(Message::Close(_)) | Err(_) => return None,
                    Ok(_) => {}
                }
            }
            None
        })
        .await
        {
            Ok(Some(token)) => token,
            Ok(None) => return,
            Err(_) => {
                warn!("node failed to register in time");
                return;
            }
        };

        let conn_id = self.conn_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::channel::<Message>(64);

        // Single writer per node: everything outbound goes through this task.
        let writer_node = node_id.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(err) = sink.send(msg).await {
                    debug!(node = %writer_node, error = %err, "control channel send failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Latest registration wins; a replaced channel's sender drops and
        // its writer task winds down.
        self.nodes.lock().insert(
            node_id.clone(),
            NodeChannel {
                sender: tx.clone(),
                last_seen: Instant::now(),
                conn_id,
            },
        );
        info!(node = %node_id, "node registered");

        while let Some(msg) = source.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    self.touch(&node_id);
                    if text.trim() == "ping" {
                        if tx.send(Message::Text("pong".to_string())).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    match serde_json::from_str::<Frame>(&text) {
                        Ok(Frame::Response {
                            job_id,
                            status_code,
                            body,
                        }) => {
                            self.handle_response(&job_id, status_code, &body).await;
                        }
                        Ok(Frame::Register { .. }) => {}
                        Ok(Frame::Request { .. }) => {
                            debug!(node = %node_id, "ignoring request frame from node");
                        }
                        Err(err) => {
                            warn!(node = %node_id, error = %err, "undecodable control frame");
                        }
                    }
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => self.touch(&node_id),
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    debug!(node = %node_id, error = %err, "control channel read failed");
                    break;
                }
            }
        }

        // Deregister only if this connection still owns the entry.
        let removed = {
            let mut nodes = self.nodes.lock();
            match nodes.get(&node_id) {
                Some(chan) if chan.conn_id == conn_id => {
                    nodes.remove(&node_id);
                    true
                }
                _ => false,
            }
        };
        if removed {
            info!(node = %node_id, "node disconnected");
            self.fail_jobs_for_node(&node_id).await;
        }
    }

    /// Correlate a `response` frame back to its waiting client.
    async fn handle_response(&self, job_id: &str, status_code: u16, body: &str) {
        let job = self.pending.lock().remove(job_id);
        let Some(mut job) = job else {
            warn!(job = %job_id, "response for unknown job dropped");
            return;
        };

        let response = format!(
            "HTTP/1.1 {status_code}\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        if let Err(err) = job.client.write_all(response.as_bytes()).await {
            warn!(job = %job_id, token = %job.token, error = %err, "failed to deliver job response");
        }
        let _ = job.client.shutdown().await;

        debug!(job = %job_id, status = status_code, "job completed");
        let _ = job.done.send(JobOutcome {
            status_code,
            body_bytes: body.len() as u64,
        });
    }

    /// Fail every pending job of a node back to its client with 502.
    async fn fail_jobs_for_node(&self, node_id: &str) {
        let failed: Vec<(String, PendingJob)> = {
            let mut pending = self.pending.lock();
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, job)| job.node_id == node_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|job| (id, job)))
                .collect()
        };

        for (job_id, mut job) in failed {
            warn!(job = %job_id, node = %node_id, token = %job.token, "failing job: node gone");
            let _ = job.client.write_all(RESPONSE_502_GATEWAY).await;
            let _ = job.client.shutdown().await;
            let _ = job.done.send(JobOutcome {
                status_code: 502,
                body_bytes: 0,
            });
        }
    }

    fn touch(&self, node_id: &str) {
        if let Some(chan) = self.nodes.lock().get_mut(node_id) {
            chan.last_seen = Instant::now();
        }
    }
}
