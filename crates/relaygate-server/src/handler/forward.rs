//! Plain-forwarding handler: relay node over TCP or gateway dispatch.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use relaygate_core::io::{pump_until_first_close, NoCount};
use relaygate_core::RelayNode;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{dial_with_retry, Transfer};
use crate::error::ProxyError;
use crate::gateway::Gateway;
use crate::http::{write_response, RawRequest};
use crate::state::ProxyState;

/// Forward a non-CONNECT request through a relay node.
///
/// When the selected node holds a gateway control channel the request is
/// dispatched as a job and the response comes back asynchronously;
/// otherwise the original head is re-emitted verbatim over TCP and the
/// response pumped back. Chunked bodies get no special handling.
pub(super) async fn handle_forward<S>(
    mut stream: S,
    request: RawRequest,
    state: &ProxyState,
    token: &str,
    peer: SocketAddr,
) -> Result<Transfer, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let node = match state.pool.select(state.strategy) {
        Ok(node) => node,
        Err(err) => {
            if let Some(response) = err.response() {
                let _ = write_response(&mut stream, response).await;
            }
            return Err(err);
        }
    };

    if let Some(gateway) = &state.gateway {
        if gateway.is_connected(&node.addr()) {
            return dispatch_via_gateway(stream, request, gateway, &node, token, peer).await;
        }
    }

    // Direct forward: first attempt is the selected node, later attempts
    // rotate through the pool with the active strategy.
    let dial = dial_with_retry(state, |attempt| {
        if attempt == 0 {
            Ok(node.addr())
        } else {
            state.pool.select(state.strategy).map(|n| n.addr())
        }
    })
    .await;
    let (mut upstream, target) = match dial {
        Ok(pair) => pair,
        Err(err) => {
            if let Some(response) = err.response() {
                let _ = write_response(&mut stream, response).await;
            }
            return Err(err);
        }
    };
    debug!(peer = %peer, node = %target, "forwarding via node");

    upstream
        .write_all(&request.head)
        .await
        .map_err(ProxyError::Tunnel)?;
    if !request.remainder.is_empty() {
        upstream
            .write_all(&request.remainder)
            .await
            .map_err(ProxyError::Tunnel)?;
    }
    upstream.flush().await.map_err(ProxyError::Tunnel)?;
    let up_extra = (request.head.len() + request.remainder.len()) as u64;

    let end = pump_until_first_close(
        stream,
        upstream,
        state.tunnel_idle_timeout,
        state.pump_buffer_size,
        &NoCount,
    )
    .await;

    Ok(Transfer {
        up: end.up + up_extra,
        down: end.down,
    })
}

/// Hand the request to the node's control channel and wait for the
/// correlated response to be delivered.
async fn dispatch_via_gateway<S>(
    stream: S,
    request: RawRequest,
    gateway: &Arc<Gateway>,
    node: &RelayNode,
    token: &str,
    peer: SocketAddr,
) -> Result<Transfer, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let job_id = Uuid::new_v4().to_string();
    let headers: HashMap<String, String> = request.headers.iter().cloned().collect();
    let body = String::from_utf8_lossy(&request.remainder).into_owned();
    let up = (request.head.len() + request.remainder.len()) as u64;

    debug!(peer = %peer, node = %node, job = %job_id, "dispatching via gateway");

    let done = gateway
        .dispatch(
            &node.addr(),
            job_id.clone(),
            request.method.clone(),
            request.target.clone(),
            headers,
            body,
            token.to_string(),
            Box::new(stream),
        )
        .await?;

    // The gateway writes the response to the client; this task only waits
    // for the outcome so the session can be accounted. A node that stays
    // connected but never answers is bounded by the job timeout.
    match tokio::time::timeout(gateway.job_timeout(), done).await {
        Ok(Ok(outcome)) => Ok(Transfer {
            up,
            down: outcome.body_bytes,
        }),
        Ok(Err(_)) => Err(ProxyError::Gateway("job abandoned")),
        Err(_) => {
            warn!(job = %job_id, node = %node, "job response timed out");
            gateway.fail_job(&job_id).await;
            Err(ProxyError::Gateway("job timed out"))
        }
    }
}
