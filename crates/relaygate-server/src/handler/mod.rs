//! Per-connection driver: parse, authenticate, admit, then tunnel.

mod connect;
mod forward;

use std::net::SocketAddr;
use std::sync::Arc;

use relaygate_auth::{extract_token, AuthError};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::ProxyError;
use crate::http::{self, write_response};
use crate::state::ProxyState;

/// Byte totals a finished connection reports to the session tracker.
#[derive(Debug, Clone, Copy, Default)]
pub struct Transfer {
    pub up: u64,
    pub down: u64,
}

/// Drive one inbound connection through its whole lifecycle.
///
/// Rejections write their response and surface as errors so the accept
/// loop can log them; the accounting invariant is that `record_start` and
/// `record_stop` run exactly once each for every admitted connection.
pub async fn handle_conn<S>(
    mut stream: S,
    state: Arc<ProxyState>,
    peer: SocketAddr,
) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let request = match http::read_request(&mut stream, state.max_header_bytes).await {
        Ok(request) => request,
        Err(err) => return reject(stream, err).await,
    };
    debug!(peer = %peer, method = %request.method, target = %request.target, "request");

    let token = match extract_token(&request.headers, &state.token_header) {
        Ok((token, source)) => {
            debug!(peer = %peer, ?source, "token presented");
            token
        }
        Err(err) => return reject(stream, ProxyError::Auth(err)).await,
    };

    if request.host().map(str::is_empty).unwrap_or(true) {
        return reject(stream, ProxyError::ClientProtocol("missing host")).await;
    }

    if !state.tokens.contains(&token) {
        return reject(stream, ProxyError::Auth(AuthError::Unknown)).await;
    }
    if !state.burst.allow(&token) {
        return reject(stream, ProxyError::RateLimited("request burst")).await;
    }
    if state.sessions.is_blocked(&token, &state.limits).await {
        return reject(stream, ProxyError::RateLimited("token blocked")).await;
    }

    let handle = state.sessions.record_start(&token).await;

    let result = if request.is_connect() {
        connect::handle_connect(stream, request, &state, peer).await
    } else {
        forward::handle_forward(stream, request, &state, &token, peer).await
    };

    let transfer = match &result {
        Ok(transfer) => *transfer,
        Err(_) => Transfer::default(),
    };
    state
        .sessions
        .record_stop(&token, handle, transfer.up, transfer.down)
        .await;

    result.map(|_| ())
}

/// Write the response a rejection owes the client, then surface the error.
async fn reject<S>(mut stream: S, err: ProxyError) -> Result<(), ProxyError>
where
    S: AsyncWrite + Unpin,
{
    if let Some(response) = err.response() {
        // The peer may already be gone; the rejection itself still stands.
        let _ = write_response(&mut stream, response).await;
    }
    let _ = stream.shutdown().await;
    Err(err)
}

/// Dial an upstream with retry and per-attempt target rotation.
///
/// `next_target` supplies the target for each attempt: attempt 0 is the
/// primary, later attempts rotate to fallbacks via the active strategy.
/// Attempts are spaced by the configured delay; exhaustion maps to 502.
pub(crate) async fn dial_with_retry<F>(
    state: &ProxyState,
    mut next_target: F,
) -> Result<(TcpStream, String), ProxyError>
where
    F: FnMut(u32) -> Result<String, ProxyError>,
{
    let mut last_err = None;
    for attempt in 0..state.dial_attempts {
        if attempt > 0 {
            tokio::time::sleep(state.dial_retry_delay).await;
        }
        let target = next_target(attempt)?;
        match TcpStream::connect(&target).await {
            Ok(upstream) => return Ok((upstream, target)),
            Err(err) => {
                debug!(attempt, target = %target, error = %err, "dial attempt failed");
                last_err = Some(err);
            }
        }
    }
    Err(ProxyError::ConnectFailed {
        attempts: state.dial_attempts,
        last: last_err
            .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "no dial attempts")),
    })
}
