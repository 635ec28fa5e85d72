//! CONNECT tunnel handler.

use std::net::SocketAddr;

use relaygate_core::io::{pump_until_first_close, NoCount, PumpCause};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::{dial_with_retry, Transfer};
use crate::error::ProxyError;
use crate::http::{write_response, RawRequest, RESPONSE_200_ESTABLISHED};
use crate::state::ProxyState;

/// Open a raw tunnel to the CONNECT authority and pump until one side
/// finishes. The 200 goes out only after the upstream dial succeeded and
/// strictly before any payload byte moves.
pub(super) async fn handle_connect<S>(
    mut stream: S,
    request: RawRequest,
    state: &ProxyState,
    peer: SocketAddr,
) -> Result<Transfer, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let authority = match crate::http::parse_authority(&request.target, 443) {
        Ok((host, port)) => format!("{host}:{port}"),
        Err(err) => {
            if let Some(response) = err.response() {
                let _ = write_response(&mut stream, response).await;
            }
            return Err(err);
        }
    };

    // CONNECT has no meaningful fallback: every attempt re-dials the
    // requested destination.
    let dial = dial_with_retry(state, |_| Ok(authority.clone())).await;
    let (mut upstream, _) = match dial {
        Ok(pair) => pair,
        Err(err) => {
            if let Some(response) = err.response() {
                let _ = write_response(&mut stream, response).await;
            }
            return Err(err);
        }
    };
    debug!(peer = %peer, target = %authority, "tunnel connected");

    write_response(&mut stream, RESPONSE_200_ESTABLISHED).await?;

    // Early bytes that arrived buffered behind the CONNECT head.
    let mut up_extra = 0u64;
    if !request.remainder.is_empty() {
        upstream.write_all(&request.remainder).await.map_err(ProxyError::Tunnel)?;
        up_extra = request.remainder.len() as u64;
    }

    let end = pump_until_first_close(
        stream,
        upstream,
        state.tunnel_idle_timeout,
        state.pump_buffer_size,
        &NoCount,
    )
    .await;

    // Mid-tunnel transfer errors close the tunnel best-effort; there is no
    // response left to send, but the accounting still happens.
    match &end.cause {
        PumpCause::Eof => debug!(peer = %peer, target = %authority, "tunnel finished"),
        PumpCause::Idle => debug!(peer = %peer, target = %authority, "tunnel idle timeout"),
        PumpCause::Error(err) => {
            debug!(peer = %peer, target = %authority, error = %err, "tunnel transfer error")
        }
    }

    Ok(Transfer {
        up: end.up + up_extra,
        down: end.down,
    })
}
