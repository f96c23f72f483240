//! Frame-level WebSocket relay between an upgraded client and upstream.
//!
//! The relay terminates the protocol on both sides: frames from the client
//! are validated as a server would validate them, then re-encoded (masked)
//! toward the upstream as a client would send them, and vice versa. Fragments
//! are forwarded as they arrive; messages are never reassembled.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;

use super::recorder::{Direction, PayloadKind, Recorder};
use super::ProxyError;
use crate::observability::metrics;
use crate::websocket::{CloseCode, FrameReader, FrameWriter, OpCode, Role, WebSocket, WsError};

/// How long the second direction may take to finish the closing handshake.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Relay frames until both closing handshakes complete or either side fails.
pub async fn relay_websocket<C, U>(
    client: C,
    upstream: U,
    max_message_size: usize,
    recorder: &Recorder,
) -> Result<(), ProxyError>
where
    C: AsyncRead + AsyncWrite,
    U: AsyncRead + AsyncWrite,
{
    let (mut client_reader, client_writer) = WebSocket::from_upgraded(client, Role::Server)
        .with_max_message_size(max_message_size)
        .split();
    let (mut upstream_reader, upstream_writer) = WebSocket::from_upgraded(upstream, Role::Client)
        .with_max_message_size(max_message_size)
        .split();
    let client_writer = Mutex::new(client_writer);
    let upstream_writer = Mutex::new(upstream_writer);

    let mut to_server = std::pin::pin!(pump(
        Direction::ToServer,
        &mut client_reader,
        &upstream_writer,
        &client_writer,
        recorder,
    ));
    let mut to_client = std::pin::pin!(pump(
        Direction::ToClient,
        &mut upstream_reader,
        &client_writer,
        &upstream_writer,
        recorder,
    ));

    let (finished, result) = tokio::select! {
        r = &mut to_server => (Direction::ToServer, r),
        r = &mut to_client => (Direction::ToClient, r),
    };
    result?;

    let rest = match finished {
        Direction::ToServer => tokio::time::timeout(CLOSE_TIMEOUT, &mut to_client).await,
        Direction::ToClient => tokio::time::timeout(CLOSE_TIMEOUT, &mut to_server).await,
    };
    match rest {
        Ok(result) => result?,
        Err(_) => tracing::debug!("Closing handshake timed out"),
    }

    if let Err(e) = client_writer.lock().await.shutdown().await {
        tracing::debug!(error = %e, "Client shutdown failed");
    }
    if let Err(e) = upstream_writer.lock().await.shutdown().await {
        tracing::debug!(error = %e, "Upstream shutdown failed");
    }
    Ok(())
}

/// Forward frames from `reader` to `to` until a close frame has been passed on.
///
/// `back` writes toward the peer `reader` listens to; it carries the close
/// frame describing a protocol violation by that peer.
async fn pump<R, W, B>(
    direction: Direction,
    reader: &mut FrameReader<R>,
    to: &Mutex<FrameWriter<W>>,
    back: &Mutex<FrameWriter<B>>,
    recorder: &Recorder,
) -> Result<(), ProxyError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    B: AsyncWrite + Unpin,
{
    loop {
        let frame = match reader.read_frame().await {
            Ok(frame) => frame,
            Err(err) => {
                back.lock().await.fail(&err).await;
                abandon(to).await;
                return Err(err.into());
            }
        };

        let opcode = frame.opcode();
        metrics::record_websocket_frame(direction.as_str());
        if recorder.is_enabled() {
            let kind = match opcode {
                OpCode::Text => PayloadKind::WebSocketText,
                OpCode::Binary | OpCode::Continuation => PayloadKind::WebSocketBinary,
                _ => PayloadKind::WebSocketControl,
            };
            recorder.record(direction, kind, &frame.payload);
        }

        let mut writer = to.lock().await;
        if let Err(err) = writer.write_frame(opcode, frame.is_final(), &frame.payload).await {
            drop(writer);
            back.lock().await.fail(&WsError::protocol(CloseCode::GoingAway, "peer unavailable")).await;
            return Err(err.into());
        }
        if opcode == OpCode::Close {
            tracing::debug!(%direction, "Close frame relayed");
            return Ok(());
        }
    }
}

/// Tell the other peer the relay is going away.
async fn abandon<W: AsyncWrite + Unpin>(to: &Mutex<FrameWriter<W>>) {
    let mut writer = to.lock().await;
    if writer.state().can_send() {
        if let Err(e) = writer.send_close(CloseCode::GoingAway, "").await {
            tracing::debug!(error = %e, "Failed to forward close");
        }
    }
}
