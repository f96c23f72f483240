//! Per-connection state machine, fragment reassembly and close handshake.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use super::frame::{Frame, FrameHeader, OpCode, MAX_CONTROL_PAYLOAD};
use super::mask::{apply_mask, mask_in_place};
use super::{CloseCode, Message, Role, WsError};

/// Default cap on a single frame or reassembled message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Close reasons are limited so the whole payload fits a control frame.
const MAX_CLOSE_REASON: usize = MAX_CONTROL_PAYLOAD as usize - 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    /// This endpoint sent a close frame and awaits the peer's.
    CloseSent,
    /// The peer sent a close frame first.
    CloseReceived,
    Closed,
    Errored,
}

impl ConnectionState {
    fn after_close_sent(self) -> Option<Self> {
        match self {
            ConnectionState::Open => Some(ConnectionState::CloseSent),
            ConnectionState::CloseReceived => Some(ConnectionState::Closed),
            _ => None,
        }
    }

    fn after_close_received(self) -> Option<Self> {
        match self {
            ConnectionState::Open => Some(ConnectionState::CloseReceived),
            ConnectionState::CloseSent => Some(ConnectionState::Closed),
            _ => None,
        }
    }

    /// Frames may still arrive from the peer.
    pub fn can_receive(self) -> bool {
        matches!(self, ConnectionState::Open | ConnectionState::CloseSent)
    }

    /// Frames may still be sent to the peer.
    pub fn can_send(self) -> bool {
        matches!(self, ConnectionState::Open | ConnectionState::CloseReceived)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Errored)
    }
}

/// State shared between the reading and writing halves.
#[derive(Debug, Clone)]
struct SharedState(Arc<Mutex<ConnectionState>>);

impl SharedState {
    fn new(state: ConnectionState) -> Self {
        Self(Arc::new(Mutex::new(state)))
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self) -> ConnectionState {
        *self.lock()
    }

    fn set(&self, state: ConnectionState) {
        *self.lock() = state;
    }

    /// Apply `f` under the lock; `None` means the transition is not allowed.
    fn transition(
        &self,
        f: impl FnOnce(ConnectionState) -> Option<ConnectionState>,
    ) -> Result<ConnectionState, WsError> {
        let mut guard = self.lock();
        let next = f(*guard).ok_or(WsError::InvalidState(*guard))?;
        *guard = next;
        Ok(next)
    }
}

/// Receiving half: decodes and validates incoming frames.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    role: Role,
    state: SharedState,
    max_frame_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Read one frame with its payload unmasked.
    ///
    /// I/O failures move the connection to `Errored`. Protocol violations are
    /// returned as-is so the caller can report them with
    /// [`FrameWriter::fail`].
    pub async fn read_frame(&mut self) -> Result<Frame, WsError> {
        let state = self.state.get();
        if !state.can_receive() {
            return Err(WsError::InvalidState(state));
        }

        match self.read_frame_inner().await {
            Ok(frame) => Ok(frame),
            Err(err) => {
                if matches!(err, WsError::Io(_)) {
                    self.state.set(ConnectionState::Errored);
                }
                Err(err)
            }
        }
    }

    async fn read_frame_inner(&mut self) -> Result<Frame, WsError> {
        let header = FrameHeader::decode(&mut self.inner, self.role).await?;
        if header.payload_len > self.max_frame_size as u64 {
            return Err(WsError::protocol(
                CloseCode::MessageTooBig,
                format!("frame of {} bytes exceeds limit", header.payload_len),
            ));
        }

        let mut payload = vec![0u8; header.payload_len as usize];
        self.inner.read_exact(&mut payload).await?;
        if let Some(key) = header.mask {
            mask_in_place(&mut payload, key, 0);
        }

        if header.opcode == OpCode::Close {
            parse_close_payload(&payload)?;
            let next = self.state.transition(ConnectionState::after_close_received)?;
            tracing::debug!(state = ?next, "Close frame received");
        }

        Ok(Frame {
            header,
            payload: Bytes::from(payload),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn role(&self) -> Role {
        self.role
    }
}

/// Sending half: encodes frames with role-correct masking.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
    role: Role,
    state: SharedState,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub async fn write_frame(
        &mut self,
        opcode: OpCode,
        fin: bool,
        payload: &[u8],
    ) -> Result<(), WsError> {
        if opcode.is_control() && (payload.len() as u64 > MAX_CONTROL_PAYLOAD || !fin) {
            return Err(WsError::protocol(
                CloseCode::InternalError,
                "control frames must be final and at most 125 bytes",
            ));
        }

        if opcode == OpCode::Close {
            let next = self.state.transition(ConnectionState::after_close_sent)?;
            tracing::debug!(state = ?next, "Close frame sent");
        } else {
            let state = self.state.get();
            if !state.can_send() {
                return Err(WsError::InvalidState(state));
            }
        }

        let header = FrameHeader::outgoing(opcode, fin, payload.len() as u64, self.role);
        let body = apply_mask(payload, header.mask);
        let mut wire = header.encode();
        wire.extend_from_slice(&body);

        let written = async {
            self.inner.write_all(&wire).await?;
            self.inner.flush().await
        }
        .await;
        if let Err(e) = written {
            self.state.set(ConnectionState::Errored);
            return Err(e.into());
        }
        Ok(())
    }

    /// Send a close frame. `CloseCode::None` sends an empty payload.
    pub async fn send_close(&mut self, code: CloseCode, reason: &str) -> Result<(), WsError> {
        let payload = close_payload(code, reason)?;
        self.write_frame(OpCode::Close, true, &payload).await
    }

    /// Report a failure to the peer (when still possible) and mark the
    /// connection errored. A connection that already reached `Closed` or
    /// `Errored` stays there.
    pub async fn fail(&mut self, err: &WsError) {
        if self.state.get().is_terminal() {
            return;
        }
        if let WsError::Protocol { code, reason } = err {
            if self.state.get().can_send() && code.is_sendable() {
                if let Err(e) = self.send_close(*code, reason).await {
                    tracing::debug!(error = %e, "Failed to send close frame");
                }
            }
        }
        self.state.set(ConnectionState::Errored);
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub async fn shutdown(&mut self) -> Result<(), WsError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// A WebSocket endpoint over an upgraded byte stream.
#[derive(Debug)]
pub struct WebSocket<S> {
    reader: FrameReader<ReadHalf<S>>,
    writer: FrameWriter<WriteHalf<S>>,
    state: SharedState,
    max_message_size: usize,
    /// First header and accumulated payload of a fragmented message.
    partial: Option<(FrameHeader, Vec<u8>)>,
}

impl<S: AsyncRead + AsyncWrite> WebSocket<S> {
    /// Wrap a stream whose opening handshake is still in progress.
    pub fn new(stream: S, role: Role) -> Self {
        Self::with_state(stream, role, ConnectionState::Connecting)
    }

    /// Wrap a stream that has already completed the HTTP upgrade.
    pub fn from_upgraded(stream: S, role: Role) -> Self {
        Self::with_state(stream, role, ConnectionState::Open)
    }

    fn with_state(stream: S, role: Role, state: ConnectionState) -> Self {
        let state = SharedState::new(state);
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: FrameReader {
                inner: read_half,
                role,
                state: state.clone(),
                max_frame_size: DEFAULT_MAX_MESSAGE_SIZE,
            },
            writer: FrameWriter {
                inner: write_half,
                role,
                state: state.clone(),
            },
            state,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            partial: None,
        }
    }

    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self.reader.max_frame_size = max;
        self
    }

    /// Mark the opening handshake complete.
    pub fn open(&mut self) -> Result<(), WsError> {
        self.state.transition(|s| match s {
            ConnectionState::Connecting => Some(ConnectionState::Open),
            _ => None,
        })?;
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn role(&self) -> Role {
        self.reader.role
    }

    /// Split into independently usable halves sharing one state machine.
    pub fn split(self) -> (FrameReader<ReadHalf<S>>, FrameWriter<WriteHalf<S>>) {
        (self.reader, self.writer)
    }

    /// Read the next complete message.
    ///
    /// Pings are answered automatically and still returned. A peer-initiated
    /// close is echoed, completing the handshake. Protocol violations send a
    /// close frame with the matching code before the error is returned.
    pub async fn read_message(&mut self) -> Result<Message, WsError> {
        loop {
            let frame = match self.reader.read_frame().await {
                Ok(frame) => frame,
                Err(err) => return Err(self.failure(err).await),
            };

            match frame.header.opcode {
                OpCode::Ping => {
                    if self.state.get().can_send() {
                        self.writer.write_frame(OpCode::Pong, true, &frame.payload).await?;
                    }
                    return Ok(Message::Ping(frame.payload));
                }
                OpCode::Pong => return Ok(Message::Pong(frame.payload)),
                OpCode::Close => {
                    let close = parse_close_payload(&frame.payload)?;
                    if self.state.get() == ConnectionState::CloseReceived {
                        let code = close.as_ref().map(|(c, _)| *c).unwrap_or(CloseCode::None);
                        self.writer.send_close(code, "").await?;
                    }
                    return Ok(Message::Close(close));
                }
                OpCode::Text | OpCode::Binary => {
                    if self.partial.is_some() {
                        let err = WsError::protocol(
                            CloseCode::ProtocolError,
                            "new data frame while a fragmented message is open",
                        );
                        return Err(self.failure(err).await);
                    }
                    if frame.header.fin {
                        return self.complete(frame.header, frame.payload.to_vec()).await;
                    }
                    self.partial = Some((frame.header, frame.payload.to_vec()));
                }
                OpCode::Continuation => {
                    let Some((first, mut buf)) = self.partial.take() else {
                        let err = WsError::protocol(
                            CloseCode::ProtocolError,
                            "continuation frame without a message in progress",
                        );
                        return Err(self.failure(err).await);
                    };
                    if buf.len() + frame.payload.len() > self.max_message_size {
                        let err = WsError::protocol(
                            CloseCode::MessageTooBig,
                            "reassembled message exceeds limit",
                        );
                        return Err(self.failure(err).await);
                    }
                    buf.extend_from_slice(&frame.payload);
                    if frame.header.fin {
                        let header = FrameHeader::from_fragments(&first, buf.len() as u64)?;
                        return self.complete(header, buf).await;
                    }
                    self.partial = Some((first, buf));
                }
            }
        }
    }

    async fn complete(&mut self, header: FrameHeader, payload: Vec<u8>) -> Result<Message, WsError> {
        match header.opcode {
            OpCode::Text => match String::from_utf8(payload) {
                Ok(text) => Ok(Message::Text(text)),
                Err(_) => {
                    let err = WsError::protocol(CloseCode::DataFormat, "text message is not valid UTF-8");
                    Err(self.failure(err).await)
                }
            },
            _ => Ok(Message::Binary(Bytes::from(payload))),
        }
    }

    async fn failure(&mut self, err: WsError) -> WsError {
        self.writer.fail(&err).await;
        err
    }

    pub async fn send(&mut self, message: Message) -> Result<(), WsError> {
        match message {
            Message::Text(text) => self.writer.write_frame(OpCode::Text, true, text.as_bytes()).await,
            Message::Binary(data) => self.writer.write_frame(OpCode::Binary, true, &data).await,
            Message::Ping(data) => self.writer.write_frame(OpCode::Ping, true, &data).await,
            Message::Pong(data) => self.writer.write_frame(OpCode::Pong, true, &data).await,
            Message::Close(None) => self.writer.send_close(CloseCode::None, "").await,
            Message::Close(Some((code, reason))) => self.writer.send_close(code, &reason).await,
        }
    }

    /// Start the closing handshake; keep calling `read_message` until the
    /// peer's close arrives.
    pub async fn close(&mut self, code: CloseCode, reason: &str) -> Result<(), WsError> {
        self.writer.send_close(code, reason).await
    }
}

/// Build a close frame payload: status code then UTF-8 reason.
pub fn close_payload(code: CloseCode, reason: &str) -> Result<Vec<u8>, WsError> {
    if code == CloseCode::None {
        return Ok(Vec::new());
    }
    if !code.is_sendable() {
        return Err(WsError::protocol(
            CloseCode::InternalError,
            format!("close code {} cannot be sent", code),
        ));
    }

    let mut end = reason.len().min(MAX_CLOSE_REASON);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    let mut payload = Vec::with_capacity(2 + end);
    payload.extend_from_slice(&code.code().to_be_bytes());
    payload.extend_from_slice(&reason.as_bytes()[..end]);
    Ok(payload)
}

/// Parse and validate a received close payload.
pub fn parse_close_payload(payload: &[u8]) -> Result<Option<(CloseCode, String)>, WsError> {
    match payload.len() {
        0 => Ok(None),
        1 => Err(WsError::protocol(
            CloseCode::ProtocolError,
            "close payload of one byte",
        )),
        _ => {
            let code = CloseCode::from_code(u16::from_be_bytes([payload[0], payload[1]]));
            if !code.is_sendable() {
                return Err(WsError::protocol(
                    CloseCode::ProtocolError,
                    format!("invalid close code {}", code),
                ));
            }
            let reason = std::str::from_utf8(&payload[2..]).map_err(|_| {
                WsError::protocol(CloseCode::DataFormat, "close reason is not valid UTF-8")
            })?;
            Ok(Some((code, reason.to_string())))
        }
    }
}
