//! Byte bridge between a websocket session and a connector's local socket.
//!
//! The bridge is transport agnostic: the websocket side is any
//! `Stream<Item = ClientMessage>` plus `Sink<BridgeMessage>`. One background
//! task reads the local socket and forwards each chunk in order; the caller's
//! task writes inbound client data to the socket. Whichever side ends first
//! stops the other, the connector is closed, and the client sees at most one
//! close frame.

use crate::component::Component;
use crate::connector::ControlConnector;
use crate::error::{CoreError, Result};
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::UnixStream;
use tokio::sync::oneshot;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// The component went away or could not be reached.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// The local socket failed.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Total timeout for connecting to a connector's socket (includes retries).
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between connection retry attempts.
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

const READ_CHUNK: usize = 16 * 1024;

/// Websocket close code and reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// Close code.
    pub code: u16,
    /// Human readable reason.
    pub reason: String,
}

impl CloseFrame {
    /// 1000, the local stream ended.
    pub fn normal() -> Self {
        Self {
            code: CLOSE_NORMAL,
            reason: String::new(),
        }
    }

    /// 1001 with `reason`.
    pub fn going_away(reason: impl Into<String>) -> Self {
        Self {
            code: CLOSE_GOING_AWAY,
            reason: reason.into(),
        }
    }

    /// 1011 with `reason`.
    pub fn internal_error(reason: impl Into<String>) -> Self {
        Self {
            code: CLOSE_INTERNAL_ERROR,
            reason: reason.into(),
        }
    }
}

/// What the client sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Payload of a binary or text message.
    Data(Bytes),
    /// The client closed the session.
    Close,
}

/// What the bridge sends to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeMessage {
    /// Bytes read from the local socket.
    Data(Bytes),
    /// Final message of the session.
    Close(CloseFrame),
}

/// Why a bridge stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEnd {
    /// The local socket reached EOF.
    LocalClosed,
    /// Reading or writing the local socket failed.
    LocalError(String),
    /// The client closed the session.
    ClientClosed,
    /// Sending to the client failed.
    ClientGone,
}

impl fmt::Display for BridgeEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalClosed => write!(f, "local stream closed"),
            Self::LocalError(e) => write!(f, "local stream failed: {e}"),
            Self::ClientClosed => write!(f, "client closed"),
            Self::ClientGone => write!(f, "client gone"),
        }
    }
}

/// A connected bridge, ready to [`run`](Self::run).
pub struct StreamBridge {
    connector: ControlConnector,
    socket: PathBuf,
    stream: UnixStream,
}

impl StreamBridge {
    /// Resolve `protocol` on `component`, connect it and open its socket.
    pub async fn open(component: &Component, protocol: &str, request_id: &str) -> Result<Self> {
        let connector = component.connector(protocol)?;
        Self::open_connector(connector, request_id).await
    }

    /// Connect `connector` and open its socket.
    ///
    /// If the socket cannot be opened the connector is closed again.
    pub async fn open_connector(connector: ControlConnector, request_id: &str) -> Result<Self> {
        if !connector.is_stream() {
            return Err(CoreError::InvalidArgument(format!(
                "connector '{}' cannot be streamed",
                connector.protocol()
            )));
        }

        let socket = connector.connect(request_id).await?;
        match connect_socket(&socket).await {
            Ok(stream) => {
                tracing::debug!(
                    protocol = %connector.protocol(),
                    socket = %socket.display(),
                    "Bridge socket opened"
                );
                Ok(Self {
                    connector,
                    socket,
                    stream,
                })
            }
            Err(e) => {
                connector.close().await;
                Err(e)
            }
        }
    }

    /// Local socket path.
    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Pump bytes both ways until one side ends, then tear down.
    pub async fn run<I, O>(self, mut inbound: I, outbound: O) -> BridgeEnd
    where
        I: Stream<Item = ClientMessage> + Unpin,
        O: Sink<BridgeMessage> + Unpin + Send + 'static,
        O::Error: fmt::Display,
    {
        enum Outcome {
            Forwarded(BridgeEnd),
            Stop(Option<CloseFrame>, BridgeEnd),
        }

        let Self {
            connector,
            socket,
            stream,
        } = self;
        let start = Instant::now();
        let (reader, mut writer) = stream.into_split();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let mut forward = tokio::spawn(forward_output(reader, outbound, cancel_rx));

        let outcome = loop {
            tokio::select! {
                finished = &mut forward => {
                    break Outcome::Forwarded(finished.unwrap_or_else(|e| {
                        BridgeEnd::LocalError(format!("forward task failed: {e}"))
                    }));
                }
                message = inbound.next() => match message {
                    Some(ClientMessage::Data(data)) => {
                        if let Err(e) = writer.write_all(&data).await {
                            break Outcome::Stop(
                                Some(CloseFrame::internal_error(e.to_string())),
                                BridgeEnd::LocalError(e.to_string()),
                            );
                        }
                    }
                    Some(ClientMessage::Close) | None => {
                        break Outcome::Stop(None, BridgeEnd::ClientClosed);
                    }
                },
            }
        };
        drop(writer);

        let end = match outcome {
            Outcome::Forwarded(end) => end,
            Outcome::Stop(close, end) => {
                // the task may already be gone, then there is nobody to tell
                let _ = cancel_tx.send(close);
                if let Err(e) = forward.await {
                    tracing::debug!(error = %e, "Forward task did not finish cleanly");
                }
                end
            }
        };

        connector.close().await;
        tracing::info!(
            protocol = %connector.protocol(),
            socket = %socket.display(),
            reason = %end,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Bridge closed"
        );
        end
    }
}

/// Read the socket and forward chunks until EOF, error, or cancellation.
async fn forward_output<O>(
    mut reader: OwnedReadHalf,
    mut outbound: O,
    mut cancel: oneshot::Receiver<Option<CloseFrame>>,
) -> BridgeEnd
where
    O: Sink<BridgeMessage> + Unpin,
    O::Error: fmt::Display,
{
    let mut buf = vec![0u8; READ_CHUNK];
    let (end, close) = loop {
        tokio::select! {
            request = &mut cancel => break (BridgeEnd::ClientClosed, request.ok().flatten()),
            read = reader.read(&mut buf) => match read {
                Ok(0) => break (BridgeEnd::LocalClosed, Some(CloseFrame::normal())),
                Ok(n) => {
                    let chunk = Bytes::copy_from_slice(&buf[..n]);
                    if let Err(e) = outbound.send(BridgeMessage::Data(chunk)).await {
                        tracing::debug!(error = %e, "Client send failed");
                        break (BridgeEnd::ClientGone, None);
                    }
                }
                Err(e) => {
                    break (
                        BridgeEnd::LocalError(e.to_string()),
                        Some(CloseFrame::internal_error(e.to_string())),
                    )
                }
            },
        }
    };

    if let Some(frame) = close {
        if let Err(e) = outbound.send(BridgeMessage::Close(frame)).await {
            tracing::debug!(error = %e, "Sending close frame failed");
        }
    }
    if let Err(e) = outbound.close().await {
        tracing::trace!(error = %e, "Closing client sink failed");
    }
    end
}

/// Connect to `path`, retrying while the listener comes up.
async fn connect_socket(path: &Path) -> Result<UnixStream> {
    let start = Instant::now();
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match UnixStream::connect(path).await {
            Ok(stream) => {
                tracing::trace!(path = %path.display(), attempts, "Socket connected");
                return Ok(stream);
            }
            Err(e) => {
                if start.elapsed() >= CONNECT_TIMEOUT {
                    tracing::warn!(
                        path = %path.display(),
                        attempts,
                        error = %e,
                        "Socket connection timeout"
                    );
                    return Err(e.into());
                }
                tracing::trace!(error = %e, attempt = attempts, "Socket connect failed, retrying...");
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
        }
    }
}
