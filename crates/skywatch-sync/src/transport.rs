//! WebSocket transport.
//!
//! Each connection attempt runs in its own reader task, tagged with the
//! epoch it was started for. The task reports back to the session over a
//! channel: `Opened` with the write half, then every text frame in arrival
//! order, then exactly one `Closed`.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use skywatch_core::Command;

use crate::error::{SyncError, SyncResult};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsSink = SplitSink<WsStream, Message>;

/// How long a single frame write or close may stall on a peer that has
/// stopped reading.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub enum TransportEvent {
    Opened(WsSink),
    Frame(String),
    Closed(SyncError),
}

/// A transport event and the epoch of the connection that produced it.
#[derive(Debug)]
pub struct Inbound {
    pub epoch: u64,
    pub event: TransportEvent,
}

/// Connect to `url` in a background task and stream its events to `tx`.
pub fn spawn_connection(
    url: String,
    epoch: u64,
    tx: mpsc::UnboundedSender<Inbound>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let emit = |event| tx.send(Inbound { epoch, event }).is_ok();

        let stream = match connect_async(url.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(e) => {
                emit(TransportEvent::Closed(SyncError::Transport(e.to_string())));
                return;
            }
        };
        debug!(%url, epoch, "websocket connected");

        let (sink, reader) = stream.split();
        if !emit(TransportEvent::Opened(sink)) {
            return;
        }

        let reason = read_frames(reader, &emit).await;
        emit(TransportEvent::Closed(reason));
    })
}

async fn read_frames<F>(mut reader: SplitStream<WsStream>, emit: &F) -> SyncError
where
    F: Fn(TransportEvent) -> bool,
{
    while let Some(frame) = reader.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                trace!(bytes = text.len(), "frame received");
                if !emit(TransportEvent::Frame(text.as_str().to_owned())) {
                    return SyncError::SessionClosed;
                }
            }
            Ok(Message::Close(frame)) => {
                let reason = match frame {
                    Some(f) => format!("{} {}", u16::from(f.code), f.reason),
                    None => "closed by server".to_string(),
                };
                return SyncError::TransportClosed(reason);
            }
            Ok(Message::Binary(data)) => {
                debug!(bytes = data.len(), "ignoring binary frame");
            }
            // Pings are answered by tungstenite on the next write.
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Err(e) => return SyncError::Transport(e.to_string()),
        }
    }
    SyncError::TransportClosed("stream ended".to_string())
}

/// Encode `command` and write it as one text frame, giving up after
/// `within`.
pub async fn send_command<S>(sink: &mut S, command: &Command, within: Duration) -> SyncResult<()>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let frame = command.encode()?;
    match time::timeout(within, sink.send(Message::Text(frame.into()))).await {
        Ok(result) => result.map_err(|e| SyncError::Transport(e.to_string())),
        Err(_) => Err(SyncError::WriteTimeout(within)),
    }
}

/// Send a close frame, ignoring failures on an already broken link.
pub async fn close<S>(mut sink: S, within: Duration)
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    if time::timeout(within, sink.close()).await.is_err() {
        debug!(?within, "close frame not flushed, dropping link");
    }
}
