//! Channel transport: how a socket to the backend is opened.
//!
//! The manager only sees text frames: a sink to write them and a stream that
//! yields them until the peer goes away (end of stream = closed).

use std::pin::Pin;

use async_trait::async_trait;
use futures::future;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use crate::error::ChannelError;

/// Outbound half of an open socket.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = ChannelError> + Send>>;

/// Inbound half of an open socket.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, ChannelError>> + Send>>;

/// An open socket.
pub struct Socket {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens sockets to the notification endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    fn url(&self) -> &str;

    async fn connect(&self) -> Result<Socket, ChannelError>;
}

/// WebSocket transport backed by tokio-tungstenite.
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn url(&self) -> &str {
        &self.url
    }

    async fn connect(&self) -> Result<Socket, ChannelError> {
        let (ws, _resp) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| ChannelError::ConnectFailed {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;

        let (write, read) = ws.split();

        let sink = write
            .sink_map_err(|e| ChannelError::SendFailed(e.to_string()))
            .with(|text: String| future::ready(Ok::<_, ChannelError>(Message::text(text))));

        let stream = read.filter_map(|frame| {
            future::ready(match frame {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => Some(
                    String::from_utf8(bytes.to_vec())
                        .map_err(|e| ChannelError::InvalidMessage(e.to_string())),
                ),
                // Control frames are handled by tungstenite; a Close frame is
                // followed by the end of the stream.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_)) => {
                    None
                }
                Err(e) => Some(Err(ChannelError::ReceiveFailed(e.to_string()))),
            })
        });

        Ok(Socket {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
