//! Notification channel: a long-lived socket to the backend that survives
//! drops through a fixed-interval reconnect cycle.

pub mod event;
pub mod manager;
pub mod transport;

pub use event::{CONNECT_MESSAGE_TYPE, Handshake, ServerEvent};
pub use manager::{ConnectionManager, ConnectionState, EventStream};
pub use transport::{FrameSink, FrameStream, Socket, Transport, WsTransport};

use async_trait::async_trait;

use crate::error::ChannelError;

/// What the session orchestrator needs from the channel.
#[async_trait]
pub trait ChannelControl: Send + Sync {
    /// Open the channel for `user_id`. Idempotent while already active.
    async fn start(&self, user_id: &str) -> Result<(), ChannelError>;

    /// Close the channel and stop reconnecting.
    async fn stop(&self) -> Result<(), ChannelError>;

    fn is_active(&self) -> bool;
}
