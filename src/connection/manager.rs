//! Connection manager: keeps one notification channel alive.
//!
//! A single task owns the socket and every timer; callers talk to it over a
//! command channel. Reconnection is a fixed-interval state machine:
//!
//! - close: a liveness check runs after `liveness_delay`
//! - liveness check: closed → reconnect after `reconnect_delay`;
//!   closing → periodic checker cancelled; open → nothing
//! - error: periodic checks every `check_interval`, and the socket is closed
//!   to force a clean cycle
//! - open: handshake sent, pending checks cancelled
//!
//! At most one socket is held and at most one connect attempt is pending.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::SinkExt;
use futures::StreamExt;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use super::ChannelControl;
use super::event::{Handshake, ServerEvent};
use super::transport::{Socket, Transport};
use crate::config::ReconnectPolicy;
use crate::error::ChannelError;

/// Lifecycle of the underlying channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
        };
        write!(f, "{s}")
    }
}

/// Stream of server events handed to a subscriber.
pub type EventStream = UnboundedReceiverStream<ServerEvent>;

enum Command {
    Start { user_id: String },
    Stop { ack: oneshot::Sender<()> },
    Subscribe { tx: mpsc::UnboundedSender<ServerEvent> },
}

/// Handle to the connection task.
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    attempts: Arc<AtomicU64>,
}

impl ConnectionManager {
    /// Spawn the connection task. Nothing is opened until [`start`](Self::start).
    pub fn spawn(transport: Arc<dyn Transport>, policy: ReconnectPolicy) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let attempts = Arc::new(AtomicU64::new(0));

        let driver = Driver {
            transport,
            policy,
            state_tx,
            attempts: Arc::clone(&attempts),
            user_id: None,
            stopped: true,
            socket: None,
            connecting: None,
            liveness_at: None,
            checker: None,
            reconnect_at: None,
            close_deadline: None,
            failures: 0,
            subscribers: Vec::new(),
        };
        tokio::spawn(driver.run(rx));

        Self {
            commands,
            state,
            attempts,
        }
    }

    /// Open the channel and announce `user_id`. A no-op while the channel is
    /// already connecting or open.
    pub fn start(&self, user_id: &str) -> Result<(), ChannelError> {
        self.commands
            .send(Command::Start {
                user_id: user_id.to_string(),
            })
            .map_err(|_| ChannelError::ManagerStopped)
    }

    /// Close the channel and cancel every pending timer. Returns once the
    /// task has done so.
    pub async fn stop(&self) -> Result<(), ChannelError> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(Command::Stop { ack })
            .map_err(|_| ChannelError::ManagerStopped)?;
        done.await.map_err(|_| ChannelError::ManagerStopped)
    }

    /// Receive every event pushed by the server from now on, across
    /// reconnects. Call again for a fresh stream.
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.commands.send(Command::Subscribe { tx }).is_err() {
            warn!("Subscribed to a stopped connection manager");
        }
        UnboundedReceiverStream::new(rx)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Total connect attempts made since the manager was spawned.
    pub fn connect_attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelControl for ConnectionManager {
    async fn start(&self, user_id: &str) -> Result<(), ChannelError> {
        ConnectionManager::start(self, user_id)
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        ConnectionManager::stop(self).await
    }

    fn is_active(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::Open
        )
    }
}

/// State owned by the connection task.
struct Driver {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    state_tx: watch::Sender<ConnectionState>,
    attempts: Arc<AtomicU64>,
    user_id: Option<String>,
    /// True before the first start and after stop; no reconnects happen.
    stopped: bool,
    socket: Option<Socket>,
    connecting: Option<BoxFuture<'static, Result<Socket, ChannelError>>>,
    /// One-shot liveness check armed by a close.
    liveness_at: Option<Instant>,
    /// Periodic liveness checker armed by an error.
    checker: Option<Interval>,
    reconnect_at: Option<Instant>,
    /// Upper bound on how long a socket may sit in Closing.
    close_deadline: Option<Instant>,
    /// Consecutive failed attempts, reset on open.
    failures: u32,
    subscribers: Vec<mpsc::UnboundedSender<ServerEvent>>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        self.stop_channel().await;
                        break;
                    }
                },
                result = poll_connect(&mut self.connecting) => self.on_connect_result(result).await,
                frame = next_frame(&mut self.socket) => self.on_frame(frame).await,
                _ = sleep_until_opt(self.liveness_at) => {
                    self.liveness_at = None;
                    self.check_liveness();
                }
                _ = tick_opt(&mut self.checker) => self.check_liveness(),
                _ = sleep_until_opt(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.open_channel();
                }
                _ = sleep_until_opt(self.close_deadline) => {
                    warn!("Channel did not finish closing; dropping socket");
                    self.on_close();
                }
            }
        }
        debug!("Connection task exited");
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Connection state changed");
        }
    }

    fn exhausted(&self) -> bool {
        self.policy
            .max_attempts
            .is_some_and(|max| self.failures >= max)
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start { user_id } => {
                self.user_id = Some(user_id);
                if self.stopped || self.exhausted() {
                    self.stopped = false;
                    self.failures = 0;
                }
                self.open_channel();
            }
            Command::Stop { ack } => {
                self.stop_channel().await;
                let _ = ack.send(());
            }
            Command::Subscribe { tx } => self.subscribers.push(tx),
        }
    }

    fn open_channel(&mut self) {
        if self.stopped {
            return;
        }
        match self.state() {
            ConnectionState::Connecting | ConnectionState::Open => {
                debug!("Channel already active; start ignored");
                return;
            }
            // The close event that follows re-arms the liveness check.
            ConnectionState::Closing => {
                debug!("Channel is closing; start deferred");
                return;
            }
            ConnectionState::Disconnected => {}
        }
        if self.exhausted() {
            warn!(failures = self.failures, "Reconnect attempts exhausted; giving up");
            self.checker = None;
            return;
        }

        self.set_state(ConnectionState::Connecting);
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        info!(url = %self.transport.url(), attempt, "Opening notification channel");

        let transport = Arc::clone(&self.transport);
        self.connecting = Some(Box::pin(async move { transport.connect().await }));
    }

    async fn on_connect_result(&mut self, result: Result<Socket, ChannelError>) {
        match result {
            Ok(mut socket) => {
                let user_id = self.user_id.clone().unwrap_or_default();
                let sent = socket.sink.send(Handshake::connect(&user_id).to_json()).await;
                self.socket = Some(socket);
                match sent {
                    Ok(()) => {
                        self.set_state(ConnectionState::Open);
                        self.failures = 0;
                        self.liveness_at = None;
                        self.checker = None;
                        self.reconnect_at = None;
                        info!(user_id = %user_id, "Notification channel open");
                    }
                    Err(e) => self.on_error(e).await,
                }
            }
            Err(e) => {
                warn!(error = %e, "Notification channel connect failed");
                self.failures = self.failures.saturating_add(1);
                self.set_state(ConnectionState::Disconnected);
                self.start_checker();
                self.schedule_liveness();
            }
        }
    }

    async fn on_frame(&mut self, frame: Option<Result<String, ChannelError>>) {
        match frame {
            Some(Ok(text)) => self.dispatch(&text),
            Some(Err(ChannelError::InvalidMessage(reason))) => {
                warn!(reason = %reason, "Dropping undecodable channel frame");
            }
            Some(Err(e)) => self.on_error(e).await,
            None => self.on_close(),
        }
    }

    fn dispatch(&mut self, text: &str) {
        match ServerEvent::parse(text) {
            Ok(event) => {
                debug!(message_type = ?event.message_type(), "Server event received");
                self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
            }
            Err(e) => warn!(error = %e, "Dropping malformed channel message"),
        }
    }

    async fn on_error(&mut self, error: ChannelError) {
        if self.state() == ConnectionState::Closing {
            debug!(error = %error, "Channel error while closing");
            return;
        }
        warn!(error = %error, "Notification channel error; closing to force reconnect");
        self.start_checker();

        if self.socket.is_none() {
            self.on_close();
            return;
        }
        self.set_state(ConnectionState::Closing);
        self.close_deadline = Some(Instant::now() + self.policy.liveness_delay);
        if let Some(socket) = self.socket.as_mut() {
            if let Err(e) = socket.sink.close().await {
                debug!(error = %e, "Close handshake failed");
            }
        }
    }

    fn on_close(&mut self) {
        self.socket = None;
        self.close_deadline = None;
        self.set_state(ConnectionState::Disconnected);
        if self.stopped {
            return;
        }
        info!(
            delay_secs = self.policy.liveness_delay.as_secs_f64(),
            "Notification channel closed; liveness check scheduled"
        );
        self.schedule_liveness();
    }

    fn schedule_liveness(&mut self) {
        if self.liveness_at.is_none() {
            self.liveness_at = Some(Instant::now() + self.policy.liveness_delay);
        }
    }

    fn start_checker(&mut self) {
        if self.checker.is_none() {
            let period = self.policy.check_interval;
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.checker = Some(interval);
        }
    }

    fn check_liveness(&mut self) {
        match self.state() {
            ConnectionState::Disconnected => {
                if self.stopped || self.exhausted() {
                    self.checker = None;
                    return;
                }
                if self.reconnect_at.is_none() && self.connecting.is_none() {
                    info!(
                        delay_secs = self.policy.reconnect_delay.as_secs_f64(),
                        "Channel is closed; reconnect scheduled"
                    );
                    self.reconnect_at = Some(Instant::now() + self.policy.reconnect_delay);
                }
            }
            ConnectionState::Closing => {
                debug!("Channel is closing; periodic checker cancelled");
                self.checker = None;
            }
            ConnectionState::Connecting | ConnectionState::Open => {}
        }
    }

    async fn stop_channel(&mut self) {
        self.stopped = true;
        self.connecting = None;
        self.liveness_at = None;
        self.checker = None;
        self.reconnect_at = None;
        self.close_deadline = None;

        if let Some(mut socket) = self.socket.take() {
            self.set_state(ConnectionState::Closing);
            let closed =
                tokio::time::timeout(self.policy.liveness_delay, socket.sink.close()).await;
            if !matches!(closed, Ok(Ok(()))) {
                debug!("Channel did not close cleanly on stop");
            }
        }
        self.set_state(ConnectionState::Disconnected);
        info!("Notification channel stopped");
    }
}

async fn poll_connect(
    connecting: &mut Option<BoxFuture<'static, Result<Socket, ChannelError>>>,
) -> Result<Socket, ChannelError> {
    match connecting.as_mut() {
        Some(fut) => {
            let result = fut.await;
            *connecting = None;
            result
        }
        None => std::future::pending().await,
    }
}

async fn next_frame(socket: &mut Option<Socket>) -> Option<Result<String, ChannelError>> {
    match socket.as_mut() {
        Some(socket) => socket.stream.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn tick_opt(checker: &mut Option<Interval>) {
    match checker.as_mut() {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
