//! Session driver - runs a [`SyncEngine`] against a live WebSocket.
//!
//! The session is a single task. It waits on transport events, user
//! commands, the heartbeat timer, and the reconnect delay, and handles
//! exactly one of them at a time. The heartbeat timer exists only while the
//! connection is up.

use std::future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use skywatch_core::config::MAX_DURATION;
use skywatch_core::{Command, Filter, SessionSettings};
use skywatch_tree::{EventBus, SyncEvent};

use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use crate::transport::{self, Inbound, TransportEvent, WsSink, WRITE_TIMEOUT};

/// User requests delivered to a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    SelectFilter(Filter),
    /// Start over with a fresh retry budget, e.g. after giving up.
    Reconnect,
    Shutdown,
}

/// Cloneable control handle for a [`Session`].
///
/// The session stops once every handle has been dropped.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    bus: EventBus,
}

impl SessionHandle {
    /// Follow tree and connection changes.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SyncEvent> {
        self.bus.subscribe()
    }

    pub fn select_filter(&self, filter: Filter) -> SyncResult<()> {
        self.send(SessionCommand::SelectFilter(filter))
    }

    pub fn reconnect(&self) -> SyncResult<()> {
        self.send(SessionCommand::Reconnect)
    }

    pub fn shutdown(&self) -> SyncResult<()> {
        self.send(SessionCommand::Shutdown)
    }

    fn send(&self, command: SessionCommand) -> SyncResult<()> {
        self.commands
            .send(command)
            .map_err(|_| SyncError::SessionClosed)
    }
}

pub struct Session {
    settings: SessionSettings,
    engine: SyncEngine,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
}

impl Session {
    pub fn new(settings: SessionSettings) -> (Self, SessionHandle) {
        let engine = SyncEngine::from_settings(&settings);
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            commands: tx,
            bus: engine.bus().clone(),
        };
        let session = Self {
            settings,
            engine,
            commands: rx,
        };
        (session, handle)
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Connect and keep the tree in sync until shut down.
    ///
    /// Returns the engine so the final tree can be inspected.
    pub async fn run(self) -> SyncEngine {
        let Session {
            settings,
            engine,
            mut commands,
        } = self;

        let (inbound_tx, mut inbound) = mpsc::unbounded_channel();
        let mut driver = Driver {
            url: settings.url,
            heartbeat_interval: settings.heartbeat_interval,
            engine,
            sink: None,
            heartbeat: None,
            retry_at: None,
            task: None,
            inbound_tx,
        };

        info!(
            url = %driver.url,
            filter = %settings.filter,
            heartbeat = ?driver.heartbeat_interval,
            max_attempts = settings.reconnect.max_attempts,
            "sync session started"
        );
        driver.connect();

        loop {
            tokio::select! {
                Some(event) = inbound.recv() => {
                    driver.on_inbound(event).await;
                }
                command = commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => {
                        driver.stop().await;
                        break;
                    }
                    Some(command) => driver.on_command(command).await,
                },
                _ = heartbeat_tick(&mut driver.heartbeat) => {
                    driver.send_heartbeat().await;
                }
                _ = retry_delay(driver.retry_at) => {
                    driver.retry_at = None;
                    driver.connect();
                }
            }
        }

        info!("sync session stopped");
        driver.engine
    }
}

/// Mutable state of a running session.
struct Driver {
    url: String,
    heartbeat_interval: Duration,
    engine: SyncEngine,
    /// Write half of the live connection.
    sink: Option<WsSink>,
    heartbeat: Option<Interval>,
    /// Pending reconnect under backoff.
    retry_at: Option<Instant>,
    /// Reader task of the current epoch.
    task: Option<JoinHandle<()>>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
}

impl Driver {
    fn connect(&mut self) {
        let epoch = self.engine.begin_connect();
        self.spawn(epoch);
    }

    fn spawn(&mut self, epoch: u64) {
        debug!(url = %self.url, epoch, "connecting");
        self.task = Some(transport::spawn_connection(
            self.url.clone(),
            epoch,
            self.inbound_tx.clone(),
        ));
    }

    async fn on_inbound(&mut self, Inbound { epoch, event }: Inbound) {
        match event {
            TransportEvent::Opened(sink) => match self.engine.on_open(epoch) {
                Some(commands) => {
                    self.sink = Some(sink);
                    self.start_heartbeat();
                    for command in &commands {
                        self.send(command).await;
                    }
                }
                None => transport::close(sink, WRITE_TIMEOUT).await,
            },
            TransportEvent::Frame(text) => {
                self.engine.on_frame(epoch, &text);
            }
            TransportEvent::Closed(reason) => {
                if !self.engine.connection().is_current(epoch) {
                    trace!(epoch, "stale connection finished");
                    return;
                }
                self.lose_link(epoch, reason).await;
            }
        }
    }

    /// Tear down the link of `epoch` and schedule the next attempt, if the
    /// retry budget allows one.
    async fn lose_link(&mut self, epoch: u64, reason: SyncError) {
        warn!(epoch, error = %reason, "connection lost");
        self.drop_link().await;

        match self.engine.on_close(epoch) {
            Ok(Some(retry)) if retry.delay.is_zero() => self.connect(),
            Ok(Some(retry)) => {
                info!(attempt = retry.attempt, delay = ?retry.delay, "reconnect scheduled");
                self.retry_at = Some(deadline(retry.delay));
            }
            Ok(None) => {}
            Err(e) => error!(error = %e, "not reconnecting until asked to"),
        }
    }

    async fn on_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::SelectFilter(filter) => {
                if let Some(command) = self.engine.apply_filter(filter) {
                    self.send(&command).await;
                }
            }
            SessionCommand::Reconnect => {
                info!("manual reconnect");
                self.drop_link().await;
                self.retry_at = None;
                let epoch = self.engine.reconnect();
                self.spawn(epoch);
            }
            SessionCommand::Shutdown => self.stop().await,
        }
    }

    async fn send_heartbeat(&mut self) {
        if let Some(command) = self.engine.heartbeat() {
            trace!("heartbeat");
            self.send(&command).await;
        }
    }

    async fn send(&mut self, command: &Command) {
        let Some(sink) = self.sink.as_mut() else {
            debug!(?command, "no live connection, command dropped");
            return;
        };
        match transport::send_command(sink, command, WRITE_TIMEOUT).await {
            Ok(()) => {}
            // A peer that stopped reading never closes the stream itself.
            Err(e @ SyncError::WriteTimeout(_)) => {
                let epoch = self.engine.connection().epoch();
                self.lose_link(epoch, e).await;
            }
            // The reader task reports the broken link.
            Err(e) => warn!(?command, error = %e, "send failed"),
        }
    }

    fn start_heartbeat(&mut self) {
        let period = self.heartbeat_interval.min(MAX_DURATION);
        let mut interval = time::interval_at(deadline(period), period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(interval);
    }

    /// Stop the heartbeat and tear down the current connection, if any.
    async fn drop_link(&mut self) {
        self.heartbeat = None;
        if let Some(sink) = self.sink.take() {
            transport::close(sink, WRITE_TIMEOUT).await;
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    async fn stop(&mut self) {
        self.drop_link().await;
        self.retry_at = None;
        self.engine.shutdown();
    }
}

/// `after` from now, clamped so the instant stays representable.
fn deadline(after: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(after)
        .or_else(|| now.checked_add(MAX_DURATION))
        .unwrap_or(now)
}

async fn heartbeat_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

async fn retry_delay(at: Option<Instant>) {
    match at {
        Some(at) => time::sleep_until(at).await,
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skywatch_tree::ConnectionState;

    #[tokio::test]
    async fn handle_reports_closed_session() {
        let (session, handle) = Session::new(SessionSettings::default());
        drop(session);
        assert!(matches!(
            handle.select_filter(Filter::RegisteredOnly),
            Err(SyncError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn gives_up_when_nothing_listens() {
        let settings = SessionSettings {
            // Port 1 on loopback refuses connections.
            url: "ws://127.0.0.1:1/instances/ws".to_string(),
            reconnect: skywatch_core::ReconnectPolicy {
                max_attempts: 2,
                ..Default::default()
            },
            ..SessionSettings::default()
        };
        let (session, handle) = Session::new(settings);
        let mut events = handle.subscribe();
        let task = tokio::spawn(session.run());

        let gave_up = time::timeout(Duration::from_secs(5), async {
            while let Some(event) = events.recv().await {
                if event == SyncEvent::ConnectionStateChanged(ConnectionState::GivenUp) {
                    return true;
                }
            }
            false
        })
        .await;
        assert!(matches!(gave_up, Ok(true)), "session never gave up");

        handle.shutdown().unwrap();
        let engine = task.await.unwrap();
        assert_eq!(engine.connection().retry_count(), 2);
    }

    #[test]
    fn deadline_clamps_unrepresentable_delays() {
        let now = Instant::now();
        let far = deadline(Duration::MAX);
        assert!(far >= now);
        assert!(far <= Instant::now() + MAX_DURATION);

        let near = deadline(Duration::from_secs(1));
        assert!(near > now && near <= Instant::now() + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn huge_backoff_waits_without_panicking() {
        let settings = SessionSettings {
            url: "ws://127.0.0.1:1/instances/ws".to_string(),
            reconnect: skywatch_core::ReconnectPolicy {
                max_attempts: 5,
                backoff_initial: Duration::MAX,
                backoff_max: Duration::MAX,
            },
            ..SessionSettings::default()
        };
        let (session, handle) = Session::new(settings);
        let mut events = handle.subscribe();
        let task = tokio::spawn(session.run());

        let waiting = time::timeout(Duration::from_secs(5), async {
            while let Some(event) = events.recv().await {
                if event == SyncEvent::ConnectionStateChanged(ConnectionState::Reconnecting { attempt: 1 }) {
                    return true;
                }
            }
            false
        })
        .await;
        assert!(matches!(waiting, Ok(true)), "first attempt never failed");

        handle.shutdown().unwrap();
        let engine = task.await.unwrap();
        assert_eq!(engine.connection().retry_count(), 1);
    }
}
