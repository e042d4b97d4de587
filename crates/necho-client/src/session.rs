//! Connection session: state machine, heartbeat and reconnect with backoff.
//!
//! [`SessionMachine`] is pure: every input returns the [`SessionAction`]s to
//! perform, and [`ConnectionSession`] performs them on tokio. Keeping the
//! transitions free of I/O makes the backoff schedule and the Error cut-off
//! testable without a network.

use crate::bus::EventBus;
use crate::error::{ClientError, Result};
use crate::event::ClientEvent;
use crate::transport::{Connector, Link};
use necho_types::{ClientCommand, ClientFrame, ErrorKind, ServerFrame};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default heartbeat interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Default delay before the first reconnect attempt.
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default number of reconnect attempts before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnect attempts exhausted; only [`ConnectionSession::reconnect`] leaves it.
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Exponential backoff without jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt.
    pub base_delay: Duration,
    /// Attempts allowed before the session enters `Error`.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given (1-indexed) attempt: `base * 2^(attempt-1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Side effects requested by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    OpenTransport,
    CloseTransport,
    StartHeartbeat(Duration),
    StopHeartbeat,
    ScheduleReconnect { attempt: u32, delay: Duration },
    CancelReconnect,
    StateChanged(ConnectionState),
    ReportError { kind: ErrorKind, message: String },
}

/// Pure connection state machine.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    state: ConnectionState,
    attempts: u32,
    policy: ReconnectPolicy,
    heartbeat_interval: Duration,
    closing: bool,
}

impl SessionMachine {
    /// A machine in `Disconnected`.
    pub fn new(policy: ReconnectPolicy, heartbeat_interval: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            policy,
            heartbeat_interval,
            closing: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnect attempts made since the last successful connection.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn transition(&mut self, next: ConnectionState, actions: &mut Vec<SessionAction>) {
        if self.state != next {
            self.state = next;
            actions.push(SessionAction::StateChanged(next));
        }
    }

    /// Open the transport unless already connecting or connected. Ignored in
    /// `Error`, which only [`reconnect`](Self::reconnect) leaves.
    pub fn connect(&mut self) -> Vec<SessionAction> {
        if self.state == ConnectionState::Error {
            return Vec::new();
        }
        self.open()
    }

    /// Manual recovery: forget previous attempts and connect again.
    pub fn reconnect(&mut self) -> Vec<SessionAction> {
        self.attempts = 0;
        self.open()
    }

    fn open(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return actions;
        }
        self.closing = false;
        if self.state == ConnectionState::Reconnecting {
            actions.push(SessionAction::CancelReconnect);
        }
        self.transition(ConnectionState::Connecting, &mut actions);
        actions.push(SessionAction::OpenTransport);
        actions
    }

    /// The transport opened (first connection or a reconnect).
    pub fn on_connected(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if self.closing || self.state == ConnectionState::Disconnected {
            actions.push(SessionAction::CloseTransport);
            return actions;
        }
        self.attempts = 0;
        self.transition(ConnectionState::Connected, &mut actions);
        actions.push(SessionAction::StartHeartbeat(self.heartbeat_interval));
        actions
    }

    /// The transport went away.
    pub fn on_disconnected(&mut self) -> Vec<SessionAction> {
        let mut actions = vec![SessionAction::StopHeartbeat];
        if self.closing || self.state == ConnectionState::Disconnected {
            self.transition(ConnectionState::Disconnected, &mut actions);
            return actions;
        }
        self.begin_reconnect(&mut actions);
        actions
    }

    /// Opening the transport failed.
    pub fn on_connect_error(&mut self, kind: ErrorKind, message: String) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if self.closing || self.state == ConnectionState::Disconnected {
            return actions;
        }
        actions.push(SessionAction::ReportError { kind, message });
        self.begin_reconnect(&mut actions);
        actions
    }

    /// A scheduled reconnect came due.
    pub fn on_reconnect_due(&mut self) -> Vec<SessionAction> {
        if self.state == ConnectionState::Reconnecting && !self.closing {
            vec![SessionAction::OpenTransport]
        } else {
            Vec::new()
        }
    }

    /// Explicit close; no reconnect follows.
    pub fn disconnect(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if self.state == ConnectionState::Disconnected {
            return actions;
        }
        self.closing = true;
        self.attempts = 0;
        actions.push(SessionAction::CancelReconnect);
        actions.push(SessionAction::StopHeartbeat);
        actions.push(SessionAction::CloseTransport);
        self.transition(ConnectionState::Disconnected, &mut actions);
        actions
    }

    fn begin_reconnect(&mut self, actions: &mut Vec<SessionAction>) {
        if self.attempts >= self.policy.max_attempts {
            self.transition(ConnectionState::Error, actions);
            return;
        }
        self.attempts += 1;
        self.transition(ConnectionState::Reconnecting, actions);
        actions.push(SessionAction::ScheduleReconnect {
            attempt: self.attempts,
            delay: self.policy.delay_for_attempt(self.attempts),
        });
    }
}

/// Session timing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub heartbeat_interval: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

#[derive(Default)]
struct SessionTasks {
    opener: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

impl SessionTasks {
    fn abort_all(&mut self) {
        for task in [
            self.opener.take(),
            self.reader.take(),
            self.heartbeat.take(),
            self.reconnect.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }
}

fn replace_task(slot: &mut Option<JoinHandle<()>>, task: Option<JoinHandle<()>>) {
    if let Some(old) = std::mem::replace(slot, task) {
        old.abort();
    }
}

struct SessionInner {
    machine: Mutex<SessionMachine>,
    connector: Arc<dyn Connector>,
    bus: EventBus<ClientEvent>,
    frames: mpsc::UnboundedSender<ServerFrame>,
    state_tx: watch::Sender<ConnectionState>,
    /// Bumped whenever a transport is opened or closed; callbacks from older
    /// transports are ignored.
    generation: AtomicU64,
    outgoing: Mutex<Option<mpsc::UnboundedSender<String>>>,
    tasks: Mutex<SessionTasks>,
    destroyed: AtomicBool,
}

/// Owns one transport connection and keeps it alive.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct ConnectionSession {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ConnectionSession {
    /// Create a disconnected session. Server frames arrive on the returned
    /// receiver in transport order.
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        bus: EventBus<ClientEvent>,
    ) -> (Self, mpsc::UnboundedReceiver<ServerFrame>) {
        let (frames, frames_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let inner = SessionInner {
            machine: Mutex::new(SessionMachine::new(
                config.reconnect,
                config.heartbeat_interval,
            )),
            connector,
            bus,
            frames,
            state_tx,
            generation: AtomicU64::new(0),
            outgoing: Mutex::new(None),
            tasks: Mutex::new(SessionTasks::default()),
            destroyed: AtomicBool::new(false),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            frames_rx,
        )
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.inner.machine.lock().state()
    }

    /// Reconnect attempts made since the last successful connection.
    pub fn attempts(&self) -> u32 {
        self.inner.machine.lock().attempts()
    }

    /// Watch state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Open the transport. Ignored in `Error`; see [`reconnect`](Self::reconnect).
    pub fn connect(&self) -> Result<()> {
        self.ensure_alive()?;
        let actions = self.inner.machine.lock().connect();
        SessionInner::execute(&self.inner, actions);
        Ok(())
    }

    /// Leave `Error` (or any state) by connecting with a fresh attempt budget.
    pub fn reconnect(&self) -> Result<()> {
        self.ensure_alive()?;
        let actions = self.inner.machine.lock().reconnect();
        SessionInner::execute(&self.inner, actions);
        Ok(())
    }

    /// Close the transport; no reconnect follows.
    pub fn disconnect(&self) {
        let actions = self.inner.machine.lock().disconnect();
        SessionInner::execute(&self.inner, actions);
        replace_task(&mut self.inner.tasks.lock().opener, None);
    }

    /// Send a frame. Fails immediately unless `Connected`.
    pub fn send_frame(&self, frame: &ClientFrame) -> Result<()> {
        self.ensure_alive()?;
        if self.state() != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        let json = serde_json::to_string(frame)?;
        let outgoing = self.inner.outgoing.lock();
        match outgoing.as_ref() {
            Some(sender) => sender.send(json).map_err(|_| ClientError::NotConnected),
            None => Err(ClientError::NotConnected),
        }
    }

    /// Tear everything down. Safe to call more than once.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.disconnect();
        self.inner.tasks.lock().abort_all();
        self.inner.bus.clear();
        debug!("Session destroyed");
    }

    /// Whether [`destroy`](Self::destroy) has run.
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_destroyed() {
            Err(ClientError::Destroyed)
        } else {
            Ok(())
        }
    }
}

impl SessionInner {
    fn execute(this: &Arc<Self>, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::OpenTransport => Self::open_transport(this),
                SessionAction::CloseTransport => this.close_transport(),
                SessionAction::StartHeartbeat(interval) => Self::start_heartbeat(this, interval),
                SessionAction::StopHeartbeat => {
                    replace_task(&mut this.tasks.lock().heartbeat, None);
                }
                SessionAction::ScheduleReconnect { attempt, delay } => {
                    info!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
                    let weak = Arc::downgrade(this);
                    let task = tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if let Some(inner) = weak.upgrade() {
                            let actions = inner.machine.lock().on_reconnect_due();
                            Self::execute(&inner, actions);
                        }
                    });
                    replace_task(&mut this.tasks.lock().reconnect, Some(task));
                }
                SessionAction::CancelReconnect => {
                    replace_task(&mut this.tasks.lock().reconnect, None);
                }
                SessionAction::StateChanged(state) => {
                    debug!(state = %state, "Connection state changed");
                    this.state_tx.send_replace(state);
                    this.bus.emit(&ClientEvent::ConnectionState(state));
                }
                SessionAction::ReportError { kind, message } => {
                    warn!(kind = %kind, error = %message, "Connection error");
                    this.bus
                        .emit(&ClientEvent::ConnectionError { kind, message });
                }
            }
        }
    }

    fn open_transport(this: &Arc<Self>) {
        let generation = this.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let connector = this.connector.clone();
        let weak = Arc::downgrade(this);

        let task = tokio::spawn(async move {
            let result = connector.connect().await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            match result {
                Ok(link) => Self::attach(&inner, generation, link),
                Err(e) => {
                    let actions = inner.machine.lock().on_connect_error(e.kind(), e.to_string());
                    Self::execute(&inner, actions);
                }
            }
        });
        replace_task(&mut this.tasks.lock().opener, Some(task));
    }

    fn attach(this: &Arc<Self>, generation: u64, link: Link) {
        let Link {
            outgoing,
            mut incoming,
        } = link;
        *this.outgoing.lock() = Some(outgoing);

        let actions = this.machine.lock().on_connected();
        Self::execute(this, actions);

        // on_connected may have closed the transport again
        if this.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        let weak = Arc::downgrade(this);
        let frames = this.frames.clone();
        let reader = tokio::spawn(async move {
            while let Some(text) = incoming.recv().await {
                match serde_json::from_str::<ServerFrame>(&text) {
                    Ok(frame) => {
                        if frames.send(frame).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Dropping unparseable server frame"),
                }
            }
            if let Some(inner) = weak.upgrade() {
                inner.transport_closed(generation);
            }
        });
        replace_task(&mut this.tasks.lock().reader, Some(reader));
        info!(generation, "Transport connected");
    }

    fn transport_closed(self: &Arc<Self>, generation: u64) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        self.outgoing.lock().take();
        info!(generation, "Transport closed");
        let actions = self.machine.lock().on_disconnected();
        Self::execute(self, actions);
    }

    fn close_transport(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.outgoing.lock().take();
        replace_task(&mut self.tasks.lock().reader, None);
    }

    fn start_heartbeat(this: &Arc<Self>, interval: Duration) {
        let weak = Arc::downgrade(this);
        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let ping = match serde_json::to_string(&ClientFrame::notify(ClientCommand::Ping)) {
                    Ok(ping) => ping,
                    Err(_) => return,
                };
                let sent = inner
                    .outgoing
                    .lock()
                    .as_ref()
                    .is_some_and(|tx| tx.send(ping).is_ok());
                if !sent {
                    debug!("Heartbeat skipped, no transport");
                }
            }
        });
        replace_task(&mut this.tasks.lock().heartbeat, Some(task));
    }
}
