//! Revalidation driver
//!
//! Turns external triggers into cache revalidations. Runs as a tokio event
//! loop over an optional poll interval and a command channel; the embedding
//! application forwards window focus and network reconnect signals as
//! commands.

use crate::cache::KeyedAsyncCache;
use crate::{Result, SpeechSyncError};
use futures::future::{self, BoxFuture};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Event broadcast channel capacity
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Something whose observed entries can be revalidated in one go
pub trait Revalidatable: Send + Sync {
    /// Start revalidating every observed entry; resolves to how many once settled
    fn revalidate_active(&self) -> BoxFuture<'static, usize>;
}

impl<K, T> Revalidatable for KeyedAsyncCache<K, T>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    T: PartialEq + Send + Sync + 'static,
{
    fn revalidate_active(&self) -> BoxFuture<'static, usize> {
        KeyedAsyncCache::revalidate_active(self)
    }
}

/// Which triggers the driver reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerConfig {
    /// Poll interval; `None` disables polling
    pub poll_interval: Option<Duration>,
    pub revalidate_on_focus: bool,
    pub revalidate_on_reconnect: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            poll_interval: None,
            revalidate_on_focus: true,
            revalidate_on_reconnect: true,
        }
    }
}

impl TriggerConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }
}

/// What caused a revalidation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Interval,
    Focus,
    Reconnect,
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Trigger::Interval => "interval",
            Trigger::Focus => "focus",
            Trigger::Reconnect => "reconnect",
            Trigger::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// Commands accepted by a running driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCommand {
    /// Revalidate now, regardless of trigger settings
    RevalidateNow,

    /// The application regained focus
    Focus,

    /// The network came back
    Reconnect,

    /// Change or disable (`None`) polling
    SetPollInterval(Option<Duration>),

    /// Stop the event loop
    Shutdown,
}

/// Events emitted by the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    Started,

    /// A revalidation pass settled
    Revalidated {
        trigger: Trigger,
        /// Entries revalidated across all targets
        entries: usize,
    },

    Stopped,
}

/// Result of handling a command
enum CommandResult {
    Continue,
    Stop,
}

/// Cloneable sender side of a driver
#[derive(Debug, Clone)]
pub struct DriverHandle {
    command_tx: mpsc::Sender<DriverCommand>,
    event_tx: broadcast::Sender<DriverEvent>,
}

impl DriverHandle {
    /// Queue a command without waiting
    ///
    /// Fails when the driver has stopped or its queue is full.
    pub fn send(&self, command: DriverCommand) -> Result<()> {
        self.command_tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(cmd) => {
                SpeechSyncError::Other(format!("Driver command queue full, dropped {:?}", cmd))
            }
            mpsc::error::TrySendError::Closed(_) => {
                SpeechSyncError::Other("Revalidation driver is not running".to_string())
            }
        })
    }

    pub fn revalidate_now(&self) -> Result<()> {
        self.send(DriverCommand::RevalidateNow)
    }

    pub fn focus(&self) -> Result<()> {
        self.send(DriverCommand::Focus)
    }

    pub fn reconnect(&self) -> Result<()> {
        self.send(DriverCommand::Reconnect)
    }

    pub fn set_poll_interval(&self, interval: Option<Duration>) -> Result<()> {
        self.send(DriverCommand::SetPollInterval(interval))
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(DriverCommand::Shutdown)
    }

    pub fn is_running(&self) -> bool {
        !self.command_tx.is_closed()
    }

    /// Get an event subscriber
    pub fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.event_tx.subscribe()
    }
}

/// Revalidates registered caches on interval, focus and reconnect
pub struct RevalidationDriver {
    config: TriggerConfig,
    targets: Vec<Arc<dyn Revalidatable>>,
    event_tx: broadcast::Sender<DriverEvent>,
    command_rx: Option<mpsc::Receiver<DriverCommand>>,
    command_tx: mpsc::Sender<DriverCommand>,
}

impl RevalidationDriver {
    pub fn new(config: TriggerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        Self {
            config,
            targets: Vec::new(),
            event_tx,
            command_rx: Some(command_rx),
            command_tx,
        }
    }

    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    /// Add a cache to revalidate on every pass
    pub fn register(&mut self, target: Arc<dyn Revalidatable>) {
        self.targets.push(target);
    }

    pub fn with_target(mut self, target: Arc<dyn Revalidatable>) -> Self {
        self.register(target);
        self
    }

    /// Get an event subscriber
    pub fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.event_tx.subscribe()
    }

    pub fn handle(&self) -> DriverHandle {
        DriverHandle {
            command_tx: self.command_tx.clone(),
            event_tx: self.event_tx.clone(),
        }
    }

    /// Run the event loop on a new task
    pub fn spawn(mut self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }

    /// Run the event loop until [`DriverCommand::Shutdown`] or every handle is dropped
    pub async fn run(&mut self) -> Result<()> {
        let mut command_rx = self
            .command_rx
            .take()
            .ok_or_else(|| SpeechSyncError::Config("Driver already running".to_string()))?;
        // only handles keep the loop alive from here on
        let (closed_tx, _) = mpsc::channel(1);
        self.command_tx = closed_tx;

        tracing::info!(
            targets = self.targets.len(),
            poll_interval = ?self.config.poll_interval,
            "Revalidation driver started"
        );
        self.send_event(DriverEvent::Started);

        let mut interval = self.config.poll_interval.and_then(poll_timer);

        loop {
            tokio::select! {
                _ = tick(&mut interval), if interval.is_some() => {
                    self.revalidate(Trigger::Interval).await;
                }
                cmd = command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        tracing::debug!("All driver handles dropped");
                        break;
                    };
                    match self.handle_command(cmd, &mut interval).await {
                        CommandResult::Continue => {}
                        CommandResult::Stop => break,
                    }
                }
            }
        }

        tracing::info!("Revalidation driver stopped");
        self.send_event(DriverEvent::Stopped);
        Ok(())
    }

    async fn handle_command(
        &mut self,
        cmd: DriverCommand,
        interval: &mut Option<Interval>,
    ) -> CommandResult {
        match cmd {
            DriverCommand::RevalidateNow => {
                self.revalidate(Trigger::Manual).await;
            }
            DriverCommand::Focus => {
                if self.config.revalidate_on_focus {
                    self.revalidate(Trigger::Focus).await;
                } else {
                    tracing::trace!("Focus revalidation disabled");
                }
            }
            DriverCommand::Reconnect => {
                if self.config.revalidate_on_reconnect {
                    self.revalidate(Trigger::Reconnect).await;
                } else {
                    tracing::trace!("Reconnect revalidation disabled");
                }
            }
            DriverCommand::SetPollInterval(period) => {
                tracing::debug!(poll_interval = ?period, "Poll interval changed");
                *interval = period.and_then(poll_timer);
                self.config.poll_interval = period;
            }
            DriverCommand::Shutdown => {
                tracing::info!("Received shutdown command");
                return CommandResult::Stop;
            }
        }
        CommandResult::Continue
    }

    async fn revalidate(&self, trigger: Trigger) {
        let passes = self.targets.iter().map(|t| t.revalidate_active());
        let entries: usize = future::join_all(passes).await.into_iter().sum();

        tracing::trace!(%trigger, entries, "Revalidation pass settled");
        self.send_event(DriverEvent::Revalidated { trigger, entries });
    }

    fn send_event(&self, event: DriverEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::trace!("No driver event subscribers");
        }
    }
}

impl fmt::Debug for RevalidationDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevalidationDriver")
            .field("config", &self.config)
            .field("targets", &self.targets.len())
            .finish()
    }
}

/// Interval whose first tick is one period away; zero disables polling
fn poll_timer(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        tracing::warn!("Zero poll interval ignored");
        return None;
    }
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}
