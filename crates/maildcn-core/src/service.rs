//! Monitor service
//!
//! One task owns the [`DcnMonitor`] and handles, one at a time, channel
//! deliveries, user commands, pacing deadlines and connection changes.
//! Nothing else touches the state, so no locking is needed.

use crate::alerts::{Alert, AlertIngest};
use crate::channel::{ConnectionStatus, PushChannel};
use crate::ingest::EventIngest;
use crate::monitor::DcnMonitor;
use crate::notice::NoticeLevel;
use crate::view::MonitorSnapshot;
use maildcn_common::types::ProtocolEvent;
use maildcn_common::{Config, Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Spacing between demonstration requests of one burst
pub const DEMO_SPACING: Duration = Duration::from_secs(1);

/// User actions accepted by the service
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorCommand {
    Start,
    Pause,
    Resume,
    TogglePause,
    Next,
    Previous,
    Reset,
    HideExplanation,
    Select(String),
    ClearSelection,
    SetSpeed(f64),
    ToggleDetails,
    Clear,
    /// Ask the backend for `count` demonstration batches
    RequestDemo { count: usize },
    Notify(NoticeLevel, String),
}

/// Client side of a running service
#[derive(Clone)]
pub struct MonitorHandle {
    commands: mpsc::UnboundedSender<MonitorCommand>,
    snapshots: watch::Receiver<MonitorSnapshot>,
    cancel: CancellationToken,
}

impl MonitorHandle {
    pub fn send(&self, command: MonitorCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::Internal("monitor service has stopped".to_string()))
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> MonitorSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MonitorSnapshot> {
        self.snapshots.clone()
    }

    /// Stop the service; pending paced insertions are dropped
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Pending demonstration requests
#[derive(Debug, Default)]
struct DemoBurst {
    remaining: usize,
    next_at: Option<Instant>,
}

pub struct MonitorService {
    monitor: DcnMonitor,
    ingest: EventIngest,
    events: mpsc::UnboundedReceiver<ProtocolEvent>,
    alerts: AlertIngest,
    alert_rx: mpsc::UnboundedReceiver<Alert>,
    commands: mpsc::UnboundedReceiver<MonitorCommand>,
    snapshots: watch::Sender<MonitorSnapshot>,
    status: Option<watch::Receiver<ConnectionStatus>>,
    demo: DemoBurst,
    cancel: CancellationToken,
}

impl MonitorService {
    /// Build a service reading from `channel`; `None` means not signed in
    pub fn new(config: &Config, channel: Option<Arc<dyn PushChannel>>) -> (Self, MonitorHandle) {
        let status = channel.as_ref().map(|c| c.status_watch());
        let (alerts, alert_rx) = AlertIngest::attach(channel.clone(), &config.channel);
        let (ingest, events) = EventIngest::attach(channel, &config.channel);
        let (command_tx, commands) = mpsc::unbounded_channel();
        let monitor = DcnMonitor::new(&config.monitor);
        let initial = monitor.snapshot(
            status
                .as_ref()
                .map(|s| *s.borrow())
                .unwrap_or(ConnectionStatus::Disconnected),
            Instant::now(),
        );
        let (snapshots, snapshot_rx) = watch::channel(initial);
        let cancel = CancellationToken::new();

        let handle = MonitorHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
            cancel: cancel.clone(),
        };

        let service = Self {
            monitor,
            ingest,
            events,
            alerts,
            alert_rx,
            commands,
            snapshots,
            status,
            demo: DemoBurst::default(),
            cancel,
        };

        (service, handle)
    }

    /// Process events and commands until cancelled or every handle is gone
    pub async fn run(mut self) {
        info!("Monitor service started");

        loop {
            let deadline = earliest(self.monitor.next_deadline(), self.demo.next_at);

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(event) = self.events.recv() => {
                    debug!("{} {} {}", event.protocol, event.stage, event.details);
                    self.monitor.record(event, Instant::now());
                }
                Some((level, message)) = self.alert_rx.recv() => {
                    self.monitor.notify(level, message, Instant::now());
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.apply(command),
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(far_future)), if deadline.is_some() => {}
                status = wait_status(&mut self.status) => self.on_status(status),
            }

            let now = Instant::now();
            self.monitor.tick(now);
            self.fire_demo(now);
            self.publish(now);
        }

        self.ingest.detach();
        self.alerts.detach();
        let dropped = self.monitor.pending_recent();
        info!("Monitor service stopped ({} paced events dropped)", dropped);
    }

    fn apply(&mut self, command: MonitorCommand) {
        let now = Instant::now();
        debug!("Command {:?}", command);
        match command {
            MonitorCommand::Start => {
                self.monitor.start();
            }
            MonitorCommand::Pause => {
                self.monitor.pause();
            }
            MonitorCommand::Resume => {
                self.monitor.resume();
            }
            MonitorCommand::TogglePause => {
                self.monitor.toggle_pause();
            }
            MonitorCommand::Next => self.monitor.next(),
            MonitorCommand::Previous => {
                self.monitor.previous();
            }
            MonitorCommand::Reset => self.monitor.reset(),
            MonitorCommand::HideExplanation => self.monitor.hide_explanation(),
            MonitorCommand::Select(id) => {
                if let Err(e) = self.monitor.select_node(&id) {
                    self.monitor.notify_error(&e, now);
                }
            }
            MonitorCommand::ClearSelection => self.monitor.clear_selection(),
            MonitorCommand::SetSpeed(speed) => {
                let applied = self.monitor.set_speed(speed);
                self.monitor
                    .notify(NoticeLevel::Info, format!("Simulation speed {}x", applied), now);
            }
            MonitorCommand::ToggleDetails => {
                self.monitor.toggle_details();
            }
            MonitorCommand::Clear => self.monitor.clear(),
            MonitorCommand::RequestDemo { count } => {
                if self.ingest.channel().is_none() {
                    let err = Error::Channel("not connected: sign in first".to_string());
                    self.monitor.notify_error(&err, now);
                    return;
                }
                self.demo.remaining = self.demo.remaining.saturating_add(count);
                if self.demo.next_at.is_none() {
                    self.demo.next_at = Some(now);
                }
            }
            MonitorCommand::Notify(level, message) => self.monitor.notify(level, message, now),
        }
    }

    fn fire_demo(&mut self, now: Instant) {
        let Some(at) = self.demo.next_at else {
            return;
        };
        if at > now {
            return;
        }

        if let Err(e) = self.ingest.request_demo() {
            self.monitor.notify_error(&e, now);
            self.demo = DemoBurst::default();
            return;
        }

        self.demo.remaining = self.demo.remaining.saturating_sub(1);
        self.demo.next_at = (self.demo.remaining > 0).then(|| now + DEMO_SPACING);
    }

    fn on_status(&mut self, status: Option<ConnectionStatus>) {
        let now = Instant::now();
        match status {
            None => self.status = None,
            Some(ConnectionStatus::Connected) => {
                self.monitor
                    .notify(NoticeLevel::Info, "Connected to event channel", now);
            }
            Some(ConnectionStatus::Reconnecting { attempt }) => self.monitor.notify(
                NoticeLevel::Warning,
                format!("Event channel lost, reconnecting (attempt {})", attempt),
                now,
            ),
            Some(ConnectionStatus::Closed) => {
                self.monitor
                    .notify(NoticeLevel::Error, "Event channel closed", now);
            }
            Some(_) => {}
        }
    }

    fn publish(&mut self, now: Instant) {
        let connection = self
            .status
            .as_ref()
            .map(|s| *s.borrow())
            .unwrap_or(ConnectionStatus::Disconnected);
        self.snapshots
            .send_replace(self.monitor.snapshot(connection, now));
    }
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400)
}

/// Next connection status; pends forever without a channel
async fn wait_status(
    rx: &mut Option<watch::Receiver<ConnectionStatus>>,
) -> Option<ConnectionStatus> {
    match rx {
        Some(rx) => {
            if rx.changed().await.is_err() {
                return None;
            }
            let status = *rx.borrow_and_update();
            Some(status)
        }
        None => std::future::pending().await,
    }
}
