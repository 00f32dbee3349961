/// RemoteCore — single-owner event loop for all client-side state.
///
/// The reconciler, navigator, volume controller and settings debouncer are
/// owned exclusively by this loop.  Every input (push notification, user
/// command, HTTP completion, timer) arrives as a `CoreEvent` and is handled
/// synchronously to completion before the next one, so no state needs a
/// lock.
///
/// The loop never awaits the network.  HTTP calls run in spawned tasks that
/// report back with a `CoreEvent`, which keeps notifications flowing while a
/// volume or settings command is in flight.
///
/// After each mutation the core publishes a `CoreBroadcast` so presentation
/// code can re-read a snapshot.
use std::sync::Arc;
use std::time::Duration;

use amp_proto::config::Config;
use amp_proto::event::{Event, CAT_VOLUME};
use amp_proto::protocol::{ApiStatus, ClientRequest, Notification, SettingsReply, VolumeReply};
use amp_proto::state::SystemState;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::backend::{SettingsApi, VolumeApi};
use crate::bus::{EventBus, Subscription};
use crate::debounce::{DebounceDue, SettingKey, SettingUpdate, SettingsDebouncer};
use crate::error::{ApiError, VolumeError};
use crate::navigation::{ModalId, ModalNavigator, ModalState};
use crate::reconciler::{ApplyOutcome, StateReconciler};
use crate::volume::{VolumeController, VolumeRequest, VolumeState};

type VolumeReplyTx = oneshot::Sender<Result<u8, VolumeError>>;

// ── Commands & events ─────────────────────────────────────────────────────────

/// Requests from the presentation layer.
#[derive(Debug)]
pub enum RemoteCommand {
    SetVolume { target: i32, reply: VolumeReplyTx },
    AdjustVolume { delta: i32, reply: VolumeReplyTx },
    RefreshVolume,
    OpenModal(ModalId),
    CloseModal,
    PushScreen { screen: String, extra: Map<String, Value> },
    GoBack,
    GoToScreen { screen: String, extra: Map<String, Value> },
    /// `delay: None` uses the configured debounce delay.
    ScheduleSetting {
        key: SettingKey,
        payload: Value,
        delay: Option<Duration>,
    },
    FlushSettings,
    CancelSettings,
    Send(ClientRequest),
    Snapshot(oneshot::Sender<RemoteSnapshot>),
}

/// All inputs into the RemoteCore loop.
#[derive(Debug)]
pub enum CoreEvent {
    /// Push notification from the event channel.
    Notification(Notification),
    /// Event channel connected (true) or lost (false).
    ChannelStatus(bool),
    Command(RemoteCommand),
    VolumeFinished {
        outcome: Result<VolumeReply, ApiError>,
        reply: VolumeReplyTx,
    },
    /// `issued_at` is the controller epoch when the read went out.
    VolumeRefreshed {
        issued_at: u64,
        outcome: Result<VolumeReply, ApiError>,
    },
    /// Settling delay after a volume reply has elapsed.
    VolumeSettled,
    SettingsFinished {
        key: SettingKey,
        outcome: Result<SettingsReply, ApiError>,
    },
    Shutdown,
}

/// What the core tells listeners after a change.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreBroadcast {
    StateUpdated { revision: u64 },
    VolumeUpdated { volume: u8, show_bar: bool },
    ModalUpdated,
    SettingsSaved { group: String, config: Map<String, Value> },
    SettingsFailed { group: String, message: String },
    Connection(bool),
}

/// Point-in-time copy of everything the presentation layer renders from.
#[derive(Debug, Clone, Serialize)]
pub struct RemoteSnapshot {
    pub system: SystemState,
    pub revision: u64,
    pub modal: ModalState,
    pub modal_title: Option<&'static str>,
    pub volume: VolumeState,
    pub pending_settings: usize,
    pub connected: bool,
}

pub struct Backends {
    pub volume: Arc<dyn VolumeApi>,
    pub settings: Arc<dyn SettingsApi>,
}

// ── RemoteCore ────────────────────────────────────────────────────────────────

pub struct RemoteCore {
    reconciler: StateReconciler,
    navigator: ModalNavigator,
    volume: VolumeController,
    debouncer: SettingsDebouncer,
    /// Taken by `run`.
    due_rx: Option<mpsc::UnboundedReceiver<DebounceDue>>,
    bus: EventBus,
    backends: Backends,
    /// Outbound requests to the event channel writer.
    requests_tx: mpsc::Sender<ClientRequest>,
    /// Strong sender for `handle()`; dropped when `run` starts so the inbox
    /// closes once every handle and the event channel are gone.
    event_tx: Option<mpsc::Sender<CoreEvent>>,
    /// Our own inbox, for spawned tasks to report back.
    inbox: mpsc::WeakSender<CoreEvent>,
    broadcast_tx: broadcast::Sender<CoreBroadcast>,
    settle_delay: Duration,
    debounce_delay: Duration,
    connected: bool,
}

impl RemoteCore {
    pub fn new(
        config: &Config,
        backends: Backends,
        requests_tx: mpsc::Sender<ClientRequest>,
        event_tx: mpsc::Sender<CoreEvent>,
        broadcast_tx: broadcast::Sender<CoreBroadcast>,
    ) -> Self {
        let (due_tx, due_rx) = mpsc::unbounded_channel();
        Self {
            reconciler: StateReconciler::new(),
            navigator: ModalNavigator::new(),
            volume: VolumeController::new(config.volume.show_bar),
            debouncer: SettingsDebouncer::new(due_tx),
            due_rx: Some(due_rx),
            bus: EventBus::new(),
            backends,
            requests_tx,
            inbox: event_tx.downgrade(),
            event_tx: Some(event_tx),
            broadcast_tx,
            settle_delay: config.volume.settle_delay(),
            debounce_delay: config.settings.debounce_delay(),
            connected: false,
        }
    }

    /// Cloneable handle for the presentation layer.
    pub fn handle(&self) -> RemoteHandle {
        let tx = match &self.event_tx {
            Some(tx) => tx.clone(),
            None => unreachable!("run() consumes the core"),
        };
        RemoteHandle {
            tx,
            bus: self.bus.clone(),
            broadcast_tx: self.broadcast_tx.clone(),
        }
    }

    /// Run the core event loop until `Shutdown` is received or every sender
    /// (handles, event channel, in-flight tasks) has been dropped.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<CoreEvent>) -> anyhow::Result<()> {
        info!("RemoteCore: starting event loop");
        self.event_tx = None;
        let mut due_rx = self
            .due_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("RemoteCore::run called twice"))?;

        loop {
            tokio::select! {
                evt = event_rx.recv() => match evt {
                    None => {
                        info!("RemoteCore: event channel closed, shutting down");
                        break;
                    }
                    Some(CoreEvent::Shutdown) => {
                        info!("RemoteCore: shutdown requested");
                        break;
                    }
                    Some(evt) => self.handle_event(evt),
                },
                Some(due) = due_rx.recv() => self.handle_debounce_due(due),
            }
        }

        self.cleanup().await;
        Ok(())
    }

    fn handle_event(&mut self, evt: CoreEvent) {
        match evt {
            CoreEvent::Notification(n) => self.handle_notification(n),
            CoreEvent::ChannelStatus(up) => {
                if up == self.connected {
                    return;
                }
                info!("RemoteCore: event channel {}", if up { "up" } else { "down" });
                self.connected = up;
                self.publish(CoreBroadcast::Connection(up));
                if up {
                    self.refresh_volume();
                }
            }
            CoreEvent::Command(cmd) => self.handle_command(cmd),
            CoreEvent::VolumeFinished { outcome, reply } => self.finish_volume(outcome, reply),
            CoreEvent::VolumeRefreshed { issued_at, outcome } => match outcome {
                Ok(reply) => {
                    let before = self.volume.current();
                    if self.volume.on_refreshed(reply, issued_at)
                        && self.volume.current() != before
                    {
                        self.publish(CoreBroadcast::VolumeUpdated {
                            volume: self.volume.current(),
                            show_bar: false,
                        });
                    }
                }
                Err(e) => warn!("RemoteCore: volume refresh failed: {}", e),
            },
            CoreEvent::VolumeSettled => {
                debug!("RemoteCore: volume settled");
                self.volume.release();
            }
            CoreEvent::SettingsFinished { key, outcome } => self.finish_setting(key, outcome),
            CoreEvent::Shutdown => {}
        }
    }

    // ── inbound notifications ─────────────────────────────────────────────────

    fn handle_notification(&mut self, n: Notification) {
        if n.matches(CAT_VOLUME, "changed") {
            match Event::parse(&n) {
                Ok(Some(Event::VolumeChanged { volume, show_bar })) => {
                    let show_bar = self.volume.on_pushed(volume, show_bar);
                    self.publish(CoreBroadcast::VolumeUpdated {
                        volume: self.volume.current(),
                        show_bar,
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("RemoteCore: dropping event: {}", e);
                    return;
                }
            }
        } else {
            match self.reconciler.apply_event(&n) {
                ApplyOutcome::Applied => self.publish(CoreBroadcast::StateUpdated {
                    revision: self.reconciler.revision(),
                }),
                ApplyOutcome::Ignored => {}
                ApplyOutcome::Dropped => return,
            }
        }
        self.bus.dispatch(&n);
    }

    // ── commands ──────────────────────────────────────────────────────────────

    fn handle_command(&mut self, cmd: RemoteCommand) {
        match cmd {
            RemoteCommand::SetVolume { target, reply } => {
                let request = self.volume.begin_set(target);
                self.start_volume(request, reply);
            }
            RemoteCommand::AdjustVolume { delta, reply } => {
                let request = self.volume.begin_adjust(delta);
                self.start_volume(request, reply);
            }
            RemoteCommand::RefreshVolume => self.refresh_volume(),
            RemoteCommand::OpenModal(modal) => {
                self.navigator.open(modal);
                self.publish(CoreBroadcast::ModalUpdated);
            }
            RemoteCommand::CloseModal => {
                self.navigator.close();
                self.publish(CoreBroadcast::ModalUpdated);
            }
            RemoteCommand::PushScreen { screen, extra } => {
                self.navigator.push_screen(&screen, extra);
                self.publish(CoreBroadcast::ModalUpdated);
            }
            RemoteCommand::GoBack => {
                self.navigator.go_back();
                self.publish(CoreBroadcast::ModalUpdated);
            }
            RemoteCommand::GoToScreen { screen, extra } => {
                self.navigator.go_to_screen(&screen, extra);
                self.publish(CoreBroadcast::ModalUpdated);
            }
            RemoteCommand::ScheduleSetting {
                key,
                payload,
                delay,
            } => {
                let delay = delay.unwrap_or(self.debounce_delay);
                self.debouncer.schedule(key, payload, delay);
            }
            RemoteCommand::FlushSettings => {
                for update in self.debouncer.flush_all() {
                    self.send_setting(update);
                }
            }
            RemoteCommand::CancelSettings => self.debouncer.cancel_all(),
            RemoteCommand::Send(request) => {
                if !self.connected {
                    warn!("RemoteCore: queueing {:?} while disconnected", request);
                }
                if let Err(e) = self.requests_tx.try_send(request) {
                    warn!("RemoteCore: could not queue client request: {}", e);
                }
            }
            RemoteCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn snapshot(&self) -> RemoteSnapshot {
        RemoteSnapshot {
            system: self.reconciler.state().clone(),
            revision: self.reconciler.revision(),
            modal: self.navigator.state().clone(),
            modal_title: self.navigator.title_key(),
            volume: self.volume.state(),
            pending_settings: self.debouncer.pending_len(),
            connected: self.connected,
        }
    }

    fn publish(&self, msg: CoreBroadcast) {
        // No receivers is fine.
        let _ = self.broadcast_tx.send(msg);
    }

    // ── volume ────────────────────────────────────────────────────────────────

    fn start_volume(
        &mut self,
        request: Result<VolumeRequest, VolumeError>,
        reply: VolumeReplyTx,
    ) {
        let request = match request {
            Ok(r) => r,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        debug!("RemoteCore: volume request {:?}", request);
        let Some(tx) = self.inbox.upgrade() else {
            self.volume.release();
            let _ = reply.send(Err(VolumeError::CoreGone));
            return;
        };
        let api = Arc::clone(&self.backends.volume);
        tokio::spawn(async move {
            let outcome = match request {
                VolumeRequest::Set { volume, show_bar } => api.set_volume(volume, show_bar).await,
                VolumeRequest::Adjust { delta, show_bar } => {
                    api.adjust_volume(delta, show_bar).await
                }
            };
            let _ = tx.send(CoreEvent::VolumeFinished { outcome, reply }).await;
        });
    }

    fn finish_volume(&mut self, outcome: Result<VolumeReply, ApiError>, reply: VolumeReplyTx) {
        let result = self.volume.finish(outcome);
        if let Ok(volume) = result {
            self.publish(CoreBroadcast::VolumeUpdated {
                volume,
                show_bar: false,
            });
        }
        let _ = reply.send(result);

        if self.volume.is_pending() {
            let Some(tx) = self.inbox.upgrade() else {
                self.volume.release();
                return;
            };
            let delay = self.settle_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(CoreEvent::VolumeSettled).await;
            });
        }
    }

    fn refresh_volume(&self) {
        let Some(tx) = self.inbox.upgrade() else {
            return;
        };
        let api = Arc::clone(&self.backends.volume);
        let issued_at = self.volume.epoch();
        tokio::spawn(async move {
            let outcome = api.get_volume().await;
            let _ = tx
                .send(CoreEvent::VolumeRefreshed { issued_at, outcome })
                .await;
        });
    }

    // ── settings ──────────────────────────────────────────────────────────────

    fn handle_debounce_due(&mut self, due: DebounceDue) {
        if let Some(update) = self.debouncer.take_due(&due) {
            self.send_setting(update);
        }
    }

    fn send_setting(&self, update: SettingUpdate) {
        let Some(tx) = self.inbox.upgrade() else {
            warn!(
                "RemoteCore: dropping {}/{}, core is shutting down",
                update.key.group, update.key.key
            );
            return;
        };
        let api = Arc::clone(&self.backends.settings);
        tokio::spawn(async move {
            let outcome = api.update_setting(&update.key.group, update.payload).await;
            let _ = tx
                .send(CoreEvent::SettingsFinished {
                    key: update.key,
                    outcome,
                })
                .await;
        });
    }

    fn finish_setting(&mut self, key: SettingKey, outcome: Result<SettingsReply, ApiError>) {
        let msg = match outcome {
            Ok(reply) if reply.status == ApiStatus::Success => {
                info!("RemoteCore: saved {}/{}", key.group, key.key);
                CoreBroadcast::SettingsSaved {
                    group: key.group,
                    config: reply.config,
                }
            }
            Ok(_) => {
                warn!("RemoteCore: backend rejected {}/{}", key.group, key.key);
                CoreBroadcast::SettingsFailed {
                    group: key.group,
                    message: ApiError::Reported.to_string(),
                }
            }
            Err(e) => {
                error!("RemoteCore: saving {}/{} failed: {}", key.group, key.key, e);
                CoreBroadcast::SettingsFailed {
                    group: key.group,
                    message: e.to_string(),
                }
            }
        };
        self.publish(msg);
    }

    /// Send whatever edits are still waiting, then drop every timer.
    async fn cleanup(&mut self) {
        let pending = self.debouncer.flush_all();
        if !pending.is_empty() {
            info!("RemoteCore: flushing {} pending setting(s)", pending.len());
        }
        for update in pending {
            if let Err(e) = self
                .backends
                .settings
                .update_setting(&update.key.group, update.payload)
                .await
            {
                warn!(
                    "RemoteCore: flush of {}/{} failed: {}",
                    update.key.group, update.key.key, e
                );
            }
        }
        self.debouncer.cancel_all();
    }
}

// ── RemoteHandle ──────────────────────────────────────────────────────────────

/// Cheap, cloneable front door to a running `RemoteCore`.
#[derive(Clone)]
pub struct RemoteHandle {
    tx: mpsc::Sender<CoreEvent>,
    bus: EventBus,
    broadcast_tx: broadcast::Sender<CoreBroadcast>,
}

impl RemoteHandle {
    async fn command(&self, cmd: RemoteCommand) -> anyhow::Result<()> {
        self.tx
            .send(CoreEvent::Command(cmd))
            .await
            .map_err(|_| anyhow::anyhow!("remote core is not running"))
    }

    pub async fn set_volume(&self, target: i32) -> Result<u8, VolumeError> {
        let (reply, rx) = oneshot::channel();
        self.command(RemoteCommand::SetVolume { target, reply })
            .await
            .map_err(|_| VolumeError::CoreGone)?;
        rx.await.map_err(|_| VolumeError::CoreGone)?
    }

    pub async fn adjust_volume(&self, delta: i32) -> Result<u8, VolumeError> {
        let (reply, rx) = oneshot::channel();
        self.command(RemoteCommand::AdjustVolume { delta, reply })
            .await
            .map_err(|_| VolumeError::CoreGone)?;
        rx.await.map_err(|_| VolumeError::CoreGone)?
    }

    pub async fn refresh_volume(&self) -> anyhow::Result<()> {
        self.command(RemoteCommand::RefreshVolume).await
    }

    pub async fn open_modal(&self, modal: ModalId) -> anyhow::Result<()> {
        self.command(RemoteCommand::OpenModal(modal)).await
    }

    pub async fn close_modal(&self) -> anyhow::Result<()> {
        self.command(RemoteCommand::CloseModal).await
    }

    pub async fn push_screen(
        &self,
        screen: impl Into<String>,
        extra: Map<String, Value>,
    ) -> anyhow::Result<()> {
        self.command(RemoteCommand::PushScreen {
            screen: screen.into(),
            extra,
        })
        .await
    }

    pub async fn go_back(&self) -> anyhow::Result<()> {
        self.command(RemoteCommand::GoBack).await
    }

    pub async fn go_to_screen(
        &self,
        screen: impl Into<String>,
        extra: Map<String, Value>,
    ) -> anyhow::Result<()> {
        self.command(RemoteCommand::GoToScreen {
            screen: screen.into(),
            extra,
        })
        .await
    }

    pub async fn schedule_setting(
        &self,
        group: &str,
        key: &str,
        payload: Value,
        delay: Option<Duration>,
    ) -> anyhow::Result<()> {
        self.command(RemoteCommand::ScheduleSetting {
            key: SettingKey::new(group, key),
            payload,
            delay,
        })
        .await
    }

    pub async fn flush_settings(&self) -> anyhow::Result<()> {
        self.command(RemoteCommand::FlushSettings).await
    }

    pub async fn cancel_settings(&self) -> anyhow::Result<()> {
        self.command(RemoteCommand::CancelSettings).await
    }

    pub async fn activate_source(&self, plugin: impl Into<String>) -> anyhow::Result<()> {
        self.command(RemoteCommand::Send(ClientRequest::ActivateSource {
            plugin: plugin.into(),
        }))
        .await
    }

    pub async fn set_multiroom(&self, enabled: bool) -> anyhow::Result<()> {
        self.command(RemoteCommand::Send(ClientRequest::SetMultiroom { enabled }))
            .await
    }

    pub async fn set_equalizer(&self, enabled: bool) -> anyhow::Result<()> {
        self.command(RemoteCommand::Send(ClientRequest::SetEqualizer { enabled }))
            .await
    }

    pub async fn snapshot(&self) -> anyhow::Result<RemoteSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.command(RemoteCommand::Snapshot(reply)).await?;
        rx.await
            .map_err(|_| anyhow::anyhow!("remote core dropped snapshot request"))
    }

    /// Feed a notification into the core as if it came off the channel.
    pub async fn inject(&self, n: Notification) -> anyhow::Result<()> {
        self.tx
            .send(CoreEvent::Notification(n))
            .await
            .map_err(|_| anyhow::anyhow!("remote core is not running"))
    }

    pub fn subscribe<F>(&self, category: &str, kind: &str, handler: F) -> Subscription
    where
        F: FnMut(&Notification) + Send + 'static,
    {
        self.bus.subscribe(category, kind, handler)
    }

    pub fn updates(&self) -> broadcast::Receiver<CoreBroadcast> {
        self.broadcast_tx.subscribe()
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(CoreEvent::Shutdown).await;
    }
}
