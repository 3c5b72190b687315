use crate::command::Command;
use crate::config::ControllerConfig;
use crate::dispatcher::{Dispatcher, PendingCommand, SessionLink};
use crate::error::{CastError, Result, TransportError};
use crate::protocol::PushEvent;
use crate::reconciler::{Reconciler, TaggedPush};
use crate::state::SessionStore;
use crate::subscription::{Subscription, SubscriptionId};
use crate::transport::Transport;
use crate::types::{Device, Epoch, SessionState, VolumeLevel};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Control session with one device
///
/// A `DeviceSession` owns the device's state, a command worker and, while
/// connected, a listener task feeding receiver pushes into the reconciler.
/// Sessions are created by [`CastController`](crate::CastController).
pub struct DeviceSession {
    device: Device,
    transport: Arc<dyn Transport>,
    config: ControllerConfig,
    store: SessionStore,
    reconciler: Reconciler,
    link: SessionLink,
    dispatcher: Dispatcher,
    listener: Mutex<Option<JoinHandle<()>>>,
    /// Serializes connect and disconnect
    lifecycle: tokio::sync::Mutex<()>,
}

impl DeviceSession {
    /// Create a disconnected session; must be called within a Tokio runtime
    pub(crate) fn new(device: Device, transport: Arc<dyn Transport>, config: ControllerConfig) -> Self {
        let store = SessionStore::new(
            device.id.clone(),
            config.observer_buffer,
            config.observer_timeout,
        );
        let reconciler = Reconciler::new(store.clone());
        let link = SessionLink::default();
        let dispatcher = Dispatcher::spawn(
            device.id.clone(),
            store.clone(),
            link.clone(),
            config.retry.clone(),
            config.media_receiver_app.clone(),
            config.queue_depth,
        );

        Self {
            device,
            transport,
            config,
            store,
            reconciler,
            link,
            dispatcher,
            listener: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Get the device
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Get a snapshot of the session state
    pub fn current(&self) -> SessionState {
        self.store.current()
    }

    /// Current connection epoch
    pub fn epoch(&self) -> Epoch {
        self.reconciler.current_epoch()
    }

    /// Reconciler feeding this session's state
    ///
    /// Pushes from a transport the session does not own can be applied here;
    /// they must carry the epoch they were received on.
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Subscribe to state snapshots
    pub fn subscribe(&self) -> Subscription {
        self.store.subscribe()
    }

    /// Remove a subscription
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.store.unsubscribe(id)
    }

    /// Open a transport session, replacing any previous one
    ///
    /// Each attempt starts a new epoch; pushes still in flight from an older
    /// connection are discarded.
    pub async fn connect(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.teardown().await;

        let epoch = self.reconciler.begin_epoch();
        tracing::info!("{}: connecting to {}:{} (epoch {})", self.device.id, self.device.address, self.device.port, epoch);

        let session = match timeout(self.config.connect_timeout, self.transport.connect(&self.device)).await {
            Ok(Ok(session)) => session,
            Ok(Err(source)) => return Err(self.connect_failed(epoch, source).await),
            Err(_) => return Err(self.connect_failed(epoch, TransportError::Timeout).await),
        };

        // Subscribe before publishing the session so no push is missed
        let pushes = session.subscribe();
        self.link.set(session);
        self.reconciler.connected(epoch).await?;

        let listener = tokio::spawn(listen(self.reconciler.clone(), epoch, pushes));
        *self.listener_slot() = Some(listener);

        tracing::info!("{}: connected", self.device.id);
        Ok(())
    }

    /// Close the transport session
    ///
    /// Commands still queued fail with `NotConnected`.
    pub async fn disconnect(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let epoch = self.reconciler.begin_epoch();
        self.teardown().await;
        if let Err(e) = self.reconciler.disconnected(epoch, "disconnected by client").await {
            tracing::debug!("{}: {}", self.device.id, e);
        }
    }

    async fn connect_failed(&self, epoch: Epoch, source: TransportError) -> CastError {
        tracing::warn!("{}: connection failed: {}", self.device.id, source);
        if let Err(e) = self.reconciler.disconnected(epoch, &source.to_string()).await {
            tracing::debug!("{}: {}", self.device.id, e);
        }
        CastError::Connection {
            device: self.device.id.clone(),
            source,
        }
    }

    async fn teardown(&self) {
        if let Some(listener) = self.listener_slot().take() {
            listener.abort();
        }
        if let Some(session) = self.link.take() {
            session.disconnect().await;
        }
    }

    fn listener_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========== Commands ==========

    /// Enqueue a command with the configured timeout
    pub fn submit(&self, command: Command) -> Result<PendingCommand> {
        let limit = self.config.timeout_for(&command);
        self.dispatcher.submit(command, limit)
    }

    /// Enqueue a command with an explicit timeout
    pub fn submit_with_timeout(&self, command: Command, limit: Duration) -> Result<PendingCommand> {
        self.dispatcher.submit(command, limit)
    }

    /// Run a command with the configured timeout
    pub async fn dispatch(&self, command: Command) -> Result<()> {
        self.submit(command)?.wait().await
    }

    /// Run a command with an explicit timeout
    pub async fn dispatch_with_timeout(&self, command: Command, limit: Duration) -> Result<()> {
        self.dispatcher.dispatch(command, limit).await
    }

    /// Resume playback; a no-op when already playing
    pub async fn play(&self) -> Result<()> {
        self.dispatch(Command::Play).await
    }

    /// Pause playback; a no-op when already paused
    pub async fn pause(&self) -> Result<()> {
        self.dispatch(Command::Pause).await
    }

    /// Pause if playing, resume if paused
    pub async fn toggle_playback(&self) -> Result<()> {
        self.dispatch(Command::TogglePlayback).await
    }

    /// Stop the running app; a no-op when the receiver is idle
    pub async fn stop_app(&self) -> Result<()> {
        self.dispatch(Command::StopApp).await
    }

    /// Set the volume, clamped to `0.0..=1.0`
    pub async fn set_volume(&self, level: VolumeLevel) -> Result<()> {
        self.dispatch(Command::SetVolume(level)).await
    }

    pub async fn set_muted(&self, muted: bool) -> Result<()> {
        self.dispatch(Command::SetMuted(muted)).await
    }

    /// Launch the media receiver if needed, load `url` and start playback
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use cast_session::{CastController, ControllerConfig, Device, WsTransport};
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// # let controller = CastController::new(WsTransport::new(), ControllerConfig::default());
    /// let session = controller
    ///     .connect(Device::new("tv", "TV", "192.168.1.50", 8010))
    ///     .await?;
    /// session
    ///     .load_media("http://example.com/video.mp4", "Video", Some("video/mp4"))
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn load_media(
        &self,
        url: impl Into<String>,
        title: impl Into<String>,
        content_type: Option<&str>,
    ) -> Result<()> {
        self.dispatch(Command::load_media(url, title, content_type)).await
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if let Some(listener) = self.listener_slot().take() {
            listener.abort();
        }
    }
}

/// Feed pushes from one connection into the reconciler
///
/// When the listener falls behind the broadcast buffer the skipped pushes
/// are lost; the affected field groups stay as they were until the receiver
/// reports them again, which cast receivers do on every status change.
async fn listen(reconciler: Reconciler, epoch: Epoch, mut pushes: broadcast::Receiver<PushEvent>) {
    loop {
        match pushes.recv().await {
            Ok(event) => {
                let lost = matches!(event, PushEvent::ConnectionLost { .. });
                reconciler.apply(TaggedPush::new(epoch, event)).await;
                if lost {
                    break;
                }
            }
            Err(RecvError::Lagged(n)) => {
                tracing::warn!("Push listener lagged by {} events (epoch {})", n, epoch);
            }
            Err(RecvError::Closed) => {
                let event = PushEvent::ConnectionLost {
                    reason: "push channel closed".to_string(),
                };
                reconciler.apply(TaggedPush::new(epoch, event)).await;
                break;
            }
        }
    }
    tracing::debug!("Push listener for epoch {} stopped", epoch);
}
