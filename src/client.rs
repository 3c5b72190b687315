use crate::command::Command;
use crate::config::ControllerConfig;
use crate::dispatcher::PendingCommand;
use crate::error::{CastError, Result};
use crate::session::DeviceSession;
use crate::subscription::{Subscription, SubscriptionId};
use crate::transport::Transport;
use crate::types::{Device, DeviceId, SessionState};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Controller for sessions with cast receivers
///
/// The `CastController` keeps one [`DeviceSession`] per device. Sessions are
/// independent: each has its own command queue, state and listener, and a
/// failure on one device never touches another.
///
/// # Example
///
/// ```no_run
/// use cast_session::{CastController, Command, ControllerConfig, Device, WsTransport};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let controller = CastController::new(WsTransport::new(), ControllerConfig::from_env());
///     controller
///         .connect(Device::new("tv", "Living Room TV", "192.168.1.50", 8010))
///         .await?;
///
///     let mut updates = controller.subscribe("tv")?;
///     controller.dispatch("tv", Command::SetVolume(0.25)).await?;
///
///     while let Ok(state) = updates.recv().await {
///         println!("volume is now {}", state.volume_level);
///         break;
///     }
///     Ok(())
/// }
/// ```
pub struct CastController {
    transport: Arc<dyn Transport>,
    config: ControllerConfig,
    sessions: Mutex<BTreeMap<DeviceId, Arc<DeviceSession>>>,
}

impl CastController {
    pub fn new(transport: impl Transport, config: ControllerConfig) -> Self {
        Self::with_shared_transport(Arc::new(transport), config)
    }

    /// Create a controller around a transport shared with other code
    pub fn with_shared_transport(transport: Arc<dyn Transport>, config: ControllerConfig) -> Self {
        Self {
            transport,
            config,
            sessions: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    fn sessions(&self) -> MutexGuard<'_, BTreeMap<DeviceId, Arc<DeviceSession>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a device without connecting
    ///
    /// Returns the existing session when the same device is already known,
    /// and `DeviceMismatch` when the id is registered with a different
    /// address, port or name. Must be called within a Tokio runtime.
    pub fn add_device(&self, device: Device) -> Result<Arc<DeviceSession>> {
        let mut sessions = self.sessions();
        if let Some(existing) = sessions.get(&device.id) {
            if existing.device() != &device {
                tracing::warn!(
                    "Device {} is registered as {}:{}, refusing {}:{}",
                    device.id,
                    existing.device().address,
                    existing.device().port,
                    device.address,
                    device.port
                );
                return Err(CastError::DeviceMismatch(device.id));
            }
            return Ok(existing.clone());
        }

        tracing::debug!("Registering device {} ({})", device.id, device.name);
        let id = device.id.clone();
        let session = Arc::new(DeviceSession::new(
            device,
            self.transport.clone(),
            self.config.clone(),
        ));
        sessions.insert(id, session.clone());
        Ok(session)
    }

    /// Register a device and connect to it
    ///
    /// The device stays registered when the connection fails, so callers can
    /// retry with [`CastController::reconnect`].
    pub async fn connect(&self, device: Device) -> Result<Arc<DeviceSession>> {
        let session = self.add_device(device)?;
        session.connect().await?;
        Ok(session)
    }

    /// Reconnect a registered device
    pub async fn reconnect(&self, device_id: &str) -> Result<()> {
        self.session(device_id)?.connect().await
    }

    /// Disconnect a device, keeping it registered
    pub async fn disconnect(&self, device_id: &str) -> Result<()> {
        self.session(device_id)?.disconnect().await;
        Ok(())
    }

    /// Disconnect and forget a device
    ///
    /// Remove a device before registering it again with a new address.
    pub async fn remove_device(&self, device_id: &str) -> Result<()> {
        let session = self
            .sessions()
            .remove(device_id)
            .ok_or_else(|| CastError::DeviceNotFound(device_id.to_string()))?;
        session.disconnect().await;
        Ok(())
    }

    /// Get the session for a device
    pub fn session(&self, device_id: &str) -> Result<Arc<DeviceSession>> {
        self.sessions()
            .get(device_id)
            .cloned()
            .ok_or_else(|| CastError::DeviceNotFound(device_id.to_string()))
    }

    /// Get all registered devices
    pub fn devices(&self) -> Vec<Device> {
        self.sessions()
            .values()
            .map(|session| session.device().clone())
            .collect()
    }

    /// Subscribe to state snapshots of a device
    pub fn subscribe(&self, device_id: &str) -> Result<Subscription> {
        Ok(self.session(device_id)?.subscribe())
    }

    /// Remove a subscription, returning whether it was attached
    pub fn unsubscribe(&self, device_id: &str, id: SubscriptionId) -> Result<bool> {
        Ok(self.session(device_id)?.unsubscribe(id))
    }

    /// Get a snapshot of a device's state
    pub fn current_state(&self, device_id: &str) -> Result<SessionState> {
        Ok(self.session(device_id)?.current())
    }

    /// Enqueue a command without waiting for it
    pub fn submit(&self, device_id: &str, command: Command) -> Result<PendingCommand> {
        self.session(device_id)?.submit(command)
    }

    /// Run a command with the configured timeout
    pub async fn dispatch(&self, device_id: &str, command: Command) -> Result<()> {
        self.session(device_id)?.dispatch(command).await
    }

    /// Run a command with an explicit timeout
    pub async fn dispatch_with_timeout(
        &self,
        device_id: &str,
        command: Command,
        limit: Duration,
    ) -> Result<()> {
        self.session(device_id)?
            .dispatch_with_timeout(command, limit)
            .await
    }
}
