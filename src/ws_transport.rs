use crate::connection::Connection;
use crate::error::TransportError;
use crate::protocol::{Action, Frame, PushEvent};
use crate::transport::{Transport, TransportSession};
use crate::types::Device;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport for receivers exposed through a JSON-over-WebSocket bridge
///
/// Connects to `ws://{address}:{port}{path}` for each device. Actions are
/// sent as `command` frames and acknowledged by `reply` frames with the same
/// id; status changes arrive as `notify` frames.
///
/// # Example
///
/// ```no_run
/// use cast_session::{CastController, Command, ControllerConfig, Device, WsTransport};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let controller = CastController::new(WsTransport::new(), ControllerConfig::default());
///     let device = Device::new("living-room", "Living Room", "192.168.1.40", 8010);
///     controller.connect(device).await?;
///     controller.dispatch("living-room", Command::SetVolume(0.3)).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct WsTransport {
    path: String,
    request_timeout: Duration,
}

impl WsTransport {
    pub fn new() -> Self {
        Self {
            path: String::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Set the URL path appended after `host:port`
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set how long a single request waits for its reply
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    fn url_for(&self, device: &Device) -> String {
        format!("ws://{}:{}{}", device.address, device.port, self.path)
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, device: &Device) -> Result<Arc<dyn TransportSession>, TransportError> {
        let connection = Connection::connect(self.url_for(device), self.request_timeout).await?;
        tracing::info!("Connected to {} ({})", device.name, device.id);

        Ok(Arc::new(WsSession {
            device: device.clone(),
            connection,
        }))
    }
}

/// Session over one WebSocket connection
pub struct WsSession {
    device: Device,
    connection: Connection,
}

impl WsSession {
    /// Get the device this session talks to
    pub fn device(&self) -> &Device {
        &self.device
    }
}

#[async_trait]
impl TransportSession for WsSession {
    async fn send(&self, action: &Action) -> Result<(), TransportError> {
        let frame = Frame::command(action)?;
        self.connection.send_request(frame).await?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.connection.subscribe()
    }

    async fn disconnect(&self) {
        tracing::info!("Closing session with {}", self.device.id);
        self.connection.close().await;
    }
}
