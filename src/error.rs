use crate::command::{CommandKind, LoadStep};
use crate::types::{DeviceId, Epoch};
use std::time::Duration;
use thiserror::Error;

/// Result type for cast session operations
pub type Result<T> = std::result::Result<T, CastError>;

/// Errors raised by a transport while talking to a receiver
#[derive(Error, Debug)]
pub enum TransportError {
    /// WebSocket connection error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection was closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// Request timed out waiting for a reply
    #[error("Request timeout")]
    Timeout,

    /// The receiver answered with an error
    #[error("Rejected by receiver: {detail}")]
    Rejected {
        /// Error detail reported by the receiver
        detail: String,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or unexpected reply
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    /// Whether retrying the same action may succeed.
    ///
    /// Rejections and malformed payloads are deterministic; everything that
    /// depends on the network is treated as transient.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::WebSocket(_) | TransportError::Timeout | TransportError::Io(_)
        )
    }
}

/// Errors that can occur while driving a device session
#[derive(Error, Debug)]
pub enum CastError {
    /// The device has no live session
    #[error("{device}: cannot {command}, device is not connected")]
    NotConnected {
        device: DeviceId,
        command: CommandKind,
    },

    /// The command was rejected before reaching the device
    #[error("{device}: invalid {command} request: {reason}")]
    InvalidArgument {
        device: DeviceId,
        command: CommandKind,
        reason: String,
    },

    /// The per-device command queue is full
    #[error("{device}: cannot {command}, command queue is full")]
    Busy {
        device: DeviceId,
        command: CommandKind,
    },

    /// The command did not finish within its timeout
    #[error("{device}: {command} timed out after {after:?}")]
    TimedOut {
        device: DeviceId,
        command: CommandKind,
        after: Duration,
    },

    /// The transport failed while executing the command
    #[error("{device}: {command} failed: {source}")]
    Transport {
        device: DeviceId,
        command: CommandKind,
        #[source]
        source: TransportError,
    },

    /// One step of a media load failed; later steps were not attempted
    #[error("{device}: load media failed at {step} step: {source}")]
    LoadFailed {
        device: DeviceId,
        step: LoadStep,
        #[source]
        source: TransportError,
    },

    /// Opening the transport session failed
    #[error("{device}: connection failed: {source}")]
    Connection {
        device: DeviceId,
        #[source]
        source: TransportError,
    },

    /// No session is registered for the device
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceId),

    /// The id is already registered for a different device
    #[error("Device {0} is already registered with a different address")]
    DeviceMismatch(DeviceId),

    /// A push from a superseded connection; dropped by the reconciler
    #[error("Stale epoch {got} (current {current})")]
    StaleEpoch { current: Epoch, got: Epoch },

    /// Internal channel failure
    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl CastError {
    /// The device the error refers to, when there is one
    pub fn device(&self) -> Option<&str> {
        match self {
            CastError::NotConnected { device, .. }
            | CastError::InvalidArgument { device, .. }
            | CastError::Busy { device, .. }
            | CastError::TimedOut { device, .. }
            | CastError::Transport { device, .. }
            | CastError::LoadFailed { device, .. }
            | CastError::Connection { device, .. }
            | CastError::DeviceNotFound(device)
            | CastError::DeviceMismatch(device) => Some(device),
            CastError::StaleEpoch { .. } | CastError::ChannelError(_) => None,
        }
    }

    /// The command kind the error refers to, when there is one
    pub fn command(&self) -> Option<CommandKind> {
        match self {
            CastError::NotConnected { command, .. }
            | CastError::InvalidArgument { command, .. }
            | CastError::Busy { command, .. }
            | CastError::TimedOut { command, .. }
            | CastError::Transport { command, .. } => Some(*command),
            CastError::LoadFailed { .. } => Some(CommandKind::LoadMedia),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_device_and_command() {
        let err = CastError::NotConnected {
            device: "den".to_string(),
            command: CommandKind::StopApp,
        };
        assert_eq!(err.to_string(), "den: cannot stop app, device is not connected");
        assert_eq!(err.device(), Some("den"));
        assert_eq!(err.command(), Some(CommandKind::StopApp));

        let err = CastError::LoadFailed {
            device: "den".to_string(),
            step: LoadStep::Launch,
            source: TransportError::Timeout,
        };
        assert_eq!(err.command(), Some(CommandKind::LoadMedia));
        assert!(err.to_string().contains("launch"));

        let err = CastError::StaleEpoch {
            current: Epoch(3),
            got: Epoch(2),
        };
        assert_eq!(err.device(), None);
        assert_eq!(err.command(), None);
    }

    #[test]
    fn only_network_failures_are_transient() {
        assert!(TransportError::Timeout.is_transient());
        assert!(TransportError::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe)).is_transient());
        assert!(!TransportError::ConnectionClosed.is_transient());
        assert!(!TransportError::Rejected {
            detail: "nope".to_string()
        }
        .is_transient());
        assert!(!TransportError::InvalidResponse("garbled".to_string()).is_transient());
    }
}
