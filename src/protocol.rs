use crate::types::{PlayerState, RunningApp, Volume, VolumeLevel};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Protocol action sent to a receiver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Launch {
        app_id: String,
    },
    Load {
        url: String,
        title: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        content_type: Option<String>,
    },
    Play,
    Pause,
    Stop {
        app_id: String,
    },
    SetVolume {
        level: VolumeLevel,
    },
    SetMuted {
        muted: bool,
    },
}

impl Action {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Action::Launch { .. } => "launch",
            Action::Load { .. } => "load",
            Action::Play => "play",
            Action::Pause => "pause",
            Action::Stop { .. } => "stop",
            Action::SetVolume { .. } => "set_volume",
            Action::SetMuted { .. } => "set_muted",
        }
    }
}

/// Receiver-level status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiverStatus {
    /// Running app, `None` when nothing is running
    #[serde(default)]
    pub app: Option<RunningApp>,
    #[serde(default)]
    pub volume: Option<Volume>,
}

/// Media session status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaStatus {
    pub player_state: PlayerState,
    #[serde(default)]
    pub title: Option<String>,
}

/// Device-initiated status notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    ReceiverStatus(ReceiverStatus),
    MediaStatus(MediaStatus),
    VolumeChanged(Volume),
    ConnectionLost { reason: String },
}

/// Wire frame exchanged with a WebSocket cast bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub meta: FrameMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ApiError>>,
}

/// Frame metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMeta {
    pub id: Uuid,
    pub method: Method,
}

/// Error entry in a reply frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub detail: String,
}

/// Frame methods
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Command,
    Reply,
    Notify,
}

impl Frame {
    /// Create a command frame carrying the given action
    pub fn command(action: &Action) -> serde_json::Result<Self> {
        Ok(Self {
            meta: FrameMeta {
                id: Uuid::new_v4(),
                method: Method::Command,
            },
            data: Some(serde_json::to_value(action)?),
            errors: None,
        })
    }

    /// Create a push frame carrying the given event
    pub fn notify(event: &PushEvent) -> serde_json::Result<Self> {
        Ok(Self {
            meta: FrameMeta {
                id: Uuid::new_v4(),
                method: Method::Notify,
            },
            data: Some(serde_json::to_value(event)?),
            errors: None,
        })
    }

    /// Create a reply to the frame with the given id
    pub fn reply(id: Uuid) -> Self {
        Self {
            meta: FrameMeta {
                id,
                method: Method::Reply,
            },
            data: None,
            errors: None,
        }
    }

    /// Attach an error to a reply
    pub fn with_error(mut self, detail: impl Into<String>) -> Self {
        self.errors
            .get_or_insert_with(Vec::new)
            .push(ApiError { detail: detail.into() });
        self
    }

    pub fn id(&self) -> Uuid {
        self.meta.id
    }

    /// Check if the frame contains errors
    pub fn has_errors(&self) -> bool {
        self.errors.as_ref().is_some_and(|e| !e.is_empty())
    }

    /// Get the first error message, if any
    pub fn error_message(&self) -> Option<String> {
        self.errors
            .as_ref()
            .and_then(|e| e.first())
            .map(|e| e.detail.clone())
    }

    /// Decode the push event carried by a notify frame
    pub fn push_event(&self) -> Option<PushEvent> {
        if self.meta.method != Method::Notify {
            return None;
        }
        self.data
            .as_ref()
            .and_then(|data| serde_json::from_value(data.clone()).ok())
    }
}
