use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Device identifier
pub type DeviceId = String;

/// Volume level, normalized to `0.0..=1.0`
pub type VolumeLevel = f32;

/// App id of the default media receiver
pub const DEFAULT_MEDIA_RECEIVER: &str = "CC1AD845";

/// A cast-capable receiver
///
/// Devices are immutable once constructed; the controller keys sessions by
/// [`Device::id`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub model: Option<String>,
}

impl Device {
    pub fn new(
        id: impl Into<DeviceId>,
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            port,
            model: None,
        }
    }

    /// Set the model name
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Player state of the media session on the receiver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerState {
    #[default]
    Idle,
    Playing,
    Paused,
    Buffering,
}

impl PlayerState {
    pub fn as_str(self) -> &'static str {
        match self {
            PlayerState::Idle => "IDLE",
            PlayerState::Playing => "PLAYING",
            PlayerState::Paused => "PAUSED",
            PlayerState::Buffering => "BUFFERING",
        }
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application currently running on the receiver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningApp {
    pub app_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Whether the app is the receiver's idle/backdrop screen
    #[serde(default)]
    pub is_idle_screen: bool,
}

/// Volume as reported by the receiver
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub level: VolumeLevel,
    #[serde(default)]
    pub muted: bool,
}

/// Connection epoch
///
/// Every connection attempt gets a fresh, strictly larger epoch. Pushes are
/// tagged with the epoch of the connection that produced them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(pub u64);

impl Epoch {
    pub fn next(self) -> Self {
        Epoch(self.0 + 1)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session state snapshot for one device
///
/// Handed to observers by value; mutating a snapshot has no effect on the
/// session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub device_id: DeviceId,
    pub connected: bool,
    pub running_app_id: Option<String>,
    pub running_app_name: Option<String>,
    pub is_idle_screen: bool,
    /// Only meaningful while `is_idle_screen` is false
    pub player_state: PlayerState,
    pub media_title: Option<String>,
    pub volume_level: VolumeLevel,
    pub muted: bool,
    pub epoch: Epoch,
    pub last_updated: Instant,
}

impl SessionState {
    pub(crate) fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            connected: false,
            running_app_id: None,
            running_app_name: None,
            is_idle_screen: true,
            player_state: PlayerState::Idle,
            media_title: None,
            volume_level: 0.0,
            muted: false,
            epoch: Epoch::default(),
            last_updated: Instant::now(),
        }
    }

    /// Whether an app other than the idle screen is running
    pub fn has_running_app(&self) -> bool {
        self.running_app_id.is_some() && !self.is_idle_screen
    }

    /// Compare everything except `last_updated`
    pub(crate) fn same_content(&self, other: &SessionState) -> bool {
        self.device_id == other.device_id
            && self.connected == other.connected
            && self.running_app_id == other.running_app_id
            && self.running_app_name == other.running_app_name
            && self.is_idle_screen == other.is_idle_screen
            && self.player_state == other.player_state
            && self.media_title == other.media_title
            && self.volume_level == other.volume_level
            && self.muted == other.muted
            && self.epoch == other.epoch
    }

    /// Player state, or `None` while the idle screen is showing
    pub fn active_player_state(&self) -> Option<PlayerState> {
        if self.is_idle_screen {
            None
        } else {
            Some(self.player_state)
        }
    }
}

/// Clamp a volume level into `0.0..=1.0`
pub(crate) fn clamp_volume(level: VolumeLevel) -> VolumeLevel {
    level.clamp(0.0, 1.0)
}
