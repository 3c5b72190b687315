use crate::types::{clamp_volume, VolumeLevel};
use std::fmt;

/// User intent addressed to one device
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play,
    Pause,
    /// Pause when playing, resume when paused
    TogglePlayback,
    /// Stop the running receiver app
    StopApp,
    SetVolume(VolumeLevel),
    SetMuted(bool),
    LoadMedia {
        url: String,
        title: String,
        content_type: Option<String>,
    },
}

impl Command {
    /// Build a media load command
    pub fn load_media(
        url: impl Into<String>,
        title: impl Into<String>,
        content_type: Option<impl Into<String>>,
    ) -> Self {
        Command::LoadMedia {
            url: url.into(),
            title: title.into(),
            content_type: content_type.map(Into::into),
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Play => CommandKind::Play,
            Command::Pause => CommandKind::Pause,
            Command::TogglePlayback => CommandKind::TogglePlayback,
            Command::StopApp => CommandKind::StopApp,
            Command::SetVolume(_) => CommandKind::SetVolume,
            Command::SetMuted(_) => CommandKind::SetMuted,
            Command::LoadMedia { .. } => CommandKind::LoadMedia,
        }
    }

    /// Check arguments and normalize them
    ///
    /// Volume levels are clamped into range; NaN and empty URLs are rejected
    /// with the reason as the error.
    pub(crate) fn normalize(self) -> std::result::Result<Command, String> {
        match self {
            Command::SetVolume(level) if level.is_nan() => {
                Err("volume level is NaN".to_string())
            }
            Command::SetVolume(level) => Ok(Command::SetVolume(clamp_volume(level))),
            Command::LoadMedia { url, .. } if url.trim().is_empty() => {
                Err("media url is empty".to_string())
            }
            other => Ok(other),
        }
    }
}

/// Command discriminant, used for error context and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Play,
    Pause,
    TogglePlayback,
    StopApp,
    SetVolume,
    SetMuted,
    LoadMedia,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Play => "play",
            CommandKind::Pause => "pause",
            CommandKind::TogglePlayback => "toggle playback",
            CommandKind::StopApp => "stop app",
            CommandKind::SetVolume => "set volume",
            CommandKind::SetMuted => "set muted",
            CommandKind::LoadMedia => "load media",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Steps of a media load, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStep {
    Launch,
    Load,
    Play,
}

impl fmt::Display for LoadStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoadStep::Launch => "launch",
            LoadStep::Load => "load",
            LoadStep::Play => "play",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_clamps_volume() {
        assert_eq!(Command::SetVolume(1.7).normalize(), Ok(Command::SetVolume(1.0)));
        assert_eq!(Command::SetVolume(-0.2).normalize(), Ok(Command::SetVolume(0.0)));
        assert_eq!(Command::SetVolume(0.4).normalize(), Ok(Command::SetVolume(0.4)));
    }

    #[test]
    fn normalize_rejects_nan_and_empty_url() {
        assert!(Command::SetVolume(f32::NAN).normalize().is_err());
        assert!(Command::load_media("  ", "T", None::<String>).normalize().is_err());
        assert!(Command::load_media("http://x/v.mp4", "", None::<String>)
            .normalize()
            .is_ok());
    }
}
