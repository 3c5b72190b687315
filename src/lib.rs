//! Rust library for driving control sessions with cast-capable media receivers
//!
//! This library keeps a live session with one or more receivers and provides
//! an async API around it. It supports:
//!
//! - Per-device command queues with timeouts, retry and backoff
//! - Playback control (play, pause, toggle), app stop, volume and mute
//! - Media loading (launch receiver app, load, play)
//! - Session state snapshots and change subscriptions
//! - Reconciliation of receiver pushes, with stale connections discarded
//!
//! # Quick Start
//!
//! ```no_run
//! use cast_session::{CastController, Command, ControllerConfig, Device, WsTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let controller = CastController::new(WsTransport::new(), ControllerConfig::default());
//!
//!     let device = Device::new("living-room", "Living Room TV", "192.168.1.50", 8010);
//!     let session = controller.connect(device).await?;
//!
//!     // Subscribe to state updates
//!     let mut updates = session.subscribe();
//!
//!     // Play something
//!     session
//!         .load_media("http://example.com/video.mp4", "Example", Some("video/mp4"))
//!         .await?;
//!
//!     while let Ok(state) = updates.recv().await {
//!         println!("{:?} on {:?}", state.player_state, state.running_app_name);
//!         break; // Just show one update
//!     }
//!
//!     // Commands can also be addressed by device id
//!     controller.dispatch("living-room", Command::SetVolume(0.4)).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The library is organized into several layers:
//!
//! - **Controller**: device registry and entry point for commands and subscriptions
//! - **Session**: connection lifecycle and push listener for one device
//! - **Dispatcher**: bounded per-device command queue and worker
//! - **Reconciler**: turns pushes into state updates, dropping stale epochs
//! - **State**: per-device state store with observer fan-out
//! - **Transport**: traits for the client library that talks to receivers,
//!   plus a JSON-over-WebSocket implementation
//! - **Protocol**: actions, push events and wire frames
//!
//! # Logging
//!
//! The library logs through `tracing` and never installs a subscriber.

mod client;
mod command;
mod config;
mod connection;
mod dispatcher;
mod error;
mod protocol;
mod reconciler;
mod session;
mod state;
mod subscription;
mod transport;
mod types;
mod ws_transport;

// Public exports
pub use client::CastController;
pub use command::{Command, CommandKind, LoadStep};
pub use config::{ControllerConfig, RetryPolicy};
pub use dispatcher::PendingCommand;
pub use error::{CastError, Result, TransportError};
pub use protocol::{Action, ApiError, Frame, FrameMeta, MediaStatus, Method, PushEvent, ReceiverStatus};
pub use reconciler::{Reconciler, TaggedPush};
pub use session::DeviceSession;
pub use state::{SessionStore, StatusUpdate};
pub use subscription::{Subscription, SubscriptionId};
pub use transport::{Transport, TransportSession};
pub use types::{
    Device, DeviceId, Epoch, PlayerState, RunningApp, SessionState, Volume, VolumeLevel,
    DEFAULT_MEDIA_RECEIVER,
};
pub use ws_transport::{WsSession, WsTransport};
