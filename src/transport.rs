//! Seams to the client library that actually speaks to receivers.
//!
//! The session controller never touches sockets itself; it drives a
//! [`Transport`] to open sessions and a [`TransportSession`] to send actions
//! and listen for pushes.

use crate::error::TransportError;
use crate::protocol::{Action, PushEvent};
use crate::types::Device;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Opens control sessions with receivers
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connect to a device and return the live session
    async fn connect(&self, device: &Device) -> Result<Arc<dyn TransportSession>, TransportError>;
}

/// A live control session with one receiver
#[async_trait]
pub trait TransportSession: Send + Sync + 'static {
    /// Send one action and wait for the receiver to acknowledge it
    async fn send(&self, action: &Action) -> Result<(), TransportError>;

    /// Subscribe to push events from the receiver
    ///
    /// The channel closes when the session ends.
    fn subscribe(&self) -> broadcast::Receiver<PushEvent>;

    /// Close the session
    async fn disconnect(&self);
}
