use crate::error::{CastError, Result};
use crate::types::SessionState;
use tokio::sync::mpsc;

/// Handle identifying one observer of a device's state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

/// Receiver for session state snapshots
///
/// Every applied update delivers a fresh snapshot. A subscription that stops
/// draining its snapshots is detached by the session after the configured
/// observer timeout; `recv` then reports the channel as closed.
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::Receiver<SessionState>,
}

impl Subscription {
    pub(crate) fn new(id: SubscriptionId, rx: mpsc::Receiver<SessionState>) -> Self {
        Self { id, rx }
    }

    /// Handle to pass to `unsubscribe`
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Receive the next snapshot
    pub async fn recv(&mut self) -> Result<SessionState> {
        self.rx.recv().await.ok_or_else(|| {
            CastError::ChannelError(format!("Subscription {} detached", self.id.0))
        })
    }

    /// Try to receive a snapshot without blocking
    ///
    /// Returns `None` if no snapshot is available.
    pub fn try_recv(&mut self) -> Result<Option<SessionState>> {
        match self.rx.try_recv() {
            Ok(state) => Ok(Some(state)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(CastError::ChannelError(
                format!("Subscription {} detached", self.id.0),
            )),
        }
    }
}
