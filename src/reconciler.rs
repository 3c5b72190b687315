//! Turns receiver pushes into session state updates.

use crate::error::{CastError, Result};
use crate::protocol::PushEvent;
use crate::state::{SessionStore, StatusUpdate};
use crate::types::Epoch;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A push event tagged with the connection epoch it arrived on
#[derive(Debug, Clone)]
pub struct TaggedPush {
    pub epoch: Epoch,
    pub received_at: Instant,
    pub event: PushEvent,
}

impl TaggedPush {
    pub fn new(epoch: Epoch, event: PushEvent) -> Self {
        Self {
            epoch,
            received_at: Instant::now(),
            event,
        }
    }
}

/// Single writer of a device's session state
#[derive(Clone)]
pub struct Reconciler {
    store: SessionStore,
    epoch: Arc<AtomicU64>,
}

impl Reconciler {
    pub fn new(store: SessionStore) -> Self {
        Self {
            store,
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The epoch pushes must carry to be applied
    pub fn current_epoch(&self) -> Epoch {
        Epoch(self.epoch.load(Ordering::SeqCst))
    }

    /// Start a new epoch, superseding every push from earlier connections
    pub fn begin_epoch(&self) -> Epoch {
        let epoch = Epoch(self.epoch.fetch_add(1, Ordering::SeqCst) + 1);
        tracing::debug!("{}: starting epoch {}", self.store.current().device_id, epoch);
        epoch
    }

    /// Mark the session connected for `epoch`
    pub async fn connected(&self, epoch: Epoch) -> Result<()> {
        let update = StatusUpdate::new(Instant::now()).epoch(epoch).connected(true);
        self.apply_for(epoch, update).await
    }

    /// Mark the session disconnected for `epoch`, clearing transient fields
    pub async fn disconnected(&self, epoch: Epoch, reason: &str) -> Result<()> {
        tracing::info!("{}: connection lost ({})", self.store.current().device_id, reason);
        self.apply_for(epoch, lost_update(Instant::now()).epoch(epoch)).await
    }

    /// Apply one push
    ///
    /// Returns `Err(StaleEpoch)` for pushes from a superseded connection.
    pub async fn reconcile(&self, push: TaggedPush) -> Result<()> {
        let update = match push.event {
            PushEvent::ReceiverStatus(status) => {
                let mut update = StatusUpdate::new(push.received_at).running_app(status.app);
                if let Some(volume) = status.volume {
                    update = update.volume_level(volume.level).muted(volume.muted);
                }
                update
            }
            PushEvent::MediaStatus(status) => StatusUpdate::new(push.received_at)
                .player_state(status.player_state)
                .media_title(status.title),
            PushEvent::VolumeChanged(volume) => StatusUpdate::new(push.received_at)
                .volume_level(volume.level)
                .muted(volume.muted),
            PushEvent::ConnectionLost { reason } => {
                tracing::info!("{}: connection lost ({})", self.store.current().device_id, reason);
                lost_update(push.received_at)
            }
        };

        self.apply_for(push.epoch, update).await
    }

    /// Apply a push, dropping stale ones silently
    pub async fn apply(&self, push: TaggedPush) {
        match self.reconcile(push).await {
            Ok(()) => {}
            Err(CastError::StaleEpoch { current, got }) => {
                tracing::debug!("Dropping push from epoch {} (current {})", got, current);
            }
            Err(e) => tracing::warn!("Failed to reconcile push: {}", e),
        }
    }

    async fn apply_for(&self, epoch: Epoch, update: StatusUpdate) -> Result<()> {
        let counter = self.epoch.clone();
        self.store
            .apply_update_checked(update, move |_| {
                let current = Epoch(counter.load(Ordering::SeqCst));
                if epoch == current {
                    Ok(())
                } else {
                    Err(CastError::StaleEpoch { current, got: epoch })
                }
            })
            .await
            .map(|_| ())
    }
}

/// Connection loss: transient fields cleared, volume kept
fn lost_update(at: Instant) -> StatusUpdate {
    StatusUpdate::new(at)
        .connected(false)
        .running_app(None)
        .player_state(crate::types::PlayerState::Idle)
        .media_title(None)
}
