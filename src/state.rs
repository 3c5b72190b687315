//! Per-device session state with change notification.
//!
//! [`SessionStore`] is the single owner of a device's [`SessionState`].
//! Readers take snapshots; the reconciler is the only writer and goes through
//! [`SessionStore::apply_update_checked`], which merges a partial [`StatusUpdate`],
//! stamps the touched field groups and fans the new snapshot out to every
//! subscriber.

use crate::error::Result;
use crate::subscription::{Subscription, SubscriptionId};
use crate::types::{clamp_volume, DeviceId, Epoch, PlayerState, RunningApp, SessionState, VolumeLevel};
use futures_util::future::join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

/// Partial update of a session state
///
/// Only fields that are `Some` are merged. Fields are grouped (connection,
/// receiver, media, volume); a group is skipped when `observed_at` is older
/// than the last update applied to that group.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub observed_at: Instant,
    pub epoch: Option<Epoch>,
    pub connected: Option<bool>,
    /// `Some(None)` clears the running app
    pub running_app: Option<Option<RunningApp>>,
    pub player_state: Option<PlayerState>,
    /// `Some(None)` clears the title
    pub media_title: Option<Option<String>>,
    pub volume_level: Option<VolumeLevel>,
    pub muted: Option<bool>,
}

impl StatusUpdate {
    pub fn new(observed_at: Instant) -> Self {
        Self {
            observed_at,
            epoch: None,
            connected: None,
            running_app: None,
            player_state: None,
            media_title: None,
            volume_level: None,
            muted: None,
        }
    }

    pub fn epoch(mut self, epoch: Epoch) -> Self {
        self.epoch = Some(epoch);
        self
    }

    pub fn connected(mut self, connected: bool) -> Self {
        self.connected = Some(connected);
        self
    }

    pub fn running_app(mut self, app: Option<RunningApp>) -> Self {
        self.running_app = Some(app);
        self
    }

    pub fn player_state(mut self, player_state: PlayerState) -> Self {
        self.player_state = Some(player_state);
        self
    }

    pub fn media_title(mut self, title: Option<String>) -> Self {
        self.media_title = Some(title);
        self
    }

    pub fn volume_level(mut self, level: VolumeLevel) -> Self {
        self.volume_level = Some(level);
        self
    }

    pub fn muted(mut self, muted: bool) -> Self {
        self.muted = Some(muted);
        self
    }

    fn touches_connection(&self) -> bool {
        self.connected.is_some() || self.epoch.is_some()
    }

    fn touches_receiver(&self) -> bool {
        self.running_app.is_some()
    }

    fn touches_media(&self) -> bool {
        self.player_state.is_some() || self.media_title.is_some()
    }

    fn touches_volume(&self) -> bool {
        self.volume_level.is_some_and(|level| !level.is_nan()) || self.muted.is_some()
    }
}

/// Last applied observation time per field group
#[derive(Debug, Clone, Copy)]
struct GroupStamps {
    connection: Instant,
    receiver: Instant,
    media: Instant,
    volume: Instant,
}

impl GroupStamps {
    fn new(at: Instant) -> Self {
        Self {
            connection: at,
            receiver: at,
            media: at,
            volume: at,
        }
    }
}

struct Observer {
    id: SubscriptionId,
    tx: mpsc::Sender<SessionState>,
}

struct StoreState {
    snapshot: SessionState,
    stamps: GroupStamps,
    observers: Vec<Observer>,
}

struct StoreInner {
    state: Mutex<StoreState>,
    /// Serializes the whole apply path, notification included
    gate: tokio::sync::Mutex<()>,
    next_id: AtomicU64,
    observer_buffer: usize,
    observer_timeout: Duration,
}

/// Owner of one device's session state
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

impl SessionStore {
    pub fn new(device_id: DeviceId, observer_buffer: usize, observer_timeout: Duration) -> Self {
        let snapshot = SessionState::new(device_id);
        let stamps = GroupStamps::new(snapshot.last_updated);
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(StoreState {
                    snapshot,
                    stamps,
                    observers: Vec::new(),
                }),
                gate: tokio::sync::Mutex::new(()),
                next_id: AtomicU64::new(1),
                observer_buffer: observer_buffer.max(1),
                observer_timeout,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a snapshot of the current state
    pub fn current(&self) -> SessionState {
        self.lock().snapshot.clone()
    }

    /// Register an observer
    pub fn subscribe(&self) -> Subscription {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.inner.observer_buffer);
        self.lock().observers.push(Observer { id, tx });
        tracing::debug!("Observer {} subscribed", id.0);
        Subscription::new(id, rx)
    }

    /// Remove an observer, returning whether it was registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.lock();
        let before = state.observers.len();
        state.observers.retain(|observer| observer.id != id);
        before != state.observers.len()
    }

    /// Number of attached observers
    pub fn observer_count(&self) -> usize {
        self.lock().observers.len()
    }

    /// Merge an update and notify observers
    ///
    /// Returns whether the snapshot content changed.
    #[cfg(test)]
    pub(crate) async fn apply_update(&self, update: StatusUpdate) -> bool {
        match self.apply_update_checked(update, |_| Ok(())).await {
            Ok(changed) => changed,
            Err(_) => false,
        }
    }

    /// Merge an update if `check` accepts the current snapshot
    ///
    /// `check` runs inside the update gate, so nothing else can be applied
    /// between the check and the merge.
    pub(crate) async fn apply_update_checked<F>(&self, update: StatusUpdate, check: F) -> Result<bool>
    where
        F: FnOnce(&SessionState) -> Result<()>,
    {
        let _gate = self.inner.gate.lock().await;

        let (snapshot, targets) = {
            let mut state = self.lock();
            check(&state.snapshot)?;

            let before = state.snapshot.clone();
            merge(&mut state, &update);
            if state.snapshot.same_content(&before) {
                return Ok(false);
            }

            let targets: Vec<(SubscriptionId, mpsc::Sender<SessionState>)> = state
                .observers
                .iter()
                .map(|observer| (observer.id, observer.tx.clone()))
                .collect();
            (state.snapshot.clone(), targets)
        };

        self.notify(snapshot, targets).await;
        Ok(true)
    }

    async fn notify(&self, snapshot: SessionState, targets: Vec<(SubscriptionId, mpsc::Sender<SessionState>)>) {
        let timeout = self.inner.observer_timeout;
        let deliveries = targets.into_iter().map(|(id, tx)| {
            let snapshot = snapshot.clone();
            async move {
                match tx.send_timeout(snapshot, timeout).await {
                    Ok(()) => None,
                    Err(SendTimeoutError::Timeout(_)) => {
                        tracing::warn!("Detaching observer {}: not drained within {:?}", id.0, timeout);
                        Some(id)
                    }
                    Err(SendTimeoutError::Closed(_)) => {
                        tracing::debug!("Detaching observer {}: receiver dropped", id.0);
                        Some(id)
                    }
                }
            }
        });

        let detached: Vec<SubscriptionId> = join_all(deliveries).await.into_iter().flatten().collect();
        if !detached.is_empty() {
            self.lock()
                .observers
                .retain(|observer| !detached.contains(&observer.id));
        }
    }
}

fn merge(state: &mut StoreState, update: &StatusUpdate) {
    let at = update.observed_at;
    let StoreState { snapshot, stamps, .. } = state;
    let mut accepted = false;

    if update.touches_connection() && at >= stamps.connection {
        if let Some(epoch) = update.epoch {
            snapshot.epoch = epoch;
        }
        if let Some(connected) = update.connected {
            snapshot.connected = connected;
        }
        stamps.connection = at;
        accepted = true;
    }

    if update.touches_receiver() && at >= stamps.receiver {
        let app = update.running_app.clone().flatten();
        let app_id = app.as_ref().map(|app| app.app_id.clone());
        if app_id != snapshot.running_app_id {
            // A different app owns a different media session
            snapshot.player_state = PlayerState::Idle;
            snapshot.media_title = None;
            stamps.media = stamps.media.max(at);
        }
        match app {
            Some(app) => {
                snapshot.running_app_id = Some(app.app_id);
                snapshot.running_app_name = app.display_name;
                snapshot.is_idle_screen = app.is_idle_screen;
            }
            None => {
                snapshot.running_app_id = None;
                snapshot.running_app_name = None;
                snapshot.is_idle_screen = true;
            }
        }
        stamps.receiver = at;
        accepted = true;
    }

    if update.touches_media() && at >= stamps.media {
        if let Some(player_state) = update.player_state {
            snapshot.player_state = player_state;
        }
        if let Some(title) = &update.media_title {
            snapshot.media_title = title.clone();
        }
        stamps.media = at;
        accepted = true;
    }

    if update.touches_volume() && at >= stamps.volume {
        if let Some(level) = update.volume_level.filter(|level| !level.is_nan()) {
            snapshot.volume_level = clamp_volume(level);
        }
        if let Some(muted) = update.muted {
            snapshot.muted = muted;
        }
        stamps.volume = at;
        accepted = true;
    }

    if accepted && at > snapshot.last_updated {
        snapshot.last_updated = at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new("dev".to_string(), 4, Duration::from_millis(50))
    }

    fn app(id: &str, idle: bool) -> RunningApp {
        RunningApp {
            app_id: id.to_string(),
            display_name: None,
            is_idle_screen: idle,
        }
    }

    #[tokio::test]
    async fn merges_only_present_fields() {
        let store = store();
        let now = Instant::now();
        store
            .apply_update(StatusUpdate::new(now).volume_level(0.4).muted(true))
            .await;
        store
            .apply_update(StatusUpdate::new(now).running_app(Some(app("CC1AD845", false))))
            .await;

        let state = store.current();
        assert_eq!(state.volume_level, 0.4);
        assert!(state.muted);
        assert_eq!(state.running_app_id.as_deref(), Some("CC1AD845"));
        assert!(!state.is_idle_screen);
        assert!(!state.connected);
    }

    #[tokio::test]
    async fn discards_older_observations_per_group() {
        let store = store();
        let early = Instant::now();
        let late = early + Duration::from_millis(10);

        store.apply_update(StatusUpdate::new(late).volume_level(0.8)).await;
        let changed = store
            .apply_update(StatusUpdate::new(early).volume_level(0.1).player_state(PlayerState::Paused))
            .await;

        let state = store.current();
        assert!(changed);
        assert_eq!(state.volume_level, 0.8);
        assert_eq!(state.player_state, PlayerState::Paused);
        assert_eq!(state.last_updated, late);
    }

    #[tokio::test]
    async fn volume_is_clamped_and_nan_ignored() {
        let store = store();
        store.apply_update(StatusUpdate::new(Instant::now()).volume_level(3.0)).await;
        assert_eq!(store.current().volume_level, 1.0);

        let changed = store
            .apply_update(StatusUpdate::new(Instant::now()).volume_level(f32::NAN))
            .await;
        assert!(!changed);
        assert_eq!(store.current().volume_level, 1.0);
    }

    #[tokio::test]
    async fn app_change_resets_media_group() {
        let store = store();
        store
            .apply_update(
                StatusUpdate::new(Instant::now())
                    .running_app(Some(app("CC1AD845", false)))
                    .player_state(PlayerState::Playing),
            )
            .await;
        assert_eq!(store.current().player_state, PlayerState::Playing);

        store
            .apply_update(StatusUpdate::new(Instant::now()).running_app(Some(app("E8C28D3C", true))))
            .await;
        let state = store.current();
        assert_eq!(state.player_state, PlayerState::Idle);
        assert!(state.is_idle_screen);
        assert_eq!(state.active_player_state(), None);
    }

    #[tokio::test]
    async fn observers_receive_snapshots() {
        let store = store();
        let mut first = store.subscribe();
        let mut second = store.subscribe();

        store.apply_update(StatusUpdate::new(Instant::now()).connected(true)).await;

        assert!(first.recv().await.unwrap().connected);
        assert!(second.recv().await.unwrap().connected);
    }

    #[tokio::test]
    async fn unchanged_update_does_not_notify() {
        let store = store();
        let mut sub = store.subscribe();
        store.apply_update(StatusUpdate::new(Instant::now()).muted(true)).await;
        store.apply_update(StatusUpdate::new(Instant::now()).muted(true)).await;

        assert!(sub.try_recv().unwrap().is_some());
        assert!(sub.try_recv().unwrap().is_none());
    }

    #[tokio::test]
    async fn slow_observer_is_detached() {
        let store = SessionStore::new("dev".to_string(), 1, Duration::from_millis(20));
        let _stalled = store.subscribe();
        let mut healthy = store.subscribe();

        store.apply_update(StatusUpdate::new(Instant::now()).volume_level(0.1)).await;
        assert_eq!(healthy.recv().await.unwrap().volume_level, 0.1);

        // The stalled observer's buffer is full now
        store.apply_update(StatusUpdate::new(Instant::now()).volume_level(0.2)).await;
        assert_eq!(healthy.recv().await.unwrap().volume_level, 0.2);
        assert_eq!(store.observer_count(), 1);
    }

    #[tokio::test]
    async fn dropped_and_unsubscribed_observers_are_removed() {
        let store = store();
        let dropped = store.subscribe();
        let kept = store.subscribe();
        drop(dropped);

        store.apply_update(StatusUpdate::new(Instant::now()).muted(true)).await;
        assert_eq!(store.observer_count(), 1);

        assert!(store.unsubscribe(kept.id()));
        assert!(!store.unsubscribe(kept.id()));
        assert_eq!(store.observer_count(), 0);
    }

    #[tokio::test]
    async fn rejected_check_leaves_state_untouched() {
        let store = store();
        let result = store
            .apply_update_checked(StatusUpdate::new(Instant::now()).connected(true), |_| {
                Err(crate::error::CastError::StaleEpoch {
                    current: Epoch(2),
                    got: Epoch(1),
                })
            })
            .await;

        assert!(result.is_err());
        assert!(!store.current().connected);
    }
}
