#![allow(dead_code)]

use async_trait::async_trait;
use cast_session::{
    Action, CastController, ControllerConfig, Device, MediaStatus, PlayerState, PushEvent,
    ReceiverStatus, RetryPolicy, RunningApp, SessionState, Transport, TransportError,
    TransportSession, Volume,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};

pub const BACKDROP_APP: &str = "E8C28D3C";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn device(id: &str) -> Device {
    Device::new(id, format!("{} display", id), "127.0.0.1", 8009)
}

/// Config with short backoff so retry tests stay fast
pub fn test_config() -> ControllerConfig {
    ControllerConfig::default()
        .with_connect_timeout(Duration::from_secs(1))
        .with_retry(RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
        })
}

pub fn idle_screen() -> RunningApp {
    RunningApp {
        app_id: BACKDROP_APP.to_string(),
        display_name: Some("Backdrop".to_string()),
        is_idle_screen: true,
    }
}

pub fn media_receiver() -> RunningApp {
    RunningApp {
        app_id: cast_session::DEFAULT_MEDIA_RECEIVER.to_string(),
        display_name: Some("Default Media Receiver".to_string()),
        is_idle_screen: false,
    }
}

#[derive(Default)]
struct FakeState {
    sent: Mutex<Vec<(String, Action)>>,
    connects: AtomicUsize,
    fail_connect: AtomicBool,
    /// (device, action name) pairs that never complete
    hang: Mutex<Vec<(String, &'static str)>>,
    /// Remaining transient failures per action name
    transient: Mutex<HashMap<&'static str, u32>>,
    /// Action names the receiver rejects
    reject: Mutex<Vec<&'static str>>,
    /// (device, action name) pairs on which the receiver hangs up
    drop_on: Mutex<Vec<(String, &'static str)>>,
    sessions: Mutex<HashMap<String, Arc<FakeSession>>>,
}

/// Scripted stand-in for a receiver client library
///
/// Every accepted action is echoed back as the push a real receiver would
/// send, so the session state follows the commands.
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<FakeState>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn hang(&self, device_id: &str, action: &'static str) {
        self.state.hang.lock().unwrap().push((device_id.to_string(), action));
    }

    pub fn fail_transiently(&self, action: &'static str, times: u32) {
        self.state.transient.lock().unwrap().insert(action, times);
    }

    pub fn reject(&self, action: &'static str) {
        self.state.reject.lock().unwrap().push(action);
    }

    /// Accept `action` on a device, then report the connection lost
    pub fn drop_on(&self, device_id: &str, action: &'static str) {
        self.state.drop_on.lock().unwrap().push((device_id.to_string(), action));
    }

    /// Actions sent to a device, in order
    pub fn actions(&self, device_id: &str) -> Vec<Action> {
        self.state
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == device_id)
            .map(|(_, action)| action.clone())
            .collect()
    }

    pub fn session(&self, device_id: &str) -> Arc<FakeSession> {
        self.state.sessions.lock().unwrap()[device_id].clone()
    }

    /// Push an event from the device's current session
    pub fn push(&self, device_id: &str, event: PushEvent) {
        self.session(device_id).push(event);
    }

    pub async fn wait_for_action(&self, device_id: &str, name: &str) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !self.actions(device_id).iter().any(|a| a.name() == name) {
            assert!(Instant::now() < deadline, "{} never reached {}", name, device_id);
            sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, device: &Device) -> Result<Arc<dyn TransportSession>, TransportError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }

        let (pushes, _) = broadcast::channel(64);
        let session = Arc::new(FakeSession {
            device_id: device.id.clone(),
            state: self.state.clone(),
            pushes,
            model: Mutex::new(DeviceModel {
                app: Some(idle_screen()),
                title: None,
                volume: Volume {
                    level: 0.5,
                    muted: false,
                },
            }),
        });
        self.state
            .sessions
            .lock()
            .unwrap()
            .insert(device.id.clone(), session.clone());
        Ok(session)
    }
}

struct DeviceModel {
    app: Option<RunningApp>,
    title: Option<String>,
    volume: Volume,
}

pub struct FakeSession {
    device_id: String,
    state: Arc<FakeState>,
    pushes: broadcast::Sender<PushEvent>,
    model: Mutex<DeviceModel>,
}

impl FakeSession {
    pub fn push(&self, event: PushEvent) {
        let _ = self.pushes.send(event);
    }

    fn echo(&self, action: &Action) {
        let mut model = self.model.lock().unwrap();
        let event = match action {
            Action::Launch { app_id } => {
                model.app = Some(RunningApp {
                    app_id: app_id.clone(),
                    display_name: Some("Default Media Receiver".to_string()),
                    is_idle_screen: false,
                });
                model.title = None;
                PushEvent::ReceiverStatus(ReceiverStatus {
                    app: model.app.clone(),
                    volume: Some(model.volume),
                })
            }
            Action::Load { title, .. } => {
                model.title = Some(title.clone());
                PushEvent::MediaStatus(MediaStatus {
                    player_state: PlayerState::Buffering,
                    title: model.title.clone(),
                })
            }
            Action::Play => PushEvent::MediaStatus(MediaStatus {
                player_state: PlayerState::Playing,
                title: model.title.clone(),
            }),
            Action::Pause => PushEvent::MediaStatus(MediaStatus {
                player_state: PlayerState::Paused,
                title: model.title.clone(),
            }),
            Action::Stop { .. } => {
                model.app = Some(idle_screen());
                model.title = None;
                PushEvent::ReceiverStatus(ReceiverStatus {
                    app: model.app.clone(),
                    volume: Some(model.volume),
                })
            }
            Action::SetVolume { level } => {
                model.volume.level = *level;
                PushEvent::VolumeChanged(model.volume)
            }
            Action::SetMuted { muted } => {
                model.volume.muted = *muted;
                PushEvent::VolumeChanged(model.volume)
            }
        };
        drop(model);
        self.push(event);
    }
}

#[async_trait]
impl TransportSession for FakeSession {
    async fn send(&self, action: &Action) -> Result<(), TransportError> {
        self.state
            .sent
            .lock()
            .unwrap()
            .push((self.device_id.clone(), action.clone()));

        let hangs = self
            .state
            .hang
            .lock()
            .unwrap()
            .iter()
            .any(|(id, name)| id == &self.device_id && *name == action.name());
        if hangs {
            std::future::pending::<()>().await;
        }

        let drops = self
            .state
            .drop_on
            .lock()
            .unwrap()
            .iter()
            .any(|(id, name)| id == &self.device_id && *name == action.name());
        if drops {
            self.push(PushEvent::ConnectionLost {
                reason: "receiver hung up".to_string(),
            });
            // Give the listener time to apply the loss
            sleep(Duration::from_millis(50)).await;
            return Ok(());
        }

        if let Some(remaining) = self.state.transient.lock().unwrap().get_mut(action.name()) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TransportError::Timeout);
            }
        }

        if self.state.reject.lock().unwrap().contains(&action.name()) {
            return Err(TransportError::Rejected {
                detail: format!("{} refused", action.name()),
            });
        }

        self.echo(action);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.pushes.subscribe()
    }

    async fn disconnect(&self) {}
}

/// Poll a device's state until `pred` holds
pub async fn wait_for_state<F>(controller: &CastController, device_id: &str, pred: F) -> SessionState
where
    F: Fn(&SessionState) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let state = controller.current_state(device_id).unwrap();
        if pred(&state) {
            return state;
        }
        assert!(Instant::now() < deadline, "state never matched: {:?}", state);
        sleep(Duration::from_millis(5)).await;
    }
}

/// Connect a device and report the idle screen at half volume
pub async fn connect_idle(controller: &CastController, fake: &FakeTransport, device_id: &str) {
    controller.connect(device(device_id)).await.unwrap();
    fake.push(
        device_id,
        PushEvent::ReceiverStatus(ReceiverStatus {
            app: Some(idle_screen()),
            volume: Some(Volume {
                level: 0.5,
                muted: false,
            }),
        }),
    );
    wait_for_state(controller, device_id, |s| {
        s.connected && s.running_app_id.as_deref() == Some(BACKDROP_APP)
    })
    .await;
}

/// Connect a device with the media receiver running in `player_state`
pub async fn connect_playing(
    controller: &CastController,
    fake: &FakeTransport,
    device_id: &str,
    player_state: PlayerState,
) {
    controller.connect(device(device_id)).await.unwrap();
    fake.push(
        device_id,
        PushEvent::ReceiverStatus(ReceiverStatus {
            app: Some(media_receiver()),
            volume: Some(Volume {
                level: 0.5,
                muted: false,
            }),
        }),
    );
    fake.push(
        device_id,
        PushEvent::MediaStatus(MediaStatus {
            player_state,
            title: Some("Big Buck Bunny".to_string()),
        }),
    );
    wait_for_state(controller, device_id, |s| {
        s.connected && !s.is_idle_screen && s.player_state == player_state
    })
    .await;
}
