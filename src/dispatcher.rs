//! Per-device command queue and worker.
//!
//! Commands are validated on submission, queued on a bounded channel and
//! executed one at a time by a worker task. The worker reads the latest
//! session snapshot when a command starts, so toggles are decided against
//! what the device last reported rather than what the caller saw. It never
//! writes the session state; the device's pushes do that.

use crate::command::{Command, CommandKind, LoadStep};
use crate::config::RetryPolicy;
use crate::error::{CastError, Result, TransportError};
use crate::protocol::Action;
use crate::state::SessionStore;
use crate::transport::TransportSession;
use crate::types::{DeviceId, PlayerState, SessionState};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

/// Slot holding the transport session of the current connection
#[derive(Clone, Default)]
pub(crate) struct SessionLink {
    inner: Arc<RwLock<Option<Arc<dyn TransportSession>>>>,
}

impl SessionLink {
    pub(crate) fn get(&self) -> Option<Arc<dyn TransportSession>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set(&self, session: Arc<dyn TransportSession>) -> Option<Arc<dyn TransportSession>> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(session)
    }

    pub(crate) fn take(&self) -> Option<Arc<dyn TransportSession>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner).take()
    }
}

struct Job {
    command: Command,
    timeout: Duration,
    reply: oneshot::Sender<Result<()>>,
}

/// A queued command; await [`PendingCommand::wait`] for its result
pub struct PendingCommand {
    device: DeviceId,
    command: CommandKind,
    rx: oneshot::Receiver<Result<()>>,
}

impl PendingCommand {
    pub fn kind(&self) -> CommandKind {
        self.command
    }

    /// Wait for the command to complete
    pub async fn wait(self) -> Result<()> {
        self.rx.await.map_err(|_| {
            CastError::ChannelError(format!(
                "{}: worker stopped before finishing {}",
                self.device, self.command
            ))
        })?
    }
}

/// Serializes commands for one device
pub struct Dispatcher {
    device_id: DeviceId,
    store: SessionStore,
    tx: mpsc::Sender<Job>,
    worker: JoinHandle<()>,
}

impl Dispatcher {
    pub(crate) fn spawn(
        device_id: DeviceId,
        store: SessionStore,
        link: SessionLink,
        retry: RetryPolicy,
        media_receiver_app: String,
        queue_depth: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let worker = Worker {
            device_id: device_id.clone(),
            store: store.clone(),
            link,
            retry,
            media_receiver_app,
            rx,
        };
        let worker = tokio::spawn(worker.run());

        Self {
            device_id,
            store,
            tx,
            worker,
        }
    }

    /// Validate and enqueue a command
    ///
    /// Fails immediately with `InvalidArgument`, `NotConnected` or `Busy`;
    /// otherwise the returned handle resolves once the command ran.
    pub fn submit(&self, command: Command, timeout: Duration) -> Result<PendingCommand> {
        let kind = command.kind();
        let command = command.normalize().map_err(|reason| CastError::InvalidArgument {
            device: self.device_id.clone(),
            command: kind,
            reason,
        })?;

        if !self.store.current().connected {
            return Err(CastError::NotConnected {
                device: self.device_id.clone(),
                command: kind,
            });
        }

        let (reply, rx) = oneshot::channel();
        let job = Job {
            command,
            timeout,
            reply,
        };

        match self.tx.try_send(job) {
            Ok(()) => {
                tracing::debug!("{}: queued {}", self.device_id, kind);
                Ok(PendingCommand {
                    device: self.device_id.clone(),
                    command: kind,
                    rx,
                })
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("{}: rejecting {}, queue full", self.device_id, kind);
                Err(CastError::Busy {
                    device: self.device_id.clone(),
                    command: kind,
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(CastError::ChannelError(format!(
                "{}: command worker stopped",
                self.device_id
            ))),
        }
    }

    /// Submit a command and wait for it
    pub async fn dispatch(&self, command: Command, timeout: Duration) -> Result<()> {
        self.submit(command, timeout)?.wait().await
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

struct Worker {
    device_id: DeviceId,
    store: SessionStore,
    link: SessionLink,
    retry: RetryPolicy,
    media_receiver_app: String,
    rx: mpsc::Receiver<Job>,
}

impl Worker {
    async fn run(mut self) {
        while let Some(job) = self.rx.recv().await {
            let kind = job.command.kind();
            let result = self.execute(job.command, job.timeout).await;
            match &result {
                Ok(()) => tracing::debug!("{}: {} done", self.device_id, kind),
                Err(e) => tracing::warn!("{}", e),
            }
            let _ = job.reply.send(result);
        }
        tracing::debug!("{}: command worker stopped", self.device_id);
    }

    async fn execute(&self, command: Command, limit: Duration) -> Result<()> {
        let kind = command.kind();

        // Queued commands fail fast once the session is gone
        let session = match self.link.get() {
            Some(session) if self.store.current().connected => session,
            _ => {
                return Err(CastError::NotConnected {
                    device: self.device_id.clone(),
                    command: kind,
                })
            }
        };

        match timeout(limit, self.run_command(session.as_ref(), command)).await {
            Ok(result) => result,
            Err(_) => Err(CastError::TimedOut {
                device: self.device_id.clone(),
                command: kind,
                after: limit,
            }),
        }
    }

    async fn run_command(&self, session: &dyn TransportSession, command: Command) -> Result<()> {
        let kind = command.kind();
        let state = self.store.current();

        match command {
            Command::Play => {
                self.require_app(&state, kind)?;
                if state.player_state == PlayerState::Playing {
                    tracing::debug!("{}: already playing", self.device_id);
                    return Ok(());
                }
                self.send(session, kind, Action::Play).await
            }
            Command::Pause => {
                self.require_app(&state, kind)?;
                match state.player_state {
                    PlayerState::Paused | PlayerState::Idle => {
                        tracing::debug!("{}: nothing to pause ({})", self.device_id, state.player_state);
                        Ok(())
                    }
                    PlayerState::Playing | PlayerState::Buffering => {
                        self.send(session, kind, Action::Pause).await
                    }
                }
            }
            Command::TogglePlayback => {
                self.require_app(&state, kind)?;
                match state.player_state {
                    PlayerState::Playing | PlayerState::Buffering => {
                        self.send(session, kind, Action::Pause).await
                    }
                    PlayerState::Paused => self.send(session, kind, Action::Play).await,
                    PlayerState::Idle => Err(self.invalid(kind, "no media is loaded")),
                }
            }
            Command::StopApp => match state.running_app_id {
                Some(app_id) if !state.is_idle_screen => {
                    self.send(session, kind, Action::Stop { app_id }).await
                }
                _ => {
                    tracing::debug!("{}: no app to stop", self.device_id);
                    Ok(())
                }
            },
            Command::SetVolume(level) => self.send(session, kind, Action::SetVolume { level }).await,
            Command::SetMuted(muted) => self.send(session, kind, Action::SetMuted { muted }).await,
            Command::LoadMedia {
                url,
                title,
                content_type,
            } => {
                let receiver_running = state.has_running_app()
                    && state.running_app_id.as_deref() == Some(self.media_receiver_app.as_str());
                if !receiver_running {
                    let launch = Action::Launch {
                        app_id: self.media_receiver_app.clone(),
                    };
                    self.load_step(session, LoadStep::Launch, launch).await?;
                }
                let load = Action::Load {
                    url,
                    title,
                    content_type,
                };
                self.load_step(session, LoadStep::Load, load).await?;
                self.load_step(session, LoadStep::Play, Action::Play).await
            }
        }
    }

    fn require_app(&self, state: &SessionState, kind: CommandKind) -> Result<()> {
        if state.has_running_app() {
            Ok(())
        } else {
            Err(self.invalid(kind, "no receiver app is running"))
        }
    }

    fn invalid(&self, kind: CommandKind, reason: &str) -> CastError {
        CastError::InvalidArgument {
            device: self.device_id.clone(),
            command: kind,
            reason: reason.to_string(),
        }
    }

    async fn send(&self, session: &dyn TransportSession, kind: CommandKind, action: Action) -> Result<()> {
        self.send_with_retry(session, &action)
            .await
            .map_err(|source| CastError::Transport {
                device: self.device_id.clone(),
                command: kind,
                source,
            })
    }

    async fn load_step(&self, session: &dyn TransportSession, step: LoadStep, action: Action) -> Result<()> {
        // The receiver may have dropped us while an earlier step ran
        if !self.store.current().connected || self.link.get().is_none() {
            tracing::warn!("{}: session lost before {} step", self.device_id, step);
            return Err(CastError::LoadFailed {
                device: self.device_id.clone(),
                step,
                source: TransportError::ConnectionClosed,
            });
        }

        tracing::debug!("{}: load media, {} step", self.device_id, step);
        self.send_with_retry(session, &action)
            .await
            .map_err(|source| CastError::LoadFailed {
                device: self.device_id.clone(),
                step,
                source,
            })
    }

    async fn send_with_retry(
        &self,
        session: &dyn TransportSession,
        action: &Action,
    ) -> std::result::Result<(), TransportError> {
        let mut retry = 0;
        loop {
            match session.send(action).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && retry < self.retry.max_retries => {
                    retry += 1;
                    let delay = self.retry.backoff(retry);
                    tracing::warn!(
                        "{}: {} failed ({}), retry {}/{} in {:?}",
                        self.device_id,
                        action.name(),
                        e,
                        retry,
                        self.retry.max_retries,
                        delay
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
