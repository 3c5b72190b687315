use crate::error::TransportError;
use crate::protocol::{Frame, PushEvent};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use uuid::Uuid;

type Result<T> = std::result::Result<T, TransportError>;

/// WebSocket connection state
struct ConnectionState {
    /// Pending requests waiting for replies
    pending_requests: HashMap<Uuid, oneshot::Sender<Frame>>,
    /// Channel for sending outgoing messages
    ws_tx: mpsc::UnboundedSender<Message>,
    /// Set once the read task has stopped; nothing can answer requests after that
    closed: bool,
}

/// Low-level WebSocket connection to a cast bridge
pub struct Connection {
    state: Arc<Mutex<ConnectionState>>,
    /// Broadcast channel for push events (outside mutex to allow non-blocking subscribe)
    push_tx: broadcast::Sender<PushEvent>,
    request_timeout: Duration,
    read_handle: JoinHandle<()>,
    write_handle: JoinHandle<()>,
}

impl Connection {
    /// Connect to a WebSocket URL
    pub async fn connect(url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let url = url.into();
        tracing::info!("Connecting to {}", url);

        let (ws_stream, _) = connect_async(&url).await?;
        let (mut write, mut read) = ws_stream.split();

        let (ws_tx, mut ws_rx) = mpsc::unbounded_channel::<Message>();
        let (push_tx, _) = broadcast::channel(100);

        let state = Arc::new(Mutex::new(ConnectionState {
            pending_requests: HashMap::new(),
            ws_tx,
            closed: false,
        }));

        // Forward outgoing messages to the socket
        let write_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = write.send(msg).await {
                    tracing::error!("Failed to send message: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        let state_clone = state.clone();
        let push_tx_clone = push_tx.clone();
        let read_handle = tokio::spawn(async move {
            let reason = loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = Self::handle_message(&state_clone, &push_tx_clone, text).await {
                            tracing::error!("Error handling message: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("WebSocket connection closed");
                        break "closed by receiver".to_string();
                    }
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break e.to_string();
                    }
                    Some(Ok(_)) => {}
                    None => break "stream ended".to_string(),
                }
            };

            // Fail all pending requests, then tell listeners
            {
                let mut state = state_clone.lock().await;
                state.closed = true;
                state.pending_requests.clear();
            }
            let _ = push_tx_clone.send(PushEvent::ConnectionLost { reason });
        });

        Ok(Self {
            state,
            push_tx,
            request_timeout,
            read_handle,
            write_handle,
        })
    }

    /// Handle an incoming text frame
    async fn handle_message(
        state: &Arc<Mutex<ConnectionState>>,
        push_tx: &broadcast::Sender<PushEvent>,
        text: String,
    ) -> Result<()> {
        tracing::debug!("Received: {}", text);

        let frame: Frame = serde_json::from_str(&text)?;

        if let Some(event) = frame.push_event() {
            let _ = push_tx.send(event);
            return Ok(());
        }

        let mut state = state.lock().await;
        match state.pending_requests.remove(&frame.id()) {
            Some(tx) => {
                let _ = tx.send(frame);
            }
            None => tracing::warn!("Dropping unmatched frame {}", frame.id()),
        }

        Ok(())
    }

    /// Send a frame and wait for its reply
    pub async fn send_request(&self, frame: Frame) -> Result<Frame> {
        let request_id = frame.id();
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(TransportError::ConnectionClosed);
            }
            state.pending_requests.insert(request_id, tx);

            let json = serde_json::to_string(&frame)?;
            tracing::debug!("Sending: {}", json);

            if state.ws_tx.send(Message::Text(json)).is_err() {
                state.pending_requests.remove(&request_id);
                return Err(TransportError::ConnectionClosed);
            }
        }

        let reply = match timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(TransportError::ConnectionClosed),
            Err(_) => {
                self.state.lock().await.pending_requests.remove(&request_id);
                return Err(TransportError::Timeout);
            }
        };

        if reply.has_errors() {
            let detail = reply
                .error_message()
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(TransportError::Rejected { detail });
        }

        Ok(reply)
    }

    /// Subscribe to push events
    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.push_tx.subscribe()
    }

    /// Close the socket and stop the I/O tasks
    pub async fn close(&self) {
        {
            let mut state = self.state.lock().await;
            state.closed = true;
            state.pending_requests.clear();
            let _ = state.ws_tx.send(Message::Close(None));
        }
        self.read_handle.abort();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.read_handle.abort();
        self.write_handle.abort();
    }
}
