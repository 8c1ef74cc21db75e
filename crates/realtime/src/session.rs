//! Per-job WebSocket session.
//!
//! A [`JobSession`] owns the duplex connection for one analysis job: it
//! performs the handshake, runs the receive loop, decodes each frame via
//! [`messages`](crate::messages), fans results out through its
//! [`SubscriberRegistry`], and applies the reconnection policy on
//! abnormal closure. Close code 1000 is reserved for intentional
//! disconnects and suppresses reconnection.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use trafficlens_core::types::JobId;

use crate::messages::{self, AnalysisMessage, Decoded, MessageKind};
use crate::reconnect::ReconnectPolicy;
use crate::registry::{SubscriberRegistry, SubscriptionId};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection lifecycle states.
///
/// `Connecting → Open → (Closing → Closed)`, with the side transition
/// `Open → Reconnecting → Connecting` on abnormal closure. A session
/// handed out by the directory before anyone called
/// [`connect`](JobSession::connect) sits in `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Reconnecting,
    Closing,
    Closed,
}

/// Errors surfaced by [`JobSession::connect`].
///
/// Everything after a successful open is handled internally: transport
/// errors feed the reconnection policy and are never returned to callers.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The WebSocket handshake failed.
    #[error("connection for job {job_id} failed: {reason}")]
    Connect { job_id: JobId, reason: String },

    /// The session was disconnected; a fresh one must be created through
    /// the directory.
    #[error("session for job {0} was disconnected")]
    Disconnected(JobId),
}

/// How a live connection ended.
enum Closure {
    /// Caller-invoked disconnect or a server close with code 1000.
    Intentional,
    /// Any other close code, a transport error, or an exhausted stream.
    Abnormal,
}

/// State shared between the session handle and its connection task.
struct SessionShared {
    job_id: JobId,
    url: String,
    policy: ReconnectPolicy,
    state: Mutex<SessionState>,
    registry: SubscriberRegistry,
    /// Sender half feeding the connection task; `None` until first connect.
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    reconnect_attempts: AtomicU32,
    /// Bumped by every `connect`; a pending reconnect timer checks it
    /// before acting so a stale timer cannot resurrect a superseded
    /// connection.
    generation: AtomicU64,
    cancel: CancellationToken,
}

impl SessionShared {
    fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    fn set_state(&self, state: SessionState) {
        *lock(&self.state) = state;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The live duplex connection and dispatch state for one analysis job.
///
/// Created by the [`SessionDirectory`](crate::directory::SessionDirectory),
/// which guarantees at most one live session per job id. The socket is
/// exclusively owned by the session's connection task; all interaction
/// goes through this handle.
pub struct JobSession {
    shared: Arc<SessionShared>,
    /// Serializes concurrent `connect` calls.
    connect_lock: tokio::sync::Mutex<()>,
}

impl JobSession {
    /// Create an unconnected session for `job_id`.
    ///
    /// The transport address is derived as
    /// `<ws_base_url>/ws/traffic/analysis/<job_id>/`.
    pub fn new(job_id: JobId, ws_base_url: &str, policy: ReconnectPolicy) -> Self {
        let url = format!(
            "{}/ws/traffic/analysis/{job_id}/",
            ws_base_url.trim_end_matches('/'),
        );
        Self {
            shared: Arc::new(SessionShared {
                job_id,
                url,
                policy,
                state: Mutex::new(SessionState::Connecting),
                registry: SubscriberRegistry::new(),
                outbound: Mutex::new(None),
                reconnect_attempts: AtomicU32::new(0),
                generation: AtomicU64::new(0),
                cancel: CancellationToken::new(),
            }),
            connect_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The job this session is bound to.
    pub fn job_id(&self) -> JobId {
        self.shared.job_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Whether the connection is currently open. Also the only way to
    /// observe that the session gave up after exhausting its reconnect
    /// attempts.
    pub fn is_connected(&self) -> bool {
        self.shared.state() == SessionState::Open
    }

    /// Consecutive failed reconnect attempts so far; reset on every
    /// successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Register `handler` for inbound messages of `kind`.
    ///
    /// Subscriptions survive reconnects; they are cleared only by
    /// [`disconnect`](Self::disconnect).
    pub fn subscribe<F>(&self, kind: MessageKind, handler: F) -> SubscriptionId
    where
        F: Fn(&AnalysisMessage) + Send + Sync + 'static,
    {
        self.shared.registry.subscribe(kind, handler)
    }

    /// Remove one subscription; other handlers of the same kind keep
    /// receiving messages.
    pub fn unsubscribe(&self, kind: MessageKind, id: SubscriptionId) -> bool {
        self.shared.registry.unsubscribe(kind, id)
    }

    /// Establish the WebSocket connection.
    ///
    /// Returns once the handshake succeeds, or `Err` when it fails; a
    /// connected session then keeps itself alive through the reconnection
    /// policy without further calls. Calling `connect` on an already open
    /// session is a warn no-op; calling it on a disconnected session is
    /// an error.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let _guard = self.connect_lock.lock().await;

        if self.shared.cancel.is_cancelled() {
            return Err(SessionError::Disconnected(self.shared.job_id));
        }
        if self.shared.state() == SessionState::Open {
            tracing::warn!(job_id = self.shared.job_id, "Session already connected");
            return Ok(());
        }

        // Supersede any reconnect timer a previous connect left behind.
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.set_state(SessionState::Connecting);

        let ws = open_socket(&self.shared).await?;

        if self.shared.cancel.is_cancelled() {
            // disconnect() raced the handshake; the socket is dropped
            // unopened.
            return Err(SessionError::Disconnected(self.shared.job_id));
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        *lock(&self.shared.outbound) = Some(outbound_tx);
        self.shared.reconnect_attempts.store(0, Ordering::SeqCst);
        self.shared.set_state(SessionState::Open);
        tracing::info!(
            job_id = self.shared.job_id,
            url = %self.shared.url,
            "Connected to analysis stream",
        );

        tokio::spawn(run_session(
            Arc::clone(&self.shared),
            ws,
            outbound_rx,
            generation,
        ));
        Ok(())
    }

    /// Enqueue a client-to-server control message.
    ///
    /// Only valid while the session is open; otherwise the message is
    /// dropped with a logged warning. Never blocks and never errors on a
    /// closed socket.
    pub fn send(&self, message: &AnalysisMessage) {
        if self.shared.state() != SessionState::Open {
            tracing::warn!(
                job_id = self.shared.job_id,
                kind = %message.kind(),
                "Session not open, dropping outbound message",
            );
            return;
        }
        let text = match messages::encode(message) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(
                    job_id = self.shared.job_id,
                    error = %e,
                    "Failed to encode outbound message",
                );
                return;
            }
        };
        let outbound = lock(&self.shared.outbound);
        let delivered = outbound.as_ref().is_some_and(|tx| tx.send(text).is_ok());
        if !delivered {
            tracing::warn!(
                job_id = self.shared.job_id,
                "Connection task gone, dropping outbound message",
            );
        }
    }

    /// Tear the session down.
    ///
    /// Closes the socket with code 1000 (suppressing reconnection), clears
    /// every subscription, and resets the reconnect counter. Idempotent,
    /// and safe to call while a reconnect attempt is mid-flight: the
    /// pending timer observes the cancellation and never re-opens a
    /// socket.
    pub fn disconnect(&self) {
        if !self.shared.cancel.is_cancelled() {
            tracing::info!(job_id = self.shared.job_id, "Disconnecting session");
        }
        self.shared.cancel.cancel();
        // A session that never connected has no task to drive the close.
        if lock(&self.shared.outbound).is_none() {
            self.shared.set_state(SessionState::Closed);
        }
        self.shared.registry.clear();
        self.shared.reconnect_attempts.store(0, Ordering::SeqCst);
    }
}

/// Open the WebSocket for the session's derived address.
async fn open_socket(shared: &SessionShared) -> Result<WsStream, SessionError> {
    let (ws, _response) =
        connect_async(shared.url.as_str())
            .await
            .map_err(|e| SessionError::Connect {
                job_id: shared.job_id,
                reason: e.to_string(),
            })?;
    Ok(ws)
}

/// Connection task: process frames, reconnect on abnormal closure.
///
/// Owns the socket exclusively. Exits on intentional closure, when the
/// reconnect policy is exhausted, or when a newer `connect` supersedes
/// this generation.
async fn run_session(
    shared: Arc<SessionShared>,
    mut ws: WsStream,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    generation: u64,
) {
    loop {
        match drive(&shared, &mut ws, &mut outbound_rx).await {
            Closure::Intentional => {
                shared.set_state(SessionState::Closed);
                tracing::info!(job_id = shared.job_id, "Session closed");
                return;
            }
            Closure::Abnormal => {
                if shared.cancel.is_cancelled() {
                    shared.set_state(SessionState::Closed);
                    return;
                }
                shared.set_state(SessionState::Reconnecting);
                match reattach(&shared, generation).await {
                    Some(new_ws) => ws = new_ws,
                    None => return,
                }
            }
        }
    }
}

/// Pump one live connection until it closes, reporting how.
async fn drive(
    shared: &SessionShared,
    ws: &mut WsStream,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
) -> Closure {
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => {
                shared.set_state(SessionState::Closing);
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "client disconnect".into(),
                };
                if let Err(e) = ws.send(Message::Close(Some(frame))).await {
                    tracing::debug!(
                        job_id = shared.job_id,
                        error = %e,
                        "Close frame not delivered",
                    );
                }
                return Closure::Intentional;
            }
            Some(text) = outbound_rx.recv() => {
                if let Err(e) = ws.send(Message::Text(text)).await {
                    tracing::warn!(job_id = shared.job_id, error = %e, "WebSocket send failed");
                    return Closure::Abnormal;
                }
            }
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => handle_frame(shared, &text),
                Some(Ok(Message::Binary(_))) => {
                    tracing::trace!(job_id = shared.job_id, "Ignoring binary frame");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    // Handled automatically by tungstenite.
                }
                Some(Ok(Message::Close(frame))) => {
                    let intentional = frame
                        .as_ref()
                        .is_some_and(|f| f.code == CloseCode::Normal);
                    tracing::info!(
                        job_id = shared.job_id,
                        ?frame,
                        "Server closed analysis stream",
                    );
                    return if intentional {
                        Closure::Intentional
                    } else {
                        Closure::Abnormal
                    };
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    tracing::error!(job_id = shared.job_id, error = %e, "WebSocket receive error");
                    return Closure::Abnormal;
                }
                None => {
                    tracing::warn!(job_id = shared.job_id, "WebSocket stream ended");
                    return Closure::Abnormal;
                }
            }
        }
    }
}

/// Decode one inbound text frame and fan it out.
///
/// Malformed frames and unknown message types are dropped; neither ends
/// the connection.
fn handle_frame(shared: &SessionShared, text: &str) {
    match messages::decode(text) {
        Ok(Decoded::Message(message)) => {
            let delivered = shared.registry.dispatch(&message);
            tracing::trace!(
                job_id = shared.job_id,
                kind = %message.kind(),
                delivered,
                "Dispatched frame",
            );
        }
        Ok(Decoded::Unknown { kind, .. }) => {
            tracing::debug!(job_id = shared.job_id, kind = %kind, "Ignoring unknown message type");
        }
        Err(e) => {
            tracing::warn!(
                job_id = shared.job_id,
                error = %e,
                raw_frame = %text,
                "Dropping malformed frame",
            );
        }
    }
}

/// Re-open the socket with linear backoff.
///
/// Returns `None` when the session is cancelled, superseded by a newer
/// `connect`, or out of attempts (silent give-up; callers observe it via
/// `is_connected`).
async fn reattach(shared: &SessionShared, generation: u64) -> Option<WsStream> {
    loop {
        let attempt = shared.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if !shared.policy.allows(attempt) {
            tracing::warn!(
                job_id = shared.job_id,
                attempts = attempt - 1,
                "Giving up on reconnection",
            );
            shared.set_state(SessionState::Closed);
            return None;
        }

        let delay = shared.policy.delay_for(attempt);
        tracing::info!(
            job_id = shared.job_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect",
        );
        tokio::select! {
            _ = shared.cancel.cancelled() => {
                shared.set_state(SessionState::Closed);
                return None;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        // A newer connect owns this session now; the stale timer must
        // not act.
        if shared.generation.load(Ordering::SeqCst) != generation {
            return None;
        }

        shared.set_state(SessionState::Connecting);
        match open_socket(shared).await {
            Ok(ws) => {
                if shared.generation.load(Ordering::SeqCst) != generation {
                    return None;
                }
                shared.reconnect_attempts.store(0, Ordering::SeqCst);
                shared.set_state(SessionState::Open);
                tracing::info!(
                    job_id = shared.job_id,
                    attempt,
                    "Reconnected to analysis stream",
                );
                return Some(ws);
            }
            Err(e) => {
                tracing::warn!(
                    job_id = shared.job_id,
                    attempt,
                    error = %e,
                    "Reconnect attempt failed",
                );
                shared.set_state(SessionState::Reconnecting);
            }
        }
    }
}
