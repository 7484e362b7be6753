//! Player session (C4).
//!
//! One per connected remote agent: wraps the transport, implements the
//! request/response RPC surface, tracks connection state. Concrete
//! transport is a WebSocket (`WsPlayerSession`); the `PlayerSession` trait
//! is the capability set C7/C9 program against, so tests can substitute a
//! fake in-memory session.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::ids::PlayerId;
use crate::network::protocol::{ClientReply, ServerRequest};

/// The capability set a game orchestrator (C7) and the matchmaking/player
/// managers (C5/C9) program against (§4.1).
#[async_trait]
pub trait PlayerSession: Send + Sync {
    /// This session's per-connection id.
    fn player_id(&self) -> PlayerId;

    /// Whether the transport is still open.
    fn is_connected(&self) -> bool;

    /// Send a challenge, await the presented token.
    async fn authenticate(&self, timeout: Duration) -> Result<String, CoreError>;

    /// Ask whether the agent wants another game.
    async fn is_ready(&self, timeout: Duration) -> Result<bool, CoreError>;

    /// One-way: a game has started.
    async fn notify_start(&self, game_id: &str);

    /// Send one observation, await one action.
    async fn get_action(
        &self,
        observation: Vec<f64>,
        timeout: Duration,
    ) -> Result<Vec<f64>, CoreError>;

    /// One-way: the game has ended.
    async fn notify_end(&self, player_won: bool, stats: Vec<f64>);

    /// One-way informational message.
    async fn notify_info(&self, message: &str);

    /// One-way error message.
    async fn notify_error(&self, message: &str);

    /// Close the transport. Idempotent; raises no further callbacks.
    async fn disconnect(&self, reason: &str);
}

enum Pending {
    Auth(oneshot::Sender<String>),
    Ready(oneshot::Sender<bool>),
    Action(oneshot::Sender<Vec<f64>>),
}

/// WebSocket-backed `PlayerSession`.
///
/// Outbound frames go through an `mpsc` channel drained by a writer task
/// (mirrors the teacher's per-connection sender pattern in
/// `network/server.rs`); inbound replies are matched against in-flight
/// request ids stashed in `pending`.
pub struct WsPlayerSession {
    player_id: PlayerId,
    outbound: mpsc::UnboundedSender<Message>,
    pending: Mutex<HashMap<u64, Pending>>,
    next_request_id: AtomicU64,
    connected: AtomicBool,
}

impl WsPlayerSession {
    /// Construct a session around an outbound sink. The caller is
    /// responsible for spawning the reader loop that feeds replies into
    /// `handle_reply`.
    pub fn new(player_id: PlayerId, outbound: mpsc::UnboundedSender<Message>) -> Arc<WsPlayerSession> {
        Arc::new(WsPlayerSession {
            player_id,
            outbound,
            pending: Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
            connected: AtomicBool::new(true),
        })
    }

    fn next_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    fn send(&self, req: &ServerRequest) -> Result<(), CoreError> {
        let json = req
            .to_json()
            .map_err(|e| CoreError::RemoteAgentError(e.to_string()))?;
        self.outbound
            .send(Message::Text(json))
            .map_err(|_| CoreError::PlayerDisconnected)
    }

    /// Feed one reply frame received from the transport's reader loop.
    /// Resolves the matching pending RPC, if any; replies with no matching
    /// id (or unsolicited `Error`s) are logged and dropped.
    pub async fn handle_reply(&self, reply: ClientReply) {
        if let ClientReply::Error { message } = &reply {
            warn!(player_id = %self.player_id, %message, "remote agent error");
            return;
        }
        let Some(id) = reply.request_id() else { return };
        let mut pending = self.pending.lock().await;
        let Some(slot) = pending.remove(&id) else {
            debug!(player_id = %self.player_id, request_id = id, "reply for unknown/expired request");
            return;
        };
        match (slot, reply) {
            (Pending::Auth(tx), ClientReply::AuthReply { token, .. }) => {
                let _ = tx.send(token);
            }
            (Pending::Ready(tx), ClientReply::ReadyReply { ready, .. }) => {
                let _ = tx.send(ready);
            }
            (Pending::Action(tx), ClientReply::ActionReply { action, .. }) => {
                let _ = tx.send(action);
            }
            _ => debug!(player_id = %self.player_id, "reply kind did not match pending request kind"),
        }
    }

    /// Mark the transport closed. Called by the reader loop on EOF/error.
    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn rpc<T>(
        &self,
        request_id: u64,
        slot: Pending,
        req: ServerRequest,
        rx: oneshot::Receiver<T>,
        timeout: Duration,
    ) -> Result<T, CoreError> {
        if !self.is_connected() {
            return Err(CoreError::PlayerDisconnected);
        }
        self.pending.lock().await.insert(request_id, slot);
        if let Err(e) = self.send(&req) {
            self.pending.lock().await.remove(&request_id);
            return Err(e);
        }
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(CoreError::PlayerDisconnected),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(CoreError::PlayerTimeout(timeout))
            }
        }
    }
}

#[async_trait]
impl PlayerSession for WsPlayerSession {
    fn player_id(&self) -> PlayerId {
        self.player_id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn authenticate(&self, timeout: Duration) -> Result<String, CoreError> {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.rpc(id, Pending::Auth(tx), ServerRequest::Auth { request_id: id }, rx, timeout)
            .await
    }

    async fn is_ready(&self, timeout: Duration) -> Result<bool, CoreError> {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.rpc(id, Pending::Ready(tx), ServerRequest::IsReady { request_id: id }, rx, timeout)
            .await
    }

    async fn notify_start(&self, game_id: &str) {
        let _ = self.send(&ServerRequest::NotifyStart {
            game_id: game_id.to_string(),
        });
    }

    async fn get_action(
        &self,
        observation: Vec<f64>,
        timeout: Duration,
    ) -> Result<Vec<f64>, CoreError> {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.rpc(
            id,
            Pending::Action(tx),
            ServerRequest::GetAction {
                request_id: id,
                observation,
            },
            rx,
            timeout,
        )
        .await
    }

    async fn notify_end(&self, player_won: bool, stats: Vec<f64>) {
        let _ = self.send(&ServerRequest::NotifyEnd { player_won, stats });
    }

    async fn notify_info(&self, message: &str) {
        let _ = self.send(&ServerRequest::NotifyInfo {
            message: message.to_string(),
        });
    }

    async fn notify_error(&self, message: &str) {
        let _ = self.send(&ServerRequest::NotifyError {
            message: message.to_string(),
        });
    }

    async fn disconnect(&self, reason: &str) {
        debug!(player_id = %self.player_id, reason, "disconnecting session");
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.outbound.send(Message::Close(None));
        self.pending.lock().await.clear();
    }
}

/// Drains `outbound` into a live WebSocket sink. Spawned once per
/// connection by the server loop.
pub async fn run_writer<S>(
    mut sink: futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<S>,
        Message,
    >,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    while let Some(msg) = outbound.recv().await {
        if sink.send(msg).await.is_err() {
            break;
        }
    }
}

/// Reads frames from a live WebSocket source and feeds parsed replies into
/// `session`. Returns when the transport closes.
pub async fn run_reader<S>(
    mut stream: futures_util::stream::SplitStream<tokio_tungstenite::WebSocketStream<S>>,
    session: Arc<WsPlayerSession>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match ClientReply::from_json(&text) {
                Ok(reply) => session.handle_reply(reply).await,
                Err(e) => debug!(error = %e, "malformed client reply"),
            },
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
    session.mark_disconnected();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_session() -> (Arc<WsPlayerSession>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (WsPlayerSession::new(PlayerId::new(), tx), rx)
    }

    #[tokio::test]
    async fn get_action_resolves_on_matching_reply() {
        let (session, mut outbound) = new_session();
        let s2 = session.clone();
        let handle = tokio::spawn(async move { s2.get_action(vec![1.0], Duration::from_secs(1)).await });

        let sent = outbound.recv().await.unwrap();
        let Message::Text(text) = sent else { panic!("expected text frame") };
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        let request_id = parsed["request_id"].as_u64().unwrap();

        session
            .handle_reply(ClientReply::ActionReply {
                request_id,
                action: vec![0.5, 0.5],
            })
            .await;

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result, vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn get_action_times_out_without_a_reply() {
        let (session, _outbound) = new_session();
        let result = session.get_action(vec![1.0], Duration::from_millis(20)).await;
        assert!(matches!(result, Err(CoreError::PlayerTimeout(_))));
    }

    #[tokio::test]
    async fn disconnected_session_rejects_new_rpcs() {
        let (session, _outbound) = new_session();
        session.disconnect("test").await;
        let result = session.is_ready(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(CoreError::PlayerDisconnected)));
    }

    #[tokio::test]
    async fn unsolicited_error_reply_does_not_panic() {
        let (session, _outbound) = new_session();
        session
            .handle_reply(ClientReply::Error {
                message: "oops".into(),
            })
            .await;
    }
}
