//! Actor hub
//!
//! Actors open one WebSocket each and send `"actor"`; the hub registers the
//! connection and answers `"reset"`. The registry is owned by a single task
//! reached through [`ActorHubHandle`], so register/unregister/broadcast are
//! serialized without shared locks.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
    Router,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{LearnerError, Result};

/// First message an actor must send
pub const HANDSHAKE: &str = "actor";
/// Handshake reply, also broadcast after checkpoints
pub const RESET: &str = "reset";

enum HubCommand {
    Register {
        id: Uuid,
        addr: SocketAddr,
        outbox: mpsc::UnboundedSender<String>,
    },
    Unregister {
        id: Uuid,
    },
    Broadcast {
        text: String,
        reply: oneshot::Sender<usize>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<SocketAddr>>,
    },
}

/// Clonable handle to the hub registry
#[derive(Clone)]
pub struct ActorHubHandle {
    cmd_tx: mpsc::UnboundedSender<HubCommand>,
}

impl ActorHubHandle {
    fn send(&self, cmd: HubCommand) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| LearnerError::Internal("actor hub registry channel closed".into()))
    }

    fn register(
        &self,
        id: Uuid,
        addr: SocketAddr,
        outbox: mpsc::UnboundedSender<String>,
    ) -> Result<()> {
        self.send(HubCommand::Register { id, addr, outbox })
    }

    fn unregister(&self, id: Uuid) -> Result<()> {
        self.send(HubCommand::Unregister { id })
    }

    /// Send `text` to every registered actor, returning how many it reached
    pub async fn broadcast(&self, text: impl Into<String>) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Broadcast {
            text: text.into(),
            reply,
        })?;
        rx.await
            .map_err(|_| LearnerError::Internal("actor hub dropped broadcast reply".into()))
    }

    /// Remote addresses of the registered actors, in registration order
    pub async fn active_actors(&self) -> Result<Vec<SocketAddr>> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Snapshot { reply })?;
        rx.await
            .map_err(|_| LearnerError::Internal("actor hub dropped snapshot reply".into()))
    }
}

struct Member {
    id: Uuid,
    addr: SocketAddr,
    outbox: mpsc::UnboundedSender<String>,
}

/// Registry state, only ever touched by the registry task
#[derive(Default)]
struct Registry {
    members: Vec<Member>,
}

impl Registry {
    fn addrs(&self) -> Vec<SocketAddr> {
        self.members.iter().map(|m| m.addr).collect()
    }

    fn log(&self) {
        info!("{}", describe(&self.addrs()));
    }

    fn apply(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register { id, addr, outbox } => {
                // Queued ahead of any later broadcast
                if outbox.send(RESET.to_string()).is_err() {
                    debug!(%addr, "actor left before registration");
                    return;
                }
                self.members.push(Member { id, addr, outbox });
                self.log();
            }
            HubCommand::Unregister { id } => {
                let before = self.members.len();
                self.members.retain(|m| m.id != id);
                if self.members.len() != before {
                    self.log();
                }
            }
            HubCommand::Broadcast { text, reply } => {
                let before = self.members.len();
                // A closed outbox means the connection is gone
                self.members.retain(|m| m.outbox.send(text.clone()).is_ok());
                let reached = self.members.len();
                if reached != before {
                    self.log();
                }
                debug!(reached, "broadcast sent");
                let _ = reply.send(reached);
            }
            HubCommand::Snapshot { reply } => {
                let _ = reply.send(self.addrs());
            }
        }
    }

    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<HubCommand>) {
        while let Some(cmd) = cmd_rx.recv().await {
            self.apply(cmd);
        }
    }
}

/// Registry log block: `"<n> active actors"` then one `[i]. ip : port` line each
pub fn describe(addrs: &[SocketAddr]) -> String {
    let mut out = format!("{} active actors", addrs.len());
    for (i, addr) in addrs.iter().enumerate() {
        out.push_str(&format!("\n[{}]. {} : {}", i + 1, addr.ip(), addr.port()));
    }
    out
}

/// WebSocket server for actor registration
pub struct ActorHub {
    handle: ActorHubHandle,
    cmd_rx: mpsc::UnboundedReceiver<HubCommand>,
}

impl ActorHub {
    pub fn new() -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        Self {
            handle: ActorHubHandle { cmd_tx },
            cmd_rx,
        }
    }

    pub fn handle(&self) -> ActorHubHandle {
        self.handle.clone()
    }

    /// Bind `addr` and serve until the listener fails
    pub async fn run(self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("Starting actor hub on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let app = Router::new()
            .fallback(websocket_handler)
            .with_state(self.handle.clone());

        let registry = Registry::default().run(self.cmd_rx);
        let server = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        );

        tokio::select! {
            _ = registry => Err(LearnerError::Internal("actor hub registry stopped".into())),
            res = server => {
                res.map_err(|e| LearnerError::Internal(format!("Actor hub error: {}", e)))
            }
        }
    }
}

impl Default for ActorHub {
    fn default() -> Self {
        Self::new()
    }
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(hub): State<ActorHubHandle>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, addr, hub))
}

async fn handle_socket(socket: WebSocket, addr: SocketAddr, hub: ActorHubHandle) {
    let (mut sender, mut receiver) = socket.split();

    match receiver.next().await {
        Some(Ok(Message::Text(text))) if text == HANDSHAKE => {}
        Some(Ok(other)) => {
            warn!(%addr, message = ?other, "bad actor handshake, closing");
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
        Some(Err(e)) => {
            warn!(%addr, error = %e, "actor connection failed before handshake");
            return;
        }
        None => return,
    }

    let id = Uuid::new_v4();
    let (outbox, mut inbox) = mpsc::unbounded_channel::<String>();
    if let Err(e) = hub.register(id, addr, outbox) {
        warn!(%addr, error = %e, "could not register actor");
        return;
    }

    // Forward registry messages (reset, broadcasts) to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(text) = inbox.recv().await {
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(Message::Text(text)) => debug!(%addr, %text, "ignoring actor message"),
                Ok(_) => {}
                Err(e) => {
                    debug!(%addr, error = %e, "actor connection error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    if let Err(e) = hub.unregister(id) {
        warn!(%addr, error = %e, "could not unregister actor");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

    async fn spawn_hub() -> (SocketAddr, ActorHubHandle) {
        let hub = ActorHub::new();
        let handle = hub.handle();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(hub.serve(listener));
        (addr, handle)
    }

    async fn wait_for_count(handle: &ActorHubHandle, expected: usize) {
        for _ in 0..200 {
            if handle.active_actors().await.unwrap().len() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("registry never reached {} actors", expected);
    }

    #[test]
    fn test_describe_lists_members() {
        let addrs: Vec<SocketAddr> = vec![
            "10.0.0.1:5000".parse().unwrap(),
            "10.0.0.2:5001".parse().unwrap(),
        ];
        assert_eq!(
            describe(&addrs),
            "2 active actors\n[1]. 10.0.0.1 : 5000\n[2]. 10.0.0.2 : 5001"
        );
        assert_eq!(describe(&[]), "0 active actors");
    }

    #[tokio::test]
    async fn test_registry_drops_dead_outbox_on_broadcast() {
        let mut registry = Registry::default();
        let (live_tx, mut live_rx) = mpsc::unbounded_channel();
        let (dead_tx, dead_rx) = mpsc::unbounded_channel();
        registry.apply(HubCommand::Register {
            id: Uuid::new_v4(),
            addr: "127.0.0.1:1".parse().unwrap(),
            outbox: live_tx,
        });
        registry.apply(HubCommand::Register {
            id: Uuid::new_v4(),
            addr: "127.0.0.1:2".parse().unwrap(),
            outbox: dead_tx,
        });
        drop(dead_rx);

        let (reply, rx) = oneshot::channel();
        registry.apply(HubCommand::Broadcast {
            text: "reload".into(),
            reply,
        });
        assert_eq!(rx.await.unwrap(), 1);
        assert_eq!(registry.members.len(), 1);
        assert_eq!(live_rx.recv().await.unwrap(), RESET);
        assert_eq!(live_rx.recv().await.unwrap(), "reload");
    }

    #[tokio::test]
    async fn test_handshake_replies_reset() {
        let (addr, handle) = spawn_hub().await;
        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        ws.send(WsMessage::Text(HANDSHAKE.to_string())).await.unwrap();

        let reply = ws.next().await.unwrap().unwrap();
        assert_eq!(reply, WsMessage::Text(RESET.to_string()));
        wait_for_count(&handle, 1).await;
    }

    #[tokio::test]
    async fn test_bad_handshake_is_not_registered() {
        let (addr, handle) = spawn_hub().await;
        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        ws.send(WsMessage::Text("hello".to_string())).await.unwrap();

        loop {
            match ws.next().await {
                Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(WsMessage::Text(text))) => panic!("unexpected reply {}", text),
                Some(Ok(_)) => {}
            }
        }
        assert!(handle.active_actors().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connects_and_disconnects_leave_k_minus_m() {
        let (addr, handle) = spawn_hub().await;

        let mut clients = Vec::new();
        for _ in 0..4 {
            let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
            ws.send(WsMessage::Text(HANDSHAKE.to_string())).await.unwrap();
            assert_eq!(
                ws.next().await.unwrap().unwrap(),
                WsMessage::Text(RESET.to_string())
            );
            clients.push(ws);
        }
        wait_for_count(&handle, 4).await;

        for mut ws in clients.drain(..3) {
            ws.close(None).await.unwrap();
        }
        wait_for_count(&handle, 1).await;

        assert_eq!(handle.broadcast("reset").await.unwrap(), 1);
        let remaining = &mut clients[0];
        assert_eq!(
            remaining.next().await.unwrap().unwrap(),
            WsMessage::Text(RESET.to_string())
        );
    }
}
