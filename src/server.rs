//! Top-level connection acceptor. Out of scope for the hard core (spec §1
//! calls websocket framing an external collaborator), but a runnable
//! binary still needs *something* here — this follows the teacher's
//! `WebSocketHandler::start` (`src4/feed/websocket.rs`) almost verbatim:
//! bind, `accept_async` each connection, spawn a task per socket, log and
//! drop on error rather than taking the listener down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

use crate::room_ops::RoomOps;
use crate::session::SessionLoop;
use crate::storage::Storage;

pub struct Server<S> {
    ops: Arc<RoomOps<S>>,
    bind_addr: SocketAddr,
    push_interval: Duration,
}

impl<S: Storage + 'static> Server<S> {
    pub fn new(ops: Arc<RoomOps<S>>, bind_addr: SocketAddr, push_interval: Duration) -> Self {
        Self { ops, bind_addr, push_interval }
    }

    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.bind_addr)
            .await
            .with_context(|| format!("binding {}", self.bind_addr))?;
        tracing::info!(addr = %self.bind_addr, "listening");

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                    continue;
                }
            };

            let ops = Arc::clone(&self.ops);
            let push_interval = self.push_interval;
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer, ops, push_interval).await {
                    tracing::error!(%peer, error = %e, "session ended with error");
                }
            });
        }
    }
}

/// Room names are carried in the request path, `/room/{name}` — the
/// thinnest possible framing decision, since routing itself is explicitly
/// out of scope (spec §1).
fn extract_room(path: &str) -> Option<String> {
    path.trim_start_matches('/').strip_prefix("room/").map(|s| s.trim_matches('/').to_string())
}

async fn handle_connection<S: Storage + 'static>(
    stream: TcpStream,
    peer: SocketAddr,
    ops: Arc<RoomOps<S>>,
    push_interval: Duration,
) -> Result<()> {
    let mut room_name = None;
    let callback = |req: &Request, resp: Response| {
        room_name = extract_room(req.uri().path());
        Ok(resp)
    };
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback)
        .await
        .context("websocket handshake failed")?;

    let room = room_name.context("no room name in request path")?;
    tracing::info!(%peer, room = %room, "session started");

    let session = SessionLoop::new(room, ops, push_interval);
    session.run(ws_stream).await
}
