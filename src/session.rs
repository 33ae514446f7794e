//! Per-websocket cooperative driver (spec §4.7). One instance per socket,
//! bound to a single room: interleaves client requests with a periodic
//! status push and replies to every request with an ack frame. Grounded on
//! the teacher's `handle_connection` (`src4/feed/websocket.rs`) — split the
//! stream once, loop `read.next()`, `tracing::error!` and keep going on a
//! per-message failure rather than tearing down the whole connection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::room_ops::RoomOps;
use crate::storage::Storage;

/// Client → server request frame (spec §6). Fields not used by `action`
/// are simply absent rather than modeled as a tagged enum, matching the
/// flat shape the wire format actually sends.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub request_id: i64,
    pub action: String,
    pub time: i64,
    #[serde(default)]
    pub isu: Option<String>,
    #[serde(default)]
    pub item_id: Option<u32>,
    #[serde(default)]
    pub count_bought: Option<i64>,
}

#[derive(Debug, Serialize)]
struct AckFrame {
    request_id: i64,
    is_success: bool,
}

type WsWriter = SplitSink<WebSocketStream<TcpStream>, Message>;

pub struct SessionLoop<S> {
    room: String,
    ops: Arc<RoomOps<S>>,
    push_interval: Duration,
}

impl<S: Storage> SessionLoop<S> {
    pub fn new(room: String, ops: Arc<RoomOps<S>>, push_interval: Duration) -> Self {
        Self { room, ops, push_interval }
    }

    pub async fn run(self, stream: WebSocketStream<TcpStream>) -> Result<()> {
        let (mut write, mut read) = stream.split();

        self.push_status(&mut write).await?;
        let mut last_push = Instant::now();

        loop {
            let elapsed = last_push.elapsed();
            if elapsed >= self.push_interval {
                self.push_status(&mut write).await?;
                last_push = Instant::now();
                continue;
            }
            let deadline = self.push_interval - elapsed;

            let next = tokio::time::timeout(deadline, read.next()).await;
            let message = match next {
                // Deadline expired with nothing read; the loop header pushes.
                Err(_) => continue,
                Ok(None) => return Ok(()),
                Ok(Some(frame)) => frame?,
            };

            if message.is_close() {
                return Ok(());
            }
            if !message.is_text() {
                continue;
            }

            let request: ClientMessage = match serde_json::from_str(message.to_text()?) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(room = %self.room, error = %e, "malformed client frame, closing socket");
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
            };

            let ok = match self.dispatch(&request).await {
                Some(ok) => ok,
                None => {
                    tracing::warn!(room = %self.room, action = %request.action, "unrecognized or malformed request, closing socket");
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
            };

            if ok {
                self.push_status(&mut write).await?;
                last_push = Instant::now();
            }

            let ack = AckFrame { request_id: request.request_id, is_success: ok };
            write.send(Message::Text(serde_json::to_string(&ack)?)).await?;
        }
    }

    /// Runs the requested operation. `None` means the action was not
    /// recognized (spec §7 `BadRequest`, which closes the socket rather
    /// than replying with `is_success=false`).
    async fn dispatch(&self, request: &ClientMessage) -> Option<bool> {
        match request.action.as_str() {
            "addIsu" => {
                let isu = request
                    .isu
                    .as_deref()
                    .unwrap_or("0")
                    .parse::<BigUint>()
                    .ok()?;
                Some(self.ops.add_isu(&self.room, request.time, isu).await)
            }
            "buyItem" => {
                let item_id = request.item_id?;
                let count_bought = request.count_bought?;
                Some(self.ops.buy_item(&self.room, request.time, item_id, count_bought).await)
            }
            _ => None,
        }
    }

    async fn push_status(&self, write: &mut WsWriter) -> Result<()> {
        let status = self.ops.get_status(&self.room).await?;
        write.send(Message::Text(serde_json::to_string(&status)?)).await?;
        Ok(())
    }
}
