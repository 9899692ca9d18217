//! Minimal WebSocket client for exercising a running server.

use std::{net::SocketAddr, time::Duration};

use futures::{SinkExt, StreamExt};
use tokio::{net::TcpStream, time::timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

/// How long [`FrameClient::recv_frame`] waits before giving up.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Client side of one frame connection.
pub struct FrameClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl FrameClient {
    /// Connect to the server at `addr`.
    ///
    /// # Panics
    ///
    /// Panics if the WebSocket upgrade fails.
    pub async fn connect(addr: SocketAddr) -> Self {
        let (ws, _) = connect_async(format!("ws://{addr}/"))
            .await
            .expect("websocket connect");
        Self { ws }
    }

    /// Send one encoded frame as a binary message.
    ///
    /// # Panics
    ///
    /// Panics if the message cannot be written.
    pub async fn send_frame(&mut self, payload: Vec<u8>) {
        self.ws
            .send(Message::Binary(payload))
            .await
            .expect("send frame");
    }

    /// Send a text message, which the server ignores.
    ///
    /// # Panics
    ///
    /// Panics if the message cannot be written.
    pub async fn send_text(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_owned()))
            .await
            .expect("send text");
    }

    /// Receive the next binary message.
    ///
    /// Returns `None` if the server closed the connection or nothing arrived
    /// within `wait`.
    pub async fn recv_frame_within(&mut self, wait: Duration) -> Option<Vec<u8>> {
        timeout(wait, async {
            while let Some(Ok(message)) = self.ws.next().await {
                match message {
                    Message::Binary(payload) => return Some(payload),
                    Message::Close(_) => return None,
                    _ => {}
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
    }

    /// Receive the next binary message, waiting up to [`RECV_TIMEOUT`].
    pub async fn recv_frame(&mut self) -> Option<Vec<u8>> {
        self.recv_frame_within(RECV_TIMEOUT).await
    }

    /// Receive `count` frames and return their identifiers in arrival order.
    ///
    /// # Panics
    ///
    /// Panics if fewer than `count` frames arrive.
    pub async fn recv_ids(&mut self, count: usize) -> Vec<u8> {
        let mut ids = Vec::with_capacity(count);
        for received in 0..count {
            let payload = self
                .recv_frame()
                .await
                .unwrap_or_else(|| panic!("expected {count} frames, got {received}"));
            ids.push(crate::frames::read_id(&payload));
        }
        ids
    }

    /// Wait until the server closes the connection.
    ///
    /// Returns `true` if a close frame or end of stream arrived within
    /// `wait`. Binary frames received meanwhile are discarded.
    pub async fn closed_within(&mut self, wait: Duration) -> bool {
        timeout(wait, async {
            loop {
                match self.ws.next().await {
                    None | Some(Ok(Message::Close(_)) | Err(_)) => return,
                    Some(Ok(_)) => {}
                }
            }
        })
        .await
        .is_ok()
    }

    /// Send a close frame and wait for the server to acknowledge it.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
        let _ = self.closed_within(RECV_TIMEOUT).await;
    }
}
