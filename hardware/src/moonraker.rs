//! Moonraker JSON-RPC client over WebSocket.
//!
//! Klipper is driven by sending G-code through Moonraker's
//! `printer.gcode.script` method. A script is acknowledged when a response with
//! the request's `id` comes back; Moonraker answers after Klipper has accepted
//! the whole script, so `M400` in a script makes the ack wait for motion to
//! finish. Notifications (no `id`) are interleaved with responses and skipped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

use crate::errors::GatewayError;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct Connection {
    write: futures::stream::SplitSink<WsStream, Message>,
    read: futures::stream::SplitStream<WsStream>,
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

/// A JSON-RPC response or notification from Moonraker.
#[derive(Debug, Deserialize, PartialEq)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
    /// Present on notifications
    #[serde(default)]
    pub method: Option<String>,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct RpcError {
    #[serde(default)]
    pub code: i64,
    pub message: String,
}

/// Encode a `printer.gcode.script` request.
pub fn encode_gcode_request(id: u64, script: &str) -> Result<String, serde_json::Error> {
    serde_json::to_string(&RpcRequest {
        jsonrpc: "2.0",
        method: "printer.gcode.script",
        params: serde_json::json!({ "script": script }),
        id,
    })
}

/// Parse an incoming frame; `None` for anything that is not JSON-RPC.
pub fn parse_rpc_frame(text: &str) -> Option<RpcResponse> {
    serde_json::from_str(text).ok()
}

/// Cloneable handle to a Moonraker WebSocket connection.
///
/// Requests are serialized through an internal lock. After a transport error
/// the connection is dropped and the next request reconnects.
#[derive(Clone)]
pub struct MoonrakerClient {
    url: String,
    conn: Arc<Mutex<Option<Connection>>>,
    next_id: Arc<AtomicU64>,
}

impl MoonrakerClient {
    /// Create a client without connecting. The first request connects.
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            conn: Arc::new(Mutex::new(None)),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Create a client and open the connection now.
    pub async fn connect(url: &str) -> Result<Self, GatewayError> {
        let client = Self::new(url);
        {
            let mut guard = client.conn.lock().await;
            *guard = Some(open(&client.url).await?);
        }
        Ok(client)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    /// Send a G-code script and wait for its acknowledgment.
    ///
    /// No timeout is applied here; wrap the call in one.
    pub async fn gcode_script(&self, script: &str) -> Result<(), GatewayError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = encode_gcode_request(id, script)
            .map_err(|e| GatewayError::failure("gcode encode", e))?;

        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            debug!("Connecting to Moonraker at {}", self.url);
            *guard = Some(open(&self.url).await?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(GatewayError::NotConnected);
        };

        trace!("Moonraker -> [{}] {}", id, script.replace('\n', " | "));
        if let Err(e) = conn.write.send(Message::Text(request.into())).await {
            *guard = None;
            return Err(GatewayError::failure("gcode send", e));
        }

        loop {
            let frame = match conn.read.next().await {
                None => {
                    *guard = None;
                    return Err(GatewayError::failure("gcode", "connection closed"));
                }
                Some(Err(e)) => {
                    *guard = None;
                    return Err(GatewayError::failure("gcode receive", e));
                }
                Some(Ok(frame)) => frame,
            };

            let Message::Text(text) = frame else {
                continue;
            };
            let Some(response) = parse_rpc_frame(&text) else {
                continue;
            };

            match response.id {
                Some(rid) if rid == id => {
                    return match response.error {
                        Some(err) => Err(GatewayError::failure(
                            format!("gcode {:?}", first_line(script)),
                            err.message,
                        )),
                        None => Ok(()),
                    };
                }
                // Late answer to a request that already timed out
                Some(rid) => trace!("Skipping stale Moonraker response id {}", rid),
                None => {
                    if let Some(method) = response.method {
                        trace!("Moonraker notification {}", method);
                    }
                }
            }
        }
    }

    /// Close the WebSocket. Safe to call more than once.
    pub async fn close(&self) {
        let mut guard = self.conn.lock().await;
        if let Some(mut conn) = guard.take() {
            if let Err(e) = conn.write.close().await {
                warn!("Error closing Moonraker connection: {}", e);
            }
        }
    }
}

async fn open(url: &str) -> Result<Connection, GatewayError> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| GatewayError::failure("moonraker connect", e))?;
    let (write, read) = ws_stream.split();
    Ok(Connection { write, read })
}

fn first_line(script: &str) -> &str {
    script.lines().next().unwrap_or(script)
}
