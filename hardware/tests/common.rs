//! Fake device endpoints for hardware gateway tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

/// Minimal stand-in for the ESP32 laser driver.
#[derive(Clone)]
pub struct FakeLaserDriver {
    pub addr: SocketAddr,
    hits: Arc<Mutex<Vec<String>>>,
    output_high: Arc<AtomicBool>,
    status_code: Arc<AtomicU16>,
}

impl FakeLaserDriver {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Paths requested so far, e.g. `["/high", "/low"]`.
    pub fn hits(&self) -> Vec<String> {
        self.hits.lock().unwrap().clone()
    }

    pub fn is_high(&self) -> bool {
        self.output_high.load(Ordering::SeqCst)
    }

    /// Answer every request with this HTTP status.
    pub fn respond_with(&self, code: u16) {
        self.status_code.store(code, Ordering::SeqCst);
    }
}

pub async fn spawn_fake_laser() -> FakeLaserDriver {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let driver = FakeLaserDriver {
        addr: listener.local_addr().unwrap(),
        hits: Arc::new(Mutex::new(Vec::new())),
        output_high: Arc::new(AtomicBool::new(false)),
        status_code: Arc::new(AtomicU16::new(200)),
    };

    let d = driver.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let d = d.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }

                let request = String::from_utf8_lossy(&buf);
                let path = request
                    .lines()
                    .next()
                    .and_then(|l| l.split_whitespace().nth(1))
                    .unwrap_or("/")
                    .to_string();
                d.hits.lock().unwrap().push(path.clone());

                let code = d.status_code.load(Ordering::SeqCst);
                if code == 200 {
                    match path.as_str() {
                        "/high" => d.output_high.store(true, Ordering::SeqCst),
                        "/low" => d.output_high.store(false, Ordering::SeqCst),
                        _ => {}
                    }
                }
                let body = if path == "/status" {
                    let state = if d.is_high() { "HIGH" } else { "LOW" };
                    format!("{{\"state\":\"{state}\"}}")
                } else {
                    "OK".to_string()
                };

                let response = format!(
                    "HTTP/1.1 {code} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    driver
}

/// Minimal stand-in for Moonraker's JSON-RPC WebSocket.
#[derive(Clone)]
pub struct FakeMoonraker {
    pub addr: SocketAddr,
    scripts: Arc<Mutex<Vec<String>>>,
    silent: Arc<AtomicBool>,
    reject: Arc<Mutex<Option<String>>>,
}

impl FakeMoonraker {
    pub fn url(&self) -> String {
        format!("ws://{}/websocket", self.addr)
    }

    /// Every `script` parameter received, in order.
    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }

    /// Stop answering requests (they still get recorded).
    pub fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }

    /// Answer scripts starting with `prefix` with a JSON-RPC error.
    pub fn reject_prefix(&self, prefix: &str) {
        *self.reject.lock().unwrap() = Some(prefix.to_string());
    }
}

pub async fn spawn_fake_moonraker() -> FakeMoonraker {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let fake = FakeMoonraker {
        addr: listener.local_addr().unwrap(),
        scripts: Arc::new(Mutex::new(Vec::new())),
        silent: Arc::new(AtomicBool::new(false)),
        reject: Arc::new(Mutex::new(None)),
    };

    let f = fake.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let f = f.clone();
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    let Message::Text(text) = msg else {
                        continue;
                    };
                    let request: serde_json::Value = serde_json::from_str(&text).unwrap();
                    let id = request["id"].as_u64().unwrap();
                    let script = request["params"]["script"].as_str().unwrap().to_string();
                    f.scripts.lock().unwrap().push(script.clone());

                    if f.silent.load(Ordering::SeqCst) {
                        continue;
                    }

                    // Moonraker interleaves status notifications with responses
                    let note = r#"{"jsonrpc":"2.0","method":"notify_status_update","params":[{},0.0]}"#;
                    let _ = ws.send(Message::Text(note.into())).await;

                    let rejected = f
                        .reject
                        .lock()
                        .unwrap()
                        .as_ref()
                        .is_some_and(|p| script.starts_with(p.as_str()));
                    let reply = if rejected {
                        serde_json::json!({
                            "jsonrpc": "2.0",
                            "error": {"code": 400, "message": "Must home axis first"},
                            "id": id
                        })
                    } else {
                        serde_json::json!({"jsonrpc": "2.0", "result": "ok", "id": id})
                    };
                    let _ = ws.send(Message::Text(reply.to_string().into())).await;
                }
            });
        }
    });

    fake
}
