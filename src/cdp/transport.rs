//! CDP Transport Layer
//!
//! Speaks the DevTools protocol to Chrome over a hand-rolled WebSocket.
//! Responses are routed to their waiting callers by id; everything else is
//! queued as an event.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::process::{Child, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::{Error, Result};

/// Queued events before new ones are dropped.
/// Frame-heavy pages emit bursts of frame lifecycle events on every load.
const EVENT_BUFFER: usize = 1024;

/// Caller waiting for the response to `method`
struct PendingRequest {
    method: String,
    tx: oneshot::Sender<Result<Value>>,
}

type PendingMap = Arc<Mutex<HashMap<u64, PendingRequest>>>;

mod ws {
    pub const OPCODE_TEXT: u8 = 0x1;
    pub const OPCODE_CLOSE: u8 = 0x8;
    pub const OPCODE_PING: u8 = 0x9;
    pub const OPCODE_PONG: u8 = 0xA;
}

/// Write one masked client frame
fn write_ws_frame(stream: &mut TcpStream, opcode: u8, data: &[u8]) -> std::io::Result<()> {
    let len = data.len();
    let mut frame = Vec::with_capacity(14 + len);
    frame.push(0x80 | opcode);

    if len < 126 {
        frame.push(0x80 | len as u8);
    } else if len < 65536 {
        frame.push(0x80 | 126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(0x80 | 127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }

    let mask: [u8; 4] = rand::random();
    frame.extend_from_slice(&mask);
    frame.extend(data.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));

    stream.write_all(&frame)?;
    stream.flush()
}

/// Read one frame, returning (opcode, payload)
fn read_ws_frame(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
    let mut header = [0u8; 2];
    stream.read_exact(&mut header)?;

    let opcode = header[0] & 0x0F;
    let masked = (header[1] & 0x80) != 0;
    let len = match header[1] & 0x7F {
        126 => {
            let mut ext = [0u8; 2];
            stream.read_exact(&mut ext)?;
            u16::from_be_bytes(ext) as usize
        }
        127 => {
            let mut ext = [0u8; 8];
            stream.read_exact(&mut ext)?;
            u64::from_be_bytes(ext) as usize
        }
        n => n as usize,
    };

    let mask = if masked {
        let mut m = [0u8; 4];
        stream.read_exact(&mut m)?;
        Some(m)
    } else {
        None
    };

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;
    if let Some(mask) = mask {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    Ok((opcode, payload))
}

/// Events whose loss leaves session state stale
fn affects_session(method: &str) -> bool {
    method.starts_with("Page.") || method.starts_with("Inspector.") || method == "Runtime.bindingCalled"
}

/// CDP transport: command/response plumbing plus the raw event queue
pub struct Transport {
    child: Mutex<Child>,
    writer: Mutex<TcpStream>,
    next_id: AtomicU64,
    pending: PendingMap,
    event_rx: Mutex<mpsc::Receiver<CdpMessage>>,
}

/// A CDP event as received from Chrome
#[derive(Debug, Clone)]
pub enum CdpMessage {
    Event {
        method: String,
        params: Value,
        session_id: Option<String>,
    },
}

impl Transport {
    /// Connect to Chrome's browser endpoint
    pub fn new(child: Child, ws_url: &str) -> Result<Self> {
        let parsed = url::Url::parse(ws_url)
            .map_err(|e| Error::transport(format!("Invalid DevTools URL {}: {}", ws_url, e)))?;
        let host = parsed.host_str().unwrap_or("127.0.0.1");
        let host_port = match parsed.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        let mut stream = TcpStream::connect(&host_port)
            .map_err(|e| Error::transport_io("Failed to connect to Chrome", e))?;

        let key = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            rand::random::<[u8; 16]>(),
        );
        let handshake = format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             \r\n",
            parsed.path(),
            host_port,
            key
        );
        stream
            .write_all(handshake.as_bytes())
            .map_err(|e| Error::transport_io("Handshake write failed", e))?;

        let mut response = [0u8; 1024];
        let n = stream
            .read(&mut response)
            .map_err(|e| Error::transport_io("Handshake read failed", e))?;
        let response = String::from_utf8_lossy(&response[..n]);
        if !response.starts_with("HTTP/1.1 101") {
            return Err(Error::transport(format!(
                "WebSocket handshake failed: {}",
                response.lines().next().unwrap_or_default()
            )));
        }

        tracing::debug!("WebSocket connected to {}", ws_url);

        let reader_stream = stream
            .try_clone()
            .map_err(|e| Error::transport_io("Failed to clone stream", e))?;
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

        let reader_pending = Arc::clone(&pending);
        std::thread::spawn(move || {
            Self::reader_loop(reader_stream, reader_pending, event_tx);
        });

        Ok(Self {
            child: Mutex::new(child),
            writer: Mutex::new(stream),
            next_id: AtomicU64::new(1),
            pending,
            event_rx: Mutex::new(event_rx),
        })
    }

    fn reader_loop(mut stream: TcpStream, pending: PendingMap, event_tx: mpsc::Sender<CdpMessage>) {
        loop {
            let (opcode, payload) = match read_ws_frame(&mut stream) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::debug!("WebSocket read error: {}", e);
                    break;
                }
            };

            match opcode {
                ws::OPCODE_TEXT => {
                    let msg: Value = match serde_json::from_slice(&payload) {
                        Ok(v) => v,
                        Err(e) => {
                            tracing::warn!("Failed to parse CDP message: {}", e);
                            continue;
                        }
                    };

                    if let Some(id) = msg.get("id").and_then(Value::as_u64) {
                        let Some(request) = pending.blocking_lock().remove(&id) else {
                            tracing::trace!("Response for unknown id: {}", id);
                            continue;
                        };
                        let result = match msg.get("error") {
                            Some(error) => Err(Error::cdp(
                                request.method,
                                error.get("code").and_then(Value::as_i64).unwrap_or(-1),
                                error
                                    .get("message")
                                    .and_then(Value::as_str)
                                    .unwrap_or("unknown"),
                            )),
                            None => Ok(msg.get("result").cloned().unwrap_or(json!({}))),
                        };
                        let _ = request.tx.send(result);
                    } else if let Some(method) = msg.get("method").and_then(Value::as_str) {
                        let event = CdpMessage::Event {
                            method: method.to_string(),
                            params: msg.get("params").cloned().unwrap_or(json!({})),
                            session_id: msg
                                .get("sessionId")
                                .and_then(Value::as_str)
                                .map(String::from),
                        };
                        // Never block here: responses share this thread
                        match event_tx.try_send(event) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(CdpMessage::Event { method, .. })) => {
                                if affects_session(&method) {
                                    tracing::warn!("Event queue full, dropping {}", method);
                                } else {
                                    tracing::debug!("Event queue full, dropping {}", method);
                                }
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => {
                                tracing::trace!("Event receiver dropped");
                            }
                        }
                    }
                }
                ws::OPCODE_PING => {
                    let _ = write_ws_frame(&mut stream, ws::OPCODE_PONG, &payload);
                }
                ws::OPCODE_CLOSE => {
                    tracing::debug!("WebSocket closed by server");
                    break;
                }
                _ => {}
            }
        }

        // Fail everything still waiting so callers don't hang on a dead socket
        let mut pending = pending.blocking_lock();
        for (_, request) in pending.drain() {
            let _ = request
                .tx
                .send(Err(Error::transport(format!("Connection closed during {}", request.method))));
        }
        tracing::debug!("CDP reader loop ended");
    }

    /// Send a browser-level command and wait for the response
    pub async fn send<C, R>(&self, method: &str, params: &C) -> Result<R>
    where
        C: Serialize,
        R: DeserializeOwned,
    {
        self.dispatch(None, method, params).await
    }

    /// Send a command to an attached session
    pub async fn send_to_session<C, R>(&self, session_id: &str, method: &str, params: &C) -> Result<R>
    where
        C: Serialize,
        R: DeserializeOwned,
    {
        self.dispatch(Some(session_id), method, params).await
    }

    async fn dispatch<C, R>(&self, session_id: Option<&str>, method: &str, params: &C) -> Result<R>
    where
        C: Serialize,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                tx,
            },
        );

        let mut msg = json!({
            "id": id,
            "method": method,
            "params": serde_json::to_value(params)?,
        });
        if let Some(session_id) = session_id {
            msg["sessionId"] = Value::String(session_id.to_string());
        }
        let data = serde_json::to_vec(&msg)?;

        let written = {
            let mut writer = self.writer.lock().await;
            write_ws_frame(&mut writer, ws::OPCODE_TEXT, &data)
        };
        if let Err(e) = written {
            self.pending.lock().await.remove(&id);
            return Err(Error::transport_io("WebSocket write failed", e));
        }

        tracing::trace!(method, id, session = session_id.unwrap_or("-"), "Sent CDP command");

        let result = rx
            .await
            .map_err(|_| Error::transport("Response channel closed"))??;
        Ok(serde_json::from_value(result)?)
    }

    /// Receive the next event from Chrome
    pub async fn recv_event(&self) -> Option<CdpMessage> {
        self.event_rx.lock().await.recv().await
    }

    /// Try to receive an event without blocking
    pub async fn try_recv_event(&self) -> Option<CdpMessage> {
        self.event_rx.lock().await.try_recv().ok()
    }

    /// Close the socket and kill Chrome
    pub async fn close(&self) -> Result<()> {
        {
            let mut writer = self.writer.lock().await;
            let _ = write_ws_frame(&mut writer, ws::OPCODE_CLOSE, &[]);
        }

        let mut child = self.child.lock().await;
        let _ = child.kill();
        let _ = child.wait();
        Ok(())
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Ok(mut child) = self.child.try_lock() {
            let _ = child.kill();
        }
    }
}

/// Launch Chrome and read the DevTools WebSocket URL from its stderr
pub fn launch_chrome(path: &std::path::Path, args: &[String]) -> Result<(Child, String)> {
    use std::process::Command;

    let mut child = Command::new(path)
        .args(args)
        .arg("--remote-debugging-port=0")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Launch(format!("Failed to launch Chrome: {}", e)))?;

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Launch("No stderr from Chrome".into()))?;

    // Chrome prints: DevTools listening on ws://127.0.0.1:PORT/devtools/browser/GUID
    let ws_url = BufReader::new(stderr)
        .lines()
        .map_while(|line| line.ok())
        .inspect(|line| tracing::trace!("Chrome stderr: {}", line))
        .find_map(|line| {
            line.contains("DevTools listening on")
                .then(|| line.find("ws://").map(|start| line[start..].trim().to_string()))
                .flatten()
        })
        .ok_or_else(|| Error::Launch("Failed to get DevTools WebSocket URL from Chrome".into()))?;

    tracing::info!("Chrome DevTools URL: {}", ws_url);
    Ok((child, ws_url))
}
