use crate::engine::RenderFrame;
use crate::raster::ReferenceLine;
use crossbeam_channel::Receiver;
use log::{error, info, warn};
use serde::Serialize;
use sha1_smol::Sha1;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

/// The browser viewer: a canvas that mirrors the raster column by column.
static VIEWER_HTML: &[u8] = include_bytes!("../assets/viewer.html");

/// Combined HTTP + WebSocket server.
///
/// - `GET /` or `GET /index.html` → serves the embedded viewer page
/// - WebSocket upgrade → streams every render frame as JSON, with the new
///   raster column base64-encoded
///
/// Single port, no separate HTTP server needed.
pub struct WsServer {
    frame_rx: Receiver<RenderFrame>,
    addr: String,
}

struct WsClient {
    stream: TcpStream,
    alive: bool,
    /// Has not yet received the current reference lines.
    fresh: bool,
}

impl WsClient {
    fn new(stream: TcpStream) -> Self {
        let _ = stream.set_nonblocking(true);
        let _ = stream.set_nodelay(true);
        Self {
            stream,
            alive: true,
            fresh: true,
        }
    }

    fn send_text(&mut self, text: &str) -> bool {
        match self.stream.write_all(&text_frame(text)) {
            Ok(()) => true,
            Err(_) => {
                self.alive = false;
                false
            }
        }
    }
}

/// Unmasked server-to-client text frame.
fn text_frame(text: &str) -> Vec<u8> {
    let payload = text.as_bytes();
    let len = payload.len();
    let mut frame = Vec::with_capacity(10 + len);
    frame.push(0x81); // FIN + text opcode
    if len < 126 {
        frame.push(len as u8);
    } else if len < 65536 {
        frame.push(126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }
    frame.extend_from_slice(payload);
    frame
}

type ClientList = Arc<Mutex<Vec<WsClient>>>;

/// Parsed HTTP request — enough to decide WS vs HTTP.
struct HttpRequest {
    path: String,
    is_upgrade: bool,
    ws_key: Option<String>,
}

fn parse_request(stream: &mut TcpStream) -> Result<HttpRequest, String> {
    let mut reader = BufReader::new(stream.try_clone().map_err(|e| e.to_string())?);
    let mut path = String::from("/");
    let mut is_upgrade = false;
    let mut ws_key = None;
    let mut first = true;

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).map_err(|e| e.to_string())? == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        if first {
            // "GET /path HTTP/1.1"
            if let Some(p) = trimmed.split_whitespace().nth(1) {
                path = p.to_string();
            }
            first = false;
            continue;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            let name = name.trim().to_ascii_lowercase();
            let value = value.trim();
            if name == "upgrade" && value.to_ascii_lowercase().contains("websocket") {
                is_upgrade = true;
            } else if name == "sec-websocket-key" {
                ws_key = Some(value.to_string());
            }
        }
    }
    Ok(HttpRequest {
        path,
        is_upgrade,
        ws_key,
    })
}

fn accept_key(key: &str) -> String {
    const MAGIC: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(MAGIC.as_bytes());
    base64_encode(&hasher.digest().bytes())
}

fn ws_handshake(stream: &mut TcpStream, key: &str) -> Result<(), String> {
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept_key(key)
    );
    stream
        .write_all(response.as_bytes())
        .map_err(|e| e.to_string())
}

fn respond(stream: &mut TcpStream, status: &str, content_type: &str, body: &[u8]) {
    let header = format!(
        "HTTP/1.1 {}\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         Cache-Control: no-cache\r\n\
         \r\n",
        status,
        content_type,
        body.len()
    );
    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(body);
}

pub fn base64_encode(data: &[u8]) -> String {
    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity(data.len().div_ceil(3) * 4);
    for group in data.chunks(3) {
        let b = [group[0], *group.get(1).unwrap_or(&0), *group.get(2).unwrap_or(&0)];
        let triple = (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32;
        for i in 0..4 {
            if i <= group.len() {
                out.push(CHARS[(triple >> (18 - 6 * i) & 0x3F) as usize] as char);
            } else {
                out.push('=');
            }
        }
    }
    out
}

/// Wire form of a render frame.
#[derive(Serialize)]
struct ViewerMessage<'a> {
    #[serde(flatten)]
    frame: &'a RenderFrame,
    /// Base64 RGB, top row first.
    column: String,
}

fn encode_frame(frame: &RenderFrame) -> Result<String, serde_json::Error> {
    serde_json::to_string(&ViewerMessage {
        frame,
        column: base64_encode(&frame.column),
    })
}

fn handle_connection(mut stream: TcpStream, clients: ClientList) {
    match parse_request(&mut stream) {
        Ok(req) if req.is_upgrade => {
            let Some(key) = req.ws_key else {
                respond(&mut stream, "400 Bad Request", "text/plain", b"missing key");
                return;
            };
            match ws_handshake(&mut stream, &key) {
                Ok(()) => {
                    info!("WebSocket client connected");
                    if let Ok(mut cl) = clients.lock() {
                        cl.push(WsClient::new(stream));
                    }
                }
                Err(e) => warn!("WS handshake failed: {}", e),
            }
        }
        Ok(req) => match req.path.as_str() {
            "/" | "/index.html" => {
                respond(&mut stream, "200 OK", "text/html; charset=utf-8", VIEWER_HTML)
            }
            _ => respond(
                &mut stream,
                "404 Not Found",
                "text/html",
                b"<h1>404</h1><p>Open <a href=\"/\">/</a> for the spectrogram</p>",
            ),
        },
        Err(e) => warn!("Request parse error: {}", e),
    }
}

impl WsServer {
    pub fn new(frame_rx: Receiver<RenderFrame>, addr: String) -> Self {
        Self { frame_rx, addr }
    }

    pub fn run(self) {
        let clients: ClientList = Arc::new(Mutex::new(Vec::new()));

        let accept_clients = clients.clone();
        let addr = self.addr.clone();
        let spawned = thread::Builder::new()
            .name("ws-accept".into())
            .spawn(move || {
                let listener = match TcpListener::bind(&addr) {
                    Ok(l) => l,
                    Err(e) => {
                        error!("Server failed to bind {}: {}", addr, e);
                        return;
                    }
                };
                info!("Viewer at http://{}", addr.replace("0.0.0.0", "localhost"));

                for stream in listener.incoming() {
                    match stream {
                        Ok(stream) => {
                            let cl = accept_clients.clone();
                            // HTTP connections close immediately; WS connections
                            // get moved to the client list
                            thread::spawn(move || handle_connection(stream, cl));
                        }
                        Err(e) => warn!("TCP accept error: {}", e),
                    }
                }
            });
        if let Err(e) = spawned {
            error!("Failed to start WebSocket acceptor: {}", e);
            return;
        }

        // Newly connected viewers need the current reference lines, which
        // frames only carry when they change.
        let mut current_lines: Vec<ReferenceLine> = Vec::new();

        for frame in self.frame_rx.iter() {
            if let Some(lines) = &frame.reference_lines {
                current_lines = lines.clone();
            }
            let json = match encode_frame(&frame) {
                Ok(j) => j,
                Err(e) => {
                    warn!("JSON serialize error: {}", e);
                    continue;
                }
            };

            let Ok(mut cl) = clients.lock() else {
                error!("Client list poisoned; stopping broadcast");
                return;
            };
            for client in cl.iter_mut() {
                if client.fresh {
                    client.fresh = false;
                    let mut first = frame.clone();
                    first.reinitialized = true;
                    first.reference_lines = Some(current_lines.clone());
                    if let Ok(j) = encode_frame(&first) {
                        client.send_text(&j);
                    }
                } else {
                    client.send_text(&json);
                }
            }
            cl.retain(|c| c.alive);
        }
        info!("WebSocket broadcast shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rgb;

    #[test]
    fn test_base64_padding() {
        assert_eq!(base64_encode(b"Man"), "TWFu");
        assert_eq!(base64_encode(b"Ma"), "TWE=");
        assert_eq!(base64_encode(b"M"), "TQ==");
        assert_eq!(base64_encode(b""), "");
    }

    #[test]
    fn test_handshake_accept_key() {
        // Sample handshake from RFC 6455 §1.3
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_text_frame_lengths() {
        assert_eq!(&text_frame("hi")[..2], &[0x81, 2]);
        let mid = text_frame(&"x".repeat(300));
        assert_eq!(&mid[..4], &[0x81, 126, 1, 44]);
        let big = text_frame(&"x".repeat(70_000));
        assert_eq!(big[1], 127);
        assert_eq!(big.len(), 70_000 + 10);
    }

    #[test]
    fn test_frame_json_carries_base64_column() {
        let frame = RenderFrame {
            tick: 3,
            timestamp_ms: 150,
            width: 4,
            height: 1,
            column: vec![255, 0, 0],
            background: Rgb::BLACK,
            reinitialized: false,
            reference_lines: None,
            labels: Vec::new(),
            level: 0.0,
        };
        let json = encode_frame(&frame).unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["column"], "/wAA");
        assert_eq!(v["tick"], 3);
        assert!(v["reference_lines"].is_null());
    }
}
