//! Minimal HTTP front end: live MJPEG feeds, camera discovery, the detection
//! log and target-plate administration.
//!
//! One thread per connection. Video feeds hold their connection for the
//! lifetime of the session; everything else is a single JSON exchange.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::session::{SessionRegistry, StreamError};
use crate::storage::{DetectionLogStore, StoreError, TargetPlateStore};
use crate::CameraIndex;

const MAX_HEADER_BYTES: usize = 8192;
const MAX_BODY_BYTES: usize = 64 * 1024;
const MJPEG_BOUNDARY: &str = "frame";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    /// Directory served under `/captured_plates/`.
    pub screenshot_dir: PathBuf,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
            screenshot_dir: PathBuf::from("captured_plates"),
        }
    }
}

/// Everything a request handler may touch.
#[derive(Clone)]
pub struct ApiState {
    pub sessions: SessionRegistry,
    pub targets: Arc<dyn TargetPlateStore>,
    pub logs: Arc<dyn DetectionLogStore>,
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting connections. Open video feeds end with their sessions.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    state: ApiState,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, state: ApiState) -> Self {
        Self { cfg, state }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let ctx = Arc::new(Context {
            cfg: self.cfg,
            state: self.state,
        });
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, ctx, shutdown_thread) {
                log::error!("http api stopped: {}", err);
            }
        });
        log::info!("http api listening on {}", addr);

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

struct Context {
    cfg: ApiConfig,
    state: ApiState,
}

fn run_api(listener: TcpListener, ctx: Arc<Context>, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let ctx = ctx.clone();
                let spawned = std::thread::Builder::new()
                    .name("http-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &ctx) {
                            log::debug!("http request from {} failed: {:#}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("http api: cannot spawn connection thread: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, ctx: &Context) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json(&mut stream, 403, &json!({"message": "forbidden"}))?;
        return Ok(());
    }

    let request = read_request(&mut stream)?;
    log::debug!("{} {} from {}", request.method, request.path, peer);
    let segments: Vec<&str> = request
        .path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    match (request.method.as_str(), segments.as_slice()) {
        ("GET", ["health"]) => write_json(&mut stream, 200, &json!({"status": "ok"})),
        ("GET", ["cameras"]) => {
            let cameras = ctx.state.sessions.list_cameras();
            write_json(&mut stream, 200, &json!({ "cameras": cameras }))
        }
        ("GET", ["video_feed", index]) => match parse_index(index) {
            Some(index) => serve_video_feed(stream, ctx, index),
            None => write_message(&mut stream, 400, "invalid camera index"),
        },
        ("POST", ["stop_video_feed", index]) => match parse_index(index) {
            Some(index) if ctx.state.sessions.stop(index) => {
                write_message(&mut stream, 200, &format!("Camera {} stopped", index))
            }
            Some(index) => write_message(
                &mut stream,
                404,
                &format!("Camera {} is not streaming", index),
            ),
            None => write_message(&mut stream, 400, "invalid camera index"),
        },
        ("GET", ["logs"]) => match ctx.state.logs.list() {
            Ok(rows) => write_json(&mut stream, 200, &json!({ "logs": rows })),
            Err(err) => write_store_error(&mut stream, &err),
        },
        ("POST", ["delete_logs"]) => {
            let body: DeleteLogsBody = match parse_body(&request) {
                Ok(body) => body,
                Err(msg) => return write_message(&mut stream, 400, &msg),
            };
            match ctx.state.logs.delete_by_ids(&body.ids) {
                Ok(count) => write_json(
                    &mut stream,
                    200,
                    &json!({"message": format!("{} log entries deleted", count), "deleted": count}),
                ),
                Err(err) => write_store_error(&mut stream, &err),
            }
        }
        ("GET", ["captured_plates", name]) => serve_screenshot(&mut stream, ctx, name),
        ("GET", ["targets"]) => match ctx.state.targets.list() {
            Ok(targets) => write_json(&mut stream, 200, &json!({ "targets": targets })),
            Err(err) => write_store_error(&mut stream, &err),
        },
        ("POST", ["targets"]) => {
            let body: AddTargetBody = match parse_body(&request) {
                Ok(body) => body,
                Err(msg) => return write_message(&mut stream, 400, &msg),
            };
            match ctx.state.targets.add(&body.plat_nomor) {
                Ok(target) => write_json(&mut stream, 201, &json!(target)),
                Err(err) => write_store_error(&mut stream, &err),
            }
        }
        ("POST", ["targets", "edit"]) => {
            let body: EditTargetBody = match parse_body(&request) {
                Ok(body) => body,
                Err(msg) => return write_message(&mut stream, 400, &msg),
            };
            match ctx.state.targets.edit(body.id, &body.plat_nomor) {
                Ok(target) => write_json(&mut stream, 200, &json!(target)),
                Err(err) => write_store_error(&mut stream, &err),
            }
        }
        ("POST", ["targets", "delete"]) => {
            let body: DeleteTargetBody = match parse_body(&request) {
                Ok(body) => body,
                Err(msg) => return write_message(&mut stream, 400, &msg),
            };
            match ctx.state.targets.delete(body.id) {
                Ok(()) => write_message(&mut stream, 200, "target deleted"),
                Err(err) => write_store_error(&mut stream, &err),
            }
        }
        ("POST", ["targets", "delete_all"]) => match ctx.state.targets.delete_all() {
            Ok(count) => write_json(
                &mut stream,
                200,
                &json!({"message": format!("{} targets deleted", count), "deleted": count}),
            ),
            Err(err) => write_store_error(&mut stream, &err),
        },
        (_, ["health"])
        | (_, ["cameras"])
        | (_, ["logs"])
        | (_, ["targets", ..])
        | (_, ["video_feed", _])
        | (_, ["stop_video_feed", _])
        | (_, ["delete_logs"]) => write_message(&mut stream, 405, "method not allowed"),
        _ => write_message(&mut stream, 404, "not found"),
    }
}

fn parse_index(raw: &str) -> Option<CameraIndex> {
    raw.parse().ok()
}

/// Stream the session on `index` as multipart JPEG until it ends or the
/// client goes away. A newer `start` on the same index ends this feed.
fn serve_video_feed(mut stream: TcpStream, ctx: &Context, index: CameraIndex) -> Result<()> {
    let mut frames = match ctx.state.sessions.start(index) {
        Ok(frames) => frames,
        Err(err @ StreamError::DeviceUnavailable { .. }) => {
            log::warn!("{}", err);
            return write_message(&mut stream, 503, &format!("Camera {} unavailable", index));
        }
        Err(err) => {
            log::error!("camera {}: {}", index, err);
            return write_message(&mut stream, 500, &err.to_string());
        }
    };

    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        MJPEG_BOUNDARY
    );
    stream.write_all(header.as_bytes())?;
    for frame in frames.by_ref() {
        let part = format!(
            "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            MJPEG_BOUNDARY,
            frame.jpeg.len()
        );
        let sent = stream
            .write_all(part.as_bytes())
            .and_then(|_| stream.write_all(&frame.jpeg))
            .and_then(|_| stream.write_all(b"\r\n"));
        if let Err(err) = sent {
            log::info!("camera {}: viewer disconnected ({})", index, err);
            break;
        }
    }
    if let Some(reason) = frames.end_reason() {
        log::debug!("camera {}: feed ended ({:?})", index, reason);
    }
    Ok(())
}

fn serve_screenshot(stream: &mut TcpStream, ctx: &Context, name: &str) -> Result<()> {
    if name.contains("..") || name.contains('\\') {
        return write_message(stream, 400, "invalid file name");
    }
    let path = ctx.cfg.screenshot_dir.join(name);
    match std::fs::read(&path) {
        Ok(bytes) => write_response(stream, 200, "image/jpeg", &bytes),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            write_message(stream, 404, "not found")
        }
        Err(err) => {
            log::warn!("read screenshot {}: {}", path.display(), err);
            write_message(stream, 500, "failed to read screenshot")
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeleteLogsBody {
    #[serde(default)]
    ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct AddTargetBody {
    plat_nomor: String,
}

#[derive(Debug, Deserialize)]
struct EditTargetBody {
    id: i64,
    plat_nomor: String,
}

#[derive(Debug, Deserialize)]
struct DeleteTargetBody {
    id: i64,
}

fn parse_body<T: serde::de::DeserializeOwned>(request: &HttpRequest) -> Result<T, String> {
    serde_json::from_slice(&request.body).map_err(|err| format!("invalid request body: {}", err))
}

fn store_error_status(err: &StoreError) -> u16 {
    match err {
        StoreError::EmptyPlate | StoreError::NoIdsSelected => 400,
        StoreError::NotFound(_) => 404,
        StoreError::Duplicate(_) => 409,
        StoreError::Database(_) | StoreError::Io(_) | StoreError::Poisoned => 500,
    }
}

fn write_store_error(stream: &mut TcpStream, err: &StoreError) -> Result<()> {
    let status = store_error_status(err);
    if status == 500 {
        log::error!("store error: {}", err);
    }
    write_message(stream, status, &err.to_string())
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of headers"));
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_HEADER_BYTES + MAX_BODY_BYTES {
            return Err(anyhow!("request too large"));
        }
    };
    if header_end > MAX_HEADER_BYTES {
        return Err(anyhow!("request headers too large"));
    }

    let text = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length"))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(anyhow!("request body too large"));
    }
    let mut body = data[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of body"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        body,
    })
}

fn write_message(stream: &mut TcpStream, status: u16, message: &str) -> Result<()> {
    write_json(stream, status, &json!({ "message": message }))
}

fn write_json(stream: &mut TcpStream, status: u16, body: &serde_json::Value) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload)
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        201 => "HTTP/1.1 201 Created",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        409 => "HTTP/1.1 409 Conflict",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}
