//! MJPEG-over-HTTP stream server.
//!
//! Serves a shared `FrameSource` to browsers:
//! - `/`            minimal page embedding the stream
//! - `/video_feed`  `multipart/x-mixed-replace` stream, one part per frame
//! - `/snapshot`    a single encoded frame
//! - `/health`      JSON status and counters
//!
//! Each connection gets its own thread. The source sits behind a mutex, so
//! concurrent viewers take turns reading the device; a missed frame is skipped.

use anyhow::{anyhow, Result};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::CaptureError;
use crate::source::FrameSource;

const MAX_REQUEST_BYTES: usize = 8192;
const BOUNDARY: &str = "frame";
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const ACCEPT_POLL: Duration = Duration::from_millis(50);

const INDEX_HTML: &str = "<!doctype html>\n<html>\n<head><title>stream-camera</title></head>\n\
<body>\n<img src=\"/video_feed\" alt=\"live stream\">\n</body>\n</html>\n";

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: String,
    pub target_fps: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
            target_fps: 10,
        }
    }
}

#[derive(Debug)]
pub struct StreamHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl StreamHandle {
    /// Signal shutdown and wait for the accept loop and open streams to finish.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("stream server thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

pub struct StreamServer {
    cfg: ServerConfig,
    source: Arc<Mutex<FrameSource>>,
}

impl StreamServer {
    pub fn new(cfg: ServerConfig, source: Arc<Mutex<FrameSource>>) -> Self {
        Self { cfg, source }
    }

    pub fn spawn(self) -> Result<StreamHandle> {
        if self.cfg.target_fps == 0 {
            return Err(anyhow!("target_fps must be greater than zero"));
        }
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::spawn(move || {
            run_server(listener, self.cfg, self.source, shutdown_thread);
            log::debug!("stream server on {} stopped", addr);
        });

        Ok(StreamHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_server(
    listener: TcpListener,
    cfg: ServerConfig,
    source: Arc<Mutex<FrameSource>>,
    shutdown: Arc<AtomicBool>,
) {
    let mut workers: Vec<JoinHandle<()>> = Vec::new();
    accept_loop(&shutdown, || listener.accept(), |(stream, peer)| {
        let source = source.clone();
        let cfg = cfg.clone();
        let shutdown = shutdown.clone();
        workers.retain(|worker| !worker.is_finished());
        workers.push(std::thread::spawn(move || {
            if let Err(err) = handle_connection(stream, &source, &cfg, &shutdown) {
                log::warn!("stream request from {} failed: {}", peer, err);
            }
        }));
    });
    for worker in workers {
        let _ = worker.join();
    }
}

/// Poll `accept` until shutdown. Accept errors (aborted handshakes, fd
/// exhaustion) are logged and retried; they never stop the server.
fn accept_loop<T>(
    shutdown: &AtomicBool,
    mut accept: impl FnMut() -> std::io::Result<T>,
    mut on_connection: impl FnMut(T),
) {
    while !shutdown.load(Ordering::SeqCst) {
        match accept() {
            Ok(conn) => on_connection(conn),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(err) => {
                log::warn!("stream server accept failed: {}", err);
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn handle_connection(
    mut stream: TcpStream,
    source: &Mutex<FrameSource>,
    cfg: &ServerConfig,
    shutdown: &AtomicBool,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_write_timeout(Some(WRITE_TIMEOUT))?;

    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        return write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#);
    }
    match request.path.as_str() {
        "/" => write_response(&mut stream, 200, "text/html; charset=utf-8", INDEX_HTML.as_bytes()),
        "/health" => {
            let body = health_body(source)?;
            write_response(&mut stream, 200, "application/json", &body)
        }
        "/snapshot" => {
            let (mime, frame) = {
                let mut guard = lock_source(source)?;
                (guard.format().mime_type(), guard.get_frame())
            };
            match frame {
                Ok(Some(bytes)) => write_response(&mut stream, 200, mime, &bytes),
                Ok(None) => {
                    write_json_response(&mut stream, 503, r#"{"error":"frame_unavailable"}"#)
                }
                Err(CaptureError::DeviceClosed) => {
                    write_json_response(&mut stream, 503, r#"{"error":"device_closed"}"#)
                }
                Err(err) => Err(err.into()),
            }
        }
        "/video_feed" => stream_frames(&mut stream, source, cfg, shutdown),
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

fn stream_frames(
    stream: &mut TcpStream,
    source: &Mutex<FrameSource>,
    cfg: &ServerConfig,
    shutdown: &AtomicBool,
) -> Result<()> {
    let mime = lock_source(source)?.format().mime_type();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        BOUNDARY
    );
    stream.write_all(header.as_bytes())?;

    let interval = Duration::from_millis(1000 / u64::from(cfg.target_fps.max(1)));
    let mut parts_sent = 0u64;
    while !shutdown.load(Ordering::SeqCst) {
        let started = Instant::now();
        let frame = lock_source(source)?.get_frame();
        match frame {
            Ok(Some(bytes)) => {
                if let Err(err) = write_part(stream, mime, &bytes) {
                    log::debug!("stream client left after {} frames: {}", parts_sent, err);
                    return Ok(());
                }
                parts_sent += 1;
            }
            Ok(None) => {}
            Err(CaptureError::DeviceClosed) => {
                log::info!("stream ended: capture device released");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }
        std::thread::sleep(interval.saturating_sub(started.elapsed()));
    }
    Ok(())
}

fn write_part(stream: &mut TcpStream, mime: &str, bytes: &[u8]) -> std::io::Result<()> {
    let head = format!(
        "--{}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        mime,
        bytes.len()
    );
    stream.write_all(head.as_bytes())?;
    stream.write_all(bytes)?;
    stream.write_all(b"\r\n")?;
    stream.flush()
}

fn lock_source(source: &Mutex<FrameSource>) -> Result<std::sync::MutexGuard<'_, FrameSource>> {
    source
        .lock()
        .map_err(|_| anyhow!("frame source lock poisoned"))
}

fn health_body(source: &Mutex<FrameSource>) -> Result<Vec<u8>> {
    let guard = lock_source(source)?;
    let stats = guard.stats();
    let body = serde_json::json!({
        "status": "ok",
        "device": stats.device,
        "device_open": guard.is_open(),
        "frames_encoded": stats.frames_encoded,
        "frames_missed": stats.frames_missed,
    });
    Ok(serde_json::to_vec(&body)?)
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text.split("\r\n").next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn accept_errors_do_not_stop_the_loop() {
        let shutdown = AtomicBool::new(false);
        let mut attempts = vec![
            Err(Error::new(ErrorKind::ConnectionAborted, "aborted")),
            Err(Error::new(ErrorKind::WouldBlock, "idle")),
            Err(Error::other("too many open files")),
            Ok(7u32),
        ]
        .into_iter();
        let mut accepted = Vec::new();

        accept_loop(
            &shutdown,
            || {
                attempts.next().unwrap_or_else(|| {
                    shutdown.store(true, Ordering::SeqCst);
                    Err(Error::new(ErrorKind::WouldBlock, "drained"))
                })
            },
            |conn| accepted.push(conn),
        );

        assert_eq!(accepted, vec![7]);
    }

    #[test]
    fn accept_loop_exits_on_shutdown() {
        let shutdown = AtomicBool::new(true);
        let mut calls = 0;
        accept_loop(
            &shutdown,
            || {
                calls += 1;
                Ok(())
            },
            |_| {},
        );
        assert_eq!(calls, 0);
    }
}
