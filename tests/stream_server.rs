use anyhow::{anyhow, Result};
use serde_json::Value;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use stream_camera::{
    CaptureDevice, CaptureError, DeviceOpener, DeviceSelector, FrameSource, FrameSourceConfig,
    RawFrame, ServerConfig, StreamHandle, StreamServer,
};

#[derive(Clone, Copy)]
enum Misses {
    Always,
    EveryOther,
}

/// Camera whose reads miss on a fixed pattern.
struct UnreliableCamera {
    misses: Misses,
    reads: Arc<AtomicUsize>,
}

impl UnreliableCamera {
    fn new(misses: Misses) -> Self {
        Self {
            misses,
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl DeviceOpener for UnreliableCamera {
    fn open(&self) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        Ok(Box::new(UnreliableHandle {
            misses: self.misses,
            reads: self.reads.clone(),
        }))
    }
}

struct UnreliableHandle {
    misses: Misses,
    reads: Arc<AtomicUsize>,
}

impl CaptureDevice for UnreliableHandle {
    fn describe(&self) -> String {
        "fake://unreliable".to_string()
    }

    fn request_resolution(&mut self, _width: u32, _height: u32) -> Result<()> {
        Ok(())
    }

    fn read(&mut self) -> Result<RawFrame> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst);
        let miss = match self.misses {
            Misses::Always => true,
            Misses::EveryOther => n % 2 == 0,
        };
        if miss {
            return Err(anyhow!("select timeout"));
        }
        RawFrame::new(vec![77u8; 8 * 8 * 3], 8, 8)
    }

    fn release(&mut self) {}
}

struct TestServer {
    source: Arc<Mutex<FrameSource>>,
    handle: Option<StreamHandle>,
}

impl TestServer {
    fn new() -> Result<Self> {
        Self::with_opener(&DeviceSelector::parse("stub://server_test"))
    }

    fn with_opener(opener: &dyn DeviceOpener) -> Result<Self> {
        let source = FrameSource::open_with(opener, FrameSourceConfig::default())?;
        let source = Arc::new(Mutex::new(source));
        let handle = StreamServer::new(
            ServerConfig {
                addr: "127.0.0.1:0".to_string(),
                target_fps: 50,
            },
            source.clone(),
        )
        .spawn()?;
        Ok(Self {
            source,
            handle: Some(handle),
        })
    }

    fn connect(&self, method: &str, path: &str) -> Result<TcpStream> {
        let handle = self.handle.as_ref().ok_or_else(|| anyhow!("server stopped"))?;
        let mut stream = TcpStream::connect(handle.addr)?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;
        write!(stream, "{} {} HTTP/1.1\r\nHost: localhost\r\n\r\n", method, path)?;
        Ok(stream)
    }

    fn request(&self, method: &str, path: &str) -> Result<(String, Vec<u8>)> {
        let mut stream = self.connect(method, path)?;
        let mut response = Vec::new();
        stream.read_to_end(&mut response)?;
        let split = find(&response, b"\r\n\r\n").ok_or_else(|| anyhow!("no header end"))?;
        let headers = String::from_utf8_lossy(&response[..split]).to_string();
        Ok((headers, response[split + 4..].to_vec()))
    }

    fn stop(mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            handle.stop()?;
        }
        Ok(())
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn count(haystack: &[u8], needle: &[u8]) -> usize {
    haystack.windows(needle.len()).filter(|w| *w == needle).count()
}

fn read_parts(stream: &mut TcpStream, parts: usize) -> Result<Vec<u8>> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    while count(&data, b"--frame\r\n") < parts && Instant::now() < deadline {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
    }
    Ok(data)
}

/// Content-Length and body of every complete multipart part.
fn complete_parts(data: &[u8]) -> Result<Vec<(usize, Vec<u8>)>> {
    let mut parts = Vec::new();
    let mut rest = data;
    while let Some(start) = find(rest, b"--frame\r\n") {
        rest = &rest[start..];
        let Some(head_end) = find(rest, b"\r\n\r\n") else {
            break;
        };
        let head = String::from_utf8_lossy(&rest[..head_end]).to_string();
        let len: usize = head
            .lines()
            .find_map(|line| line.strip_prefix("Content-Length: "))
            .ok_or_else(|| anyhow!("part without Content-Length: {}", head))?
            .trim()
            .parse()?;
        let body_start = head_end + 4;
        if rest.len() < body_start + len {
            break;
        }
        parts.push((len, rest[body_start..body_start + len].to_vec()));
        rest = &rest[body_start + len..];
    }
    Ok(parts)
}

#[test]
fn health_reports_open_device() -> Result<()> {
    let server = TestServer::new()?;
    let (headers, body) = server.request("GET", "/health")?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    let json: Value = serde_json::from_slice(&body)?;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["device_open"], true);
    assert_eq!(json["device"], "stub://server_test");
    server.stop()
}

#[test]
fn snapshot_returns_jpeg() -> Result<()> {
    let server = TestServer::new()?;
    let (headers, body) = server.request("GET", "/snapshot")?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    assert!(headers.contains("Content-Type: image/jpeg"));
    assert_eq!(&body[..2], &[0xFF, 0xD8]);
    server.stop()
}

#[test]
fn index_embeds_video_feed() -> Result<()> {
    let server = TestServer::new()?;
    let (headers, body) = server.request("GET", "/")?;
    assert!(headers.contains("text/html"));
    assert!(String::from_utf8_lossy(&body).contains("/video_feed"));
    server.stop()
}

#[test]
fn unknown_paths_and_methods_are_rejected() -> Result<()> {
    let server = TestServer::new()?;
    let (headers, _) = server.request("GET", "/nope")?;
    assert!(headers.starts_with("HTTP/1.1 404"));
    let (headers, _) = server.request("POST", "/snapshot")?;
    assert!(headers.starts_with("HTTP/1.1 405"));
    server.stop()
}

#[test]
fn video_feed_streams_multipart_jpeg() -> Result<()> {
    let server = TestServer::new()?;
    let mut stream = server.connect("GET", "/video_feed")?;
    let data = read_parts(&mut stream, 3)?;
    drop(stream);

    let text = String::from_utf8_lossy(&data);
    assert!(text.starts_with("HTTP/1.1 200 OK"));
    assert!(text.contains("multipart/x-mixed-replace; boundary=frame"));
    assert!(count(&data, b"--frame\r\n") >= 3);
    assert!(count(&data, b"Content-Type: image/jpeg\r\n") >= 2);
    assert!(find(&data, &[0xFF, 0xD8]).is_some());
    server.stop()
}

#[test]
fn released_source_reports_closed() -> Result<()> {
    let server = TestServer::new()?;
    server
        .source
        .lock()
        .map_err(|_| anyhow!("poisoned"))?
        .release();

    let (headers, body) = server.request("GET", "/snapshot")?;
    assert!(headers.starts_with("HTTP/1.1 503"));
    assert!(String::from_utf8_lossy(&body).contains("device_closed"));

    let (_, body) = server.request("GET", "/health")?;
    let json: Value = serde_json::from_slice(&body)?;
    assert_eq!(json["device_open"], false);
    server.stop()
}

#[test]
fn snapshot_reports_missed_frame() -> Result<()> {
    let camera = UnreliableCamera::new(Misses::Always);
    let server = TestServer::with_opener(&camera)?;

    let (headers, body) = server.request("GET", "/snapshot")?;
    assert!(headers.starts_with("HTTP/1.1 503"));
    assert!(String::from_utf8_lossy(&body).contains("frame_unavailable"));

    let (_, body) = server.request("GET", "/health")?;
    let json: Value = serde_json::from_slice(&body)?;
    assert_eq!(json["device_open"], true);
    assert_eq!(json["frames_missed"], 1);
    assert_eq!(json["frames_encoded"], 0);
    server.stop()
}

#[test]
fn video_feed_skips_missed_frames() -> Result<()> {
    let camera = UnreliableCamera::new(Misses::EveryOther);
    let server = TestServer::with_opener(&camera)?;
    let mut stream = server.connect("GET", "/video_feed")?;
    let data = read_parts(&mut stream, 4)?;
    drop(stream);

    assert!(String::from_utf8_lossy(&data).starts_with("HTTP/1.1 200 OK"));
    let parts = complete_parts(&data)?;
    assert!(parts.len() >= 3, "only {} complete parts", parts.len());
    for (len, body) in &parts {
        assert!(*len > 0);
        assert_eq!(&body[..2], &[0xFF, 0xD8]);
        assert_eq!(&body[body.len() - 2..], &[0xFF, 0xD9]);
    }
    // Every delivered part cost at least one missed read before it.
    assert!(camera.reads.load(Ordering::SeqCst) >= 2 * parts.len());

    let (_, body) = server.request("GET", "/health")?;
    let json: Value = serde_json::from_slice(&body)?;
    assert!(json["frames_missed"].as_u64().unwrap_or(0) >= 1);
    server.stop()
}
