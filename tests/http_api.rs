use anyhow::Result;
use serde_json::Value;
use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::tempdir;

use plate_watch::api::{ApiConfig, ApiHandle, ApiServer, ApiState};
use plate_watch::ingest::{SyntheticBackend, SyntheticConfig};
use plate_watch::{
    CaptureChain, DetectorRegistry, InMemoryStore, LocalAlertSink, Pipeline, SessionRegistry,
    SessionSettings, SoundPlayer, TargetPlateStore,
};

struct TestApi {
    _dir: tempfile::TempDir,
    addr: SocketAddr,
    sessions: SessionRegistry,
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn new(targets: &[&str]) -> Result<Self> {
        let dir = tempdir()?;
        let shots: PathBuf = dir.path().join("captured_plates");
        let store = Arc::new(InMemoryStore::new());
        for target in targets {
            store.add(target)?;
        }

        let mut chain = CaptureChain::default();
        chain.push(SyntheticBackend::new(SyntheticConfig {
            indices: BTreeSet::from([0]),
            width: 32,
            height: 24,
        }));
        let detectors = DetectorRegistry::with_builtins(vec!["B1001ZZZ".to_string()])
            .get("scripted")
            .expect("scripted detector");
        let sink = Arc::new(LocalAlertSink::new(
            &shots,
            store.clone(),
            SoundPlayer::new(Some(vec!["true".to_string()])),
        ));
        let sessions = SessionRegistry::new(
            chain,
            Pipeline::new(store.clone(), detectors, sink),
            SessionSettings {
                probe_limit: 3,
                frame_interval: Duration::from_millis(10),
                ..SessionSettings::default()
            },
        );

        let api_handle = ApiServer::new(
            ApiConfig {
                addr: "127.0.0.1:0".to_string(),
                screenshot_dir: shots,
            },
            ApiState {
                sessions: sessions.clone(),
                targets: store.clone(),
                logs: store,
            },
        )
        .spawn()?;

        Ok(Self {
            _dir: dir,
            addr: api_handle.addr,
            sessions,
            api_handle: Some(api_handle),
        })
    }

    fn request(&self, method: &str, path: &str, body: Option<&str>) -> Result<(u16, Vec<u8>)> {
        let mut stream = TcpStream::connect(self.addr)?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;
        let body = body.unwrap_or("");
        let request = format!(
            "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {len}\r\n\r\n{body}",
            len = body.len()
        );
        stream.write_all(request.as_bytes())?;
        let mut response = Vec::new();
        stream.read_to_end(&mut response)?;
        Ok(split_response(&response))
    }

    fn json(&self, method: &str, path: &str, body: Option<&str>) -> Result<(u16, Value)> {
        let (status, body) = self.request(method, path, body)?;
        Ok((status, serde_json::from_slice(&body)?))
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        self.sessions.shutdown();
        if let Some(handle) = self.api_handle.take() {
            let _ = handle.stop();
        }
    }
}

fn split_response(response: &[u8]) -> (u16, Vec<u8>) {
    let split = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .unwrap_or(response.len());
    let head = String::from_utf8_lossy(&response[..split]);
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let body = response.get(split + 4..).unwrap_or_default().to_vec();
    (status, body)
}

fn count_jpeg_starts(data: &[u8]) -> usize {
    data.windows(2).filter(|w| *w == [0xFF, 0xD8]).count()
}

#[test]
fn health_and_camera_listing() -> Result<()> {
    let api = TestApi::new(&[])?;
    let (status, body) = api.json("GET", "/health", None)?;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");

    let (status, body) = api.json("GET", "/cameras", None)?;
    assert_eq!(status, 200);
    assert_eq!(body["cameras"], serde_json::json!(["Camera 0"]));

    let (status, _) = api.json("GET", "/nope", None)?;
    assert_eq!(status, 404);
    let (status, _) = api.json("DELETE", "/targets", None)?;
    assert_eq!(status, 405);
    Ok(())
}

#[test]
fn target_crud_maps_store_errors() -> Result<()> {
    let api = TestApi::new(&[])?;

    let (status, created) = api.json("POST", "/targets", Some(r#"{"plat_nomor":"b 2156 tor"}"#))?;
    assert_eq!(status, 201);
    assert_eq!(created["plat_nomor"], "B 2156 TOR");
    let id = created["id"].as_i64().unwrap();

    let (status, body) = api.json("POST", "/targets", Some(r#"{"plat_nomor":"B 2156 TOR"}"#))?;
    assert_eq!(status, 409);
    assert!(body["message"].as_str().unwrap().contains("B 2156 TOR"));

    let (status, _) = api.json("POST", "/targets", Some(r#"{"plat_nomor":"   "}"#))?;
    assert_eq!(status, 400);
    let (status, _) = api.json("POST", "/targets", Some("not json"))?;
    assert_eq!(status, 400);

    let edit = format!(r#"{{"id":{},"plat_nomor":"B 1001 ZZZ"}}"#, id);
    let (status, body) = api.json("POST", "/targets/edit", Some(&edit))?;
    assert_eq!(status, 200);
    assert_eq!(body["plat_nomor"], "B 1001 ZZZ");

    let (status, _) = api.json("POST", "/targets/delete", Some(r#"{"id":999}"#))?;
    assert_eq!(status, 404);

    let (status, body) = api.json("GET", "/targets", None)?;
    assert_eq!(status, 200);
    assert_eq!(body["targets"].as_array().unwrap().len(), 1);

    let (status, body) = api.json("POST", "/targets/delete_all", None)?;
    assert_eq!(status, 200);
    assert_eq!(body["deleted"], 1);
    Ok(())
}

#[test]
fn unknown_camera_feed_is_unavailable() -> Result<()> {
    let api = TestApi::new(&[])?;
    let (status, body) = api.json("GET", "/video_feed/2", None)?;
    assert_eq!(status, 503);
    assert_eq!(body["message"], "Camera 2 unavailable");

    let (status, _) = api.json("POST", "/stop_video_feed/2", None)?;
    assert_eq!(status, 404);
    Ok(())
}

#[test]
fn video_feed_streams_until_stopped_and_logs_the_alert() -> Result<()> {
    let api = TestApi::new(&["B 1001 ZZZ"])?;

    let mut feed = TcpStream::connect(api.addr)?;
    feed.set_read_timeout(Some(Duration::from_secs(5)))?;
    feed.write_all(b"GET /video_feed/0 HTTP/1.1\r\nHost: localhost\r\n\r\n")?;

    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    let deadline = Instant::now() + Duration::from_secs(5);
    while count_jpeg_starts(&received) < 2 {
        assert!(Instant::now() < deadline, "no frames received");
        let n = feed.read(&mut buf)?;
        assert!(n > 0, "feed closed early");
        received.extend_from_slice(&buf[..n]);
    }
    let head = String::from_utf8_lossy(&received[..64.min(received.len())]).to_string();
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    let text = String::from_utf8_lossy(&received);
    assert!(text.contains("multipart/x-mixed-replace; boundary=frame"));
    assert!(text.contains("--frame\r\nContent-Type: image/jpeg"));

    let (status, _) = api.json("POST", "/stop_video_feed/0", None)?;
    assert_eq!(status, 200);
    // The feed connection closes once the session has wound down.
    feed.read_to_end(&mut received)?;

    let (status, body) = api.json("GET", "/logs", None)?;
    assert_eq!(status, 200);
    let logs = body["logs"].as_array().unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["plat_nomor"], "B 1001 ZZZ");
    assert_eq!(logs[0]["is_target"], true);

    let path = PathBuf::from(logs[0]["screenshot_path"].as_str().unwrap());
    let name = path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("B_1001_ZZZ_"));
    let (status, jpeg) = api.request("GET", &format!("/captured_plates/{}", name), None)?;
    assert_eq!(status, 200);
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

    let ids = format!(r#"{{"ids":[{}]}}"#, logs[0]["id"]);
    let (status, body) = api.json("POST", "/delete_logs", Some(&ids))?;
    assert_eq!(status, 200);
    assert_eq!(body["deleted"], 1);
    assert!(!path.exists());

    let (status, _) = api.request("GET", &format!("/captured_plates/{}", name), None)?;
    assert_eq!(status, 404);
    Ok(())
}
