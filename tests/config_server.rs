use anyhow::Result;
use serde_json::Value;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use tempfile::tempdir;
use vision_coprocessor::config::ServerConfig;
use vision_coprocessor::registry::Registry;
use vision_coprocessor::web::{ConfigServer, WebConfig, WebHandle};

fn read_response(stream: &mut TcpStream) -> Result<(String, String)> {
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    let mut parts = response.splitn(2, "\r\n\r\n");
    let headers = parts.next().unwrap_or("").to_string();
    let body = parts.next().unwrap_or("").to_string();
    Ok((headers, body))
}

struct TestServer {
    _dir: tempfile::TempDir,
    registry: Arc<Registry>,
    handle: Option<WebHandle>,
}

impl TestServer {
    fn new() -> Result<Self> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("index.html"), "<html>operator</html>")?;
        std::fs::write(dir.path().join("style.css"), "body {}")?;
        std::fs::write(dir.path().join("app.js"), "init();")?;

        let registry = Arc::new(Registry::new(
            1,
            "vision.local".to_string(),
            ServerConfig::default(),
        ));
        let handle = ConfigServer::new(
            WebConfig {
                addr: SocketAddr::from(([127, 0, 0, 1], 0)),
                root: dir.path().to_path_buf(),
                server_name: "visiond-test".to_string(),
            },
            registry.clone(),
        )
        .spawn()?;

        Ok(Self {
            _dir: dir,
            registry,
            handle: Some(handle),
        })
    }

    fn get(&self, request: &str) -> Result<(String, String)> {
        let addr = self
            .handle
            .as_ref()
            .expect("test server handle should be initialized")
            .addr;
        let mut stream = TcpStream::connect(addr)?;
        stream.write_all(request.as_bytes())?;
        read_response(&mut stream)
    }

    fn get_path(&self, path: &str) -> Result<(String, String)> {
        self.get(&format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n"))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop().expect("failed to stop config server");
        }
    }
}

#[test]
fn default_brightness_is_readable() -> Result<()> {
    let server = TestServer::new()?;
    let (headers, body) = server.get_path("/api/get/pipeline/3/brightness")?;
    assert!(headers.starts_with("HTTP/1.1 200 OK"));
    assert!(headers.contains("Server: visiond-test"));
    assert!(headers.contains("Connection: close"));
    assert!(headers.contains("Content-Type: text/plain"));
    assert_eq!(body, "64");
    Ok(())
}

#[test]
fn traversal_serves_index() -> Result<()> {
    let server = TestServer::new()?;
    let (headers, body) = server.get_path("/../../etc/passwd")?;
    assert!(headers.contains("200 OK"));
    assert!(headers.contains("Content-Type: text/html"));
    assert_eq!(body, "<html>operator</html>");

    let (_, body) = server.get_path("/%7Bindex%7D.html")?;
    assert_eq!(body, "<html>operator</html>");
    Ok(())
}

#[test]
fn static_files_carry_content_type() -> Result<()> {
    let server = TestServer::new()?;
    let (headers, body) = server.get_path("/style.css")?;
    assert!(headers.contains("Content-Type: text/css"));
    assert!(headers.contains("Content-Length: 7"));
    assert_eq!(body, "body {}");

    let (headers, _) = server.get_path("/app.js")?;
    assert!(headers.contains("Content-Type: text/javascript"));
    Ok(())
}

#[test]
fn missing_file_is_404() -> Result<()> {
    let server = TestServer::new()?;
    let (headers, body) = server.get_path("/missing.html")?;
    assert!(headers.starts_with("HTTP/1.1 404 Not Found"));
    assert_eq!(body, "<h1>File not found</h1>");
    Ok(())
}

#[test]
fn unknown_keys_and_methods_are_400() -> Result<()> {
    let server = TestServer::new()?;
    for path in [
        "/api/get/colour",
        "/api/get/pipeline/11/brightness",
        "/api/get/pipeline/0/sharpness",
        "/api/frobnicate/x",
    ] {
        let (headers, body) = server.get_path(path)?;
        assert!(headers.starts_with("HTTP/1.1 400 Bad Request"), "{path}");
        assert_eq!(body, "<h1>Bad request</h1>");
    }

    let (headers, _) = server.get("POST /api/get/hostname HTTP/1.1\r\n\r\n")?;
    assert!(headers.starts_with("HTTP/1.1 400 Bad Request"));
    let (headers, _) = server.get("nonsense\r\n\r\n")?;
    assert!(headers.starts_with("HTTP/1.1 400 Bad Request"));
    Ok(())
}

#[test]
fn reads_do_not_mutate_and_sets_apply() -> Result<()> {
    let server = TestServer::new()?;
    let before = server.registry.pipeline(2)?;
    server.get_path("/api/get/pipeline/2/brightness")?;
    assert_eq!(server.registry.pipeline(2)?, before);

    let (headers, body) = server.get_path("/api/set/pipeline/2/pipeline-mode/PROCESSING")?;
    assert!(headers.contains("200 OK"));
    assert_eq!(body, "OK");
    let (_, body) = server.get_path("/api/get/pipeline/2/pipeline-mode")?;
    assert_eq!(body, "PROCESSING");

    let (headers, _) = server.get_path("/api/set/pipeline/2/contour-area-min/1.5")?;
    assert!(headers.contains("400 Bad Request"));
    assert_eq!(server.registry.pipeline(2)?.contour_area.min, 0.0);

    let (_, body) = server.get_path("/api/set/camera/0/pipeline/2")?;
    assert_eq!(body, "OK");
    let (_, body) = server.get_path("/api/get/camera/0/pipeline")?;
    assert_eq!(body, "2");
    Ok(())
}

#[test]
fn identity_and_stream_keys() -> Result<()> {
    let server = TestServer::new()?;
    let (_, body) = server.get_path("/api/get/camera-count")?;
    assert_eq!(body, "1");
    let (_, body) = server.get_path("/api/get/hostname")?;
    assert_eq!(body, "vision.local");
    let (_, body) = server.get_path("/api/get/version")?;
    assert_eq!(body, env!("CARGO_PKG_VERSION"));

    let (_, body) = server.get("GET /api/get/camera-stream/0 HTTP/1.1\r\nHost: 10.35.55.11:5801\r\n\r\n")?;
    assert_eq!(body, "http://10.35.55.11:5802");
    let (_, body) = server.get("GET /api/get/camera-stream/0 HTTP/1.1\r\n\r\n")?;
    assert_eq!(body, "http://vision.local:5802");
    let (_, body) = server.get_path("/api/get/camera-stream/1")?;
    assert_eq!(body, "null");
    Ok(())
}

#[test]
fn whole_slot_reads_as_json() -> Result<()> {
    let server = TestServer::new()?;
    let (headers, body) = server.get_path("/api/get/pipeline/0")?;
    assert!(headers.contains("Content-Type: application/json"));
    let value: Value = serde_json::from_str(&body)?;
    assert_eq!(value["pipeline_mode"], "DRIVER");
    assert_eq!(value["brightness"], 64);
    assert_eq!(value["contour_ratio"]["max"], 1.5);
    Ok(())
}
