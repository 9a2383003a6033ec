//! Operator HTTP surface: static UI assets plus the `/api` key space.
//!
//! GET only, one request per connection, connections handled one at a time
//! on the accept thread.

mod api;
mod request;

use anyhow::{anyhow, Context, Result};
use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::registry::Registry;

pub use api::{handle_api, parse_api, ApiRequest, ApiResponse, GetKey, SetKey, API_PREFIX};
pub use request::{decode_path, parse_request, read_request, route_path, sanitize, HttpRequest};

const RESPONSE_400: &str = "<h1>Bad request</h1>";
const RESPONSE_404: &str = "<h1>File not found</h1>";
const ACCEPT_POLL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug)]
pub struct WebConfig {
    pub addr: SocketAddr,
    pub root: PathBuf,
    pub server_name: String,
}

#[derive(Debug)]
pub struct WebHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl WebHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("config server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ConfigServer {
    cfg: WebConfig,
    registry: Arc<Registry>,
}

impl ConfigServer {
    pub fn new(cfg: WebConfig, registry: Arc<Registry>) -> Self {
        Self { cfg, registry }
    }

    pub fn spawn(self) -> Result<WebHandle> {
        let listener = TcpListener::bind(self.cfg.addr)
            .with_context(|| format!("failed to bind config server on {}", self.cfg.addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let root = self.cfg.root.display().to_string();
        let cfg = self.cfg;
        let registry = self.registry;
        let join = std::thread::Builder::new()
            .name("config-server".to_string())
            .spawn(move || {
                if let Err(err) = run_server(listener, &cfg, &registry, &shutdown_thread) {
                    log::error!("config server stopped: {}", err);
                }
            })?;

        log::info!("config server listening on {} (web root {})", addr, root);
        Ok(WebHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_server(
    listener: TcpListener,
    cfg: &WebConfig,
    registry: &Registry,
    shutdown: &AtomicBool,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(err) = handle_connection(stream, cfg, registry) {
                    log::warn!("config request from {} dropped: {:#}", peer, err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, cfg: &WebConfig, registry: &Registry) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = match read_request(&mut stream) {
        Ok(request) if request.method == "GET" => request,
        Ok(request) => {
            write_error(&mut stream, cfg, 400, RESPONSE_400)?;
            return Err(anyhow!("unsupported method {}", request.method));
        }
        Err(err) => {
            write_error(&mut stream, cfg, 400, RESPONSE_400)?;
            return Err(err);
        }
    };

    if request.path.starts_with(API_PREFIX) {
        let host = request
            .host
            .clone()
            .unwrap_or_else(|| registry.hostname().to_string());
        let result = parse_api(&request.path).and_then(|api| handle_api(registry, &host, api));
        match result {
            Ok(ApiResponse::Text(body)) => {
                write_response(&mut stream, cfg, 200, "text/plain", body.as_bytes())
            }
            Ok(ApiResponse::Json(body)) => {
                write_response(&mut stream, cfg, 200, "application/json", body.as_bytes())
            }
            Err(err) => {
                write_error(&mut stream, cfg, 400, RESPONSE_400)?;
                Err(err.context(format!("bad api request {}", request.path)))
            }
        }
    } else {
        serve_file(&mut stream, cfg, &request.path)
    }
}

fn serve_file(stream: &mut TcpStream, cfg: &WebConfig, path: &str) -> Result<()> {
    let full = cfg.root.join(path.trim_start_matches('/'));
    match std::fs::read(&full) {
        Ok(body) => write_response(stream, cfg, 200, content_type(&full), &body),
        Err(_) => write_error(stream, cfg, 404, RESPONSE_404),
    }
}

pub fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("html") => "text/html",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        _ => "text/plain",
    }
}

fn write_error(stream: &mut TcpStream, cfg: &WebConfig, status: u16, body: &str) -> Result<()> {
    write_response(stream, cfg, status, "text/html", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    cfg: &WebConfig,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nServer: {server}\r\nConnection: close\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\n\r\n",
        status_line = status_line,
        server = cfg.server_name,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}
