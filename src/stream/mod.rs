//! MJPEG stream server.
//!
//! One server per camera. Viewers connect, get the multipart preamble at
//! once, then one JPEG part per published frame until they disconnect.
//!
//! Threads:
//! - accept loop: registers clients, never writes to them
//! - dispatcher: takes the newest published frame, overlays and encodes it
//!   once, and hands the part to every client
//! - one writer per client: writes the preamble, then parts fed through a
//!   depth-1 queue
//!
//! A client whose queue is still full misses that frame. A client whose
//! write fails is flagged dead and removed on the next dispatch.

use anyhow::{anyhow, Context, Result};
use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::frame::{draw_crosshair, draw_fps_overlay, Frame};

pub const BOUNDARY: &str = "--BoundaryString";

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const DISPATCH_POLL: Duration = Duration::from_millis(100);

/// Response header written to every viewer on accept.
pub fn preamble(server_name: &str) -> String {
    format!(
        "HTTP/1.0 200 OK\r\nServer: {}\r\nContent-Type: multipart/x-mixed-replace; boundary={}\r\n\r\n",
        server_name, BOUNDARY
    )
}

/// One multipart part: boundary, part headers, JPEG bytes.
pub fn frame_part(jpeg: &[u8]) -> Vec<u8> {
    let header = format!(
        "{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        jpeg.len()
    );
    let mut part = Vec::with_capacity(header.len() + jpeg.len());
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part
}

pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(frame.image())
        .context("jpeg encode failed")?;
    Ok(out)
}

/// Where a VisionLoop delivers its annotated frames.
pub trait FrameSink: Send + Sync {
    /// Hand over one frame. Must return promptly regardless of viewers.
    fn push_frame(&self, frame: Frame, fps: f64);

    /// Viewers currently connected.
    fn client_count(&self) -> usize;
}

#[derive(Clone, Debug)]
pub struct StreamConfig {
    pub addr: SocketAddr,
    pub server_name: String,
    pub quality: u8,
}

pub struct StreamServer {
    cfg: StreamConfig,
}

struct StreamClient {
    peer: SocketAddr,
    queue: SyncSender<Arc<Vec<u8>>>,
    alive: Arc<AtomicBool>,
    socket: TcpStream,
}

#[derive(Default)]
struct Shared {
    latest: Mutex<Option<(Frame, f64)>>,
    ready: Condvar,
    clients: Mutex<Vec<StreamClient>>,
    shutdown: AtomicBool,
    frames_sent: AtomicU64,
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cloneable publishing side of a running server.
#[derive(Clone)]
pub struct StreamPublisher {
    shared: Arc<Shared>,
}

impl StreamPublisher {
    pub fn frames_sent(&self) -> u64 {
        self.shared.frames_sent.load(Ordering::Relaxed)
    }
}

impl FrameSink for StreamPublisher {
    fn push_frame(&self, frame: Frame, fps: f64) {
        // Latest frame wins; an undelivered older frame is replaced.
        *relock(&self.shared.latest) = Some((frame, fps));
        self.shared.ready.notify_one();
    }

    fn client_count(&self) -> usize {
        relock(&self.shared.clients).len()
    }
}

pub struct StreamHandle {
    pub addr: SocketAddr,
    publisher: StreamPublisher,
    joins: Vec<JoinHandle<()>>,
}

impl StreamHandle {
    pub fn publisher(&self) -> StreamPublisher {
        self.publisher.clone()
    }

    pub fn push_frame(&self, frame: Frame, fps: f64) {
        self.publisher.push_frame(frame, fps);
    }

    pub fn client_count(&self) -> usize {
        self.publisher.client_count()
    }

    pub fn stop(mut self) -> Result<()> {
        let shared = &self.publisher.shared;
        shared.shutdown.store(true, Ordering::SeqCst);
        shared.ready.notify_all();
        for join in self.joins.drain(..) {
            join.join()
                .map_err(|_| anyhow!("stream server thread panicked"))?;
        }
        for client in relock(&shared.clients).drain(..) {
            let _ = client.socket.shutdown(Shutdown::Both);
        }
        log::info!(
            "stream server {} stopped after {} frames",
            self.addr,
            self.publisher.frames_sent()
        );
        Ok(())
    }
}

impl StreamServer {
    pub fn new(cfg: StreamConfig) -> Self {
        Self { cfg }
    }

    pub fn spawn(self) -> Result<StreamHandle> {
        let listener = TcpListener::bind(self.cfg.addr)
            .with_context(|| format!("failed to bind stream server on {}", self.cfg.addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shared = Arc::new(Shared::default());
        let preamble = preamble(&self.cfg.server_name);

        let accept = {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name(format!("stream-accept-{}", addr.port()))
                .spawn(move || {
                    if let Err(err) = run_accept(listener, &shared, &preamble) {
                        log::error!("stream server {} stopped: {}", addr, err);
                    }
                })?
        };
        let dispatch = {
            let shared = shared.clone();
            let quality = self.cfg.quality;
            std::thread::Builder::new()
                .name(format!("stream-dispatch-{}", addr.port()))
                .spawn(move || run_dispatch(&shared, quality))?
        };

        log::info!("stream server listening on {}", addr);
        Ok(StreamHandle {
            addr,
            publisher: StreamPublisher { shared },
            joins: vec![accept, dispatch],
        })
    }
}

fn run_accept(listener: TcpListener, shared: &Shared, preamble: &str) -> Result<()> {
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(err) = register_client(stream, peer, shared, preamble) {
                    log::debug!("stream client {} rejected: {}", peer, err);
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

fn register_client(
    stream: TcpStream,
    peer: SocketAddr,
    shared: &Shared,
    preamble: &str,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;

    let (queue, parts) = mpsc::sync_channel(1);
    let alive = Arc::new(AtomicBool::new(true));
    let socket = stream.try_clone()?;
    {
        let alive = alive.clone();
        let preamble = preamble.to_string();
        std::thread::Builder::new()
            .name(format!("stream-client-{}", peer))
            .spawn(move || run_client(stream, peer, &preamble, parts, &alive))?;
    }
    relock(&shared.clients).push(StreamClient {
        peer,
        queue,
        alive,
        socket,
    });
    log::debug!("stream client {} connected", peer);
    Ok(())
}

fn run_client(
    mut stream: TcpStream,
    peer: SocketAddr,
    preamble: &str,
    parts: Receiver<Arc<Vec<u8>>>,
    alive: &AtomicBool,
) {
    if let Err(err) = stream.write_all(preamble.as_bytes()) {
        log::debug!("stream client {} dropped before preamble: {}", peer, err);
        alive.store(false, Ordering::SeqCst);
        let _ = stream.shutdown(Shutdown::Both);
        return;
    }
    // Ends when the dispatcher drops our queue or a write fails.
    while let Ok(part) = parts.recv() {
        if let Err(err) = stream.write_all(&part).and_then(|_| stream.flush()) {
            log::debug!("stream client {} dropped: {}", peer, err);
            alive.store(false, Ordering::SeqCst);
            break;
        }
    }
    let _ = stream.shutdown(Shutdown::Both);
}

fn run_dispatch(shared: &Shared, quality: u8) {
    loop {
        let next = {
            let mut latest = relock(&shared.latest);
            while latest.is_none() && !shared.shutdown.load(Ordering::SeqCst) {
                latest = match shared.ready.wait_timeout(latest, DISPATCH_POLL) {
                    Ok((guard, _)) => guard,
                    Err(poisoned) => poisoned.into_inner().0,
                };
            }
            latest.take()
        };
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        let Some((mut frame, fps)) = next else {
            continue;
        };

        draw_fps_overlay(&mut frame, fps);
        draw_crosshair(&mut frame);
        let part = match encode_jpeg(&frame, quality) {
            Ok(jpeg) => Arc::new(frame_part(&jpeg)),
            Err(err) => {
                log::warn!("stream: dropping frame {}: {:#}", frame.sequence(), err);
                continue;
            }
        };
        broadcast(shared, &part);
    }
}

fn broadcast(shared: &Shared, part: &Arc<Vec<u8>>) {
    let mut clients = relock(&shared.clients);
    clients.retain(|client| {
        if !client.alive.load(Ordering::SeqCst) {
            log::debug!("stream client {} removed", client.peer);
            return false;
        }
        match client.queue.try_send(part.clone()) {
            Ok(()) => true,
            // Still writing the previous part; this one is skipped.
            Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("stream client {} removed", client.peer);
                false
            }
        }
    });
    if !clients.is_empty() {
        shared.frames_sent.fetch_add(1, Ordering::Relaxed);
    }
}
