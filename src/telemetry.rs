//! Target telemetry to the robot controller.
//!
//! One datagram per processed frame:
//! `i32 camera_id, f64 fps, u8 has_target, f64 x, f64 y, f64 width, f64 height, f64 area`,
//! all big-endian. Delivery is best effort.

use anyhow::{anyhow, Context, Result};
use std::net::{SocketAddr, UdpSocket};

use crate::pipeline::DetectionResult;

pub const RECORD_LEN: usize = 4 + 8 + 1 + 5 * 8;

pub fn encode(result: &DetectionResult) -> [u8; RECORD_LEN] {
    let mut out = [0u8; RECORD_LEN];
    out[0..4].copy_from_slice(&result.camera_id.to_be_bytes());
    out[4..12].copy_from_slice(&result.fps.to_be_bytes());
    out[12] = u8::from(result.has_target);
    let mut pos = 13;
    for value in [
        result.x,
        result.y,
        result.target_width,
        result.target_height,
        result.target_area,
    ] {
        out[pos..pos + 8].copy_from_slice(&value.to_be_bytes());
        pos += 8;
    }
    out
}

pub fn decode(bytes: &[u8]) -> Result<DetectionResult> {
    if bytes.len() != RECORD_LEN {
        return Err(anyhow!(
            "telemetry record is {} bytes (expected {})",
            bytes.len(),
            RECORD_LEN
        ));
    }
    let f64_at = |pos: usize| {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[pos..pos + 8]);
        f64::from_be_bytes(buf)
    };
    let mut id = [0u8; 4];
    id.copy_from_slice(&bytes[0..4]);
    Ok(DetectionResult {
        camera_id: i32::from_be_bytes(id),
        fps: f64_at(4),
        has_target: bytes[12] != 0,
        x: f64_at(13),
        y: f64_at(21),
        target_width: f64_at(29),
        target_height: f64_at(37),
        target_area: f64_at(45),
    })
}

/// Destination for per-frame results. `send` never fails and never blocks
/// for long; delivery problems stay inside the sink.
pub trait TelemetrySink: Send + Sync {
    fn send(&self, result: &DetectionResult);
}

pub struct UdpTelemetry {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpTelemetry {
    pub fn new(target: SocketAddr) -> Result<Self> {
        let bind: SocketAddr = if target.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind).context("failed to bind telemetry socket")?;
        socket
            .set_nonblocking(true)
            .context("failed to make telemetry socket non-blocking")?;
        log::info!("telemetry: sending to {}", target);
        Ok(Self { socket, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl TelemetrySink for UdpTelemetry {
    fn send(&self, result: &DetectionResult) {
        if let Err(err) = self.socket.send_to(&encode(result), self.target) {
            log::debug!("telemetry: send to {} dropped: {}", self.target, err);
        }
    }
}
