//! visiond - vision coprocessor daemon
//!
//! Startup:
//! 1. Load daemon settings and the persisted server record
//! 2. Probe cameras (at least one required) and the hostname
//! 3. Build the Registry and apply pipeline presets
//! 4. Bring cameras up at the target frame rate and processing resolution
//! 5. Start one stream server and one vision loop per camera
//! 6. Start the config server
//!
//! Runs until Ctrl-C or until a vision loop fails.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use vision_coprocessor::{
    camera::{configure_camera, probe_cameras},
    config::{load_presets, probe_hostname, NetworkMode, SettingsOverrides},
    pipeline::CameraControls,
    stream::{StreamConfig, StreamHandle},
    web::{WebConfig, WebHandle},
    CaptureDevice, ConfigServer, Registry, ServerConfig, StreamServer, TelemetrySink,
    UdpTelemetry, VisionLoop, VisionLoopHandle, VisiondSettings,
};

const SUPERVISE_POLL: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(author, version, about = "On-robot vision coprocessor")]
struct Args {
    /// Daemon settings file (TOML).
    #[arg(long, env = "VISION_CONFIG")]
    config: Option<PathBuf>,

    /// Directory served by the config server.
    #[arg(long)]
    web_root: Option<PathBuf>,

    /// Persisted server record (created with defaults when missing).
    #[arg(long)]
    server_config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Err(err) = run(args) {
        log::error!("visiond: {:#}", err);
        return Err(err);
    }
    Ok(())
}

fn run(args: Args) -> Result<()> {
    log::info!("visiond {}", env!("CARGO_PKG_VERSION"));

    let settings = VisiondSettings::load_with(
        args.config.as_deref(),
        SettingsOverrides {
            web_root: args.web_root,
            server_config_path: args.server_config,
        },
    )?;

    let server_config = ServerConfig::load_or_create(&settings.server_config_path)?;
    log::info!("server config: {}", server_config);

    let mut cameras = probe_cameras(&settings.cameras);
    if cameras.is_empty() {
        return Err(anyhow!("no cameras were detected"));
    }
    log::info!("{} camera(s) detected", cameras.len());

    let hostname = probe_hostname(&settings.hostname_path);
    let registry = Arc::new(Registry::new(
        cameras.len(),
        hostname,
        server_config.clone(),
    ));
    if let Some(path) = &settings.presets_path {
        for preset in load_presets(path)? {
            registry
                .replace_pipeline(preset.slot, preset.config)
                .with_context(|| format!("preset for pipeline {}", preset.slot))?;
            log::info!("pipeline {}: preset loaded", preset.slot);
        }
    }

    let fps = u32::try_from(server_config.target_fps)?;
    for camera in cameras.iter_mut() {
        configure_camera(camera, fps, server_config.processing_resolution()).with_context(
            || format!("{} does not support the requested settings", camera.name()),
        )?;
    }

    let telemetry = start_telemetry(&server_config)?;
    let controls = CameraControls {
        apply_exposure: settings.apply_exposure,
        apply_white_balance: settings.apply_white_balance,
    };

    let mut streams: Vec<StreamHandle> = Vec::new();
    let mut loops: Vec<VisionLoopHandle> = Vec::new();
    for (index, camera) in cameras.into_iter().enumerate() {
        let port = server_config
            .stream_port(index)
            .ok_or_else(|| anyhow!("no stream port for camera {}", index))?;
        let stream = StreamServer::new(StreamConfig {
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
            server_name: settings.stream_server_name.clone(),
            quality: server_config.stream_quality(),
        })
        .spawn()?;

        let pipeline = settings.pipeline.build(camera.id(), controls);
        let mut vision = VisionLoop::new(camera, pipeline, registry.clone())
            .with_stream(Arc::new(stream.publisher()), server_config.stream_resolution());
        if let Some(telemetry) = &telemetry {
            vision = vision.with_telemetry(telemetry.clone());
        }
        loops.push(vision.spawn()?);
        streams.push(stream);
    }

    let web = ConfigServer::new(
        WebConfig {
            addr: SocketAddr::from(([0, 0, 0, 0], server_config.web_port())),
            root: settings.web_root.clone(),
            server_name: settings.stream_server_name.clone(),
        },
        registry.clone(),
    )
    .spawn()?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    log::info!("visiond running with {} camera(s); Ctrl-C to stop", loops.len());
    loop {
        match rx.recv_timeout(SUPERVISE_POLL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                log::info!("shutdown signal received");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                if let Some(done) = loops.iter().find(|handle| handle.is_finished()) {
                    log::error!("{}: vision loop exited, shutting down", done.name());
                    break;
                }
            }
        }
    }

    for handle in &loops {
        handle.request_stop();
    }
    let mut failure = None;
    for handle in loops {
        let name = handle.name().to_string();
        if let Err(err) = handle.join() {
            log::error!("{}: {:#}", name, err);
            failure.get_or_insert(err);
        }
    }
    if let Err(err) = stop_servers(streams, web) {
        failure.get_or_insert(err);
    }

    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Stop every server, even when an earlier one fails, and return the first
/// failure.
fn stop_servers(streams: Vec<StreamHandle>, web: WebHandle) -> Result<()> {
    let mut results: Vec<Result<()>> = streams.into_iter().map(StreamHandle::stop).collect();
    results.push(web.stop());

    let mut first = None;
    for result in results {
        if let Err(err) = result {
            log::error!("shutdown: {:#}", err);
            first.get_or_insert(err);
        }
    }
    match first {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn start_telemetry(server_config: &ServerConfig) -> Result<Option<Arc<dyn TelemetrySink>>> {
    match server_config.network_mode {
        NetworkMode::Udp => {
            let sink = UdpTelemetry::new(server_config.robot_addr()?)?;
            Ok(Some(Arc::new(sink)))
        }
        NetworkMode::NetworkTables => {
            log::warn!("network mode NetworkTables is not supported; telemetry disabled");
            Ok(None)
        }
        NetworkMode::Unknown(raw) => {
            log::warn!("unknown network mode {}; telemetry disabled", raw);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream;

    fn stream_server() -> Result<StreamHandle> {
        StreamServer::new(StreamConfig {
            addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            server_name: "visiond-test".to_string(),
            quality: 50,
        })
        .spawn()
    }

    #[test]
    fn stop_servers_releases_every_listener() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let registry = Arc::new(Registry::new(2, "vision.local".to_string(), ServerConfig::default()));
        let streams = vec![stream_server()?, stream_server()?];
        let web = ConfigServer::new(
            WebConfig {
                addr: SocketAddr::from(([127, 0, 0, 1], 0)),
                root: dir.path().to_path_buf(),
                server_name: "visiond-test".to_string(),
            },
            registry,
        )
        .spawn()?;

        let mut addrs: Vec<SocketAddr> = streams.iter().map(|s| s.addr).collect();
        addrs.push(web.addr);
        stop_servers(streams, web)?;

        for addr in addrs {
            assert!(TcpStream::connect(addr).is_err(), "{addr} still accepting");
        }
        Ok(())
    }
}
