use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};

use crate::camera::{Resolution, MAX_CAMERAS};
use crate::pipeline::{PipelineConfig, PipelineKind};

const DEFAULT_SERVER_CONFIG_PATH: &str = "server-config.dat";
const DEFAULT_WEB_ROOT: &str = "web";
const DEFAULT_HOSTNAME_PATH: &str = "/etc/hostname";
const DEFAULT_HOSTNAME: &str = "vision.local";
const DEFAULT_STREAM_SERVER_NAME: &str = "visiond";
#[cfg(feature = "camera-v4l2")]
const DEFAULT_CAMERAS: [&str; 2] = ["/dev/video0", "/dev/video1"];
#[cfg(not(feature = "camera-v4l2"))]
const DEFAULT_CAMERAS: [&str; 1] = ["stub://front_camera"];

// Twelve big-endian i32 fields precede the robot address.
const SERVER_CONFIG_INT_FIELDS: usize = 12;

/// How results reach the robot controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkMode {
    Udp,
    NetworkTables,
    Unknown(i32),
}

impl NetworkMode {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => NetworkMode::Udp,
            1 => NetworkMode::NetworkTables,
            other => NetworkMode::Unknown(other),
        }
    }

    pub fn as_raw(&self) -> i32 {
        match self {
            NetworkMode::Udp => 0,
            NetworkMode::NetworkTables => 1,
            NetworkMode::Unknown(raw) => *raw,
        }
    }
}

/// Persisted server record, stored as big-endian binary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub target_fps: i32,
    pub web_port: i32,
    pub stream_port1: i32,
    pub stream_port2: i32,
    pub robot_port: i32,
    pub network_mode: NetworkMode,
    pub team_number: i32,
    pub processing_width: i32,
    pub processing_height: i32,
    pub stream_width: i32,
    pub stream_height: i32,
    pub stream_quality: i32,
    pub robot_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            target_fps: 30,
            web_port: 5801,
            stream_port1: 5802,
            stream_port2: 5803,
            robot_port: 5800,
            network_mode: NetworkMode::Udp,
            team_number: 0,
            processing_width: 320,
            processing_height: 240,
            stream_width: 160,
            stream_height: 120,
            stream_quality: 50,
            robot_address: "127.0.0.1".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let address = self.robot_address.as_bytes();
        let len = u16::try_from(address.len())
            .map_err(|_| anyhow!("robot address is {} bytes (max 65535)", address.len()))?;
        let mut out = Vec::with_capacity(SERVER_CONFIG_INT_FIELDS * 4 + 2 + address.len());
        for value in [
            self.target_fps,
            self.web_port,
            self.stream_port1,
            self.stream_port2,
            self.robot_port,
            self.network_mode.as_raw(),
            self.team_number,
            self.processing_width,
            self.processing_height,
            self.stream_width,
            self.stream_height,
            self.stream_quality,
        ] {
            out.extend_from_slice(&value.to_be_bytes());
        }
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(address);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = RecordReader { bytes, pos: 0 };
        let mut ints = [0i32; SERVER_CONFIG_INT_FIELDS];
        for value in ints.iter_mut() {
            *value = reader.read_i32()?;
        }
        let robot_address = reader.read_string()?;
        let [target_fps, web_port, stream_port1, stream_port2, robot_port, network_mode, team_number, processing_width, processing_height, stream_width, stream_height, stream_quality] =
            ints;
        Ok(Self {
            target_fps,
            web_port,
            stream_port1,
            stream_port2,
            robot_port,
            network_mode: NetworkMode::from_raw(network_mode),
            team_number,
            processing_width,
            processing_height,
            stream_width,
            stream_height,
            stream_quality,
            robot_address,
        })
    }

    /// Read the record at `path`. A missing or unreadable record is replaced
    /// by defaults, which are written back; failing to write is only a warning.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        let loaded = std::fs::read(path)
            .with_context(|| format!("failed to read {}", path.display()))
            .and_then(|bytes| Self::decode(&bytes));
        let cfg = match loaded {
            Ok(cfg) => cfg,
            Err(err) => {
                log::info!("creating new server config at {} ({:#})", path.display(), err);
                let cfg = Self::default();
                if let Err(err) = cfg.save(path) {
                    log::warn!("unable to create server config (using defaults): {:#}", err);
                }
                cfg
            }
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = self.encode()?;
        std::fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_fps <= 0 {
            return Err(anyhow!("target fps must be positive (got {})", self.target_fps));
        }
        for (name, port) in [
            ("web port", self.web_port),
            ("stream port 1", self.stream_port1),
            ("stream port 2", self.stream_port2),
            ("robot port", self.robot_port),
        ] {
            u16::try_from(port).map_err(|_| anyhow!("{} {} is not a valid port", name, port))?;
        }
        for (name, w, h) in [
            ("processing", self.processing_width, self.processing_height),
            ("stream", self.stream_width, self.stream_height),
        ] {
            if w <= 0 || h <= 0 {
                return Err(anyhow!("{} resolution {}x{} must be positive", name, w, h));
            }
        }
        if !(1..=100).contains(&self.stream_quality) {
            return Err(anyhow!(
                "stream compression quality must be 1..=100 (got {})",
                self.stream_quality
            ));
        }
        Ok(())
    }

    pub fn web_port(&self) -> u16 {
        port(self.web_port)
    }

    /// Stream port for camera `index` (0 or 1).
    pub fn stream_port(&self, index: usize) -> Option<u16> {
        match index {
            0 => Some(port(self.stream_port1)),
            1 => Some(port(self.stream_port2)),
            _ => None,
        }
    }

    pub fn processing_resolution(&self) -> Resolution {
        Resolution::new(dim(self.processing_width), dim(self.processing_height))
    }

    pub fn stream_resolution(&self) -> Resolution {
        Resolution::new(dim(self.stream_width), dim(self.stream_height))
    }

    pub fn stream_quality(&self) -> u8 {
        self.stream_quality.clamp(1, 100) as u8
    }

    /// Robot controller endpoint. The address may be an IP literal or a
    /// host name (e.g. `roborio-3555-frc.local`); names are resolved here.
    pub fn robot_addr(&self) -> Result<SocketAddr> {
        let host = self.robot_address.trim();
        (host, port(self.robot_port))
            .to_socket_addrs()
            .with_context(|| format!("failed to resolve robot address '{}'", host))?
            .next()
            .ok_or_else(|| anyhow!("robot address '{}' resolved to nothing", host))
    }
}

impl std::fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "fps={} web={} streams={}/{} robot={}:{} mode={:?} team={} processing={}x{} stream={}x{}@{}",
            self.target_fps,
            self.web_port,
            self.stream_port1,
            self.stream_port2,
            self.robot_address,
            self.robot_port,
            self.network_mode,
            self.team_number,
            self.processing_width,
            self.processing_height,
            self.stream_width,
            self.stream_height,
            self.stream_quality
        )
    }
}

// Callers run `validate` first; out-of-range values collapse to 0.
fn port(raw: i32) -> u16 {
    u16::try_from(raw).unwrap_or(0)
}

fn dim(raw: i32) -> u32 {
    u32::try_from(raw).unwrap_or(0)
}

struct RecordReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| anyhow!("server config truncated at byte {}", self.pos))?;
        self.pos = end;
        Ok(slice)
    }

    fn read_i32(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(i32::from_be_bytes(buf))
    }

    fn read_string(&mut self) -> Result<String> {
        let mut len = [0u8; 2];
        len.copy_from_slice(self.take(2)?);
        let raw = self.take(usize::from(u16::from_be_bytes(len)))?;
        String::from_utf8(raw.to_vec()).map_err(|_| anyhow!("robot address is not valid UTF-8"))
    }
}

#[derive(Debug, Deserialize, Default)]
struct VisiondSettingsFile {
    server_config_path: Option<PathBuf>,
    web_root: Option<PathBuf>,
    hostname_path: Option<PathBuf>,
    cameras: Option<Vec<String>>,
    pipeline: Option<String>,
    presets_path: Option<PathBuf>,
    camera: Option<CameraSettingsFile>,
    stream: Option<StreamSettingsFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraSettingsFile {
    apply_exposure: Option<bool>,
    apply_white_balance: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamSettingsFile {
    server_name: Option<String>,
}

/// Values given on the command line; they win over file and environment.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub web_root: Option<PathBuf>,
    pub server_config_path: Option<PathBuf>,
}

/// Daemon settings: where things live and which devices to open.
#[derive(Debug, Clone)]
pub struct VisiondSettings {
    pub server_config_path: PathBuf,
    pub web_root: PathBuf,
    pub hostname_path: PathBuf,
    pub cameras: Vec<String>,
    pub pipeline: PipelineKind,
    pub presets_path: Option<PathBuf>,
    pub apply_exposure: bool,
    pub apply_white_balance: bool,
    pub stream_server_name: String,
}

impl VisiondSettings {
    /// Load from `path` (or `VISION_CONFIG` when `path` is None), then apply
    /// environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, SettingsOverrides::default())
    }

    /// Load as `load` does, applying command-line overrides after the
    /// environment and before validation.
    pub fn load_with(path: Option<&Path>, overrides: SettingsOverrides) -> Result<Self> {
        let env_path = std::env::var("VISION_CONFIG").ok().map(PathBuf::from);
        let file_cfg = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Some(read_settings_file(&path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        if let Some(root) = overrides.web_root {
            cfg.web_root = root;
        }
        if let Some(path) = overrides.server_config_path {
            cfg.server_config_path = path;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: VisiondSettingsFile) -> Result<Self> {
        let pipeline = match file.pipeline.as_deref() {
            Some(name) => name.parse()?,
            None => PipelineKind::default(),
        };
        Ok(Self {
            server_config_path: file
                .server_config_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SERVER_CONFIG_PATH)),
            web_root: file
                .web_root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WEB_ROOT)),
            hostname_path: file
                .hostname_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_HOSTNAME_PATH)),
            cameras: file
                .cameras
                .unwrap_or_else(|| DEFAULT_CAMERAS.iter().map(|c| c.to_string()).collect()),
            pipeline,
            presets_path: file.presets_path,
            apply_exposure: file
                .camera
                .as_ref()
                .and_then(|camera| camera.apply_exposure)
                .unwrap_or(false),
            apply_white_balance: file
                .camera
                .as_ref()
                .and_then(|camera| camera.apply_white_balance)
                .unwrap_or(false),
            stream_server_name: file
                .stream
                .and_then(|stream| stream.server_name)
                .unwrap_or_else(|| DEFAULT_STREAM_SERVER_NAME.to_string()),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("VISION_SERVER_CONFIG") {
            if !path.trim().is_empty() {
                self.server_config_path = PathBuf::from(path);
            }
        }
        if let Ok(root) = std::env::var("VISION_WEB_ROOT") {
            if !root.trim().is_empty() {
                self.web_root = PathBuf::from(root);
            }
        }
        if let Ok(cameras) = std::env::var("VISION_CAMERAS") {
            let parsed = split_csv(&cameras);
            if !parsed.is_empty() {
                self.cameras = parsed;
            }
        }
        if let Ok(pipeline) = std::env::var("VISION_PIPELINE") {
            if !pipeline.trim().is_empty() {
                self.pipeline = pipeline
                    .parse()
                    .map_err(|e| anyhow!("VISION_PIPELINE: {}", e))?;
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.cameras.is_empty() {
            return Err(anyhow!("at least one camera device must be configured"));
        }
        if self.cameras.len() > MAX_CAMERAS {
            log::warn!(
                "{} camera devices configured; only the first {} are probed",
                self.cameras.len(),
                MAX_CAMERAS
            );
            self.cameras.truncate(MAX_CAMERAS);
        }
        if self.stream_server_name.trim().is_empty() || self.stream_server_name.contains(['\r', '\n']) {
            return Err(anyhow!("stream.server_name must be a single non-empty line"));
        }
        self.check_web_root()
    }

    /// The config server has nothing to serve without its web root.
    fn check_web_root(&self) -> Result<()> {
        let meta = std::fs::metadata(&self.web_root)
            .with_context(|| format!("web root {} is missing", self.web_root.display()))?;
        if !meta.is_dir() {
            return Err(anyhow!("web root {} is not a directory", self.web_root.display()));
        }
        Ok(())
    }
}

fn read_settings_file(path: &Path) -> Result<VisiondSettingsFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

/// One entry of the presets file.
#[derive(Debug, Deserialize)]
pub struct PipelinePreset {
    pub slot: usize,
    #[serde(flatten)]
    pub config: PipelineConfig,
}

/// Read pipeline slot presets from a JSON array.
pub fn load_presets(path: &Path) -> Result<Vec<PipelinePreset>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read presets {}: {}", path.display(), e))?;
    serde_json::from_str(&raw).map_err(|e| anyhow!("invalid presets {}: {}", path.display(), e))
}

/// `<first line of hostname file>.local`, or a fixed default.
pub fn probe_hostname(path: &Path) -> String {
    let name = std::fs::read_to_string(path)
        .ok()
        .and_then(|raw| raw.lines().next().map(|line| line.trim().to_string()))
        .filter(|line| !line.is_empty());
    match name {
        Some(name) => format!("{}.local", name),
        None => {
            log::warn!(
                "unable to read hostname from {} (using {})",
                path.display(),
                DEFAULT_HOSTNAME
            );
            DEFAULT_HOSTNAME.to_string()
        }
    }
}
