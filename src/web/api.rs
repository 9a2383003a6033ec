//! `/api/...` key space.
//!
//! Paths parse into `ApiRequest` first; anything that doesn't parse is a
//! bad request before the Registry is touched.

use anyhow::{anyhow, Result};

use crate::pipeline::PipelineField;
use crate::registry::Registry;

pub const API_PREFIX: &str = "/api";

#[derive(Debug, PartialEq)]
pub enum GetKey {
    CameraCount,
    Hostname,
    Version,
    CameraStream(usize),
    CameraPipeline(usize),
    Pipeline(usize),
    PipelineField(usize, PipelineField),
}

#[derive(Debug, PartialEq)]
pub enum SetKey {
    PipelineField {
        slot: usize,
        field: PipelineField,
        value: String,
    },
    CameraPipeline {
        camera: usize,
        slot: usize,
    },
}

#[derive(Debug, PartialEq)]
pub enum ApiRequest {
    Get(GetKey),
    Set(SetKey),
}

#[derive(Debug, PartialEq)]
pub enum ApiResponse {
    Text(String),
    Json(String),
}

fn index(raw: &str) -> Result<usize> {
    raw.parse()
        .map_err(|_| anyhow!("'{}' is not an index", raw))
}

fn field(raw: &str) -> Result<PipelineField> {
    raw.parse().map_err(|e| anyhow!("{}", e))
}

/// Parse a decoded path starting with `/api`.
pub fn parse_api(path: &str) -> Result<ApiRequest> {
    let rest = path
        .strip_prefix(API_PREFIX)
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(|| anyhow!("not an api path"))?;
    let parts: Vec<&str> = rest.split('/').collect();
    let request = match parts.as_slice() {
        ["get", "camera-count"] => ApiRequest::Get(GetKey::CameraCount),
        ["get", "hostname"] => ApiRequest::Get(GetKey::Hostname),
        ["get", "version"] => ApiRequest::Get(GetKey::Version),
        ["get", "camera-stream", id] => ApiRequest::Get(GetKey::CameraStream(index(id)?)),
        ["get", "camera", id, "pipeline"] => ApiRequest::Get(GetKey::CameraPipeline(index(id)?)),
        ["get", "pipeline", slot] => ApiRequest::Get(GetKey::Pipeline(index(slot)?)),
        ["get", "pipeline", slot, name] => {
            ApiRequest::Get(GetKey::PipelineField(index(slot)?, field(name)?))
        }
        ["set", "pipeline", slot, name, value] => ApiRequest::Set(SetKey::PipelineField {
            slot: index(slot)?,
            field: field(name)?,
            value: value.to_string(),
        }),
        ["set", "camera", id, "pipeline", slot] => ApiRequest::Set(SetKey::CameraPipeline {
            camera: index(id)?,
            slot: index(slot)?,
        }),
        _ => return Err(anyhow!("unknown api command '{}'", rest)),
    };
    Ok(request)
}

/// Stream URL for `camera`, or `None` when it doesn't exist.
pub fn camera_stream_url(registry: &Registry, host: &str, camera: usize) -> Option<String> {
    if camera >= registry.camera_count() {
        return None;
    }
    let port = registry.server_config().stream_port(camera)?;
    Some(format!("http://{}:{}", host, port))
}

/// Reads never mutate; every failure is a bad request.
pub fn handle_api(registry: &Registry, host: &str, request: ApiRequest) -> Result<ApiResponse> {
    let response = match request {
        ApiRequest::Get(key) => match key {
            GetKey::CameraCount => ApiResponse::Text(registry.camera_count().to_string()),
            GetKey::Hostname => ApiResponse::Text(registry.hostname().to_string()),
            GetKey::Version => ApiResponse::Text(env!("CARGO_PKG_VERSION").to_string()),
            GetKey::CameraStream(camera) => ApiResponse::Text(
                camera_stream_url(registry, host, camera).unwrap_or_else(|| "null".to_string()),
            ),
            GetKey::CameraPipeline(camera) => {
                ApiResponse::Text(registry.active_slot(camera)?.to_string())
            }
            GetKey::Pipeline(slot) => {
                ApiResponse::Json(serde_json::to_string(&registry.pipeline(slot)?)?)
            }
            GetKey::PipelineField(slot, field) => {
                ApiResponse::Text(registry.pipeline_field(slot, field)?)
            }
        },
        ApiRequest::Set(key) => {
            match key {
                SetKey::PipelineField { slot, field, value } => {
                    registry.set_field(slot, field, &value)?
                }
                SetKey::CameraPipeline { camera, slot } => registry.select_pipeline(camera, slot)?,
            }
            ApiResponse::Text("OK".to_string())
        }
    };
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn registry() -> Registry {
        Registry::new(1, "vision.local".to_string(), ServerConfig::default())
    }

    #[test]
    fn parses_known_keys() -> Result<()> {
        assert_eq!(
            parse_api("/api/get/pipeline/3/brightness")?,
            ApiRequest::Get(GetKey::PipelineField(3, PipelineField::Brightness))
        );
        assert_eq!(
            parse_api("/api/set/camera/0/pipeline/4")?,
            ApiRequest::Set(SetKey::CameraPipeline { camera: 0, slot: 4 })
        );
        assert_eq!(parse_api("/api/get/version")?, ApiRequest::Get(GetKey::Version));
        Ok(())
    }

    #[test]
    fn rejects_unknown_keys() {
        for path in [
            "/api",
            "/api/",
            "/api/get",
            "/api/get/colour",
            "/api/get/pipeline/x/brightness",
            "/api/get/pipeline/1/sharpness",
            "/api/delete/pipeline/1",
            "/apiget/hostname",
        ] {
            assert!(parse_api(path).is_err(), "{path} should be rejected");
        }
    }

    #[test]
    fn reads_default_brightness() -> Result<()> {
        let reg = registry();
        let req = parse_api("/api/get/pipeline/3/brightness")?;
        assert_eq!(handle_api(&reg, "h", req)?, ApiResponse::Text("64".into()));
        Ok(())
    }

    #[test]
    fn stream_url_uses_host_and_camera_port() -> Result<()> {
        let reg = registry();
        let req = parse_api("/api/get/camera-stream/0")?;
        assert_eq!(
            handle_api(&reg, "10.35.55.11", req)?,
            ApiResponse::Text("http://10.35.55.11:5802".into())
        );
        let req = parse_api("/api/get/camera-stream/1")?;
        assert_eq!(handle_api(&reg, "h", req)?, ApiResponse::Text("null".into()));
        Ok(())
    }

    #[test]
    fn failed_set_reports_error_and_keeps_value() -> Result<()> {
        let reg = registry();
        let req = parse_api("/api/set/pipeline/0/brightness/400")?;
        assert!(handle_api(&reg, "h", req).is_err());
        assert_eq!(reg.pipeline(0)?.brightness, 64);

        let req = parse_api("/api/set/pipeline/0/brightness/90")?;
        assert_eq!(handle_api(&reg, "h", req)?, ApiResponse::Text("OK".into()));
        assert_eq!(reg.pipeline(0)?.brightness, 90);
        Ok(())
    }
}
