use anyhow::{anyhow, Result};
use percent_encoding::percent_decode_str;
use std::io::Read;
use std::net::TcpStream;
use std::time::Duration;

const MAX_REQUEST_BYTES: usize = 8192;
const READ_TIMEOUT: Duration = Duration::from_secs(2);

pub const DEFAULT_FILE: &str = "/index.html";

#[derive(Debug, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    /// Host header without any port.
    pub host: Option<String>,
}

pub fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
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
    parse_request(&String::from_utf8_lossy(&data))
}

/// Parse the request line and the Host header. Other headers are ignored.
pub fn parse_request(text: &str) -> Result<HttpRequest> {
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let version = parts.next().ok_or_else(|| anyhow!("missing protocol version"))?;
    if !version.starts_with("HTTP/") {
        return Err(anyhow!("malformed request line"));
    }

    let mut host = None;
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            if k.trim().eq_ignore_ascii_case("host") {
                let v = v.trim();
                let name = v.split(':').next().unwrap_or(v);
                if !name.is_empty() {
                    host = Some(name.to_string());
                }
            }
        }
    }

    let path = raw_path.split('?').next().unwrap_or(raw_path);
    Ok(HttpRequest {
        method: method.to_string(),
        path: route_path(&decode_path(path)?),
        host,
    })
}

/// Form-style decoding: `+` is a space, `%XX` is a byte, result must be UTF-8.
pub fn decode_path(raw: &str) -> Result<String> {
    let spaced = raw.replace('+', " ");
    let decoded = percent_decode_str(&spaced)
        .decode_utf8()
        .map_err(|_| anyhow!("path is not valid UTF-8"))?;
    Ok(decoded.into_owned())
}

/// Paths that could escape the web root or carry template syntax collapse to `/`.
pub fn sanitize(path: &str) -> &str {
    if path.contains("..") || path.contains('{') || path.contains('}') {
        "/"
    } else {
        path
    }
}

/// Sanitized path with `/` mapped to the default file.
pub fn route_path(decoded: &str) -> String {
    match sanitize(decoded) {
        "/" | "" => DEFAULT_FILE.to_string(),
        other => other.to_string(),
    }
}
