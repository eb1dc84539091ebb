use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

use crate::device::{ConfiguredSelector, DeviceOptions, DeviceSelector};
use crate::encode::EncodeFormat;
use crate::source::{FrameSourceConfig, DEFAULT_FILE_TYPE, DEFAULT_NAME};

const DEFAULT_DEVICE: &str = "auto";
const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_TARGET_FPS: u32 = 10;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StreamConfigFile {
    camera: Option<CameraConfigFile>,
    server: Option<ServerConfigFile>,
    stream: Option<StreamSectionFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    device: Option<String>,
    flip: Option<bool>,
    file_type: Option<String>,
    name: Option<String>,
    read_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ServerConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StreamSectionFile {
    target_fps: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub camera: CameraSettings,
    pub server_addr: String,
    pub target_fps: u32,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub device: DeviceSelector,
    pub flip: bool,
    pub file_type: String,
    pub name: String,
    pub read_timeout_ms: Option<u64>,
}

impl StreamConfig {
    /// Load from `STREAM_CAMERA_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("STREAM_CAMERA_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: StreamConfigFile) -> Self {
        let camera = file.camera.unwrap_or_default();
        let camera = CameraSettings {
            device: DeviceSelector::parse(camera.device.as_deref().unwrap_or(DEFAULT_DEVICE)),
            flip: camera.flip.unwrap_or(false),
            file_type: camera
                .file_type
                .unwrap_or_else(|| DEFAULT_FILE_TYPE.to_string()),
            name: camera.name.unwrap_or_else(|| DEFAULT_NAME.to_string()),
            read_timeout_ms: camera.read_timeout_ms,
        };
        let server_addr = file
            .server
            .and_then(|server| server.addr)
            .unwrap_or_else(|| DEFAULT_SERVER_ADDR.to_string());
        let target_fps = file
            .stream
            .and_then(|stream| stream.target_fps)
            .unwrap_or(DEFAULT_TARGET_FPS);
        Self {
            camera,
            server_addr,
            target_fps,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device) = std::env::var("STREAM_CAMERA_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = DeviceSelector::parse(&device);
            }
        }
        if let Ok(addr) = std::env::var("STREAM_CAMERA_ADDR") {
            if !addr.trim().is_empty() {
                self.server_addr = addr;
            }
        }
        if let Ok(file_type) = std::env::var("STREAM_CAMERA_FILE_TYPE") {
            if !file_type.trim().is_empty() {
                self.camera.file_type = file_type;
            }
        }
        if let Ok(flip) = std::env::var("STREAM_CAMERA_FLIP") {
            self.camera.flip = parse_bool(&flip)
                .ok_or_else(|| anyhow!("STREAM_CAMERA_FLIP must be true/false or 1/0"))?;
        }
        if let Ok(fps) = std::env::var("STREAM_CAMERA_FPS") {
            self.target_fps = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("STREAM_CAMERA_FPS must be an integer"))?;
        }
        Ok(())
    }

    /// Check cross-field constraints. Also run by binaries after CLI overrides.
    pub fn validate(&self) -> Result<()> {
        if self.target_fps == 0 {
            return Err(anyhow!("target_fps must be greater than zero"));
        }
        EncodeFormat::from_extension(&self.camera.file_type)?;
        self.server_addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow!("invalid server addr '{}': {}", self.server_addr, e))?;
        if self.camera.read_timeout_ms == Some(0) {
            return Err(anyhow!("read_timeout_ms must be greater than zero"));
        }
        Ok(())
    }

    pub fn source_config(&self) -> FrameSourceConfig {
        FrameSourceConfig {
            flip: self.camera.flip,
            file_type: self.camera.file_type.clone(),
            name: self.camera.name.clone(),
        }
    }

    pub fn device_opener(&self) -> ConfiguredSelector {
        self.camera.device.clone().with_options(DeviceOptions {
            read_timeout_ms: self.camera.read_timeout_ms,
        })
    }
}

fn read_config_file(path: &Path) -> Result<StreamConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() -> Result<()> {
        let cfg = StreamConfig::from_file(StreamConfigFile::default());
        cfg.validate()?;
        assert_eq!(cfg.camera.device, DeviceSelector::Auto);
        assert_eq!(cfg.source_config(), FrameSourceConfig::default());
        assert_eq!(cfg.server_addr, "127.0.0.1:8080");
        assert_eq!(cfg.target_fps, 10);
        Ok(())
    }

    #[test]
    fn validate_rejects_zero_fps_and_bad_format() {
        let mut cfg = StreamConfig::from_file(StreamConfigFile::default());
        cfg.target_fps = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = StreamConfig::from_file(StreamConfigFile::default());
        cfg.camera.file_type = ".webp".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_bool_spellings() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" 0 "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
