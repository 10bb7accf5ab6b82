use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::CameraIndex;

const DEFAULT_DB_PATH: &str = "platewatch.db";
const DEFAULT_SCREENSHOT_DIR: &str = "captured_plates";
const DEFAULT_API_ADDR: &str = "127.0.0.1:5000";
#[cfg(feature = "ingest-v4l2")]
const DEFAULT_CAPTURE_BACKEND: &str = "v4l2";
#[cfg(not(feature = "ingest-v4l2"))]
const DEFAULT_CAPTURE_BACKEND: &str = "synthetic";
const DEFAULT_PROBE_LIMIT: u32 = 5;
const DEFAULT_TARGET_FPS: u32 = 10;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_REOPEN_DELAY_MS: u64 = 500;
const DEFAULT_RETIRE_TIMEOUT_MS: u64 = 300;
const DEFAULT_JPEG_QUALITY: u8 = 80;
const DEFAULT_COOLDOWN_SECS: u64 = 30;
const DEFAULT_NON_TARGET_INTERVAL_SECS: u64 = 10;
const MAX_PROBE_LIMIT: u32 = 64;

#[derive(Debug, Deserialize, Default)]
struct WatchConfigFile {
    db_path: Option<String>,
    screenshot_dir: Option<PathBuf>,
    api: Option<ApiConfigFile>,
    camera: Option<CameraConfigFile>,
    detector: Option<DetectorConfigFile>,
    alert: Option<AlertConfigFile>,
    targets: Option<TargetsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    backends: Option<Vec<String>>,
    synthetic_indices: Option<Vec<CameraIndex>>,
    probe_limit: Option<u32>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    reopen_delay_ms: Option<u64>,
    retire_timeout_ms: Option<u64>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    script: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    cooldown_secs: Option<u64>,
    sound_command: Option<Vec<String>>,
    log_non_targets: Option<bool>,
    non_target_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct TargetsConfigFile {
    seed: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub db_path: String,
    pub screenshot_dir: PathBuf,
    pub api_addr: String,
    pub camera: CameraSettings,
    pub detector: DetectorSettings,
    pub alert: AlertSettings,
    pub seed_targets: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// Capture backends, tried in order.
    pub backends: Vec<String>,
    /// Indices served by the synthetic backend.
    pub synthetic_indices: Vec<CameraIndex>,
    /// Camera discovery probes indices `0..probe_limit`.
    pub probe_limit: u32,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    pub reopen_delay: Duration,
    pub retire_timeout: Duration,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// Registered detector name; `None` picks the registry default.
    pub backend: Option<String>,
    pub script: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub cooldown: Duration,
    pub sound_command: Option<Vec<String>>,
    pub log_non_targets: bool,
    pub non_target_interval: Duration,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            backends: vec![DEFAULT_CAPTURE_BACKEND.to_string()],
            synthetic_indices: vec![0],
            probe_limit: DEFAULT_PROBE_LIMIT,
            target_fps: DEFAULT_TARGET_FPS,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            reopen_delay: Duration::from_millis(DEFAULT_REOPEN_DELAY_MS),
            retire_timeout: Duration::from_millis(DEFAULT_RETIRE_TIMEOUT_MS),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            sound_command: None,
            log_non_targets: false,
            non_target_interval: Duration::from_secs(DEFAULT_NON_TARGET_INTERVAL_SECS),
        }
    }
}

impl CameraSettings {
    /// Pause between frames implied by `target_fps`.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.target_fps.max(1)
    }
}

impl WatchConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PLATEWATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: WatchConfigFile) -> Self {
        let camera_defaults = CameraSettings::default();
        let alert_defaults = AlertSettings::default();
        let camera = file.camera.unwrap_or_default();
        let alert = file.alert.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();

        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            screenshot_dir: file
                .screenshot_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SCREENSHOT_DIR)),
            api_addr: file
                .api
                .and_then(|api| api.addr)
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            camera: CameraSettings {
                backends: camera.backends.unwrap_or(camera_defaults.backends),
                synthetic_indices: camera
                    .synthetic_indices
                    .unwrap_or(camera_defaults.synthetic_indices),
                probe_limit: camera.probe_limit.unwrap_or(camera_defaults.probe_limit),
                target_fps: camera.target_fps.unwrap_or(camera_defaults.target_fps),
                width: camera.width.unwrap_or(camera_defaults.width),
                height: camera.height.unwrap_or(camera_defaults.height),
                reopen_delay: camera
                    .reopen_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(camera_defaults.reopen_delay),
                retire_timeout: camera
                    .retire_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(camera_defaults.retire_timeout),
                jpeg_quality: camera.jpeg_quality.unwrap_or(camera_defaults.jpeg_quality),
            },
            detector: DetectorSettings {
                backend: detector
                    .backend
                    .map(|name| name.trim().to_string())
                    .filter(|name| !name.is_empty()),
                script: detector.script.unwrap_or_default(),
            },
            alert: AlertSettings {
                cooldown: alert
                    .cooldown_secs
                    .map(Duration::from_secs)
                    .unwrap_or(alert_defaults.cooldown),
                sound_command: alert.sound_command.filter(|cmd| !cmd.is_empty()),
                log_non_targets: alert.log_non_targets.unwrap_or(false),
                non_target_interval: alert
                    .non_target_interval_secs
                    .map(Duration::from_secs)
                    .unwrap_or(alert_defaults.non_target_interval),
            },
            seed_targets: file.targets.and_then(|t| t.seed).unwrap_or_default(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("PLATEWATCH_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(addr) = std::env::var("PLATEWATCH_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(dir) = std::env::var("PLATEWATCH_SCREENSHOT_DIR") {
            if !dir.trim().is_empty() {
                self.screenshot_dir = PathBuf::from(dir);
            }
        }
        if let Ok(backends) = std::env::var("PLATEWATCH_CAPTURE_BACKENDS") {
            let parsed = split_csv(&backends);
            if !parsed.is_empty() {
                self.camera.backends = parsed;
            }
        }
        if let Ok(detector) = std::env::var("PLATEWATCH_DETECTOR") {
            if !detector.trim().is_empty() {
                self.detector.backend = Some(detector.trim().to_string());
            }
        }
        if let Ok(cooldown) = std::env::var("PLATEWATCH_COOLDOWN_SECS") {
            let seconds: u64 = cooldown.trim().parse().map_err(|_| {
                anyhow!("PLATEWATCH_COOLDOWN_SECS must be an integer number of seconds")
            })?;
            self.alert.cooldown = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.camera.backends = self
            .camera
            .backends
            .iter()
            .map(|b| b.trim().to_lowercase())
            .filter(|b| !b.is_empty())
            .collect();
        if self.camera.backends.is_empty() {
            return Err(anyhow!("at least one capture backend must be configured"));
        }
        if self.camera.probe_limit == 0 || self.camera.probe_limit > MAX_PROBE_LIMIT {
            return Err(anyhow!(
                "camera probe_limit must be between 1 and {}",
                MAX_PROBE_LIMIT
            ));
        }
        if self.camera.target_fps == 0 {
            return Err(anyhow!("camera target_fps must be greater than zero"));
        }
        if !(1..=100).contains(&self.camera.jpeg_quality) {
            return Err(anyhow!("camera jpeg_quality must be between 1 and 100"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be non-zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<WatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_sections() {
        let cfg = WatchConfig::from_file(WatchConfigFile::default());
        assert_eq!(cfg.db_path, DEFAULT_DB_PATH);
        assert_eq!(cfg.api_addr, DEFAULT_API_ADDR);
        assert_eq!(cfg.camera.probe_limit, 5);
        assert_eq!(cfg.camera.retire_timeout, Duration::from_millis(300));
        assert_eq!(cfg.alert.cooldown, Duration::from_secs(30));
        assert_eq!(cfg.detector.backend, None);
        assert!(!cfg.alert.log_non_targets);
    }

    #[test]
    fn frame_interval_follows_fps() {
        let camera = CameraSettings {
            target_fps: 20,
            ..CameraSettings::default()
        };
        assert_eq!(camera.frame_interval(), Duration::from_millis(50));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut cfg = WatchConfig::from_file(WatchConfigFile::default());
        cfg.camera.backends = vec!["  ".into()];
        assert!(cfg.validate().is_err());

        let mut cfg = WatchConfig::from_file(WatchConfigFile::default());
        cfg.camera.jpeg_quality = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = WatchConfig::from_file(WatchConfigFile::default());
        cfg.camera.backends = vec![" Synthetic ".into()];
        cfg.validate().unwrap();
        assert_eq!(cfg.camera.backends, vec!["synthetic"]);
    }

    #[test]
    fn empty_sound_command_is_none() {
        let file: WatchConfigFile =
            serde_json::from_str(r#"{"alert": {"sound_command": []}}"#).unwrap();
        assert!(WatchConfig::from_file(file).alert.sound_command.is_none());
    }
}
