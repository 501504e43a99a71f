//! Server configuration
//!
//! Sources, in increasing precedence: built-in defaults, an optional RON
//! file, environment variables, then command-line flags (applied by the
//! binary before the final [`ServerConfig::validate`]).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sv_core::{DEFAULT_EYE_SEPARATION, MeshUnit, SceneSettings};
use sv_renderer::RendererConfig;

use crate::encoding::EncodingFormat;
use crate::transport::TransportMode;

pub const ENV_SCREEN_WIDTH: &str = "SCREEN_WIDTH";
pub const ENV_SCREEN_HEIGHT: &str = "SCREEN_HEIGHT";
pub const ENV_PORT: &str = "PORT";
pub const ENV_MIN_EMIT_MS: &str = "SV_MIN_EMIT_MS";
pub const ENV_RENDER_TIMEOUT_MS: &str = "SV_RENDER_TIMEOUT_MS";

/// Listening address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub host: String,
    pub port: u16,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5000,
        }
    }
}

/// Delivery settings shared by all transport modes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// How frames reach clients
    pub mode: TransportMode,
    /// Wire format of each frame
    pub encoding: EncodingFormat,
    /// Ship a linear depth buffer next to color
    pub with_depth: bool,
    /// Minimum time between two frames emitted to one session (event mode)
    pub min_emit_interval_ms: u64,
    /// Period of the background broadcaster (interval mode)
    pub broadcast_interval_ms: u64,
    /// Pacing of the pull-based media stream
    pub fps: u32,
    /// Outbound frames buffered per session before new ones are dropped
    pub queue_capacity: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            mode: TransportMode::default(),
            encoding: EncodingFormat::default(),
            with_depth: false,
            min_emit_interval_ms: 33,
            broadcast_interval_ms: 33,
            fps: 30,
            queue_capacity: 4,
        }
    }
}

/// Dual-eye rendering defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StereoSettings {
    /// Stereo state of newly connected sessions and of the media stream
    pub enabled: bool,
    /// Distance between the eyes in meters
    pub eye_separation: f32,
}

impl Default for StereoSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            eye_separation: DEFAULT_EYE_SEPARATION,
        }
    }
}

/// Where the scene mesh comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetSettings {
    pub path: PathBuf,
    /// Pre-parsed mesh cache; `None` always parses the source
    pub cache_path: Option<PathBuf>,
    pub unit: MeshUnit,
}

impl Default for AssetSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("assets/scene.glb"),
            cache_path: Some(PathBuf::from("assets/scene.mesh.ron")),
            unit: MeshUnit::Meters,
        }
    }
}

/// Complete server configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub network: NetworkSettings,
    pub render: RendererConfig,
    pub scene: SceneSettings,
    pub stream: StreamSettings,
    pub stereo: StereoSettings,
    pub asset: AssetSettings,
}

impl ServerConfig {
    /// Defaults, then `path` if given, then `env`; validated
    pub fn load(path: Option<&Path>, env: &dyn EnvSource) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_file(path)?,
            None => Self::default(),
        };
        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a RON file; missing sections keep their defaults
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_ron_str(&content)
    }

    pub fn from_ron_str(content: &str) -> Result<Self, ConfigError> {
        ron::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Pretty-printed RON
    pub fn to_ron_string(&self) -> Result<String, ConfigError> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Save as a RON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = self.to_ron_string()?;
        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Io(e.to_string()))
    }

    /// Overlay the environment variables this service understands
    pub fn apply_env(&mut self, env: &dyn EnvSource) -> Result<(), ConfigError> {
        let viewport = &mut self.render.viewport;
        viewport.width = env_value(env, ENV_SCREEN_WIDTH, viewport.width.into())?;
        viewport.height = env_value(env, ENV_SCREEN_HEIGHT, viewport.height.into())?;
        self.network.port = env_value(env, ENV_PORT, self.network.port.into())?;
        self.stream.min_emit_interval_ms = env_value(
            env,
            ENV_MIN_EMIT_MS,
            saturating_i64(self.stream.min_emit_interval_ms),
        )?;
        self.render.timeout_ms =
            env_value(env, ENV_RENDER_TIMEOUT_MS, saturating_i64(self.render.timeout_ms))?;
        Ok(())
    }

    /// Reject values no component can work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let viewport = &self.render.viewport;
        if viewport.width == 0 || viewport.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "frame size must be non-zero, got {}x{}",
                viewport.width, viewport.height
            )));
        }
        if !(self.stereo.eye_separation.is_finite() && self.stereo.eye_separation >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "eye separation must be non-negative, got {}",
                self.stereo.eye_separation
            )));
        }
        let fov = self.scene.fov_y_degrees;
        if !(fov > 0.0 && fov < 180.0) {
            return Err(ConfigError::Invalid(format!(
                "vertical fov must be in (0, 180) degrees, got {fov}"
            )));
        }
        for (name, value) in [
            ("min_emit_interval_ms", self.stream.min_emit_interval_ms),
            ("broadcast_interval_ms", self.stream.broadcast_interval_ms),
            ("render.timeout_ms", self.render.timeout_ms),
            ("fps", u64::from(self.stream.fps)),
            ("queue_capacity", self.stream.queue_capacity as u64),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        let encoding = self.stream.encoding;
        if encoding == EncodingFormat::MediaFrame && self.stream.mode != TransportMode::Stream {
            return Err(ConfigError::Invalid(format!(
                "{encoding} encoding needs the stream transport mode, got {:?}",
                self.stream.mode
            )));
        }
        if self.stream.with_depth && !encoding.supports_depth() {
            return Err(ConfigError::Invalid(format!(
                "{encoding} encoding cannot carry depth"
            )));
        }
        Ok(())
    }

    pub fn min_emit_interval(&self) -> Duration {
        Duration::from_millis(self.stream.min_emit_interval_ms)
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.stream.broadcast_interval_ms)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render.timeout_ms)
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn env_value<T: TryFrom<i64>>(
    env: &dyn EnvSource,
    name: &str,
    current: i64,
) -> Result<T, ConfigError> {
    let value = env.get_int(name, current)?;
    T::try_from(value).map_err(|_| ConfigError::InvalidEnv {
        name: name.to_string(),
        value: value.to_string(),
    })
}

/// Read access to environment-style key/value configuration
pub trait EnvSource {
    /// Raw value, `None` when unset or blank
    fn get(&self, name: &str) -> Option<String>;

    /// Integer value, `default` when unset
    fn get_int(&self, name: &str, default: i64) -> Result<i64, ConfigError> {
        match self.get(name) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: name.to_string(),
                value: raw,
            }),
        }
    }
}

/// The process environment
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.trim().is_empty())
    }
}

/// In-memory environment
#[derive(Debug, Clone, Default)]
pub struct MapEnv(HashMap<String, String>);

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.0.insert(name.to_string(), value.to_string());
        self
    }
}

impl EnvSource for MapEnv {
    fn get(&self, name: &str) -> Option<String> {
        self.0.get(name).filter(|v| !v.trim().is_empty()).cloned()
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Config parse error: {0}")]
    Parse(String),
    #[error("Environment variable {name} has invalid value '{value}'")]
    InvalidEnv { name: String, value: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use sv_renderer::BackendKind;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.render.viewport.width, 1280);
        assert_eq!(config.render.viewport.height, 720);
        assert_eq!(config.network.port, 5000);
        assert_eq!(config.min_emit_interval(), Duration::from_millis(33));
        assert_eq!(config.scene.fov_y_degrees, 110.0);
        assert_eq!(config.scene.mesh_offset, [0.0, 0.0, 3.0]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_ron() {
        let config = ServerConfig::from_ron_str(
            "(render: (backend: software), stream: (mode: interval, encoding: tagged_numeric_array))",
        )
        .unwrap();
        assert_eq!(config.render.backend, BackendKind::Software);
        assert_eq!(config.stream.mode, TransportMode::Interval);
        assert_eq!(config.stream.encoding, EncodingFormat::TaggedNumericArray);
        assert_eq!(config.stream.min_emit_interval_ms, 33);
        assert_eq!(config.network, NetworkSettings::default());
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.ron");
        std::fs::write(&path, "(network: (port: 7000), render: (viewport: (width: 640)))")
            .unwrap();

        let env = MapEnv::new()
            .with(ENV_PORT, "8080")
            .with(ENV_SCREEN_HEIGHT, " 480 ")
            .with(ENV_MIN_EMIT_MS, "");
        let config = ServerConfig::load(Some(&path), &env).unwrap();
        assert_eq!(config.network.port, 8080);
        assert_eq!(config.render.viewport.width, 640);
        assert_eq!(config.render.viewport.height, 480);
        assert_eq!(config.stream.min_emit_interval_ms, 33);
    }

    #[test]
    fn test_bad_env_values() {
        let env = MapEnv::new().with(ENV_SCREEN_WIDTH, "wide");
        assert!(matches!(
            ServerConfig::load(None, &env),
            Err(ConfigError::InvalidEnv { name, .. }) if name == ENV_SCREEN_WIDTH
        ));

        let env = MapEnv::new().with(ENV_PORT, "70000");
        assert!(matches!(
            ServerConfig::load(None, &env),
            Err(ConfigError::InvalidEnv { .. })
        ));
    }

    #[test]
    fn test_validation() {
        let mut config = ServerConfig::default();
        config.render.viewport.width = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = ServerConfig::default();
        config.stereo.eye_separation = -0.1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = ServerConfig::default();
        config.stream.min_emit_interval_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let env = MapEnv::new().with(ENV_SCREEN_HEIGHT, "0");
        assert!(matches!(
            ServerConfig::load(None, &env),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_encoding_must_fit_mode_and_depth() {
        let mut config = ServerConfig::default();
        config.stream.encoding = EncodingFormat::MediaFrame;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.stream.mode = TransportMode::Interval;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.stream.mode = TransportMode::Stream;
        assert!(config.validate().is_ok());

        let mut config = ServerConfig::default();
        config.stream.with_depth = true;
        assert!(config.validate().is_ok());
        config.stream.encoding = EncodingFormat::ImageContainer;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.stream.encoding = EncodingFormat::TaggedNumericArray;
        assert!(config.validate().is_ok());

        let env = MapEnv::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.ron");
        std::fs::write(&path, "(stream: (encoding: image_container, with_depth: true))").unwrap();
        assert!(matches!(
            ServerConfig::load(Some(path.as_path()), &env),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.ron");
        let mut config = ServerConfig::default();
        config.stereo.enabled = true;
        config.stream.with_depth = true;
        config.save(&path).unwrap();
        assert_eq!(ServerConfig::load_file(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ServerConfig::load_file("/no/such/config.ron"),
            Err(ConfigError::Io(_))
        ));
    }
}
