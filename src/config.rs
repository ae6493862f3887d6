//! Configuration loading and management
//!
//! Defaults live under `$HOME/.local/share/pose-overlay`. An optional
//! `config.toml` in that directory (or the file named by
//! `POSE_OVERLAY_CONFIG`) overrides any subset of the settings.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::engine::{Delegate, LandmarkerOptions, ModelAsset};
use crate::platform::VideoConstraints;
use crate::render::DrawingStyle;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "POSE_OVERLAY_CONFIG";

/// Camera acquisition settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Camera index for the OpenCV backend
    pub device_index: i32,
    pub constraints: VideoConstraints,
    /// Highest frame rate the test pattern camera negotiates
    pub test_pattern_max_frame_rate: f64,
    /// Time before the test pattern camera delivers its first frame
    pub test_pattern_warmup_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            constraints: VideoConstraints::default(),
            test_pattern_max_frame_rate: 30.0,
            test_pattern_warmup_ms: 250,
        }
    }
}

/// Pose engine settings.
///
/// The default model is a local file under the data directory
/// (`models/pose_landmark_lite.onnx`) that has to be put there before the
/// engine can load; until then loading fails with a "not found" error and
/// capture runs without an overlay. Point `model` at an http(s) URL to have
/// it downloaded into the model cache instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Local path (relative to the data directory) or http(s) URL
    pub model: ModelAsset,
    pub delegate: Delegate,
    pub num_poses: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: ModelAsset::Local(PathBuf::from("models/pose_landmark_lite.onnx")),
            delegate: Delegate::Gpu,
            num_poses: 2,
        }
    }
}

/// Frame loop and overlay settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Display refresh rate driving the frame loop
    pub refresh_hz: f64,
    pub style: DrawingStyle,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            refresh_hz: 60.0,
            style: DrawingStyle::default(),
        }
    }
}

/// Contents of `config.toml`; every field is optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub socket_path: Option<PathBuf>,
    pub capture: CaptureConfig,
    pub engine: EngineConfig,
    pub render: RenderConfig,
}

/// Process configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for the control surface
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Directory downloaded models are cached in
    pub model_cache_dir: PathBuf,

    pub capture: CaptureConfig,
    pub engine: EngineConfig,
    pub render: RenderConfig,
}

impl Config {
    /// Load configuration from environment, config file and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME").context("HOME is not set")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("pose-overlay");

        let explicit = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let path = explicit
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let file = if path.exists() {
            Self::read_file(&path)?
        } else if explicit.is_some() {
            bail!("config file {} does not exist", path.display());
        } else {
            ConfigFile::default()
        };

        Self::from_file(data_dir, file)
    }

    fn read_file(path: &Path) -> Result<ConfigFile> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Assemble configuration rooted at `data_dir`
    pub fn from_file(data_dir: PathBuf, file: ConfigFile) -> Result<Self> {
        let mut engine = file.engine;
        engine.model = engine.model.relative_to(&data_dir);

        let config = Self {
            socket_path: file
                .socket_path
                .unwrap_or_else(|| data_dir.join("overlay.sock")),
            model_cache_dir: data_dir.join("models"),
            data_dir,
            capture: file.capture,
            engine,
            render: file.render,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let constraints = &self.capture.constraints;
        if !(constraints.aspect_ratio > 0.0) {
            bail!("capture.constraints.aspect_ratio must be positive");
        }
        if constraints.ideal_width == 0 {
            bail!("capture.constraints.ideal_width must be positive");
        }
        if !(self.render.refresh_hz > 0.0 && self.render.refresh_hz.is_finite()) {
            bail!("render.refresh_hz must be a positive number");
        }
        if self.engine.num_poses == 0 {
            bail!("engine.num_poses must be at least 1");
        }
        Ok(())
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    /// Options for constructing the pose landmarker
    pub fn landmarker_options(&self) -> LandmarkerOptions {
        LandmarkerOptions {
            model: self.engine.model.clone(),
            delegate: self.engine.delegate,
            num_poses: self.engine.num_poses,
        }
    }
}
