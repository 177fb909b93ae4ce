//! Service configuration.
//!
//! Values are layered: struct defaults, then an optional TOML file, then
//! `PLANTID_<SECTION>__<KEY>` environment variables, then `PORT`.

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use image::imageops::FilterType;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "PLANTID_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/plantid.toml";

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub predict: PredictConfig,
    pub upload: UploadConfig,
    pub logging: LoggingConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Number of actix workers; the number of CPUs when unset
    pub workers: Option<usize>,
    /// Largest accepted upload, in bytes
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            workers: None,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Versioned description of how to load and feed the classifier artifact.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Path to the ONNX artifact
    pub path: PathBuf,
    /// Loading format version, see [`SUPPORTED_MODEL_FORMAT`]
    pub format_version: u32,
    /// Optional label file (one label per line) replacing the built-in set
    pub labels_path: Option<PathBuf>,
    /// Square input resolution expected by the network
    pub input_size: u32,
    pub layout: TensorLayout,
    pub resize: ResizeMode,
    pub filter: ResizeFilter,
}

/// The only loading format this build understands.
pub const SUPPORTED_MODEL_FORMAT: u32 = 1;

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("models/plant_classifier.onnx"),
            format_version: SUPPORTED_MODEL_FORMAT,
            labels_path: None,
            input_size: 224,
            layout: TensorLayout::default(),
            resize: ResizeMode::default(),
            filter: ResizeFilter::default(),
        }
    }
}

/// Memory layout of the input tensor
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// `[batch, height, width, channels]`, as exported from Keras
    #[default]
    Nhwc,
    /// `[batch, channels, height, width]`
    Nchw,
}

impl TensorLayout {
    /// Input tensor shape for a single square image of `size` pixels.
    pub fn shape(self, size: u32) -> [usize; 4] {
        let s = size as usize;
        match self {
            TensorLayout::Nhwc => [1, s, s, 3],
            TensorLayout::Nchw => [1, 3, s, s],
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResizeMode {
    /// Scale both axes to the input size, ignoring aspect ratio
    #[default]
    Stretch,
    /// Fit inside the input size and pad the rest with black
    Letterbox,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResizeFilter {
    #[default]
    Nearest,
    Triangle,
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl From<ResizeFilter> for FilterType {
    fn from(filter: ResizeFilter) -> Self {
        match filter {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Triangle => FilterType::Triangle,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
            ResizeFilter::Gaussian => FilterType::Gaussian,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Prediction output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PredictConfig {
    /// Number of ranked labels returned by default
    pub top_k: usize,
    pub response_shape: ResponseShape,
}

impl Default for PredictConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            response_shape: ResponseShape::default(),
        }
    }
}

/// JSON shape of a successful prediction
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseShape {
    /// `{"predictions": [{"label", "confidence"}, ...]}`
    #[default]
    Ranked,
    /// `{"prediction", "confidence"}` for the best label only
    Single,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Directory for transient upload files; the system temp dir when unset
    pub temp_dir: Option<PathBuf>,
}

impl UploadConfig {
    pub fn dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl AppConfig {
    /// Load configuration from `PLANTID_CONFIG` (or the default path) and
    /// the environment.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        let mut config = Self::load_from_path(&path)?;

        if let Ok(port) = std::env::var("PORT") {
            config.server.port = port
                .parse()
                .with_context(|| format!("Invalid PORT value {:?}", port))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path. A missing file is not an
    /// error; defaults and environment variables still apply.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(
                Environment::with_prefix("PLANTID")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Reject values that would only fail later, at request time.
    pub fn validate(&self) -> Result<()> {
        if self.predict.top_k == 0 {
            bail!("predict.top_k must be at least 1");
        }
        if self.model.input_size == 0 {
            bail!("model.input_size must be at least 1");
        }
        if self.model.format_version != SUPPORTED_MODEL_FORMAT {
            bail!(
                "model.format_version {} is not supported (expected {})",
                self.model.format_version,
                SUPPORTED_MODEL_FORMAT
            );
        }
        if self.server.max_upload_bytes == 0 {
            bail!("server.max_upload_bytes must be at least 1");
        }
        Ok(())
    }
}
