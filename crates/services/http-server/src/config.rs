//! Configuration for the diagramd server
//!
//! Configuration can be loaded from a TOML file and/or environment variables.
//! Environment variables always win over the file.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use axum::http::StatusCode;
use diagramd_core::decode::DEFAULT_MAX_SOURCE_BYTES;
use diagramd_core::CachePolicy;
use diagramd_http::{HttpOptions, StatusPolicy};
use serde::{Deserialize, Serialize};

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "DIAGRAMD_CONFIG";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub renderers: RenderersConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Request and renderer limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Largest accepted diagram source, decoded or raw
    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: usize,

    /// Renderer processes allowed to run at once
    #[serde(default = "default_max_concurrent_renders")]
    pub max_concurrent_renders: usize,

    /// Per-invocation renderer deadline
    #[serde(default = "default_render_timeout")]
    pub render_timeout_seconds: u64,

    /// Status returned when a renderer rejects its input
    #[serde(default = "default_renderer_error_status")]
    pub renderer_error_status: u16,
}

fn default_max_source_bytes() -> usize {
    DEFAULT_MAX_SOURCE_BYTES
}

fn default_max_concurrent_renders() -> usize {
    num_cpus::get()
}

fn default_render_timeout() -> u64 {
    15
}

fn default_renderer_error_status() -> u16 {
    400
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_source_bytes: default_max_source_bytes(),
            max_concurrent_renders: default_max_concurrent_renders(),
            render_timeout_seconds: default_render_timeout(),
            renderer_error_status: default_renderer_error_status(),
        }
    }
}

/// HTTP caching of rendered images
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_max_age")]
    pub max_age_seconds: u64,
}

fn default_max_age() -> u64 {
    432_000 // 5 days
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_age_seconds: default_max_age(),
        }
    }
}

/// One renderer binding
///
/// Unset fields fall back to the binding's command name (resolved from
/// `PATH` at spawn time) and the server version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendererConfig {
    #[serde(default)]
    pub bin_path: Option<PathBuf>,

    /// Version tag mixed into every cache validator
    #[serde(default)]
    pub version: Option<String>,
}

/// Renderer bindings by service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenderersConfig {
    #[serde(default)]
    pub dot: RendererConfig,

    #[serde(default)]
    pub plantuml: RendererConfig,

    #[serde(default)]
    pub erd: RendererConfig,

    #[serde(default)]
    pub svgbob: RendererConfig,
}

impl RenderersConfig {
    /// Configuration keyed by command name (`dot`, `plantuml`, `erd`, `svgbob`)
    pub fn get(&self, command: &str) -> Option<&RendererConfig> {
        match command {
            "dot" => Some(&self.dot),
            "plantuml" => Some(&self.plantuml),
            "erd" => Some(&self.erd),
            "svgbob" => Some(&self.svgbob),
            _ => None,
        }
    }

    fn get_mut(&mut self, command: &str) -> Option<&mut RendererConfig> {
        match command {
            "dot" => Some(&mut self.dot),
            "plantuml" => Some(&mut self.plantuml),
            "erd" => Some(&mut self.erd),
            "svgbob" => Some(&mut self.svgbob),
            _ => None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file if it exists, then apply the environment
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// [`Config::load`] with an explicit variable lookup
    pub fn load_with<P, F>(path: Option<P>, lookup: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(p) if p.as_ref().exists() => Self::from_file(p)?,
            Some(p) => {
                tracing::warn!(path = %p.as_ref().display(), "Configuration file not found, using defaults");
                Config::default()
            }
            None => Config::default(),
        };
        config.apply_env_with(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DIAGRAMD_*` overrides from the process environment
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server
        if let Some(host) = lookup("DIAGRAMD_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("DIAGRAMD_PORT") {
            self.server.port = parse_var("DIAGRAMD_PORT", &port)?;
        }

        // Limits
        if let Some(bytes) = lookup("DIAGRAMD_MAX_SOURCE_BYTES") {
            self.limits.max_source_bytes = parse_var("DIAGRAMD_MAX_SOURCE_BYTES", &bytes)?;
        }
        if let Some(renders) = lookup("DIAGRAMD_MAX_CONCURRENT_RENDERS") {
            self.limits.max_concurrent_renders =
                parse_var("DIAGRAMD_MAX_CONCURRENT_RENDERS", &renders)?;
        }
        if let Some(timeout) = lookup("DIAGRAMD_RENDER_TIMEOUT") {
            self.limits.render_timeout_seconds = parse_var("DIAGRAMD_RENDER_TIMEOUT", &timeout)?;
        }
        if let Some(status) = lookup("DIAGRAMD_RENDERER_ERROR_STATUS") {
            self.limits.renderer_error_status =
                parse_var("DIAGRAMD_RENDERER_ERROR_STATUS", &status)?;
        }

        // Cache
        if let Some(max_age) = lookup("DIAGRAMD_CACHE_MAX_AGE") {
            self.cache.max_age_seconds = parse_var("DIAGRAMD_CACHE_MAX_AGE", &max_age)?;
        }

        // Renderers
        for command in ["dot", "plantuml", "erd", "svgbob"] {
            let key = format!("DIAGRAMD_{}_BIN_PATH", command.to_ascii_uppercase());
            if let (Some(path), Some(renderer)) = (lookup(&key), self.renderers.get_mut(command)) {
                renderer.bin_path = Some(PathBuf::from(path));
            }
        }

        Ok(())
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.max_source_bytes == 0 {
            return Err(ConfigError::Invalid(
                "limits.max_source_bytes must be greater than zero".to_string(),
            ));
        }
        if self.limits.max_concurrent_renders == 0 {
            return Err(ConfigError::Invalid(
                "limits.max_concurrent_renders must be greater than zero".to_string(),
            ));
        }
        if self.limits.render_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "limits.render_timeout_seconds must be greater than zero".to_string(),
            ));
        }
        if !(400..=599).contains(&self.limits.renderer_error_status) {
            return Err(ConfigError::Invalid(format!(
                "limits.renderer_error_status must be a 4xx or 5xx status, got {}",
                self.limits.renderer_error_status
            )));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.limits.render_timeout_seconds)
    }

    pub fn cache_policy(&self) -> CachePolicy {
        CachePolicy::new(Duration::from_secs(self.cache.max_age_seconds))
    }

    /// Router settings derived from this configuration
    pub fn http_options(&self) -> Result<HttpOptions, ConfigError> {
        let renderer_error = StatusCode::from_u16(self.limits.renderer_error_status)
            .map_err(|e| ConfigError::Invalid(format!("limits.renderer_error_status: {}", e)))?;

        Ok(HttpOptions {
            cache_policy: self.cache_policy(),
            status_policy: StatusPolicy::new(renderer_error),
            max_source_bytes: self.limits.max_source_bytes,
        })
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("{}={:?}: {}", key, value, e)))
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
