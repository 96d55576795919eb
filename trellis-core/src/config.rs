// Application options and their loaders

use crate::error::Error;
use crate::logging::{LogConfig, LogFormat, LogLevel, LogOutput};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

const ENV_PREFIX: &str = "TRELLIS_";

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Toml,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            _ => None,
        }
    }
}

/// The `[log]` section of the options.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct LogOptions {
    pub level: LogLevel,
    pub format: LogFormat,
    pub filter: Option<String>,
    /// Append to this file instead of STDOUT
    pub file: Option<String>,
}

impl LogOptions {
    pub fn to_config(&self) -> LogConfig {
        let output = match &self.file {
            Some(path) => LogOutput::File(path.clone()),
            None => LogOutput::Stdout,
        };
        let config = LogConfig::new().level(self.level).format(self.format).output(output);
        match &self.filter {
            Some(filter) => config.with_env_filter(filter.clone()),
            None => config,
        }
    }
}

/// Runtime options, registered as an application-scope value so any
/// provider can inject them.
///
/// ```
/// use trellis_core::config::ApplicationOptions;
///
/// let options = ApplicationOptions::from_toml_str(r#"
///     port = 8080
///     path_prefix = "/api"
///
///     [log]
///     level = "debug"
/// "#).unwrap();
/// assert_eq!(options.port, 8080);
/// assert_eq!(options.host, "127.0.0.1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ApplicationOptions {
    pub host: String,
    pub port: u16,
    /// Prefix prepended to every route
    pub path_prefix: String,
    /// Put server-error messages in responses. Off by default.
    pub expose_error_details: bool,
    pub log: LogOptions,
}

impl Default for ApplicationOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            path_prefix: String::new(),
            expose_error_details: false,
            log: LogOptions::default(),
        }
    }
}

impl ApplicationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = prefix.into();
        self
    }

    pub fn expose_error_details(mut self, expose: bool) -> Self {
        self.expose_error_details = expose;
        self
    }

    /// Install the global `tracing` subscriber described by the `[log]`
    /// section. Keep the returned guard alive while the program runs.
    pub fn init_logging(&self) -> Result<WorkerGuard, Error> {
        self.log.to_config().init()
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, Error> {
        toml::from_str(content).map_err(|e| Error::Config(format!("TOML parse error: {e}")))
    }

    pub fn from_json_str(content: &str) -> Result<Self, Error> {
        serde_json::from_str(content).map_err(|e| Error::Config(format!("JSON parse error: {e}")))
    }

    /// Load from a `.toml` or `.json` file, chosen by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::Config(format!("No file extension on {}", path.display())))?;
        let format = FileFormat::from_extension(ext)
            .ok_or_else(|| Error::Config(format!("Unsupported format: {ext}")))?;

        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {e}", path.display())))?;
        match format {
            FileFormat::Json => Self::from_json_str(&content),
            FileFormat::Toml => Self::from_toml_str(&content),
        }
    }

    /// Defaults overridden by `TRELLIS_*` variables, after loading `.env`.
    pub fn from_env() -> Result<Self, Error> {
        Self::default().apply_env()
    }

    /// Override fields from `TRELLIS_*` variables, after loading `.env`.
    pub fn apply_env(self) -> Result<Self, Error> {
        match dotenvy::dotenv() {
            Ok(_) => {}
            Err(e) if e.not_found() => {}
            Err(e) => return Err(Error::Config(format!("Failed to load .env: {e}"))),
        }
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Override fields from variables supplied by `lookup`, keyed by their
    /// full `TRELLIS_*` name.
    pub fn apply_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(host) = var("HOST") {
            self.host = host;
        }
        if let Some(port) = var("PORT") {
            self.port = port
                .parse()
                .map_err(|_| Error::Config(format!("{ENV_PREFIX}PORT is not a port: {port}")))?;
        }
        if let Some(prefix) = var("PATH_PREFIX") {
            self.path_prefix = prefix;
        }
        if let Some(expose) = var("EXPOSE_ERROR_DETAILS") {
            self.expose_error_details = parse_bool(&expose).ok_or_else(|| {
                Error::Config(format!("{ENV_PREFIX}EXPOSE_ERROR_DETAILS is not a boolean: {expose}"))
            })?;
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.log.level = LogLevel::parse(&level)
                .ok_or_else(|| Error::Config(format!("Unknown log level: {level}")))?;
        }
        if let Some(format) = var("LOG_FORMAT") {
            self.log.format = LogFormat::parse(&format)
                .ok_or_else(|| Error::Config(format!("Unknown log format: {format}")))?;
        }
        if let Some(filter) = var("LOG_FILTER") {
            self.log.filter = Some(filter);
        }
        if let Some(file) = var("LOG_FILE") {
            self.log.file = Some(file);
        }
        Ok(self)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
