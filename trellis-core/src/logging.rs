//! Logging setup and the runtime's system log messages.
//!
//! [`LogConfig`] installs a `tracing-subscriber` registry. The messages the
//! runtime itself emits (module loaded, route registered, guard denied, ...)
//! go through a [`SystemLogMediator`], so an application can reword or
//! silence them by providing its own [`LogMediatorRef`] at application scope.
//!
//! ```no_run
//! use trellis_core::logging::*;
//!
//! let _guard = LogConfig::new()
//!     .level(LogLevel::Debug)
//!     .format(LogFormat::Pretty)
//!     .init()
//!     .unwrap();
//! ```

use crate::error::Error;
use crate::http::HttpMethod;
use crate::pipeline::RequestContext;
use serde::Deserialize;
use std::io;
use std::ops::Deref;
use std::sync::Arc;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

pub use tracing::{debug, error, info, trace, warn};

/// Log level for filtering messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Output format for log messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Structured, machine-readable
    #[default]
    Json,
    Plain,
    /// Multi-line, for development
    Pretty,
    Compact,
}

impl LogFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "json" => Some(LogFormat::Json),
            "plain" => Some(LogFormat::Plain),
            "pretty" => Some(LogFormat::Pretty),
            "compact" => Some(LogFormat::Compact),
            _ => None,
        }
    }
}

/// Output destination for logs
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    /// Append to a single file
    File(String),
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Overrides `level` when set, e.g. `"trellis_core=debug,hyper=info"`
    pub env_filter: Option<String>,
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    fn env_filter(&self) -> Result<EnvFilter, Error> {
        match &self.env_filter {
            Some(filter) => EnvFilter::try_new(filter)
                .map_err(|e| Error::Config(format!("invalid log filter {filter:?}: {e}"))),
            None => Ok(EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(self.level.as_str()))),
        }
    }

    /// Install the global subscriber.
    ///
    /// The returned guard flushes buffered lines when dropped and must be
    /// kept alive for as long as the program logs.
    pub fn init(self) -> Result<WorkerGuard, Error> {
        let env_filter = self.env_filter()?;

        let (writer, guard) = match &self.output {
            LogOutput::Stdout => tracing_appender::non_blocking(io::stdout()),
            LogOutput::Stderr => tracing_appender::non_blocking(io::stderr()),
            LogOutput::File(path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                tracing_appender::non_blocking(file)
            }
        };
        self.init_with_writer(writer, env_filter)?;
        Ok(guard)
    }

    fn init_with_writer<W>(&self, writer: W, env_filter: EnvFilter) -> Result<(), Error>
    where
        W: for<'a> tracing_subscriber::fmt::MakeWriter<'a> + Send + Sync + 'static,
    {
        let ansi = !matches!(self.output, LogOutput::File(_));
        let registry = tracing_subscriber::registry().with(env_filter);

        let installed = match self.format {
            LogFormat::Json => registry
                .with(fmt::layer().json().with_writer(writer).with_current_span(false))
                .try_init(),
            LogFormat::Plain => registry
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .try_init(),
            LogFormat::Pretty => registry
                .with(fmt::layer().pretty().with_writer(writer).with_ansi(ansi))
                .try_init(),
            LogFormat::Compact => registry
                .with(fmt::layer().compact().with_writer(writer).with_ansi(ansi))
                .try_init(),
        };
        installed.map_err(|e| Error::Config(format!("logging already initialized: {e}")))
    }
}

impl Default for LogConfig {
    /// JSON to STDOUT at INFO level
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Json,
            output: LogOutput::Stdout,
            env_filter: None,
        }
    }
}

/// The runtime's own log messages.
pub trait SystemLogMediator: Send + Sync + 'static {
    fn module_loaded(&self, module: &str, providers: usize);
    fn stage_finished(&self, group: &str, module: &str, extensions: usize);
    fn route_registered(&self, method: HttpMethod, path: &str, module: &str, controller: &str);
    fn no_routes(&self);
    fn server_listening(&self, addr: &str);
    fn guard_denied(&self, ctx: &RequestContext, guard: &str, status: u16);
    fn request_failed(&self, ctx: &RequestContext, error: &Error, status: u16);
}

/// Emits every system message as a `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogMediator;

impl SystemLogMediator for TracingLogMediator {
    fn module_loaded(&self, module: &str, providers: usize) {
        debug!(module, providers, "Module initialized");
    }

    fn stage_finished(&self, group: &str, module: &str, extensions: usize) {
        debug!(group, module, extensions, "Extension stage finished");
    }

    fn route_registered(&self, method: HttpMethod, path: &str, module: &str, controller: &str) {
        info!(%method, path, module, controller, "Mapped route");
    }

    fn no_routes(&self) {
        warn!("No routes registered; every request will receive 404");
    }

    fn server_listening(&self, addr: &str) {
        info!(addr, "Server listening");
    }

    fn guard_denied(&self, ctx: &RequestContext, guard: &str, status: u16) {
        debug!(
            request_id = ctx.request_id(),
            route = ctx.route(),
            guard,
            status,
            "Guard denied request"
        );
    }

    fn request_failed(&self, ctx: &RequestContext, error: &Error, status: u16) {
        if status >= 500 {
            error!(
                request_id = ctx.request_id(),
                route = ctx.route(),
                module = ctx.module(),
                status,
                error = %error,
                "Request failed"
            );
        } else {
            debug!(
                request_id = ctx.request_id(),
                route = ctx.route(),
                status,
                error = %error,
                "Request rejected"
            );
        }
    }
}

/// Injectable handle to the active [`SystemLogMediator`].
#[derive(Clone)]
pub struct LogMediatorRef(pub Arc<dyn SystemLogMediator>);

impl LogMediatorRef {
    pub fn new(mediator: impl SystemLogMediator) -> Self {
        Self(Arc::new(mediator))
    }
}

impl Default for LogMediatorRef {
    fn default() -> Self {
        Self::new(TracingLogMediator)
    }
}

impl Deref for LogMediatorRef {
    type Target = dyn SystemLogMediator;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(LogLevel::Trace.to_tracing_level(), Level::TRACE);
        assert_eq!(LogLevel::Warn.to_tracing_level(), Level::WARN);
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("loud"), None);
    }

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.level, LogLevel::Info);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.output, LogOutput::Stdout);
        assert!(config.env_filter.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = LogConfig::new()
            .level(LogLevel::Debug)
            .format(LogFormat::Pretty)
            .output(LogOutput::File("app.log".to_string()));

        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.output, LogOutput::File("app.log".to_string()));
    }

    #[test]
    fn test_invalid_filter_is_a_config_error() {
        let err = LogConfig::new().with_env_filter("trellis=loudest").init().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
