//! Logging configuration for tierenv
//!
//! Structured logging through the `tracing` framework: catalog transitions,
//! fallback probes and migration passes all emit events under the `tierenv_*`
//! targets. Output goes to stdout, a daily-rotated file, or both.

use std::path::{Path, PathBuf};
use tierenv_core::{Error, Result};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output destination
#[derive(Debug, Clone)]
pub enum LogOutput {
    /// Output to stdout
    Stdout,
    /// Output to a daily-rotated file
    File(PathBuf),
    /// Output to both stdout and file
    Both(PathBuf),
}

/// Log format style
#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    /// Human-readable multi-line format
    Pretty,
    /// Compact single-line format
    Compact,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum level or `EnvFilter` directive, e.g. `"tierenv_migrate=debug,info"`
    pub level: String,
    /// Output destination
    pub output: LogOutput,
    /// Format style
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: LogOutput::Stdout,
            format: LogFormat::Compact,
        }
    }
}

impl LogConfig {
    /// Info level on stdout
    pub fn info() -> Self {
        Self::default()
    }

    /// Debug level on stdout
    pub fn debug() -> Self {
        Self::default().with_level("debug")
    }

    /// Warn level on stdout
    pub fn warn() -> Self {
        Self::default().with_level("warn")
    }

    /// Log to a rotated file instead of stdout
    pub fn with_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output = LogOutput::File(path.into());
        self
    }

    /// Log to stdout and a rotated file
    pub fn with_both<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output = LogOutput::Both(path.into());
        self
    }

    /// Set log format
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set level filter
    pub fn with_level<S: Into<String>>(mut self, level: S) -> Self {
        self.level = level.into();
        self
    }

    /// Filter from `RUST_LOG`, else from `level`, else plain `info`
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }

    /// Install this configuration as the global subscriber
    ///
    /// Returns the appender guard for file output; keep it alive for as long
    /// as logs should be flushed. Fails if a global subscriber is already set.
    ///
    /// ```rust,no_run
    /// use tierenv::logging::LogConfig;
    ///
    /// let _guard = LogConfig::info().with_file("/var/log/tierenv/env.log").init()?;
    /// # Ok::<(), tierenv::Error>(())
    /// ```
    pub fn init(self) -> Result<Option<WorkerGuard>> {
        let filter = self.filter();
        let registry = tracing_subscriber::registry().with(filter);

        let installed = match (&self.output, self.format) {
            (LogOutput::Stdout, LogFormat::Pretty) => {
                registry.with(fmt::layer().pretty()).try_init().map(|_| None)
            }
            (LogOutput::Stdout, LogFormat::Compact) => {
                registry.with(fmt::layer().compact()).try_init().map(|_| None)
            }
            (LogOutput::File(path), LogFormat::Pretty) => {
                let (writer, guard) = file_writer(path);
                registry
                    .with(fmt::layer().with_writer(writer).with_ansi(false).pretty())
                    .try_init()
                    .map(|_| Some(guard))
            }
            (LogOutput::File(path), LogFormat::Compact) => {
                let (writer, guard) = file_writer(path);
                registry
                    .with(fmt::layer().with_writer(writer).with_ansi(false).compact())
                    .try_init()
                    .map(|_| Some(guard))
            }
            (LogOutput::Both(path), _) => {
                let (writer, guard) = file_writer(path);
                registry
                    .with(fmt::layer().compact())
                    .with(fmt::layer().with_writer(writer).with_ansi(false).compact())
                    .try_init()
                    .map(|_| Some(guard))
            }
        };

        installed.map_err(|e| Error::InvalidOperation(format!("logging already initialized: {}", e)))
    }
}

fn file_writer(path: &Path) -> (NonBlocking, WorkerGuard) {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("tierenv.log");
    tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, file_name))
}
