//! Structured logging for MADAODV nodes and simulations
//!
//! Every routing engine logs inside a `madaodv` span that carries the node's
//! mesh address, so interleaved output from many simulated nodes can be
//! filtered per node.
//!
//! # Features
//!
//! - **JSONL Output**: One JSON object per event (default)
//! - **Pretty Output**: Human-readable console output for development
//! - **File Rotation**: Daily/hourly log rotation via tracing-appender
//! - **RUST_LOG**: An `EnvFilter` directive overrides the configured level
//!
//! # Quick Start
//!
//! ```ignore
//! use madaodv_logging::{LogConfig, MadaodvSubscriberBuilder};
//!
//! // JSONL to the console
//! let _guard = MadaodvSubscriberBuilder::new().init();
//!
//! // Pretty, debug-level output
//! let _guard = MadaodvSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init();
//! ```

pub mod config;
pub mod error;

pub use config::{ConsoleConfig, FileConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use error::{LoggingError, LoggingResult};

use std::fs::{self, File};

use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Builder for configuring and installing the MADAODV tracing subscriber
///
/// By default, console output uses JSONL format. Use `LogConfig::development()`
/// for human-readable output.
pub struct MadaodvSubscriberBuilder {
    config: LogConfig,
}

impl Default for MadaodvSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MadaodvSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default filter directive
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// The configuration this builder will install
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Build the subscriber without installing it
    ///
    /// The returned guard flushes file output when dropped and must outlive
    /// all logging.
    pub fn build(self) -> LoggingResult<(impl Subscriber + Send + Sync, Option<WorkerGuard>)> {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.config.default_level));

        let mut layers: Vec<BoxedLayer> = Vec::new();
        let mut guard = None;

        if self.config.console.enabled {
            layers.push(console_layer(&self.config));
        }

        if let Some(file_config) = &self.config.file {
            let (writer, file_guard) = file_writer(file_config)?;
            guard = Some(file_guard);
            let jsonl = &self.config.jsonl;
            layers.push(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(jsonl.include_spans)
                    .flatten_event(jsonl.flatten_events)
                    .with_file(jsonl.include_location)
                    .with_line_number(jsonl.include_location)
                    .with_writer(writer)
                    .boxed(),
            );
        }

        Ok((Registry::default().with(layers).with(filter), guard))
    }

    /// Install the subscriber globally
    pub fn try_init(self) -> LoggingResult<Option<WorkerGuard>> {
        let (subscriber, guard) = self.build()?;
        subscriber.try_init()?;
        Ok(guard)
    }

    /// Install the subscriber globally, reporting failures on stderr
    ///
    /// A failure leaves logging disabled rather than aborting the program.
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Warning: logging not initialized: {}", e);
                None
            }
        }
    }
}

fn console_layer(config: &LogConfig) -> BoxedLayer {
    let console = &config.console;
    let jsonl = &config.jsonl;
    match (console.pretty, console.test_writer) {
        (true, true) => fmt::layer()
            .with_ansi(console.ansi)
            .with_target(true)
            .with_test_writer()
            .boxed(),
        (true, false) => fmt::layer()
            .with_ansi(console.ansi)
            .with_target(true)
            .boxed(),
        (false, test_writer) => {
            let layer = fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(jsonl.include_spans)
                .flatten_event(jsonl.flatten_events)
                .with_file(jsonl.include_location)
                .with_line_number(jsonl.include_location);
            if test_writer {
                layer.with_test_writer().boxed()
            } else {
                layer.boxed()
            }
        }
    }
}

/// Open the file sink; `Never` truncates a single file, the others roll
fn file_writer(config: &FileConfig) -> LoggingResult<(NonBlocking, WorkerGuard)> {
    let rotation = match config.rotation {
        RotationStrategy::Never => {
            fs::create_dir_all(&config.directory)?;
            let path = config.directory.join(format!("{}.log", config.prefix));
            let file = File::create(path)?;
            return Ok(tracing_appender::non_blocking(file));
        }
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(config.prefix.clone())
        .filename_suffix("log");
    if let Some(max) = config.max_files {
        builder = builder.max_log_files(max);
    }
    let appender = builder.build(&config.directory)?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Initialize logging with default configuration (JSONL to console)
pub fn init_default() -> Option<WorkerGuard> {
    MadaodvSubscriberBuilder::new().init()
}

/// Initialize logging for development (verbose, pretty console output)
pub fn init_development() -> Option<WorkerGuard> {
    MadaodvSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init()
}

/// Initialize logging for tests; safe to call from every test
pub fn init_testing() {
    let _ = MadaodvSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}
