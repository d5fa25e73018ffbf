//! Error types for subscriber setup

use thiserror::Error;

/// Errors raised while installing the tracing subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Global subscriber already installed: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),

    #[error("Failed to open rolling log file: {0}")]
    Appender(#[from] tracing_appender::rolling::InitError),

    #[error("Log file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for logging setup
pub type LoggingResult<T> = Result<T, LoggingError>;
