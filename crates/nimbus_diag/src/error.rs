//! Error types for nimbus_diag.
//!
//! `DiagError` covers configuration, tensor, drawing and IO failures.
//! `TaskFailure` wraps a `DiagError` raised on the plot worker together with
//! the worker's name and a backtrace, so the thread retrieving the result
//! sees the original structured error rather than a formatted copy.

use std::backtrace::Backtrace;
use std::fmt;

use plotters::drawing::DrawingAreaErrorKind;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DiagError>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DiagError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid YAML config file.
    #[error("invalid config file: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Invalid JSON (config file or logger record).
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    /// Candle error.
    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// PNG encoding error.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// Plotting backend error.
    #[error("drawing error: {0}")]
    Draw(String),

    /// A configured parameter is not a model output.
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    /// Batch has too few time steps for the requested rollout.
    #[error("batch length {available} not sufficient for requested rollout (needs {required})")]
    InsufficientBatch { available: usize, required: usize },

    /// Experiment logger failure.
    #[error("experiment logger '{logger}' failed: {message}")]
    Logger { logger: String, message: String },

    /// The plot worker panicked while rendering.
    #[error("plot worker panicked: {0}")]
    WorkerPanic(String),

    /// The plot worker went away before reporting a result.
    #[error("plot worker is no longer running")]
    WorkerLost,

    /// Failure raised on the plot worker, surfaced at retrieval.
    #[error(transparent)]
    Async(Box<TaskFailure>),
}

impl<E> From<DrawingAreaErrorKind<E>> for DiagError
where
    E: std::error::Error + Send + Sync,
{
    fn from(err: DrawingAreaErrorKind<E>) -> Self {
        DiagError::Draw(err.to_string())
    }
}

impl DiagError {
    /// The error that started it all, looking through worker failures.
    pub fn innermost(&self) -> &DiagError {
        match self {
            DiagError::Async(failure) => failure.error.innermost(),
            other => other,
        }
    }
}

impl From<TaskFailure> for DiagError {
    fn from(failure: TaskFailure) -> Self {
        DiagError::Async(Box::new(failure))
    }
}

/// A plot job that failed on the worker thread.
#[derive(Debug)]
pub struct TaskFailure {
    pub tag: String,
    pub thread: String,
    pub error: DiagError,
    pub backtrace: Backtrace,
}

impl TaskFailure {
    pub fn new(tag: impl Into<String>, error: DiagError) -> Self {
        let thread = std::thread::current()
            .name()
            .unwrap_or("unnamed")
            .to_string();
        Self {
            tag: tag.into(),
            thread,
            error,
            backtrace: Backtrace::capture(),
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "plot '{}' failed on thread '{}': {}",
            self.tag, self.thread, self.error
        )
    }
}

impl std::error::Error for TaskFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
