//! Nimbus Diagnostics
//!
//! Validation-time plots for a graph weather forecaster: sample maps, loss
//! bars, histograms, spectra and learned graph features, rendered inline or
//! on a background worker and forwarded to experiment loggers.

pub mod callbacks;
pub mod cli;
pub mod config;
pub mod demo;
pub mod dispatch;
pub mod error;
pub mod figure;
pub mod output;
pub mod plots;
pub mod shutdown;
pub mod sinks;
pub mod validation;

pub use callbacks::{Callback, CallbackList, PlotBase, TrainerContext, ValidationOutput};
pub use config::DiagConfig;
pub use dispatch::{DispatchMode, FailurePolicy, PlotDispatcher, PlotJob, PlotProducer};
pub use error::{DiagError, Result, TaskFailure};
pub use figure::Figure;
pub use output::{FigureOutput, FigureTarget};
pub use validation::ValidationLoop;
