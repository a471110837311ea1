//! Experiment loggers
//!
//! Offline stand-ins for experiment-tracking backends. Each logger receives
//! every saved figure; which ones run is decided by independent flags in
//! `diagnostics.log`.
//!
//! - ImageRunLogger: image history of a run (`log.wandb`)
//! - ArtifactRunLogger: file artifacts of a tracked run (`log.mlflow`)

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::LogConfig;
use crate::error::{DiagError, Result};
use crate::figure::Figure;

pub trait ExperimentLogger: Send + Sync {
    fn name(&self) -> &str;

    /// Record a figure that has already been saved to `saved_path`.
    fn log_figure(&self, exp_log_tag: &str, figure: &Figure, saved_path: &Path, epoch: usize) -> Result<()>;
}

/// One line of a logger's JSONL index.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LogRecord {
    pub key: String,
    pub path: PathBuf,
    pub epoch: usize,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

fn append_record(index: &Path, record: &LogRecord) -> Result<()> {
    if let Some(parent) = index.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(index)?;
    writeln!(file, "{}", serde_json::to_string(record)?)?;
    Ok(())
}

/// Read every record of a JSONL index.
pub fn read_records(index: &Path) -> Result<Vec<LogRecord>> {
    let content = fs::read_to_string(index)?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(DiagError::from))
        .collect()
}

/// Writes its own copy of every figure under `media/images/` and keeps a history.
pub struct ImageRunLogger {
    run_dir: PathBuf,
}

impl ImageRunLogger {
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
        }
    }

    pub fn history_path(&self) -> PathBuf {
        self.run_dir.join("history.jsonl")
    }
}

impl ExperimentLogger for ImageRunLogger {
    fn name(&self) -> &str {
        "wandb"
    }

    fn log_figure(&self, exp_log_tag: &str, figure: &Figure, _saved_path: &Path, epoch: usize) -> Result<()> {
        let path = self
            .run_dir
            .join("media")
            .join("images")
            .join(format!("{exp_log_tag}_{epoch}.png"));
        figure.save_png(&path)?;
        append_record(
            &self.history_path(),
            &LogRecord {
                key: exp_log_tag.to_string(),
                path,
                epoch,
                timestamp: chrono::Utc::now(),
            },
        )
    }
}

/// Copies saved figures into `<tracking_dir>/<run_id>/artifacts/plots/`.
pub struct ArtifactRunLogger {
    run_dir: PathBuf,
}

impl ArtifactRunLogger {
    pub fn new(tracking_dir: impl AsRef<Path>, run_id: &str) -> Self {
        Self {
            run_dir: tracking_dir.as_ref().join(run_id),
        }
    }

    pub fn artifacts_path(&self) -> PathBuf {
        self.run_dir.join("artifacts.jsonl")
    }
}

impl ExperimentLogger for ArtifactRunLogger {
    fn name(&self) -> &str {
        "mlflow"
    }

    fn log_figure(&self, exp_log_tag: &str, _figure: &Figure, saved_path: &Path, epoch: usize) -> Result<()> {
        let file_name = saved_path.file_name().ok_or_else(|| DiagError::Logger {
            logger: self.name().to_string(),
            message: format!("artifact path {} has no file name", saved_path.display()),
        })?;
        let dest_dir = self.run_dir.join("artifacts").join("plots");
        fs::create_dir_all(&dest_dir)?;
        let dest = dest_dir.join(file_name);
        fs::copy(saved_path, &dest)?;
        append_record(
            &self.artifacts_path(),
            &LogRecord {
                key: exp_log_tag.to_string(),
                path: dest,
                epoch,
                timestamp: chrono::Utc::now(),
            },
        )
    }
}

/// Loggers enabled by `diagnostics.log`.
pub fn from_config(log: &LogConfig) -> Vec<Arc<dyn ExperimentLogger>> {
    let mut loggers: Vec<Arc<dyn ExperimentLogger>> = Vec::new();
    if log.wandb.enabled {
        tracing::info!("Image run logger enabled at {}", log.wandb.dir.display());
        loggers.push(Arc::new(ImageRunLogger::new(&log.wandb.dir)));
    }
    if log.mlflow.enabled {
        tracing::info!(
            "Artifact run logger enabled at {} (run {})",
            log.mlflow.tracking_dir.display(),
            log.mlflow.run_id
        );
        loggers.push(Arc::new(ArtifactRunLogger::new(
            &log.mlflow.tracking_dir,
            &log.mlflow.run_id,
        )));
    }
    loggers
}
