//! Figure persistence: save under the plots directory, then forward to the
//! enabled experiment loggers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;
use crate::figure::Figure;
use crate::sinks::ExperimentLogger;

/// Where a rendered figure goes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FigureTarget {
    /// File stem under `<plots_dir>/plots/`.
    pub tag: String,
    /// Key used by experiment loggers.
    pub exp_log_tag: String,
    pub epoch: usize,
}

impl FigureTarget {
    pub fn new(tag: impl Into<String>, exp_log_tag: impl Into<String>, epoch: usize) -> Self {
        Self {
            tag: tag.into(),
            exp_log_tag: exp_log_tag.into(),
            epoch,
        }
    }
}

/// `<base>/plots/<tag>_epoch<NNN>.png`
pub fn figure_path(base: &Path, tag: &str, epoch: usize) -> PathBuf {
    base.join("plots").join(format!("{tag}_epoch{epoch:03}.png"))
}

#[derive(Clone, Default)]
pub struct FigureOutput {
    save_basedir: Option<PathBuf>,
    loggers: Vec<Arc<dyn ExperimentLogger>>,
}

impl FigureOutput {
    pub fn new(save_basedir: Option<PathBuf>, loggers: Vec<Arc<dyn ExperimentLogger>>) -> Self {
        Self {
            save_basedir,
            loggers,
        }
    }

    pub fn save_basedir(&self) -> Option<&Path> {
        self.save_basedir.as_deref()
    }

    /// Save and log `figure`. Loggers only see figures that were saved.
    /// Returns the saved path, if any. The figure is consumed on every path.
    pub fn output(&self, figure: Figure, target: &FigureTarget) -> Result<Option<PathBuf>> {
        let Some(base) = &self.save_basedir else {
            tracing::debug!("No plots directory configured, dropping figure '{}'", target.tag);
            return Ok(None);
        };
        let path = figure_path(base, &target.tag, target.epoch);
        figure.save_png(&path)?;
        tracing::debug!("Saved figure {}", path.display());
        for logger in &self.loggers {
            logger.log_figure(&target.exp_log_tag, &figure, &path, target.epoch)?;
        }
        Ok(Some(path))
    }
}

impl std::fmt::Debug for FigureOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FigureOutput")
            .field("save_basedir", &self.save_basedir)
            .field(
                "loggers",
                &self.loggers.iter().map(|l| l.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::ImageRunLogger;

    #[test]
    fn test_figure_path_pads_epoch() {
        let path = figure_path(Path::new("/out"), "edge_trainable_params", 7);
        assert_eq!(path, PathBuf::from("/out/plots/edge_trainable_params_epoch007.png"));
        let path = figure_path(Path::new("/out"), "x", 1234);
        assert!(path.ends_with("x_epoch1234.png"));
    }

    #[test]
    fn test_output_without_basedir_skips_loggers() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let logger = Arc::new(ImageRunLogger::new(dir.path().join("run")));
        let sink: Arc<dyn ExperimentLogger> = logger.clone();
        let output = FigureOutput::new(None, vec![sink.clone()]);
        let fig = Figure::render(4, 4, "t", |_| Ok(()))?;
        let target = FigureTarget::new("node_trainable_params", "node_trainable_params", 0);
        assert!(output.output(fig, &target)?.is_none());
        assert!(!logger.history_path().exists());

        let output = FigureOutput::new(Some(dir.path().to_path_buf()), vec![sink]);
        let fig = Figure::render(4, 4, "t", |_| Ok(()))?;
        let saved = output.output(fig, &target)?;
        assert_eq!(
            saved,
            Some(dir.path().join("plots/node_trainable_params_epoch000.png"))
        );
        assert!(logger.history_path().exists());
        Ok(())
    }
}
