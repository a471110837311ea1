//! Diagnostics Configuration
//!
//! Hierarchical, read-only settings consumed by the plot callbacks.
//! Loaded from YAML or JSON (chosen by file extension); every field has a default.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use clap::Args;
use serde::{Deserialize, Serialize};

use crate::error::{DiagError, Result};

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct DiagConfig {
    pub hardware: HardwareConfig,
    pub data: DataConfig,
    pub graph: GraphConfig,
    pub diagnostics: DiagnosticsConfig,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct HardwareConfig {
    pub paths: PathsConfig,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    /// Base directory for saved figures; nothing is written when unset.
    pub plots: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct DataConfig {
    pub forcing: Vec<String>,
    pub diagnostic: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct GraphConfig {
    pub data: String,
    pub hidden: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            data: "data".to_string(),
            hidden: "hidden".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub plot: PlotConfig,
    pub log: LogConfig,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PlotConfig {
    pub enabled: bool,
    /// Render on the background worker instead of the hook thread.
    pub asynchronous: bool,
    /// Plot every `frequency` validation batches.
    pub frequency: usize,
    pub sample_idx: usize,
    /// Panels drawn per parameter in sample figures.
    pub per_sample: usize,
    pub parameters: Vec<String>,
    pub parameters_histogram: Option<Vec<String>>,
    pub parameters_spectrum: Option<Vec<String>>,
    pub parameter_groups: BTreeMap<String, Vec<String>>,
    pub accumulation_levels_plot: Vec<f32>,
    /// Hex colours (`#rrggbb`), one per accumulation interval.
    pub cmap_accumulation: Vec<String>,
    pub precip_and_related_fields: Vec<String>,
    /// Plot trainable node and edge features of the graphs.
    pub learned_features: bool,
    pub longrollout: LongRolloutConfig,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            asynchronous: true,
            frequency: 750,
            sample_idx: 0,
            per_sample: 6,
            parameters: vec![
                "z_500".to_string(),
                "t_850".to_string(),
                "u_850".to_string(),
                "v_850".to_string(),
                "2t".to_string(),
                "10u".to_string(),
                "10v".to_string(),
                "sp".to_string(),
                "tp".to_string(),
                "cp".to_string(),
            ],
            parameters_histogram: Some(vec!["tp".to_string(), "10u".to_string()]),
            parameters_spectrum: Some(vec!["z_500".to_string(), "tp".to_string()]),
            parameter_groups: BTreeMap::new(),
            accumulation_levels_plot: vec![
                0.0, 0.05, 0.1, 0.25, 0.5, 1.0, 1.5, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 100.0,
            ],
            cmap_accumulation: [
                "#ffffff", "#04e9e7", "#019ff4", "#0300f4", "#02fd02", "#01c501", "#008e00",
                "#fdf802", "#e5bc00", "#fd9500", "#fd0000", "#d40000", "#bc0000", "#f800fd",
            ]
            .iter()
            .map(|c| c.to_string())
            .collect(),
            precip_and_related_fields: vec!["tp".to_string(), "cp".to_string()],
            learned_features: false,
            longrollout: LongRolloutConfig::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LongRolloutConfig {
    pub enabled: bool,
    /// Rollout lengths (1-based) at which to plot.
    pub rollout: Vec<usize>,
    /// Run every `frequency` epochs.
    pub frequency: usize,
}

impl Default for LongRolloutConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rollout: vec![4],
            frequency: 20,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    pub wandb: WandbConfig,
    pub mlflow: MlflowConfig,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct WandbConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for WandbConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("wandb"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct MlflowConfig {
    pub enabled: bool,
    pub tracking_dir: PathBuf,
    pub run_id: String,
}

impl Default for MlflowConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tracking_dir: PathBuf::from("mlruns"),
            run_id: "local".to_string(),
        }
    }
}

impl DiagConfig {
    /// Load from `.yaml`/`.yml` or `.json`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            other => {
                return Err(DiagError::Config(format!(
                    "unsupported config extension {:?} for {}",
                    other,
                    path.display()
                )))
            }
        };
        config.validate()?;
        tracing::info!("Loaded diagnostics config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let plot = &self.diagnostics.plot;
        if plot.frequency == 0 {
            return Err(DiagError::Config(
                "diagnostics.plot.frequency must be positive".into(),
            ));
        }
        if plot.per_sample == 0 || plot.per_sample > 6 {
            return Err(DiagError::Config(format!(
                "diagnostics.plot.per_sample must be in 1..=6, got {}",
                plot.per_sample
            )));
        }
        let rollout = &plot.longrollout;
        if rollout.enabled {
            if rollout.frequency == 0 {
                return Err(DiagError::Config(
                    "diagnostics.plot.longrollout.frequency must be positive".into(),
                ));
            }
            if rollout.rollout.is_empty() || rollout.rollout.contains(&0) {
                return Err(DiagError::Config(
                    "diagnostics.plot.longrollout.rollout needs positive rollout lengths".into(),
                ));
            }
        }
        if plot.accumulation_levels_plot.windows(2).any(|w| w[0] >= w[1]) {
            return Err(DiagError::Config(
                "diagnostics.plot.accumulation_levels_plot must be strictly increasing".into(),
            ));
        }
        if !plot.accumulation_levels_plot.is_empty()
            && plot.cmap_accumulation.len() + 1 < plot.accumulation_levels_plot.len()
        {
            return Err(DiagError::Config(format!(
                "{} accumulation levels need at least {} colours, got {}",
                plot.accumulation_levels_plot.len(),
                plot.accumulation_levels_plot.len() - 1,
                plot.cmap_accumulation.len()
            )));
        }
        Ok(())
    }

    /// Checks that depend on the batch size seen at run time.
    pub fn validate_batch_size(&self, batch_size: usize) -> Result<()> {
        let idx = self.diagnostics.plot.sample_idx;
        if idx >= batch_size {
            return Err(DiagError::Config(format!(
                "diagnostics.plot.sample_idx {idx} out of range for batch size {batch_size}"
            )));
        }
        Ok(())
    }

    pub fn is_diagnostic(&self, name: &str) -> bool {
        self.data.diagnostic.iter().any(|d| d == name)
    }
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Validate and print this file instead of the defaults.
    #[arg(short, long)]
    pub file: Option<PathBuf>,
}

/// `config` subcommand: print the effective configuration as YAML.
pub fn run(args: ConfigArgs) -> anyhow::Result<()> {
    let config = match &args.file {
        Some(path) => DiagConfig::from_file(path)?,
        None => DiagConfig::default(),
    };
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}
