//! Demo - Synthetic validation run exercising every diagnostics callback
//!
//! Builds a toy atmosphere on a regular lat/lon grid (travelling waves plus
//! noise, non-negative precipitation, a diurnal insolation forcing), fits
//! normaliser statistics on it and validates a `LinearForecaster` with the
//! callbacks enabled by the configuration.

use std::f32::consts::PI;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use clap::Args;
use nimbus_core::graph;
use nimbus_core::model::LinearForecasterConfig;
use nimbus_core::{
    DataIndices, LinearForecaster, NormalizationMethod, Normalizer, VariableStats, WeightedMseLoss,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use tracing::{error, info};

use crate::callbacks;
use crate::config::DiagConfig;
use crate::dispatch::FailurePolicy;
use crate::error::{DiagError, Result};
use crate::validation::ValidationLoop;

/// `(name, mean, amplitude)` of the prognostic fields.
const PROGNOSTIC: [(&str, f32, f32); 8] = [
    ("z_500", 55_000.0, 1_500.0),
    ("t_850", 275.0, 15.0),
    ("u_850", 5.0, 10.0),
    ("v_850", 0.0, 8.0),
    ("2t", 285.0, 20.0),
    ("10u", 2.0, 6.0),
    ("10v", 0.0, 5.0),
    ("sp", 98_000.0, 2_000.0),
];
const DIAGNOSTIC: [&str; 2] = ["tp", "cp"];
const FORCING: [&str; 1] = ["insolation"];

/// A gridded toy dataset held as `(time, nodes, variables)` on the host.
pub struct SyntheticDataset {
    pub variables: Vec<String>,
    pub forcing: Vec<String>,
    pub diagnostic: Vec<String>,
    pub coords: Vec<[f32; 2]>,
    steps: usize,
    values: Vec<f32>,
}

impl SyntheticDataset {
    pub fn generate(nlat: usize, nlon: usize, steps: usize, seed: u64) -> Result<Self> {
        let coords = graph::regular_grid(nlat, nlon);
        let variables: Vec<String> = PROGNOSTIC
            .iter()
            .map(|(name, _, _)| name.to_string())
            .chain(DIAGNOSTIC.iter().map(|s| s.to_string()))
            .chain(FORCING.iter().map(|s| s.to_string()))
            .collect();
        let n_vars = variables.len();

        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0f32, 0.1).map_err(|e| DiagError::Config(e.to_string()))?;
        let phases: Vec<f32> = (0..n_vars).map(|_| rng.gen_range(0.0..2.0 * PI)).collect();

        let mut values = Vec::with_capacity(steps * coords.len() * n_vars);
        for t in 0..steps {
            let drift = 0.3 * t as f32;
            for [lat, lon] in &coords {
                for (v, phase) in phases.iter().enumerate() {
                    let wave = lat.cos() * (2.0 * lon - drift + phase).sin();
                    let value = if let Some((_, mean, amplitude)) = PROGNOSTIC.get(v) {
                        mean + amplitude * (wave + noise.sample(&mut rng))
                    } else if v < PROGNOSTIC.len() + DIAGNOSTIC.len() {
                        let rain = (wave + noise.sample(&mut rng)).max(0.0);
                        4.0 * rain * rain
                    } else {
                        (lat.cos() * (lon - drift).cos()).max(0.0) * 1_360.0
                    };
                    values.push(value);
                }
            }
        }

        Ok(Self {
            variables,
            forcing: FORCING.iter().map(|s| s.to_string()).collect(),
            diagnostic: DIAGNOSTIC.iter().map(|s| s.to_string()).collect(),
            coords,
            steps,
            values,
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.coords.len()
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn stats(&self) -> Vec<VariableStats> {
        let n_vars = self.variables.len();
        (0..n_vars)
            .map(|v| {
                let column: Vec<f32> = self.values.iter().skip(v).step_by(n_vars).copied().collect();
                VariableStats::from_values(&column)
            })
            .collect()
    }

    pub fn normalizer(&self, device: &Device) -> Result<Normalizer> {
        let methods: Vec<NormalizationMethod> = self
            .variables
            .iter()
            .map(|name| {
                if self.diagnostic.contains(name) {
                    NormalizationMethod::Max
                } else if self.forcing.contains(name) {
                    NormalizationMethod::MinMax
                } else {
                    NormalizationMethod::MeanStd
                }
            })
            .collect();
        Ok(Normalizer::new(&self.variables, &self.stats(), &methods, device)?)
    }

    /// `count` raw batches of `batch_size` windows, each `window` steps long.
    pub fn batches(&self, count: usize, batch_size: usize, window: usize, device: &Device) -> Result<Vec<Tensor>> {
        if window > self.steps {
            return Err(DiagError::InsufficientBatch {
                available: self.steps,
                required: window,
            });
        }
        let frame = self.num_nodes() * self.variables.len();
        let starts = self.steps - window + 1;
        let mut batches = Vec::with_capacity(count);
        for b in 0..count {
            let mut data = Vec::with_capacity(batch_size * window * frame);
            for s in 0..batch_size {
                let start = (b * batch_size + s) % starts;
                data.extend_from_slice(&self.values[start * frame..(start + window) * frame]);
            }
            batches.push(Tensor::from_vec(
                data,
                (batch_size, window, self.num_nodes(), self.variables.len()),
                device,
            )?);
        }
        Ok(batches)
    }

    pub fn forecaster(
        &self,
        model_config: LinearForecasterConfig,
        device: &Device,
    ) -> Result<(LinearForecaster, VarMap)> {
        let indices = DataIndices::new(&self.variables, &self.forcing, &self.diagnostic)?;
        let pre = self.normalizer(device)?;
        let hidden = graph::regular_grid(4, 8);
        let weights = Tensor::new(graph::area_weights(&self.coords).as_slice(), device)?;
        let loss = WeightedMseLoss::new(weights, None, false)?;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = LinearForecaster::load(
            model_config,
            indices,
            pre,
            &self.coords,
            &hidden,
            Box::new(loss),
            vb,
        )?;
        Ok((model, varmap))
    }
}

#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    /// Diagnostics config (YAML or JSON). Defaults apply when omitted.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Where figures are written (overrides hardware.paths.plots)
    #[arg(short, long)]
    pub plots: Option<PathBuf>,

    #[arg(long, default_value_t = 2)]
    pub epochs: usize,

    #[arg(long, default_value_t = 4)]
    pub batches: usize,

    #[arg(long, default_value_t = 2)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 16)]
    pub nlat: usize,

    #[arg(long, default_value_t = 32)]
    pub nlon: usize,

    #[arg(long, default_value_t = 2)]
    pub multi_step: usize,

    #[arg(long, default_value_t = 2)]
    pub rollout: usize,

    /// Plot every N batches (overrides diagnostics.plot.frequency)
    #[arg(long)]
    pub frequency: Option<usize>,

    /// Render on the calling thread
    #[arg(long)]
    pub sync: bool,

    /// Also plot trainable graph features
    #[arg(long)]
    pub learned_features: bool,

    /// Also plot a long rollout every epoch
    #[arg(long)]
    pub long_rollout: bool,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

impl ValidateArgs {
    fn diag_config(&self) -> Result<DiagConfig> {
        let mut config = match &self.config {
            Some(path) => DiagConfig::from_file(path)?,
            None => DiagConfig::default(),
        };
        if self.plots.is_some() {
            config.hardware.paths.plots = self.plots.clone();
        }
        if config.hardware.paths.plots.is_none() {
            config.hardware.paths.plots = Some(PathBuf::from("outputs"));
        }
        if config.data.diagnostic.is_empty() {
            config.data.diagnostic = DIAGNOSTIC.iter().map(|s| s.to_string()).collect();
        }
        if config.data.forcing.is_empty() {
            config.data.forcing = FORCING.iter().map(|s| s.to_string()).collect();
        }
        let plot = &mut config.diagnostics.plot;
        if let Some(frequency) = self.frequency {
            plot.frequency = frequency;
        }
        if self.sync {
            plot.asynchronous = false;
        }
        plot.learned_features |= self.learned_features;
        if self.long_rollout {
            plot.longrollout.enabled = true;
            plot.longrollout.frequency = 1;
        }
        config.validate()?;
        config.validate_batch_size(self.batch_size)?;
        Ok(config)
    }

    /// Time steps each batch must hold.
    fn window(&self, config: &DiagConfig) -> usize {
        let longrollout = &config.diagnostics.plot.longrollout;
        let long = if longrollout.enabled {
            longrollout.rollout.iter().copied().max().unwrap_or(0)
        } else {
            0
        };
        self.multi_step + self.rollout.max(long)
    }
}

/// `validate` subcommand.
pub fn run(args: ValidateArgs) -> anyhow::Result<()> {
    info!("--- Nimbus Diagnostics (synthetic validation) ---");
    let config = args.diag_config()?;
    let device = Device::cuda_if_available(0)?;
    info!("Device: {:?}", device);

    let window = args.window(&config);
    let steps = window + args.batches * args.batch_size;
    let dataset = SyntheticDataset::generate(args.nlat, args.nlon, steps, args.seed)?;
    info!(
        "Dataset: {} nodes, {} variables, {} steps",
        dataset.num_nodes(),
        dataset.variables.len(),
        dataset.steps()
    );

    let model_config = LinearForecasterConfig {
        multi_step: args.multi_step,
        rollout: args.rollout,
        data_graph: config.graph.data.clone(),
        hidden_graph: config.graph.hidden.clone(),
        ..Default::default()
    };
    let (model, _varmap) = dataset.forecaster(model_config, &device)?;
    let batches = dataset.batches(args.batches, args.batch_size, window, &device)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    let ctrl_c_count = Arc::new(AtomicUsize::new(0));
    let c = ctrl_c_count.clone();
    ctrlc::set_handler(move || {
        let count = c.fetch_add(1, Ordering::SeqCst) + 1;
        if count == 1 {
            info!("🛑 Ctrl+C detected! Finishing current batch and draining plots...");
            r.store(false, Ordering::SeqCst);
        } else {
            error!("⚠️  Force quit! Exiting without draining plots.");
            crate::shutdown::exit(1);
        }
    })?;

    let callbacks = callbacks::from_config(&config, FailurePolicy::Exit)?;
    let losses = ValidationLoop::new(&model, callbacks)
        .with_running_flag(running)
        .run(args.epochs, &batches)?;

    if let Some(last) = losses.last() {
        info!("--------------------------------");
        info!("Epochs:        {}", losses.len());
        info!("Final val loss {:.5}", last);
        if let Some(dir) = &config.hardware.paths.plots {
            info!("Figures in     {}", dir.join("plots").display());
        }
        info!("--------------------------------");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_is_deterministic_and_shaped() -> anyhow::Result<()> {
        let a = SyntheticDataset::generate(4, 8, 6, 7)?;
        let b = SyntheticDataset::generate(4, 8, 6, 7)?;
        assert_eq!(a.values, b.values);
        assert_eq!(a.variables.len(), 11);

        let batches = a.batches(3, 2, 4, &Device::Cpu)?;
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].dims(), &[2, 4, 32, 11]);
        assert!(a.batches(1, 1, 7, &Device::Cpu).is_err());
        Ok(())
    }

    #[test]
    fn test_precipitation_is_non_negative() -> anyhow::Result<()> {
        let data = SyntheticDataset::generate(4, 8, 3, 1)?;
        let tp = data.variables.iter().position(|v| v == "tp").unwrap_or(usize::MAX);
        let stats = data.stats();
        assert!(stats[tp].minimum >= 0.0);
        assert!(stats[0].stdev > 0.0);
        Ok(())
    }
}
