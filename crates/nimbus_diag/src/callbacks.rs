//! Callbacks - Validation diagnostics hooked into the training loop
//!
//! Every plot callback composes a `PlotBase` (dispatcher, frequency and
//! cached processors) and implements the hooks it needs:
//! - LongRolloutPlots: samples after a long autoregressive rollout
//! - GraphNodeTrainableFeaturesPlot / GraphEdgeTrainableFeaturesPlot: learned graph features
//! - PlotLoss: per-variable loss bars, grouped by parameter family
//! - PlotSample: input/target/prediction maps
//! - PlotAdditionalMetrics: histograms and power spectra

use std::sync::Arc;

use candle_core::{Device, Tensor, D};
use nimbus_core::graph::to_degrees;
use nimbus_core::{Forecaster, Normalizer};
use tracing::info;

use crate::config::DiagConfig;
use crate::dispatch::{DispatchMode, FailurePolicy, PlotDispatcher, PlotJob};
use crate::error::{DiagError, Result};
use crate::output::FigureOutput;
use crate::plots::colors::AccumulationScale;
use crate::plots::sample::SampleStyle;
use crate::plots::{Frame, PlotParameter};
use crate::sinks::{self, ExperimentLogger};

pub mod graph_features;
pub mod grouping;
pub mod long_rollout;
pub mod loss;
pub mod metrics;
pub mod sample;

pub use graph_features::{GraphEdgeTrainableFeaturesPlot, GraphNodeTrainableFeaturesPlot};
pub use grouping::ParameterGrouping;
pub use long_rollout::LongRolloutPlots;
pub use loss::PlotLoss;
pub use metrics::PlotAdditionalMetrics;
pub use sample::PlotSample;

/// What the training loop tells a hook about the current run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrainerContext {
    pub current_epoch: usize,
    /// Only the primary process renders.
    pub is_primary: bool,
    pub local_rank: usize,
}

impl TrainerContext {
    pub fn single_process(current_epoch: usize) -> Self {
        Self {
            current_epoch,
            is_primary: true,
            local_rank: 0,
        }
    }
}

/// Result of one validation step.
#[derive(Clone, Debug)]
pub struct ValidationOutput {
    pub loss: Tensor,
    /// Normalised prediction of each rollout step, `(bs, N, V_out)`.
    pub predictions: Vec<Tensor>,
}

pub trait Callback {
    fn name(&self) -> &str;

    fn on_validation_epoch_start(&mut self, _trainer: &TrainerContext, _model: &dyn Forecaster) -> Result<()> {
        Ok(())
    }

    fn on_validation_batch_end(
        &mut self,
        _trainer: &TrainerContext,
        _model: &dyn Forecaster,
        _outputs: &ValidationOutput,
        _batch: &Tensor,
        _batch_idx: usize,
    ) -> Result<()> {
        Ok(())
    }

    fn on_validation_epoch_end(&mut self, _trainer: &TrainerContext, _model: &dyn Forecaster) -> Result<()> {
        Ok(())
    }

    /// Finish outstanding work. Called once when training ends.
    fn teardown(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct CallbackList {
    callbacks: Vec<Box<dyn Callback>>,
}

impl CallbackList {
    pub fn push(&mut self, callback: Box<dyn Callback>) {
        self.callbacks.push(callback);
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.callbacks.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn on_validation_epoch_start(&mut self, trainer: &TrainerContext, model: &dyn Forecaster) -> Result<()> {
        for callback in &mut self.callbacks {
            callback.on_validation_epoch_start(trainer, model)?;
        }
        Ok(())
    }

    pub fn on_validation_batch_end(
        &mut self,
        trainer: &TrainerContext,
        model: &dyn Forecaster,
        outputs: &ValidationOutput,
        batch: &Tensor,
        batch_idx: usize,
    ) -> Result<()> {
        for callback in &mut self.callbacks {
            callback.on_validation_batch_end(trainer, model, outputs, batch, batch_idx)?;
        }
        Ok(())
    }

    pub fn on_validation_epoch_end(&mut self, trainer: &TrainerContext, model: &dyn Forecaster) -> Result<()> {
        for callback in &mut self.callbacks {
            callback.on_validation_epoch_end(trainer, model)?;
        }
        Ok(())
    }

    /// Tear every callback down, reporting the first failure.
    pub fn teardown(&mut self) -> Result<()> {
        let mut first = None;
        for callback in &mut self.callbacks {
            if let Err(e) = callback.teardown() {
                tracing::warn!("Teardown of {} failed: {}", callback.name(), e);
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

/// Shared state of the plot callbacks.
pub struct PlotBase {
    dispatcher: PlotDispatcher,
    plot_frequency: usize,
    pre_processors: Option<Normalizer>,
    post_processors: Option<Normalizer>,
    latlons: Option<Arc<Vec<[f64; 2]>>>,
}

impl PlotBase {
    pub fn new(
        name: &str,
        config: &DiagConfig,
        loggers: Vec<Arc<dyn ExperimentLogger>>,
        policy: FailurePolicy,
    ) -> Result<Self> {
        let plot = &config.diagnostics.plot;
        let output = FigureOutput::new(config.hardware.paths.plots.clone(), loggers);
        let dispatcher = PlotDispatcher::new(name, DispatchMode::from_asynchronous(plot.asynchronous), output)?
            .with_failure_policy(policy);
        Ok(Self {
            dispatcher,
            plot_frequency: plot.frequency,
            pre_processors: None,
            post_processors: None,
            latlons: None,
        })
    }

    pub fn should_plot(&self, batch_idx: usize) -> bool {
        self.plot_frequency > 0 && batch_idx % self.plot_frequency == 0
    }

    pub fn dispatcher(&self) -> &PlotDispatcher {
        &self.dispatcher
    }

    /// CPU copy of the model's pre-processors, taken on first use.
    pub fn pre_processors(&mut self, model: &dyn Forecaster) -> Result<&Normalizer> {
        let pre = match self.pre_processors.take() {
            Some(pre) => pre,
            None => model.pre_processors().to_device(&Device::Cpu)?,
        };
        Ok(&*self.pre_processors.insert(pre))
    }

    /// CPU copy of the model's post-processors, taken on first use.
    pub fn post_processors(&mut self, model: &dyn Forecaster) -> Result<&Normalizer> {
        let post = match self.post_processors.take() {
            Some(post) => post,
            None => model.post_processors().to_device(&Device::Cpu)?,
        };
        Ok(&*self.post_processors.insert(post))
    }

    /// Data node coordinates in degrees.
    pub fn latlons(&mut self, model: &dyn Forecaster) -> Result<Arc<Vec<[f64; 2]>>> {
        let latlons = match self.latlons.take() {
            Some(latlons) => latlons,
            None => Arc::new(to_degrees(model.latlons())?),
        };
        Ok(Arc::clone(self.latlons.insert(latlons)))
    }

    pub fn plot(&self, trainer: &TrainerContext, job: PlotJob) -> Result<()> {
        self.dispatcher.plot(trainer.is_primary, job)
    }

    pub fn plot_inline(&self, trainer: &TrainerContext, job: PlotJob) -> Result<()> {
        self.dispatcher.plot_inline(trainer.is_primary, job)
    }

    pub fn teardown(&mut self) {
        self.dispatcher.teardown();
    }
}

/// Time index of the newest input step, `multi_step - 1`.
pub(crate) fn last_input_step(model: &dyn Forecaster) -> Result<usize> {
    model
        .multi_step()
        .checked_sub(1)
        .ok_or_else(|| DiagError::Config("model multi_step must be at least 1".to_string()))
}

/// Resolve configured names against the model outputs.
pub fn plot_parameters(names: &[String], model: &dyn Forecaster, config: &DiagConfig) -> Result<Vec<PlotParameter>> {
    let name_to_index = &model.data_indices().model.output.name_to_index;
    names
        .iter()
        .map(|name| {
            let index = *name_to_index
                .get(name)
                .ok_or_else(|| DiagError::UnknownParameter(name.clone()))?;
            Ok(PlotParameter {
                index,
                name: name.clone(),
                prognostic: !config.is_diagnostic(name),
            })
        })
        .collect()
}

pub(crate) fn sample_style(config: &DiagConfig) -> Result<SampleStyle> {
    let plot = &config.diagnostics.plot;
    let accumulation = if plot.accumulation_levels_plot.is_empty() {
        None
    } else {
        Some(AccumulationScale::new(
            &plot.accumulation_levels_plot,
            &plot.cmap_accumulation,
        )?)
    };
    Ok(SampleStyle {
        per_sample: plot.per_sample,
        accumulation,
        precip_fields: plot.precip_and_related_fields.clone(),
    })
}

/// Physical-unit host frames of one sample.
pub(crate) struct SampleFrames {
    /// `data[0]` is the last input step, `data[r + 1]` the target of rollout step `r`.
    pub data: Vec<Frame>,
    pub predictions: Vec<Frame>,
}

/// Slice sample `sample_idx` out of a raw batch and its normalised predictions.
pub(crate) fn sample_frames(
    base: &mut PlotBase,
    model: &dyn Forecaster,
    batch: &Tensor,
    predictions: &[Tensor],
    sample_idx: usize,
) -> Result<SampleFrames> {
    let (bs, time) = (batch.dim(0)?, batch.dim(1)?);
    if sample_idx >= bs {
        return Err(DiagError::Config(format!(
            "sample_idx {sample_idx} out of range for batch size {bs}"
        )));
    }
    let multi_step = model.multi_step();
    let input_step = last_input_step(model)?;
    let steps = predictions.len();
    let required = multi_step + steps;
    if time < required {
        return Err(DiagError::InsufficientBatch {
            available: time,
            required,
        });
    }

    let sample = batch
        .get(sample_idx)?
        .narrow(0, input_step, steps + 1)?
        .to_device(&Device::Cpu)?;
    let normalized = base.pre_processors(model)?.normalize(&sample)?;
    let ids = model.data_indices().data.output.full_ids(&Device::Cpu)?;
    let selected = normalized.index_select(&ids, D::Minus1)?;

    let post = base.post_processors(model)?;
    let physical = post.denormalize(&selected)?;
    let data = (0..=steps)
        .map(|t| -> Result<Frame> { Frame::from_tensor(&physical.get(t)?) })
        .collect::<Result<Vec<_>>>()?;
    let predictions = predictions
        .iter()
        .map(|p| -> Result<Frame> {
            let p = p.get(sample_idx)?.to_device(&Device::Cpu)?;
            Frame::from_tensor(&post.denormalize(&p)?)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(SampleFrames { data, predictions })
}

/// The callbacks enabled by `config`.
pub fn from_config(config: &DiagConfig, policy: FailurePolicy) -> Result<CallbackList> {
    config.validate()?;
    let loggers = sinks::from_config(&config.diagnostics.log);
    let base = |name: &str| PlotBase::new(name, config, loggers.clone(), policy);
    let plot = &config.diagnostics.plot;

    let mut list = CallbackList::default();
    if plot.enabled {
        list.push(Box::new(PlotSample::new(base("sample")?, config)?));
        list.push(Box::new(PlotLoss::new(base("loss")?, config)));
        if plot.parameters_histogram.is_some() || plot.parameters_spectrum.is_some() {
            list.push(Box::new(PlotAdditionalMetrics::new(base("metrics")?, config)));
        }
    }
    if plot.learned_features {
        list.push(Box::new(GraphNodeTrainableFeaturesPlot::new(base("node")?, config)));
        list.push(Box::new(GraphEdgeTrainableFeaturesPlot::new(base("edge")?)));
    }
    if plot.longrollout.enabled {
        list.push(Box::new(LongRolloutPlots::new(base("longrollout")?, config)?));
    }
    info!("Diagnostics callbacks: {:?}", list.names());
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    impl Callback for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn teardown(&mut self) -> Result<()> {
            Err(DiagError::WorkerLost)
        }
    }

    #[test]
    fn test_teardown_reaches_every_callback() {
        let mut list = CallbackList::default();
        list.push(Box::new(Failing));
        list.push(Box::new(Failing));
        assert_eq!(list.len(), 2);
        assert!(matches!(list.teardown(), Err(DiagError::WorkerLost)));
    }

    #[test]
    fn test_from_config_selects_callbacks() -> anyhow::Result<()> {
        let mut config = DiagConfig::default();
        config.diagnostics.plot.asynchronous = false;
        let list = from_config(&config, FailurePolicy::Propagate)?;
        assert_eq!(list.names(), vec!["PlotSample", "PlotLoss", "PlotAdditionalMetrics"]);

        config.diagnostics.plot.enabled = false;
        config.diagnostics.plot.learned_features = true;
        config.diagnostics.plot.longrollout.enabled = true;
        let list = from_config(&config, FailurePolicy::Propagate)?;
        assert_eq!(
            list.names(),
            vec![
                "GraphNodeTrainableFeaturesPlot",
                "GraphEdgeTrainableFeaturesPlot",
                "LongRolloutPlots"
            ]
        );

        config.diagnostics.plot.enabled = true;
        config.diagnostics.plot.learned_features = false;
        config.diagnostics.plot.longrollout.enabled = false;
        config.diagnostics.plot.parameters_histogram = None;
        config.diagnostics.plot.parameters_spectrum = None;
        assert_eq!(from_config(&config, FailurePolicy::Propagate)?.len(), 2);
        Ok(())
    }
}
