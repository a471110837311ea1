//! PlotSample - Prediction maps of one validation sample per rollout step.

use std::sync::Arc;
use std::time::Instant;

use candle_core::Tensor;
use nimbus_core::Forecaster;
use tracing::debug;

use super::{plot_parameters, sample_frames, sample_style, Callback, PlotBase, TrainerContext, ValidationOutput};
use crate::config::DiagConfig;
use crate::dispatch::{PlotJob, PlotProducer};
use crate::error::Result;
use crate::figure::Figure;
use crate::output::FigureTarget;
use crate::plots::sample::SampleStyle;
use crate::plots::{plot_predicted_flat_sample, Frame, PlotParameter};

/// Owned inputs of one sample figure.
pub(crate) struct SampleProducer {
    pub parameters: Arc<Vec<PlotParameter>>,
    pub style: Arc<SampleStyle>,
    pub latlons: Arc<Vec<[f64; 2]>>,
    pub x: Frame,
    pub y_true: Frame,
    pub y_pred: Frame,
}

impl PlotProducer for SampleProducer {
    fn render(&self) -> Result<Figure> {
        plot_predicted_flat_sample(
            &self.parameters,
            &self.style,
            &self.latlons,
            &self.x,
            &self.y_true,
            &self.y_pred,
        )
    }
}

pub struct PlotSample {
    base: PlotBase,
    config: DiagConfig,
    sample_idx: usize,
    style: Arc<SampleStyle>,
}

impl PlotSample {
    pub fn new(base: PlotBase, config: &DiagConfig) -> Result<Self> {
        Ok(Self {
            base,
            config: config.clone(),
            sample_idx: config.diagnostics.plot.sample_idx,
            style: Arc::new(sample_style(config)?),
        })
    }

    fn plot_samples(
        &mut self,
        trainer: &TrainerContext,
        model: &dyn Forecaster,
        outputs: &ValidationOutput,
        batch: &Tensor,
        batch_idx: usize,
    ) -> Result<()> {
        let start = Instant::now();
        let parameters = Arc::new(plot_parameters(
            &self.config.diagnostics.plot.parameters,
            model,
            &self.config,
        )?);
        let latlons = self.base.latlons(model)?;
        let frames = sample_frames(
            &mut self.base,
            model,
            batch,
            &outputs.predictions,
            self.sample_idx,
        )?;

        for (rollout_step, y_pred) in frames.predictions.into_iter().enumerate() {
            let producer = SampleProducer {
                parameters: Arc::clone(&parameters),
                style: Arc::clone(&self.style),
                latlons: Arc::clone(&latlons),
                x: frames.data[0].clone(),
                y_true: frames.data[rollout_step + 1].clone(),
                y_pred,
            };
            let target = FigureTarget::new(
                format!("gnn_pred_val_sample_rstep{rollout_step:02}_batch{batch_idx:04}_rank0"),
                format!("val_pred_sample_rstep{rollout_step:02}_rank{}", trainer.local_rank),
                trainer.current_epoch,
            );
            self.base.plot(trainer, PlotJob::new(producer, target))?;
        }
        debug!("Sample plots for batch {} took {:?}", batch_idx, start.elapsed());
        Ok(())
    }
}

impl Callback for PlotSample {
    fn name(&self) -> &str {
        "PlotSample"
    }

    fn on_validation_batch_end(
        &mut self,
        trainer: &TrainerContext,
        model: &dyn Forecaster,
        outputs: &ValidationOutput,
        batch: &Tensor,
        batch_idx: usize,
    ) -> Result<()> {
        if !trainer.is_primary || !self.base.should_plot(batch_idx) {
            return Ok(());
        }
        self.plot_samples(trainer, model, outputs, batch, batch_idx)
    }

    fn teardown(&mut self) -> Result<()> {
        self.base.teardown();
        Ok(())
    }
}
