//! LongRolloutPlots - Sample maps after a rollout longer than the training one.
//!
//! Runs every `longrollout.frequency` epochs on batches selected by the plot
//! frequency. The batch must cover `multi_step + max(rollout)` time steps.

use std::sync::Arc;
use std::time::Instant;

use candle_core::{Device, Tensor, D};
use nimbus_core::{rollout_predictions, Forecaster};
use tracing::info;

use super::sample::SampleProducer;
use super::{
    last_input_step, plot_parameters, sample_style, Callback, PlotBase, TrainerContext, ValidationOutput,
};
use crate::config::DiagConfig;
use crate::dispatch::PlotJob;
use crate::error::{DiagError, Result};
use crate::output::FigureTarget;
use crate::plots::sample::SampleStyle;
use crate::plots::Frame;

pub struct LongRolloutPlots {
    base: PlotBase,
    config: DiagConfig,
    /// 1-based rollout lengths to plot.
    rollout: Vec<usize>,
    eval_frequency: usize,
    sample_idx: usize,
    style: Arc<SampleStyle>,
}

impl LongRolloutPlots {
    pub fn new(base: PlotBase, config: &DiagConfig) -> Result<Self> {
        let longrollout = &config.diagnostics.plot.longrollout;
        if longrollout.rollout.is_empty() {
            return Err(DiagError::Config("longrollout.rollout must not be empty".into()));
        }
        info!(
            "Setting up callback for plots with long rollout: rollout = {:?}, frequency = every {} epoch",
            longrollout.rollout, longrollout.frequency
        );
        Ok(Self {
            base,
            config: config.clone(),
            rollout: longrollout.rollout.clone(),
            eval_frequency: longrollout.frequency,
            sample_idx: config.diagnostics.plot.sample_idx,
            style: Arc::new(sample_style(config)?),
        })
    }

    fn plot_rollout(
        &mut self,
        trainer: &TrainerContext,
        model: &dyn Forecaster,
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
        let post = self.base.post_processors(model)?.clone();

        let multi_step = model.multi_step();
        let input_step = last_input_step(model)?;
        let max_rollout = self.rollout.iter().copied().max().unwrap_or(0);
        let available = batch.dim(1)?;
        let required = max_rollout + multi_step;
        if available < required {
            return Err(DiagError::InsufficientBatch { available, required });
        }
        if self.sample_idx >= batch.dim(0)? {
            return Err(DiagError::Config(format!(
                "sample_idx {} out of range for batch size {}",
                self.sample_idx,
                batch.dim(0)?
            )));
        }

        let normalized = model.pre_processors().normalize(batch)?;
        let output_ids = model.data_indices().data.output.full_ids(&Device::Cpu)?;
        let sample = normalized.get(self.sample_idx)?.to_device(&Device::Cpu)?;
        let frame_at = |t: usize| -> Result<Frame> {
            let step = sample.get(t)?.index_select(&output_ids, D::Minus1)?;
            Frame::from_tensor(&post.denormalize(&step)?)
        };
        let x = frame_at(input_step)?;

        let base = &self.base;
        let rollout = &self.rollout;
        let style = &self.style;
        let sample_idx = self.sample_idx;
        rollout_predictions(model, &normalized, max_rollout, |step, y_pred| -> Result<()> {
            if !rollout.contains(&(step + 1)) {
                return Ok(());
            }
            let y_true = frame_at(multi_step + step)?;
            let y_pred = y_pred.get(sample_idx)?.to_device(&Device::Cpu)?;
            let producer = SampleProducer {
                parameters: Arc::clone(&parameters),
                style: Arc::clone(style),
                latlons: Arc::clone(&latlons),
                x: x.clone(),
                y_true,
                y_pred: Frame::from_tensor(&post.denormalize(&y_pred)?)?,
            };
            let target = FigureTarget::new(
                format!("gnn_pred_val_sample_rstep{step:03}_batch{batch_idx:04}_rank0"),
                format!("val_pred_sample_rstep{step:03}_rank{}", trainer.local_rank),
                trainer.current_epoch,
            );
            base.plot(trainer, PlotJob::new(producer, target))
        })?;

        info!(
            "Time taken to plot samples after longer rollout: {:.2} seconds",
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }
}

impl Callback for LongRolloutPlots {
    fn name(&self) -> &str {
        "LongRolloutPlots"
    }

    fn on_validation_batch_end(
        &mut self,
        trainer: &TrainerContext,
        model: &dyn Forecaster,
        _outputs: &ValidationOutput,
        batch: &Tensor,
        batch_idx: usize,
    ) -> Result<()> {
        if !trainer.is_primary {
            return Ok(());
        }
        let epoch_due = self.eval_frequency > 0 && (trainer.current_epoch + 1) % self.eval_frequency == 0;
        if self.base.should_plot(batch_idx) && epoch_due {
            self.plot_rollout(trainer, model, batch, batch_idx)?;
        }
        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        self.base.teardown();
        Ok(())
    }
}
